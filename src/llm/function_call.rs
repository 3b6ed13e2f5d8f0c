//! 函数调用后端（Gemini 风格）
//!
//! reqwest 直连 generateContent：system_instruction 单独携带，assistant
//! 角色映射为 model，工具结果以 functionResponse parts 回传（同一轮的
//! 连续 tool 轮合并为一个 content）。工具 schema 先做净化（去掉
//! title / default，Gemini 的 schema 校验不认）。瞬态 5xx 在后端内部
//! 按指数退避有限重试；429 视为配额耗尽，不重试。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::history::{Role, Turn};
use crate::llm::traits::{
    BackendKind, LlmError, ModelBackend, ModelReply, RoundBudgets, ToolCallRequest, ToolSchema,
};

/// 默认 API 地址
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// 可重试的瞬态状态码
const TRANSIENT_STATUS: [u16; 4] = [500, 502, 503, 504];

/// 瞬态错误重试策略（命名配置，不在代码里猜阈值）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Gemini 风格后端
pub struct FunctionCallBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    budgets: RoundBudgets,
    retry: RetryPolicy,
}

impl FunctionCallBackend {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        budgets: RoundBudgets,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            budgets,
            retry,
        }
    }

    /// 覆盖 API 地址（测试 / 代理）
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Turn 序列映射为 contents：assistant -> model，连续 tool 轮合并为
    /// 一个 role=tool 的 content（functionResponse parts 按原顺序排列）
    fn wire_contents(&self, turns: &[Turn]) -> Vec<Value> {
        let mut contents: Vec<Value> = Vec::new();
        let mut pending_responses: Vec<Value> = Vec::new();

        for turn in turns {
            if turn.role == Role::Tool {
                let response = serde_json::from_str::<Value>(&turn.content)
                    .unwrap_or_else(|_| json!({ "text": turn.content }));
                pending_responses.push(json!({
                    "functionResponse": {
                        "name": turn.tool_name.clone().unwrap_or_default(),
                        "response": response,
                    },
                }));
                continue;
            }
            if !pending_responses.is_empty() {
                contents.push(json!({
                    "role": "tool",
                    "parts": std::mem::take(&mut pending_responses),
                }));
            }
            match turn.role {
                Role::Assistant => {
                    let mut parts: Vec<Value> = Vec::new();
                    if !turn.content.is_empty() {
                        parts.push(json!({ "text": turn.content }));
                    }
                    for call in &turn.tool_calls {
                        parts.push(json!({
                            "functionCall": { "name": call.name, "args": call.args },
                        }));
                    }
                    if parts.is_empty() {
                        parts.push(json!({ "text": "" }));
                    }
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
                _ => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{ "text": turn.content }],
                    }));
                }
            }
        }
        if !pending_responses.is_empty() {
            contents.push(json!({ "role": "tool", "parts": pending_responses }));
        }
        contents
    }

    async fn generate_once(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, LlmError> {
        let mut body = json!({
            "system_instruction": { "parts": [{ "text": system }] },
            "contents": self.wire_contents(turns),
        });
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": sanitize_schema(&t.parameters),
                    })
                })
                .collect();
            body["tools"] = json!([{ "function_declarations": declarations }]);
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        if status == 429 {
            return Err(LlmError::QuotaExhausted);
        }
        if TRANSIENT_STATUS.contains(&status) {
            return Err(LlmError::Transient { status, message: text });
        }
        if !(200..300).contains(&status) {
            return Err(LlmError::Terminal { status, message: text });
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("{e}; body: {}", text)))?;
        Ok(extract_reply(&parsed))
    }
}

/// 递归去掉 schema 中的 title / default 键
pub(crate) fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| key.as_str() != "title" && key.as_str() != "default")
                .map(|(key, value)| (key.clone(), sanitize_schema(value)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

/// 从响应里拿第一候选的文本 parts 与 functionCall parts
fn extract_reply(response: &Value) -> ModelReply {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
    for part in &parts {
        if let Some(t) = part["text"].as_str() {
            text_parts.push(t.to_string());
        }
        if let Some(call) = part.get("functionCall") {
            let name = call["name"].as_str().unwrap_or_default().to_string();
            tool_calls.push(ToolCallRequest {
                call_id: format!("{}-{}", name, tool_calls.len() + 1),
                name,
                args: call.get("args").cloned().unwrap_or_else(|| json!({})),
            });
        }
    }
    ModelReply {
        text: text_parts.concat(),
        tool_calls,
    }
}

#[async_trait]
impl ModelBackend for FunctionCallBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FunctionCall
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn budgets(&self) -> RoundBudgets {
        self.budgets
    }

    async fn generate(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, LlmError> {
        let mut attempt = 1;
        loop {
            match self.generate_once(system, turns, tools).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Transient model API error ({}), retry {}/{} in {:?}",
                        e,
                        attempt,
                        self.retry.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_schema_strips_title_and_default() {
        let schema = json!({
            "title": "EchoArgs",
            "type": "object",
            "properties": {
                "text": { "type": "string", "default": "", "title": "text" },
                "tags": { "type": "array", "items": { "title": "t", "type": "string" } },
            },
        });
        let cleaned = sanitize_schema(&schema);
        assert!(cleaned.get("title").is_none());
        assert!(cleaned["properties"]["text"].get("default").is_none());
        assert!(cleaned["properties"]["text"].get("title").is_none());
        assert!(cleaned["properties"]["tags"]["items"].get("title").is_none());
        assert_eq!(cleaned["properties"]["text"]["type"], "string");
    }

    #[test]
    fn test_wire_contents_maps_roles_and_merges_tool_turns() {
        let backend = FunctionCallBackend::new(
            "key",
            "gemini-2.5-flash",
            RoundBudgets {
                max_tool_rounds: 6,
                max_total_tool_calls: 12,
                request_timeout: None,
            },
            RetryPolicy::default(),
        );
        let turns = vec![
            Turn::user("book a room"),
            Turn::assistant_with_calls(
                "",
                vec![
                    ToolCallRequest {
                        call_id: "add_event-1".to_string(),
                        name: "add_event".to_string(),
                        args: json!({"summary": "sync"}),
                    },
                    ToolCallRequest {
                        call_id: "echo-2".to_string(),
                        name: "echo".to_string(),
                        args: json!({"text": "x"}),
                    },
                ],
            ),
            Turn::tool("add_event", "add_event-1", r#"{"success":true}"#),
            Turn::tool("echo", "echo-2", r#"{"success":true}"#),
        ];
        let contents = backend.wire_contents(&turns);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "add_event");
        assert_eq!(contents[2]["role"], "tool");
        let parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["functionResponse"]["name"], "add_event");
        assert_eq!(parts[1]["functionResponse"]["name"], "echo");
    }

    #[test]
    fn test_extract_reply_text_and_calls() {
        let response = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Let me check." },
                        { "functionCall": { "name": "search_place", "args": { "query": "cafe" } } },
                    ],
                },
            }],
        });
        let reply = extract_reply(&response);
        assert_eq!(reply.text, "Let me check.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "search_place");
        assert_eq!(reply.tool_calls[0].args["query"], "cafe");
    }

    #[test]
    fn test_extract_reply_empty_candidates() {
        let reply = extract_reply(&json!({}));
        assert!(reply.text.is_empty());
        assert!(reply.tool_calls.is_empty());
    }
}
