//! 聊天补全后端（OpenAI 兼容）
//!
//! 直接以 reqwest + serde 拼线上格式调 /v1/chat/completions，携带
//! tools / tool_choice，回传 assistant 的 tool_calls。该协议没有会话与
//! 超时语义，每次调用施加墙钟期限（超时归一化为 LlmError::TimedOut，
//! 由引擎做降级处理）。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::history::{Role, Turn};
use crate::llm::traits::{
    BackendKind, LlmError, ModelBackend, ModelReply, RoundBudgets, ToolCallRequest, ToolSchema,
};

/// 线上格式：请求消息
#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// 线上格式：assistant 的工具调用（请求与响应共用）
#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    typ: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// 参数为 JSON 字符串（协议如此）
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireAssistantMessage,
}

#[derive(Debug, Deserialize)]
struct WireAssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

/// OpenAI 兼容后端：持有 base_url / api_key / 模型名与预算
pub struct ChatCompletionBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    budgets: RoundBudgets,
}

impl ChatCompletionBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        budgets: RoundBudgets,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            budgets,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Turn 序列映射为线上消息；system 指令始终放最前
    fn wire_messages(&self, system: &str, turns: &[Turn]) -> Vec<WireMessage> {
        let mut messages = vec![WireMessage {
            role: "system",
            content: Some(system.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }];
        for turn in turns {
            messages.push(match turn.role {
                Role::System => WireMessage {
                    role: "system",
                    content: Some(turn.content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                },
                Role::User => WireMessage {
                    role: "user",
                    content: Some(turn.content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                },
                Role::Assistant => WireMessage {
                    role: "assistant",
                    content: (!turn.content.is_empty()).then(|| turn.content.clone()),
                    tool_calls: (!turn.tool_calls.is_empty()).then(|| {
                        turn.tool_calls
                            .iter()
                            .map(|c| WireToolCall {
                                id: c.call_id.clone(),
                                typ: "function".to_string(),
                                function: WireFunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.args.to_string(),
                                },
                            })
                            .collect()
                    }),
                    tool_call_id: None,
                    name: None,
                },
                Role::Tool => WireMessage {
                    role: "tool",
                    content: Some(turn.content.clone()),
                    tool_calls: None,
                    tool_call_id: turn.tool_call_id.clone(),
                    name: turn.tool_name.clone(),
                },
            });
        }
        messages
    }
}

/// HTTP 状态码映射为 LlmError 分类
fn classify_status(status: u16, body: String) -> LlmError {
    match status {
        429 => LlmError::QuotaExhausted,
        500 | 502 | 503 | 504 => LlmError::Transient { status, message: body },
        _ => LlmError::Terminal { status, message: body },
    }
}

#[async_trait]
impl ModelBackend for ChatCompletionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ChatCompletion
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
        let mut body = json!({
            "model": self.model,
            "messages": self.wire_messages(system, turns),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let deadline = self.budgets.request_timeout.unwrap_or(Duration::from_secs(120));
        request = request.timeout(deadline);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::TimedOut
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), text));
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("{e}; body: {}", text)))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                // 参数是 JSON 字符串；解析失败按空对象处理，交给工具侧校验报错
                let args =
                    serde_json::from_str(&c.function.arguments).unwrap_or_else(|_| json!({}));
                ToolCallRequest {
                    call_id: if c.id.is_empty() { c.function.name.clone() } else { c.id },
                    name: c.function.name,
                    args,
                }
            })
            .collect();

        Ok(ModelReply {
            text: message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ChatCompletionBackend {
        ChatCompletionBackend::new(
            "https://api.example.com/",
            Some("sk-test".to_string()),
            "deepseek-v3",
            RoundBudgets {
                max_tool_rounds: 8,
                max_total_tool_calls: 24,
                request_timeout: Some(Duration::from_secs(120)),
            },
        )
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(backend().endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_wire_messages_roundtrip_tool_turns() {
        let turns = vec![
            Turn::user("share the report"),
            Turn::assistant_with_calls(
                "",
                vec![ToolCallRequest {
                    call_id: "call-1".to_string(),
                    name: "create_drive_public_link".to_string(),
                    args: json!({"file": "report"}),
                }],
            ),
            Turn::tool("create_drive_public_link", "call-1", r#"{"success":true}"#),
        ];
        let messages = backend().wire_messages("sys", &turns);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        let assistant = &messages[2];
        assert_eq!(assistant.role, "assistant");
        assert!(assistant.content.is_none());
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "create_drive_public_link");
        assert_eq!(calls[0].function.arguments, r#"{"file":"report"}"#);
        let tool = &messages[3];
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(tool.name.as_deref(), Some("create_drive_public_link"));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, String::new()), LlmError::QuotaExhausted));
        assert!(matches!(classify_status(503, String::new()), LlmError::Transient { status: 503, .. }));
        assert!(matches!(classify_status(401, String::new()), LlmError::Terminal { status: 401, .. }));
    }

    #[test]
    fn test_parse_tool_call_response() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c9",
                        "type": "function",
                        "function": {"name": "add_event", "arguments": "{\"summary\":\"sync\"}"}
                    }]
                }
            }]
        }"#;
        let parsed: WireResponse = serde_json::from_str(body).unwrap();
        let message = parsed.choices.into_iter().next().unwrap().message;
        let calls = message.tool_calls.unwrap();
        assert_eq!(calls[0].id, "c9");
        assert_eq!(calls[0].function.name, "add_event");
    }
}
