//! 工具结果归一化
//!
//! 各 Provider 的工具各自实现，输出形态不可信：可能是结构化 JSON、
//! 报错文本或任意字符串。这里统一收敛为 ToolResult 合同再写回对话：
//! (1) 调用异常 -> success=false, error_code="tool_exception"；
//! (2) 结构化 JSON（success / data / result / error 字段）-> 按字段提取；
//! (3) 已知报错文本形态 -> success=false, error_code="tool_error_text"；
//! (4) 其余 -> success=true, data.text=原文。
//! 文本嗅探是针对无合同旧工具的兜底，分类器集中在本模块、单独测试。

use serde_json::{json, Value};

use crate::text::{extract_urls, normalize_content, truncate_for_model};

/// 归一化后的工具结果：不变式 success=false 当且仅当 error_code 非空
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_name: String,
    pub provider_name: String,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub data: Value,
    pub raw_text: String,
}

impl ToolResult {
    /// 写回对话的模型侧载荷：{success, error, data:{text(截断), urls}}
    pub fn model_payload(&self, max_chars: usize) -> Value {
        let data_text = normalize_content(&self.data);
        let mut payload = json!({
            "success": self.success,
            "error": Value::Null,
            "data": {
                "text": truncate_for_model(&data_text, max_chars),
                "urls": extract_urls(&data_text),
            },
        });
        if !self.success {
            payload["error"] = json!({
                "code": self.error_code,
                "message": self.error_message,
            });
        }
        payload
    }

    /// raw_text 与 data 中出现的全部 URL，按出现顺序去重
    pub fn surfaced_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for candidate in [self.raw_text.clone(), normalize_content(&self.data)] {
            for url in extract_urls(&candidate) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        urls
    }

    /// 工具错误清单里的一行：`tool: message`，没有 message 时退回原文
    pub fn error_label(&self) -> String {
        let detail = self
            .error_message
            .clone()
            .unwrap_or_else(|| self.raw_text.clone());
        format!("{}: {}", self.tool_name, detail)
    }
}

/// 原始文本是否呈已知报错形态（无合同旧工具的兜底判定）
pub fn looks_like_error_text(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    lowered.starts_with("error:")
        || lowered.starts_with("search failed:")
        || lowered.starts_with("fetch failed:")
        || lowered.starts_with("drive api request failed:")
}

/// 仅当整段文本是一个 JSON 对象时解析，否则返回 None
fn parse_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.is_object())
}

/// 把一次调用的原始输出（或异常）归一化为 ToolResult
pub fn normalize(
    tool_name: &str,
    provider_name: &str,
    raw_text: &str,
    exception: Option<&str>,
) -> ToolResult {
    let mut result = ToolResult {
        tool_name: tool_name.to_string(),
        provider_name: provider_name.to_string(),
        success: true,
        error_code: None,
        error_message: None,
        data: json!({ "text": raw_text }),
        raw_text: raw_text.to_string(),
    };

    if let Some(exc) = exception {
        result.success = false;
        result.error_code = Some("tool_exception".to_string());
        result.error_message = Some(exc.to_string());
        return result;
    }

    if let Some(parsed) = parse_json_object(raw_text) {
        if let Some(flag) = parsed.get("success").and_then(Value::as_bool) {
            result.success = flag;
        }
        if let Some(data) = parsed.get("data") {
            result.data = data.clone();
        } else if let Some(data) = parsed.get("result") {
            result.data = data.clone();
        }
        if let Some(error_obj) = parsed.get("error").filter(|v| v.is_object()) {
            let code = normalize_content(&error_obj["code"]);
            let message = normalize_content(&error_obj["message"]);
            result.error_code = (!code.is_empty()).then_some(code);
            result.error_message = (!message.is_empty()).then_some(message);
            if result.error_message.is_some() {
                result.success = false;
            }
        }
        if result.error_message.is_none() {
            if let Some(message) = parsed.get("error_message").filter(|v| !v.is_null()) {
                result.error_message = Some(normalize_content(message));
                result.success = false;
            }
        }
        if !result.success && result.error_code.is_none() {
            result.error_code = Some("tool_error".to_string());
        }
        return result;
    }

    if looks_like_error_text(raw_text) {
        result.success = false;
        result.error_code = Some("tool_error_text".to_string());
        result.error_message = Some(raw_text.to_string());
    }
    result
}
