//! 文本工具
//!
//! 工具返回值与历史消息的内容形态不可控（字符串 / 嵌套 JSON / 数组），
//! normalize_content 把任意 JSON 值压平为一段文本；另提供 URL 提取、
//! 发给模型前的截断与日志预览。

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// 发给模型的单条工具结果上限字符数，超出部分截断
pub const MAX_TOOL_CONTENT_CHARS: usize = 5000;
/// 日志预览默认字符数
const LOG_PREVIEW_CHARS: usize = 200;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()"']+"#).unwrap());

/// 把任意 JSON 值压平为文本：字符串原样；对象优先取 text / content / value 键；
/// 数组逐项压平后按行拼接；其余值序列化为 JSON
pub fn normalize_content(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                return text.clone();
            }
            if let Some(inner) = map.get("content") {
                return normalize_content(inner);
            }
            if let Some(inner) = map.get("value") {
                return normalize_content(inner);
            }
            serde_json::to_string(value).unwrap_or_default()
        }
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(normalize_content)
                .filter(|t| !t.is_empty())
                .collect();
            parts.join("\n")
        }
    }
}

/// 提取文本中的 URL，去掉尾部标点（`.,;:)]}`）
pub fn extract_urls(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    URL_PATTERN
        .find_iter(text)
        .filter_map(|m| {
            let cleaned = m.as_str().trim_end_matches(['.', ',', ';', ':', ')', ']', '}']);
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned.to_string())
            }
        })
        .collect()
}

/// 截断发给模型的工具内容，超出 limit 时追加截断标记
pub fn truncate_for_model(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}\n\n[Truncated for model context]", head.trim_end())
}

/// 单行日志预览：压平换行，超长截断加省略号
pub fn log_preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= LOG_PREVIEW_CHARS {
        return flat.to_string();
    }
    let head: String = flat.chars().take(LOG_PREVIEW_CHARS - 3).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_content_string_passthrough() {
        assert_eq!(normalize_content(&json!("hello")), "hello");
        assert_eq!(normalize_content(&Value::Null), "");
    }

    #[test]
    fn test_normalize_content_nested_keys() {
        assert_eq!(normalize_content(&json!({"text": "a"})), "a");
        assert_eq!(normalize_content(&json!({"content": {"text": "b"}})), "b");
        assert_eq!(normalize_content(&json!({"value": 42})), "42");
    }

    #[test]
    fn test_normalize_content_array_joined() {
        let v = json!([{"text": "one"}, "two", ""]);
        assert_eq!(normalize_content(&v), "one\ntwo");
    }

    #[test]
    fn test_extract_urls_strips_trailing_punctuation() {
        let urls = extract_urls("see https://example.com/a), and https://example.com/b.");
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn test_truncate_for_model_marks_truncation() {
        let long = "x".repeat(60);
        let out = truncate_for_model(&long, 50);
        assert!(out.ends_with("[Truncated for model context]"));
        assert!(truncate_for_model("short", 50).eq("short"));
    }

    #[test]
    fn test_log_preview_flattens_newlines() {
        let p = log_preview("a\nb\nc");
        assert_eq!(p, "a b c");
    }
}
