//! Demo Provider（本地演示 / 测试用）
//!
//! 不依赖任何外部服务：echo 回显文本，current_time 返回本地时间。
//! 参数 schema 由 schemars 从参数结构体导出，保证与实际解析一致。

use async_trait::async_trait;
use chrono::Local;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::tools::provider::{ToolDescriptor, ToolProvider};

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本
    text: String,
}

/// 演示 Provider：echo 与 current_time 两个工具
pub struct EchoProvider;

#[async_trait]
impl ToolProvider for EchoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        let echo_schema = serde_json::to_value(schema_for!(EchoArgs))
            .map_err(|e| format!("schema export failed: {e}"))?;
        Ok(vec![
            ToolDescriptor {
                name: "echo".to_string(),
                description: "Echo text back (for testing)".to_string(),
                input_schema: echo_schema,
                provider: self.name().to_string(),
            },
            ToolDescriptor {
                name: "current_time".to_string(),
                description: "Current local date and time".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
                provider: self.name().to_string(),
            },
        ])
    }

    async fn invoke(&self, tool_name: &str, args: Value) -> Result<String, String> {
        match tool_name {
            "echo" => {
                let parsed: EchoArgs =
                    serde_json::from_value(args).map_err(|e| format!("invalid args: {e}"))?;
                Ok(parsed.text)
            }
            "current_time" => Ok(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let provider = EchoProvider;
        let tools = provider.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        let out = provider.invoke("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_invalid_args_is_call_error() {
        let provider = EchoProvider;
        let err = provider.invoke("echo", json!({"nope": 1})).await.unwrap_err();
        assert!(err.contains("invalid args"));
    }
}
