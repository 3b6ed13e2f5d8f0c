//! Tool Provider 抽象
//!
//! Provider 是一组具名工具的宿主（mail / calendar / drive 等），由外部进程
//! 负责启停；引擎只依赖这个接口：list_tools 报告工具清单（首次调用即启动，
//! 失败视为该 Provider 不可用），invoke 按名调用。Provider 名即意图领域名，
//! 工具目录过滤以此为键。

use async_trait::async_trait;
use serde_json::Value;

/// 工具描述：目录发现时创建，provider 字段由所属 Provider 填写
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// 工具名（目录内唯一）
    pub name: String,
    /// 工具用途描述（供模型理解）
    pub description: String,
    /// 参数 JSON Schema
    pub input_schema: Value,
    /// 所属 Provider 名
    pub provider: String,
}

/// Provider trait：启动即列出工具，调用无共享状态，支持并发
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider 名（同时作为意图领域名）
    fn name(&self) -> &str;

    /// 启动并列出全部工具；Err 表示 Provider 启动失败（整体不可用）
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String>;

    /// 调用指定工具；Err 为调用异常文本（网络、参数校验等）
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<String, String>;
}
