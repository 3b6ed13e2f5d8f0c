//! 模型后端抽象
//!
//! 两种后端协议（函数调用式 / 聊天补全式）实现同一个 ModelBackend trait：
//! generate 接收当前对话 + 工具 schema，返回最终文本或一组工具调用请求。
//! 轮次预算随后端走（策略对象）：两种协议的单次调用开销与上下文增长
//! 特性不同，上限不能共用一套数。LlmError 按可重试性分类，引擎据此
//! 决定重试、降级还是立刻出错。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::history::Turn;

/// 后端协议种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// 原生函数调用协议（Gemini 风格）
    FunctionCall,
    /// OpenAI 兼容聊天补全协议
    ChatCompletion,
}

/// 按模型名选择后端协议：gemini 系列走函数调用，其余走聊天补全
pub fn backend_kind_for_model(model: &str) -> BackendKind {
    if model.starts_with("gemini") {
        BackendKind::FunctionCall
    } else {
        BackendKind::ChatCompletion
    }
}

/// 暴露给模型的工具声明
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 调用 id（聊天补全协议回传用；函数调用协议由后端合成）
    pub call_id: String,
    pub name: String,
    pub args: Value,
}

/// 一次推理的产出：无工具请求时 text 即最终回复
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// 后端错误，按可重试性分类
#[derive(Error, Debug)]
pub enum LlmError {
    /// 单次调用超出墙钟期限（仅聊天补全协议设置期限）
    #[error("model API request timed out")]
    TimedOut,

    /// 配额耗尽（429），不重试
    #[error("model API quota is exhausted")]
    QuotaExhausted,

    /// 瞬态故障（5xx 类），可有限重试
    #[error("transient model API error ({status}): {message}")]
    Transient { status: u16, message: String },

    /// 终态故障（鉴权、请求格式等），立刻上抛
    #[error("model API error ({status}): {message}")]
    Terminal { status: u16, message: String },

    /// 响应形态不合法
    #[error("invalid model API response: {0}")]
    InvalidResponse(String),

    /// 网络层错误
    #[error("network error: {0}")]
    Network(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient { .. })
    }
}

/// 后端专属的轮次预算
#[derive(Debug, Clone, Copy)]
pub struct RoundBudgets {
    /// 单次请求内允许的工具轮上限（连续带工具请求的响应数）
    pub max_tool_rounds: u32,
    /// 单次请求内的工具调用总预算
    pub max_total_tool_calls: u32,
    /// 单次后端调用的墙钟期限；None 表示协议自带会话语义、不设期限
    pub request_timeout: Option<Duration>,
}

/// 模型后端：协议差异封装在实现里，轮循环只面向这个接口
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// 协议种类
    fn kind(&self) -> BackendKind;

    /// 模型名（写入指标）
    fn model(&self) -> &str;

    /// 本后端的轮次预算
    fn budgets(&self) -> RoundBudgets;

    /// 一次推理：携带 system 指令、当前对话与工具声明
    async fn generate(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_for_model() {
        assert_eq!(backend_kind_for_model("gemini-2.5-flash"), BackendKind::FunctionCall);
        assert_eq!(backend_kind_for_model("deepseek-v3"), BackendKind::ChatCompletion);
        assert_eq!(backend_kind_for_model("glm-5"), BackendKind::ChatCompletion);
    }

    #[test]
    fn test_llm_error_transient_classification() {
        assert!(LlmError::Transient { status: 503, message: String::new() }.is_transient());
        assert!(!LlmError::Terminal { status: 401, message: String::new() }.is_transient());
        assert!(!LlmError::QuotaExhausted.is_transient());
        assert!(!LlmError::TimedOut.is_transient());
    }
}
