//! 引擎错误类型
//!
//! 单次工具调用与单轮的失败都被吸收进结构化结果 / 请求结局，不走错误通道；
//! 这里只承载必须中断驱动流程的错误，最外层统一转为 error 结局写入指标，
//! 绝不让请求循环悄悄崩掉。

use thiserror::Error;

use crate::llm::LlmError;

/// 驱动一次请求时可能中断流程的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 后端推理失败（已按可重试性分类）
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 请求被取消
    #[error("request cancelled")]
    Cancelled,

    /// 选不到可用后端等配置问题
    #[error("config error: {0}")]
    Config(String),
}
