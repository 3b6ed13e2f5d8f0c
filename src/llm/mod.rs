//! 模型后端层：抽象与实现（函数调用式 / 聊天补全式 / Mock）

pub mod chat_completion;
pub mod function_call;
pub mod mock;
pub mod traits;

use std::sync::Arc;

pub use chat_completion::ChatCompletionBackend;
pub use function_call::{FunctionCallBackend, RetryPolicy};
pub use mock::MockBackend;
pub use traits::{
    backend_kind_for_model, BackendKind, LlmError, ModelBackend, ModelReply, RoundBudgets,
    ToolCallRequest, ToolSchema,
};

use crate::config::AppConfig;

/// 按配置与环境变量组装两种后端：
/// API_KEY -> 聊天补全（OpenAI 兼容端点），GEMINI_API_KEY -> 函数调用。
/// 对应 Key 缺失的后端不创建，请求时选不到会得到明确错误。
pub fn create_backends_from_config(cfg: &AppConfig) -> Vec<Arc<dyn ModelBackend>> {
    let mut backends: Vec<Arc<dyn ModelBackend>> = Vec::new();

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        tracing::info!("Using function-call backend ({})", cfg.llm.gemini_model);
        backends.push(Arc::new(FunctionCallBackend::new(
            key,
            &cfg.llm.gemini_model,
            cfg.budgets.function_call.to_budgets(None),
            RetryPolicy {
                max_attempts: cfg.llm.retry.max_attempts,
                base_delay: std::time::Duration::from_millis(cfg.llm.retry.base_delay_ms),
            },
        )));
    }

    if let Ok(key) = std::env::var("API_KEY") {
        tracing::info!("Using chat-completion backend ({})", cfg.llm.chat_model);
        backends.push(Arc::new(ChatCompletionBackend::new(
            &cfg.llm.base_url,
            Some(key),
            &cfg.llm.chat_model,
            cfg.budgets.chat_completion.to_budgets(Some(
                std::time::Duration::from_secs(cfg.llm.request_timeout_secs),
            )),
        )));
    }

    if backends.is_empty() {
        tracing::warn!("No API key set (API_KEY / GEMINI_API_KEY), model backends unavailable");
    }
    backends
}
