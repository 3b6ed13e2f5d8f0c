//! Mock 模型后端（用于测试，无需 API）
//!
//! 按脚本顺序出牌：每次 generate 弹出一条预设回复（文本 / 工具调用 /
//! 错误），脚本耗尽后回落为固定文本。引擎的轮循环、预算与降级路径
//! 都靠它来测。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::history::Turn;
use crate::llm::traits::{
    BackendKind, LlmError, ModelBackend, ModelReply, RoundBudgets, ToolCallRequest, ToolSchema,
};

/// 脚本化后端：kind 与预算都可指定，方便扮演任一协议
pub struct MockBackend {
    kind: BackendKind,
    model: String,
    budgets: RoundBudgets,
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
}

impl MockBackend {
    pub fn new(
        kind: BackendKind,
        model: impl Into<String>,
        budgets: RoundBudgets,
        script: Vec<Result<ModelReply, LlmError>>,
    ) -> Self {
        Self {
            kind,
            model: model.into(),
            budgets,
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// 纯文本回复
    pub fn text_reply(text: impl Into<String>) -> Result<ModelReply, LlmError> {
        Ok(ModelReply {
            text: text.into(),
            tool_calls: Vec::new(),
        })
    }

    /// 工具调用回复
    pub fn tool_reply(calls: Vec<ToolCallRequest>) -> Result<ModelReply, LlmError> {
        Ok(ModelReply {
            text: String::new(),
            tool_calls: calls,
        })
    }

    /// 剩余未消费的脚本条数
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn budgets(&self) -> RoundBudgets {
        self.budgets
    }

    async fn generate(
        &self,
        _system: &str,
        _turns: &[Turn],
        _tools: &[ToolSchema],
    ) -> Result<ModelReply, LlmError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockBackend::text_reply("(mock script exhausted)"))
    }
}
