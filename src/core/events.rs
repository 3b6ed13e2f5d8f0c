//! 引擎过程事件：用于流式展示推理、工具调用、观察与回复

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 开始新一轮推理（当前工具轮数 / 上限）
    RoundStarted { round: u32, max_rounds: u32 },
    /// 正在调用模型
    Thinking,
    /// 模型请求调用工具
    ToolCall {
        tool: String,
        args_preview: String,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 追加说明（Provider 不可用通知等）
    Notice { text: String },
    /// 最终回复完成
    MessageDone { text: String },
    /// 错误
    Error { text: String },
}

/// 事件发送：没有接收端时静默丢弃
pub(crate) fn send_event(
    tx: &Option<&tokio::sync::mpsc::UnboundedSender<EngineEvent>>,
    ev: EngineEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
