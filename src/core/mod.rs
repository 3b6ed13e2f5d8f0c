//! 核心编排层：轮循环引擎、历史、后处理、参数修复、指标与错误

pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod metrics;
pub mod postprocess;
pub mod repair;

pub use engine::{ChatEngine, RoundState};
pub use error::AgentError;
pub use events::EngineEvent;
pub use history::{Role, Turn};
pub use metrics::{
    JsonlMetricsSink, MemoryMetricsSink, MetricsSink, OutcomeBuilder, RequestOutcome,
    RequestStatus,
};
