//! 请求指标
//!
//! 每个请求恰好产出一条 RequestOutcome：无论正常完成、预算耗尽还是意外
//! 出错，终结器都会组装并交给 MetricsSink。OutcomeBuilder 是请求期间的
//! 累积状态（调用过的工具、错误清单、分享链接、自动邀请的 ran-once 标记），
//! 集中放在这里让「只跑一次」这类保证可以单独测试。

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 请求最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    SuccessWithToolErrors,
    Error,
}

/// 单请求指标记录（JSONL 一行）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub timestamp: String,
    pub request_id: String,
    pub model: String,
    pub user_question: String,
    pub duration_seconds: f64,
    pub invoked_tools: Vec<String>,
    pub invoked_providers: Vec<String>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub tool_errors: Vec<String>,
    /// 最终回复文本（不落指标文件）
    #[serde(skip)]
    pub final_text: String,
}

/// 生成请求 id：时间戳 + 随机后缀，并发请求下防碰撞
pub fn new_request_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}

/// 请求期间的结局累积状态；终结器调用 finish 收口
pub struct OutcomeBuilder {
    started: Instant,
    request_id: String,
    model: String,
    user_question: String,
    pub invoked_tools: Vec<String>,
    pub invoked_providers: BTreeSet<String>,
    pub tool_errors: Vec<String>,
    pub error_message: Option<String>,
    /// 分享类工具在本请求中产出的 URL（按出现顺序）
    pub share_urls: Vec<String>,
    /// 最近一次成功的 add_event 参数（自动邀请的素材）
    pub last_event_args: Option<Value>,
    /// 最近一次成功的工具调用（名字, 原始输出），超时降级时回放
    pub last_successful_tool: Option<(String, String)>,
    /// 自动邀请是否已执行过（每请求最多一次）
    pub invites_attempted: bool,
}

impl OutcomeBuilder {
    pub fn new(model: impl Into<String>, user_question: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            request_id: new_request_id(),
            model: model.into(),
            user_question: user_question.into(),
            invoked_tools: Vec::new(),
            invoked_providers: BTreeSet::new(),
            tool_errors: Vec::new(),
            error_message: None,
            share_urls: Vec::new(),
            last_event_args: None,
            last_successful_tool: None,
            invites_attempted: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// 登记一次工具调用（计数与 Provider 汇总）
    pub fn record_invocation(&mut self, tool: &str, provider: &str) {
        self.invoked_tools.push(tool.to_string());
        self.invoked_providers.insert(provider.to_string());
    }

    /// 登记一条工具错误；首条错误兼作请求级 error_message
    pub fn record_tool_error(&mut self, label: String) {
        if self.error_message.is_none() {
            self.error_message = Some(label.clone());
        }
        self.tool_errors.push(label);
    }

    /// 收口：套用状态修正规则后产出 RequestOutcome
    ///
    /// success 但带工具错误 -> success_with_tool_errors；
    /// error_message 缺失时用工具错误清单兜底。
    pub fn finish(self, status: RequestStatus, final_text: String) -> RequestOutcome {
        let status = if status == RequestStatus::Success && !self.tool_errors.is_empty() {
            RequestStatus::SuccessWithToolErrors
        } else {
            status
        };
        let error_message = self.error_message.or_else(|| {
            (!self.tool_errors.is_empty()).then(|| self.tool_errors.join("; "))
        });
        RequestOutcome {
            timestamp: Local::now().to_rfc3339(),
            request_id: self.request_id,
            model: self.model,
            user_question: self.user_question,
            duration_seconds: self.started.elapsed().as_secs_f64(),
            invoked_tools: self.invoked_tools,
            invoked_providers: self.invoked_providers.into_iter().collect(),
            status,
            error_message,
            tool_errors: self.tool_errors,
            final_text,
        }
    }
}

/// 指标接收端：每请求一条记录，只追加
pub trait MetricsSink: Send + Sync {
    fn record(&self, outcome: &RequestOutcome);
}

/// JSONL 文件指标：写失败只记日志，绝不影响请求本身
pub struct JsonlMetricsSink {
    path: PathBuf,
}

impl JsonlMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn record(&self, outcome: &RequestOutcome) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                let line = serde_json::to_string(outcome).unwrap_or_default();
                writeln!(file, "{}", line)
            });
        if let Err(e) = result {
            tracing::error!("Failed to save metrics: {}", e);
        }
    }
}

/// 内存指标（测试用）
#[derive(Default)]
pub struct MemoryMetricsSink {
    records: Mutex<Vec<RequestOutcome>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RequestOutcome> {
        self.records.lock().unwrap().clone()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn record(&self, outcome: &RequestOutcome) {
        self.records.lock().unwrap().push(outcome.clone());
    }
}
