//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CLERK__*` 覆盖（双下划线表示嵌套，
//! 如 `CLERK__LLM__BASE_URL=https://...`）。预算与重试阈值全部是命名配置，
//! 不在代码里硬编码猜测。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::traits::RoundBudgets;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub budgets: BudgetsSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// [app] 段：应用名、默认模型、system 基础指令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// REPL 默认模型名，决定走哪种后端协议
    #[serde(default = "default_model")]
    pub default_model: String,
    /// system prompt 基础指令
    #[serde(default = "default_instruction")]
    pub base_instruction: String,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_instruction() -> String {
    "You are a helpful office assistant. You can access mail, calendar, contacts, \
     file storage, documents and maps through the available tools."
        .to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            default_model: default_model(),
            base_instruction: default_instruction(),
        }
    }
}

/// [llm] 段：端点、模型名、单次调用期限与瞬态重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// OpenAI 兼容端点
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 聊天补全协议用的模型名
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// 函数调用协议用的模型名
    #[serde(default = "default_model")]
    pub gemini_model: String,
    /// 聊天补全协议单次调用墙钟期限（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySection,
}

fn default_base_url() -> String {
    "https://ai.sumopod.com".to_string()
}

fn default_chat_model() -> String {
    "deepseek-v3-2-251201".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            gemini_model: default_model(),
            request_timeout_secs: default_request_timeout(),
            retry: RetrySection::default(),
        }
    }
}

/// [llm.retry] 段：瞬态后端错误的重试次数与退避基数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// [budgets] 段：两种后端协议各自的轮次预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetsSection {
    #[serde(default = "default_function_call_budget")]
    pub function_call: BudgetSection,
    #[serde(default = "default_chat_completion_budget")]
    pub chat_completion: BudgetSection,
}

impl Default for BudgetsSection {
    fn default() -> Self {
        Self {
            function_call: default_function_call_budget(),
            chat_completion: default_chat_completion_budget(),
        }
    }
}

/// 单个后端的预算配置
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BudgetSection {
    pub max_tool_rounds: u32,
    pub max_total_tool_calls: u32,
}

impl BudgetSection {
    /// 转为引擎使用的 RoundBudgets；期限由调用方按协议决定
    pub fn to_budgets(self, request_timeout: Option<Duration>) -> RoundBudgets {
        RoundBudgets {
            max_tool_rounds: self.max_tool_rounds,
            max_total_tool_calls: self.max_total_tool_calls,
            request_timeout,
        }
    }
}

fn default_function_call_budget() -> BudgetSection {
    BudgetSection {
        max_tool_rounds: 6,
        max_total_tool_calls: 12,
    }
}

fn default_chat_completion_budget() -> BudgetSection {
    BudgetSection {
        max_tool_rounds: 8,
        max_total_tool_calls: 24,
    }
}

/// [tools] 段：单次工具调用超时与模型侧内容截断
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
    /// 发给模型的单条工具结果上限字符数
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

fn default_invoke_timeout() -> u64 {
    30
}

fn default_max_result_chars() -> usize {
    5000
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            invoke_timeout_secs: default_invoke_timeout(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

/// [policy] 段：领域指南目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs/providers")
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
        }
    }
}

/// [metrics] 段：请求指标 JSONL 文件路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    #[serde(default = "default_metrics_path")]
    pub path: PathBuf,
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("metrics.jsonl")
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            budgets: BudgetsSection::default(),
            tools: ToolsSection::default(),
            policy: PolicySection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CLERK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CLERK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CLERK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
