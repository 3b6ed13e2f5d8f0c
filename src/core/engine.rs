//! 编排引擎：轮循环主控
//!
//! 一次用户输入 -> 有界的「推理 + 工具调用」序列：
//! 目录惰性初始化（进程级一次）-> 意图路由收窄工具集（不明则全量放行）->
//! 拼 system（基础指令 + 时间上下文 + 策略摘要 + 不可用通知）->
//! 轮循环（预算随后端走）：模型要工具就按请求顺序逐个派发、归一化、
//! 写回 tool 轮；给出文本就收尾（自动邀请 + 分享链接补全）。
//! 两轮全错立即止损；预算 / 轮数 / 超时各有独立出口与文案。
//! 终结器对每个出口统一跑一次：组装 RequestOutcome 交给 MetricsSink。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::error::AgentError;
use crate::core::events::{send_event, EngineEvent};
use crate::core::history::Turn;
use crate::core::metrics::{MetricsSink, OutcomeBuilder, RequestOutcome, RequestStatus};
use crate::core::{postprocess, repair};
use crate::intent;
use crate::llm::{backend_kind_for_model, LlmError, ModelBackend, ModelReply, ToolSchema};
use crate::policy::PolicyLibrary;
use crate::text::{log_preview, MAX_TOOL_CONTENT_CHARS};
use crate::tools::{filter_descriptors, normalize, ToolCatalog};

/// 轮循环计数器：仅引擎可变，请求开始时归零，绝不跨请求携带
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundState {
    pub total_tool_calls: u32,
    pub rounds_in_current_response: u32,
    pub consecutive_all_error_rounds: u32,
}

/// 各出口的用户可见文案；预算、轮数、重复失败、超时不混用一条
const GLOBAL_BUDGET_ERROR: &str =
    "Error: Tool call loop limit reached. Please retry with a more specific request.";
const ROUND_LIMIT_ERROR: &str =
    "Error: Too many tool rounds in one request. Please retry with a narrower request.";
const REPEATED_FAILURE_ERROR: &str =
    "Error: Tool execution failed repeatedly. Please check permissions or provide more specific identifiers.";
const TIMEOUT_ERROR: &str =
    "Error: Model API request timed out. Please retry or narrow the request scope.";
const CANCELLED_ERROR: &str = "Error: request cancelled.";

/// 编排引擎：持有进程级目录 / 后端 / 策略库 / 指标接收端
pub struct ChatEngine {
    catalog: Arc<ToolCatalog>,
    backends: Vec<Arc<dyn ModelBackend>>,
    policy: PolicyLibrary,
    sink: Arc<dyn MetricsSink>,
    base_instruction: String,
    max_tool_content_chars: usize,
}

impl ChatEngine {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        backends: Vec<Arc<dyn ModelBackend>>,
        policy: PolicyLibrary,
        sink: Arc<dyn MetricsSink>,
        base_instruction: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            backends,
            policy,
            sink,
            base_instruction: base_instruction.into(),
            max_tool_content_chars: MAX_TOOL_CONTENT_CHARS,
        }
    }

    /// 覆盖模型侧工具内容截断上限
    pub fn with_max_tool_content_chars(mut self, limit: usize) -> Self {
        self.max_tool_content_chars = limit;
        self
    }

    /// 按模型名选后端：选择对请求静态生效，中途不换
    fn backend_for(&self, model: &str) -> Option<Arc<dyn ModelBackend>> {
        let kind = backend_kind_for_model(model);
        self.backends.iter().find(|b| b.kind() == kind).cloned()
    }

    /// 处理一次用户输入，返回（追加后的历史, 请求结局）
    ///
    /// 空输入是定义过的 no-op：原历史原样返回，不调工具、不写指标。
    /// 其余路径（正常收尾 / 预算耗尽 / 意外错误）都会经过终结器，
    /// 恰好产出一条 RequestOutcome 并交给 MetricsSink。
    pub async fn run(
        &self,
        user_message: &str,
        history: &[Turn],
        model: &str,
        event_tx: Option<&UnboundedSender<EngineEvent>>,
        cancel: CancellationToken,
    ) -> (Vec<Turn>, RequestOutcome) {
        let question = user_message.trim();
        if question.is_empty() {
            let outcome =
                OutcomeBuilder::new(model, "").finish(RequestStatus::Success, String::new());
            return (history.to_vec(), outcome);
        }

        let mut builder = OutcomeBuilder::new(model, question);
        tracing::info!("[{}] --- new chat request ---", builder.request_id());
        let mut working = history.to_vec();
        let events = event_tx;

        let result = match self.backend_for(model) {
            Some(backend) => {
                self.drive(backend.as_ref(), question, &mut working, &mut builder, &events, &cancel)
                    .await
            }
            None => Err(AgentError::Config(format!(
                "no backend available for model '{}'",
                model
            ))),
        };
        let (text, status) = match result {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("[{}] Chat error: {}", builder.request_id(), e);
                if builder.error_message.is_none() {
                    builder.error_message = Some(e.to_string());
                }
                let text = format!("Error: {}", e);
                send_event(&events, EngineEvent::Error { text: text.clone() });
                (text, RequestStatus::Error)
            }
        };

        // Provider 不可用通知附加在所有出口文本上（目录没初始化成功时没有通知可言）
        let notice = if self.catalog.is_started() {
            unavailable_notice(
                &intent::infer_domains(question),
                &self.catalog.unavailable_providers().await,
            )
        } else {
            String::new()
        };
        if !notice.is_empty() {
            send_event(&events, EngineEvent::Notice { text: notice.clone() });
        }
        let final_text = append_notice(&text, &notice);

        working.push(Turn::assistant(final_text.clone()));
        send_event(&events, EngineEvent::MessageDone { text: final_text.clone() });

        let outcome = builder.finish(status, final_text);
        self.sink.record(&outcome);
        (working, outcome)
    }

    /// 轮循环本体；只返回最终文本与状态，错误出口也走 Ok 通道携带文案，
    /// Err 仅用于真正意外的中断（由 run 统一收口）
    async fn drive(
        &self,
        backend: &dyn ModelBackend,
        question: &str,
        history: &mut Vec<Turn>,
        builder: &mut OutcomeBuilder,
        events: &Option<&UnboundedSender<EngineEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(String, RequestStatus), AgentError> {
        let descriptors = self.catalog.descriptors().await;
        let discovered: HashSet<String> =
            self.catalog.provider_names().await.into_iter().collect();

        let requested = intent::infer_domains(question);
        let target: HashSet<String> = requested.intersection(&discovered).cloned().collect();
        let filtered = filter_descriptors(descriptors, &target);
        let tool_schemas: Vec<ToolSchema> = filtered
            .iter()
            .map(|d| ToolSchema {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.input_schema.clone(),
            })
            .collect();

        let policy_domains = if target.is_empty() { &discovered } else { &target };
        let policy_block = self
            .policy
            .summary_for(&policy_domains.iter().cloned().collect());
        let notice =
            unavailable_notice(&requested, &self.catalog.unavailable_providers().await);

        let mut system = with_time_context(&self.base_instruction);
        if !policy_block.is_empty() {
            system = format!("{}\n\n{}", system, policy_block);
        }
        if !notice.is_empty() {
            system = format!("{}\n\n{}", system, notice);
        }

        history.push(Turn::user(question));

        let budgets = backend.budgets();
        let mut state = RoundState::default();

        loop {
            if cancel.is_cancelled() {
                builder.error_message = Some("request cancelled".to_string());
                return Ok((CANCELLED_ERROR.to_string(), RequestStatus::Error));
            }
            if state.total_tool_calls >= budgets.max_total_tool_calls {
                builder.error_message = Some(GLOBAL_BUDGET_ERROR.to_string());
                return Ok((GLOBAL_BUDGET_ERROR.to_string(), RequestStatus::Error));
            }
            if state.rounds_in_current_response >= budgets.max_tool_rounds {
                builder.error_message = Some(ROUND_LIMIT_ERROR.to_string());
                return Ok((ROUND_LIMIT_ERROR.to_string(), RequestStatus::Error));
            }

            send_event(events, EngineEvent::Thinking);
            let reply = match backend.generate(&system, history, &tool_schemas).await {
                Ok(reply) => reply,
                Err(e) => return Ok(self.finish_backend_error(e, question, builder, events).await),
            };

            if reply.tool_calls.is_empty() {
                let (text, delivery) = postprocess::auto_send_invites(
                    reply.text,
                    question,
                    builder,
                    &self.catalog,
                    events,
                )
                .await;
                let text = postprocess::append_missing_share_links(&text, &builder.share_urls);
                let status = if delivery.all_failed() {
                    RequestStatus::Error
                } else {
                    RequestStatus::Success
                };
                return Ok((text, status));
            }

            state.rounds_in_current_response += 1;
            send_event(
                events,
                EngineEvent::RoundStarted {
                    round: state.rounds_in_current_response,
                    max_rounds: budgets.max_tool_rounds,
                },
            );
            self.run_tool_round(
                reply,
                question,
                history,
                builder,
                &mut state,
                budgets.max_total_tool_calls,
                events,
                cancel,
            )
            .await?;

            if state.consecutive_all_error_rounds >= 2 {
                if builder.error_message.is_none() && !builder.tool_errors.is_empty() {
                    let recent: Vec<String> =
                        builder.tool_errors.iter().rev().take(3).rev().cloned().collect();
                    builder.error_message = Some(recent.join("; "));
                }
                return Ok((REPEATED_FAILURE_ERROR.to_string(), RequestStatus::Error));
            }
            if state.budget_exhausted_mid_round(budgets.max_total_tool_calls) {
                builder.error_message = Some(GLOBAL_BUDGET_ERROR.to_string());
                return Ok((GLOBAL_BUDGET_ERROR.to_string(), RequestStatus::Error));
            }
        }
    }

    /// 执行一轮里模型请求的全部工具调用：按请求顺序派发，结果按同样
    /// 顺序写回 tool 轮；全局预算用尽或请求被取消时停止派发剩余调用
    #[allow(clippy::too_many_arguments)]
    async fn run_tool_round(
        &self,
        reply: ModelReply,
        question: &str,
        history: &mut Vec<Turn>,
        builder: &mut OutcomeBuilder,
        state: &mut RoundState,
        max_total_tool_calls: u32,
        events: &Option<&UnboundedSender<EngineEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        history.push(Turn::assistant_with_calls(reply.text.clone(), reply.tool_calls.clone()));
        let round_total = reply.tool_calls.len();
        let mut round_error_count = 0usize;

        for call in reply.tool_calls {
            if state.total_tool_calls >= max_total_tool_calls || cancel.is_cancelled() {
                // 预算用尽或已取消：本轮剩余调用不再派发，由 drive 收口
                break;
            }
            state.total_tool_calls += 1;

            let args = repair::repair_tool_args(&call.name, call.args, question, Local::now());
            let provider = self
                .catalog
                .provider_of(&call.name)
                .await
                .unwrap_or_else(|| "unknown".to_string());
            builder.record_invocation(&call.name, &provider);
            tracing::info!(
                "[{}] Invoking tool={} provider={} args={}",
                builder.request_id(),
                call.name,
                provider,
                log_preview(&args.to_string())
            );
            send_event(
                events,
                EngineEvent::ToolCall {
                    tool: call.name.clone(),
                    args_preview: log_preview(&args.to_string()),
                },
            );

            let result = match self.catalog.invoke(&call.name, args.clone()).await {
                Ok(raw) => normalize::normalize(&call.name, &provider, &raw, None),
                Err(exc) => {
                    let content =
                        format!("Error: Tool '{}' failed with exception: {}", call.name, exc);
                    normalize::normalize(&call.name, &provider, &content, Some(&exc))
                }
            };

            if result.success {
                if postprocess::SHARE_TOOL_NAMES.contains(&call.name.as_str()) {
                    for url in result.surfaced_urls() {
                        if !builder.share_urls.contains(&url) {
                            builder.share_urls.push(url);
                        }
                    }
                }
                if call.name == postprocess::EVENT_CREATE_TOOL {
                    builder.last_event_args = Some(args.clone());
                }
                builder.last_successful_tool =
                    Some((call.name.clone(), result.raw_text.clone()));
            } else {
                round_error_count += 1;
                builder.record_tool_error(result.error_label());
                tracing::warn!(
                    "[{}] Tool {} returned error content: {}",
                    builder.request_id(),
                    call.name,
                    log_preview(&result.raw_text)
                );
            }
            send_event(
                events,
                EngineEvent::Observation {
                    tool: call.name.clone(),
                    ok: result.success,
                    preview: log_preview(&result.raw_text),
                },
            );

            let payload = result.model_payload(self.max_tool_content_chars);
            history.push(Turn::tool(&call.name, &call.call_id, payload.to_string()));
        }

        if round_error_count == round_total {
            state.consecutive_all_error_rounds += 1;
        } else {
            state.consecutive_all_error_rounds = 0;
        }
        Ok(())
    }

    /// 后端错误收口：超时走降级（已有成功工具结果时回放该结果），
    /// 其余按分类给出对应文案
    async fn finish_backend_error(
        &self,
        error: LlmError,
        question: &str,
        builder: &mut OutcomeBuilder,
        events: &Option<&UnboundedSender<EngineEvent>>,
    ) -> (String, RequestStatus) {
        let (text, status) = match error {
            LlmError::TimedOut => {
                if let Some((_, content)) = builder.last_successful_tool.clone() {
                    builder.error_message =
                        Some("model API request timed out after tool execution".to_string());
                    let degraded = format!(
                        "Warning: Model API response timed out after tool execution. \
                         Last successful tool result:\n\n{}",
                        content
                    );
                    let (text, _) = postprocess::auto_send_invites(
                        degraded,
                        question,
                        builder,
                        &self.catalog,
                        events,
                    )
                    .await;
                    return (text, RequestStatus::SuccessWithToolErrors);
                }
                (TIMEOUT_ERROR.to_string(), RequestStatus::Error)
            }
            LlmError::QuotaExhausted => (
                "Error: Model API quota is exhausted.".to_string(),
                RequestStatus::Error,
            ),
            LlmError::Transient { status, .. } => (
                format!(
                    "Error: Model API is temporarily unavailable ({}) after retries. Please retry.",
                    status
                ),
                RequestStatus::Error,
            ),
            LlmError::Terminal { status, .. } => {
                (format!("Error: Model API error ({}).", status), RequestStatus::Error)
            }
            other => (format!("Error: {}", other), RequestStatus::Error),
        };
        if builder.error_message.is_none() {
            builder.error_message = Some(text.clone());
        }
        (text, status)
    }
}

impl RoundState {
    /// 一轮收尾后预算是否已经用尽（剩余调用被停发）
    fn budget_exhausted_mid_round(&self, max_total_tool_calls: u32) -> bool {
        self.total_tool_calls >= max_total_tool_calls
    }
}

/// 基础指令 + 当前日期时间上下文（让模型自行解析相对日期词）
fn with_time_context(base_instruction: &str) -> String {
    let now = Local::now();
    format!(
        "{} Current local date: {}. Current local time: {}. \
         Interpret relative date words (today, tomorrow, yesterday) using this date, \
         and do not ask the user to confirm the current date.",
        base_instruction,
        now.format("%Y-%m-%d"),
        now.format("%H:%M")
    )
}

/// 不可用通知：只在请求涉及的领域确实缺 Provider 时才出现
fn unavailable_notice(requested: &HashSet<String>, unavailable: &[String]) -> String {
    let mut relevant: Vec<&str> = unavailable
        .iter()
        .filter(|name| requested.contains(*name))
        .map(String::as_str)
        .collect();
    relevant.sort_unstable();
    if relevant.is_empty() {
        return String::new();
    }
    format!(
        "Warning: provider(s) unavailable for this request: {}. \
         Please retry after those providers are healthy.",
        relevant.join(", ")
    )
}

/// 把通知附加到文本末尾；文本里已有同样通知时不重复
fn append_notice(text: &str, notice: &str) -> String {
    if notice.is_empty() || text.contains(notice) {
        return text.to_string();
    }
    if text.trim().is_empty() {
        return notice.to_string();
    }
    format!("{}\n\n{}", text.trim_end(), notice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_state_resets_to_zero() {
        let state = RoundState::default();
        assert_eq!(state.total_tool_calls, 0);
        assert_eq!(state.rounds_in_current_response, 0);
        assert_eq!(state.consecutive_all_error_rounds, 0);
    }

    #[test]
    fn test_with_time_context_embeds_date() {
        let system = with_time_context("Base.");
        assert!(system.starts_with("Base. Current local date: "));
        assert!(system.contains("Current local time:"));
    }

    #[test]
    fn test_unavailable_notice_only_for_requested_domains() {
        let requested: HashSet<String> =
            ["mail".to_string(), "maps".to_string()].into_iter().collect();
        let notice = unavailable_notice(&requested, &["maps".to_string(), "docs".to_string()]);
        assert!(notice.contains("unavailable for this request: maps"));
        assert!(!notice.contains("docs"));

        assert_eq!(unavailable_notice(&requested, &["drive".to_string()]), "");
        assert_eq!(unavailable_notice(&HashSet::new(), &["maps".to_string()]), "");
    }

    #[test]
    fn test_append_notice_is_idempotent() {
        let once = append_notice("body", "Warning: x");
        assert_eq!(once, "body\n\nWarning: x");
        assert_eq!(append_notice(&once, "Warning: x"), once);
        assert_eq!(append_notice("", "Warning: x"), "Warning: x");
        assert_eq!(append_notice("body", ""), "body");
    }
}
