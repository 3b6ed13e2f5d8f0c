//! 请求后处理：自动补发邀请与分享链接补全
//!
//! 引擎产出最终文本后执行，且每请求至多一次（ran-once 标记放在
//! OutcomeBuilder 里，保证可独立测试）。
//! 自动邀请：用户表达了邀请意图、消息里有收件人、本请求成功建过日程、
//! 且模型没自己调过发信工具时，替用户把邀请发出去：优先日历邀请工具，
//! 不可用或返回错误时回退普通邮件工具，每个收件人的结果逐行附在回复后。
//! 分享链接补全：分享类工具产出的 URL 若没出现在最终文本里，补一节
//! "Shared URL(s)"，不让产物被模型忘掉。

use serde_json::{json, Value};

use crate::core::events::{send_event, EngineEvent};
use crate::core::metrics::OutcomeBuilder;
use crate::intent;
use crate::text::{extract_urls, log_preview, normalize_content};
use crate::tools::{normalize, ToolCatalog};

/// 日历邀请工具名（优先）
pub const CALENDAR_INVITE_TOOL: &str = "send_calendar_invite_email";
/// 普通邮件工具名（回退）
pub const PLAIN_MAIL_TOOL: &str = "send_email";
/// 日程创建工具名
pub const EVENT_CREATE_TOOL: &str = "add_event";
/// 分享类工具名：产出的 URL 参与链接补全
pub const SHARE_TOOL_NAMES: [&str; 2] =
    ["create_drive_shared_link_to_user", "create_drive_public_link"];

/// 自动邀请的派送统计
#[derive(Debug, Clone, Copy, Default)]
pub struct InviteDelivery {
    pub attempted: usize,
    pub delivered: usize,
}

impl InviteDelivery {
    /// 是否所有派送尝试都失败（有尝试且零送达）
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.delivered == 0
    }
}

/// 自动补发邀请；返回（可能追加了派送结果块的）回复文本与派送统计
pub async fn auto_send_invites(
    current_response: String,
    user_message: &str,
    builder: &mut OutcomeBuilder,
    catalog: &ToolCatalog,
    events: &Option<&tokio::sync::mpsc::UnboundedSender<EngineEvent>>,
) -> (String, InviteDelivery) {
    let mut delivery = InviteDelivery::default();
    if builder.invites_attempted {
        return (current_response, delivery);
    }
    builder.invites_attempted = true;

    let recipients = intent::extract_recipients(user_message);
    if !intent::has_invite_intent(user_message)
        || recipients.is_empty()
        || builder.last_event_args.is_none()
    {
        return (current_response, delivery);
    }
    if builder
        .invoked_tools
        .iter()
        .any(|t| t == PLAIN_MAIL_TOOL || t == CALENDAR_INVITE_TOOL)
    {
        return (current_response, delivery);
    }
    let has_calendar_invite = catalog.has_tool(CALENDAR_INVITE_TOOL).await;
    let has_plain_mail = catalog.has_tool(PLAIN_MAIL_TOOL).await;
    if !has_calendar_invite && !has_plain_mail {
        return (current_response, delivery);
    }

    let event_args = builder.last_event_args.clone().unwrap_or_default();
    let mut result_lines: Vec<String> = Vec::new();
    for to_email in &recipients {
        let tool_name = if has_calendar_invite {
            CALENDAR_INVITE_TOOL
        } else {
            PLAIN_MAIL_TOOL
        };
        let payload = if tool_name == CALENDAR_INVITE_TOOL {
            calendar_invite_payload(&event_args, to_email)
        } else {
            invitation_mail_payload(&event_args, to_email)
        };

        delivery.attempted += 1;
        let (mut contract, mut content) =
            dispatch_invite(tool_name, payload, builder, catalog, events).await;

        if !contract.success && tool_name == CALENDAR_INVITE_TOOL && has_plain_mail {
            let fallback_payload = invitation_mail_payload(&event_args, to_email);
            let (fallback_contract, fallback_content) =
                dispatch_invite(PLAIN_MAIL_TOOL, fallback_payload, builder, catalog, events).await;
            content = format!("{}\nFallback ({}): {}", content, PLAIN_MAIL_TOOL, fallback_content);
            if fallback_contract.success {
                contract = fallback_contract;
            }
        }

        if contract.success {
            delivery.delivered += 1;
            builder.last_successful_tool = Some((contract.tool_name.clone(), content.clone()));
        } else {
            let detail = contract.error_message.clone().unwrap_or_else(|| content.clone());
            builder.record_tool_error(format!("{}({}): {}", contract.tool_name, to_email, detail));
            tracing::warn!(
                "[{}] Auto invite returned error content: {}",
                builder.request_id(),
                log_preview(&content)
            );
        }
        result_lines.push(format!("- {}: {}", to_email, content));
    }

    if result_lines.is_empty() {
        return (current_response, delivery);
    }
    let block = format!("Invitation delivery result(s):\n{}", result_lines.join("\n"));
    let combined = if current_response.trim().is_empty() {
        block
    } else {
        format!("{}\n\n{}", current_response.trim_end(), block)
    };
    (combined, delivery)
}

/// 调一次发信工具并归一化；登记调用与事件
async fn dispatch_invite(
    tool_name: &str,
    payload: Value,
    builder: &mut OutcomeBuilder,
    catalog: &ToolCatalog,
    events: &Option<&tokio::sync::mpsc::UnboundedSender<EngineEvent>>,
) -> (normalize::ToolResult, String) {
    let provider = catalog
        .provider_of(tool_name)
        .await
        .unwrap_or_else(|| "mail".to_string());
    builder.record_invocation(tool_name, &provider);
    tracing::info!(
        "[{}] Auto-invoking tool={} provider={} args={}",
        builder.request_id(),
        tool_name,
        provider,
        log_preview(&payload.to_string())
    );
    send_event(
        events,
        EngineEvent::ToolCall {
            tool: tool_name.to_string(),
            args_preview: log_preview(&payload.to_string()),
        },
    );

    let (content, contract) = match catalog.invoke(tool_name, payload).await {
        Ok(raw) => {
            let contract = normalize::normalize(tool_name, &provider, &raw, None);
            (raw, contract)
        }
        Err(exc) => {
            let content = format!("Error: Tool '{}' failed with exception: {}", tool_name, exc);
            let contract = normalize::normalize(tool_name, &provider, &content, Some(&exc));
            (content, contract)
        }
    };
    send_event(
        events,
        EngineEvent::Observation {
            tool: tool_name.to_string(),
            ok: contract.success,
            preview: log_preview(&content),
        },
    );
    (contract, content)
}

/// 普通邮件版邀请载荷
fn invitation_mail_payload(event_args: &Value, to_email: &str) -> Value {
    let summary = non_empty(normalize_content(&event_args["summary"]), "Calendar Event");
    let start_time = non_empty(normalize_content(&event_args["start_time"]), "-");
    let duration = event_args
        .get("duration_minutes")
        .cloned()
        .unwrap_or_else(|| json!(60));
    let description = normalize_content(&event_args["description"]);

    let mut body_parts = vec![
        "Hello,".to_string(),
        String::new(),
        "You are invited to this event:".to_string(),
        format!("- Event: {}", summary),
        format!("- Time: {}", start_time),
        format!("- Duration: {} minutes", normalize_content(&duration)),
    ];
    if !description.is_empty() {
        body_parts.push(String::new());
        body_parts.push("Details:".to_string());
        body_parts.push(description);
    }
    body_parts.push(String::new());
    body_parts.push("Best regards,".to_string());

    json!({
        "to_email": to_email,
        "subject": format!("Invitation: {}", summary),
        "body": body_parts.join("\n"),
    })
}

/// 日历邀请版载荷：带结构化事件字段，收件端可生成日历条目
fn calendar_invite_payload(event_args: &Value, to_email: &str) -> Value {
    let summary = non_empty(normalize_content(&event_args["summary"]), "Calendar Event");
    let start_time = normalize_content(&event_args["start_time"]);
    let duration = event_args
        .get("duration_minutes")
        .cloned()
        .unwrap_or_else(|| json!(60));
    let description = normalize_content(&event_args["description"]);
    let location = event_location(event_args);

    let mut body = "Hello,\n\n\
        Please see the calendar invitation attached/included in this email. \
        You can accept or decline the invitation from your calendar client.\n"
        .to_string();
    if !description.is_empty() {
        body.push_str(&format!("\nDetails:\n{}\n", description));
    }

    json!({
        "to_email": to_email,
        "subject": format!("Invitation: {}", summary),
        "body": body,
        "summary": summary,
        "start_time": start_time,
        "duration_minutes": duration,
        "description": description,
        "location": location,
    })
}

/// 从事件描述里抽地点行（"Location: ..." / "地点：..."）
fn event_location(event_args: &Value) -> String {
    let description = normalize_content(&event_args["description"]);
    for line in description.lines() {
        let lowered = line.trim().to_lowercase();
        if lowered.starts_with("location:") || lowered.starts_with("地点：") || lowered.starts_with("地点:") {
            if let Some((_, value)) = line.split_once([':', '：']) {
                return value.trim().to_string();
            }
        }
    }
    String::new()
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// 分享链接补全：把没出现在文本里的 URL 附加为 "Shared URL(s)" 一节
pub fn append_missing_share_links(assistant_text: &str, share_urls: &[String]) -> String {
    if share_urls.is_empty() {
        return assistant_text.to_string();
    }
    let existing: Vec<String> = extract_urls(assistant_text);
    let missing: Vec<&String> = share_urls.iter().filter(|u| !existing.contains(u)).collect();
    if missing.is_empty() {
        return assistant_text.to_string();
    }
    let links_block = format!(
        "Shared URL(s):\n{}",
        missing
            .iter()
            .map(|u| format!("- {}", u))
            .collect::<Vec<_>>()
            .join("\n")
    );
    if assistant_text.trim().is_empty() {
        links_block
    } else {
        format!("{}\n\n{}", assistant_text.trim_end(), links_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::provider::{ToolDescriptor, ToolProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MailProvider {
        send_count: Arc<AtomicUsize>,
        fail_calendar_invite: bool,
    }

    #[async_trait]
    impl ToolProvider for MailProvider {
        fn name(&self) -> &str {
            "mail"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
            Ok([CALENDAR_INVITE_TOOL, PLAIN_MAIL_TOOL]
                .iter()
                .map(|name| ToolDescriptor {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                    provider: "mail".to_string(),
                })
                .collect())
        }

        async fn invoke(&self, tool_name: &str, _args: Value) -> Result<String, String> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            if tool_name == CALENDAR_INVITE_TOOL && self.fail_calendar_invite {
                return Ok("Error: smtp rejected".to_string());
            }
            Ok(format!("{} delivered", tool_name))
        }
    }

    fn invite_builder() -> OutcomeBuilder {
        let mut builder = OutcomeBuilder::new("m", "q");
        builder.last_event_args = Some(json!({
            "summary": "Team sync",
            "start_time": "2026-08-07 09:00",
            "duration_minutes": 30,
        }));
        builder
    }

    fn mail_catalog(fail_calendar_invite: bool, counter: Arc<AtomicUsize>) -> ToolCatalog {
        ToolCatalog::new(
            vec![Arc::new(MailProvider {
                send_count: counter,
                fail_calendar_invite,
            }) as Arc<dyn ToolProvider>],
            5,
        )
    }

    #[tokio::test]
    async fn test_auto_invite_prefers_calendar_tool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let catalog = mail_catalog(false, counter.clone());
        let mut builder = invite_builder();
        let (text, delivery) = auto_send_invites(
            "Event created.".to_string(),
            "invite alice@example.com to the sync",
            &mut builder,
            &catalog,
            &None,
        )
        .await;
        assert_eq!(delivery.attempted, 1);
        assert_eq!(delivery.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(text.contains("Invitation delivery result(s):"));
        assert!(text.contains("- alice@example.com"));
        assert_eq!(builder.invoked_tools, vec![CALENDAR_INVITE_TOOL]);
    }

    #[tokio::test]
    async fn test_auto_invite_runs_at_most_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let catalog = mail_catalog(false, counter.clone());
        let mut builder = invite_builder();
        let message = "invite alice@example.com";
        let (text, _) =
            auto_send_invites("ok".to_string(), message, &mut builder, &catalog, &None).await;
        let (text2, delivery2) =
            auto_send_invites(text.clone(), message, &mut builder, &catalog, &None).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(delivery2.attempted, 0);
        assert_eq!(text2, text);
    }

    #[tokio::test]
    async fn test_auto_invite_falls_back_to_plain_mail() {
        let counter = Arc::new(AtomicUsize::new(0));
        let catalog = mail_catalog(true, counter.clone());
        let mut builder = invite_builder();
        let (text, delivery) = auto_send_invites(
            String::new(),
            "invite bob@example.com",
            &mut builder,
            &catalog,
            &None,
        )
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(delivery.delivered, 1);
        assert!(text.contains("Fallback (send_email):"));
        assert_eq!(builder.invoked_tools, vec![CALENDAR_INVITE_TOOL, PLAIN_MAIL_TOOL]);
    }

    #[tokio::test]
    async fn test_auto_invite_skipped_when_model_already_sent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let catalog = mail_catalog(false, counter.clone());
        let mut builder = invite_builder();
        builder.record_invocation(PLAIN_MAIL_TOOL, "mail");
        let (_, delivery) = auto_send_invites(
            "done".to_string(),
            "invite alice@example.com",
            &mut builder,
            &catalog,
            &None,
        )
        .await;
        assert_eq!(delivery.attempted, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_invite_requires_created_event() {
        let counter = Arc::new(AtomicUsize::new(0));
        let catalog = mail_catalog(false, counter.clone());
        let mut builder = OutcomeBuilder::new("m", "q");
        let (_, delivery) = auto_send_invites(
            "done".to_string(),
            "invite alice@example.com",
            &mut builder,
            &catalog,
            &None,
        )
        .await;
        assert_eq!(delivery.attempted, 0);
        assert!(builder.invites_attempted);
    }

    #[test]
    fn test_invitation_mail_payload_fields() {
        let payload = invitation_mail_payload(
            &json!({"summary": "Demo", "start_time": "2026-08-07 09:00", "description": "Bring slides"}),
            "alice@example.com",
        );
        assert_eq!(payload["to_email"], "alice@example.com");
        assert_eq!(payload["subject"], "Invitation: Demo");
        let body = payload["body"].as_str().unwrap();
        assert!(body.contains("- Event: Demo"));
        assert!(body.contains("- Duration: 60 minutes"));
        assert!(body.contains("Details:\nBring slides"));
    }

    #[test]
    fn test_calendar_invite_payload_extracts_location() {
        let payload = calendar_invite_payload(
            &json!({
                "summary": "Demo",
                "start_time": "2026-08-07 09:00",
                "duration_minutes": 45,
                "description": "Agenda\nLocation: Room 5",
            }),
            "bob@example.com",
        );
        assert_eq!(payload["location"], "Room 5");
        assert_eq!(payload["duration_minutes"], 45);
        assert_eq!(payload["summary"], "Demo");
    }

    #[test]
    fn test_append_missing_share_links() {
        let out = append_missing_share_links(
            "Here is the file: https://d.example/a",
            &["https://d.example/a".to_string(), "https://d.example/b".to_string()],
        );
        assert!(out.ends_with("Shared URL(s):\n- https://d.example/b"));

        let unchanged = append_missing_share_links(
            "covered https://d.example/a",
            &["https://d.example/a".to_string()],
        );
        assert!(!unchanged.contains("Shared URL(s)"));

        let untouched = append_missing_share_links("plain text", &[]);
        assert_eq!(untouched, "plain text");
    }
}
