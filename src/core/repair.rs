//! 参数修复：日程创建的相对日期归一化
//!
//! 模型经常把「明天 9 点」翻成一个猜出来的 start_time。派发 add_event 前
//! 做一次确定性修复：用户消息没写明确日期、但带相对日期词（today /
//! tomorrow / 明天 / 后天……）时，按当前日期推算目标日，再从消息里抽
//! 时刻（HH:MM、HH.MM、"at 9"、"9am"、"9 点"），重写 start_time 为
//! `YYYY-MM-DD HH:MM`。消息里已有明确日期则不动。

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local};
use regex::Regex;
use serde_json::Value;

use crate::text::normalize_content;

static EXPLICIT_DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}[/-]\d{1,2}(?:[/-]\d{2,4})?\b").unwrap()
});
static TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([01]?\d|2[0-3])[:.]([0-5]\d)\b").unwrap());
static EN_HOUR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bat\s*([01]?\d|2[0-3])\b").unwrap());
static AMPM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(1[0-2]|0?[1-9])\s*(am|pm)\b").unwrap());
static ZH_HOUR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([01]?\d|2[0-3])\s*点").unwrap());

/// 相对日期词 -> 天数偏移；长词在前避免「后天」被「天」类短词抢先
const RELATIVE_DAY_WORDS: [(&str, i64); 8] = [
    ("day after tomorrow", 2),
    ("后天", 2),
    ("tomorrow", 1),
    ("明天", 1),
    ("today", 0),
    ("今天", 0),
    ("yesterday", -1),
    ("昨天", -1),
];

/// 按工具名派发修复；目前只有 add_event 需要
pub fn repair_tool_args(
    tool_name: &str,
    args: Value,
    user_message: &str,
    now: DateTime<Local>,
) -> Value {
    if tool_name == "add_event" {
        return normalize_event_start(args, user_message, now);
    }
    args
}

/// add_event 的 start_time 修复；条件不满足时原样返回
fn normalize_event_start(args: Value, user_message: &str, now: DateTime<Local>) -> Value {
    if !args.is_object() || args.get("start_time").is_none() {
        return args;
    }
    if EXPLICIT_DATE_PATTERN.is_match(user_message) {
        return args;
    }
    let Some(offset) = relative_day_offset(user_message) else {
        return args;
    };

    let start_value = normalize_content(&args["start_time"]);
    let Some(hhmm) = extract_hhmm(user_message).or_else(|| extract_hhmm(&start_value)) else {
        return args;
    };

    let target_date = now + Duration::days(offset);
    let mut repaired = args;
    repaired["start_time"] = Value::String(format!("{} {}", target_date.format("%Y-%m-%d"), hhmm));
    repaired
}

/// 消息中的相对日期偏移；没有相对日期词返回 None
fn relative_day_offset(text: &str) -> Option<i64> {
    let lowered = text.to_lowercase();
    RELATIVE_DAY_WORDS
        .iter()
        .find(|(word, _)| lowered.contains(word))
        .map(|(_, offset)| *offset)
}

/// 从文本抽 HH:MM 时刻
fn extract_hhmm(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    if let Some(caps) = TIME_PATTERN.captures(text) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        return Some(format!("{:02}:{:02}", hour, minute));
    }
    if let Some(caps) = AMPM_PATTERN.captures(text) {
        let mut hour: u32 = caps[1].parse().ok()?;
        let meridiem = caps[2].to_lowercase();
        if meridiem == "pm" && hour != 12 {
            hour += 12;
        }
        if meridiem == "am" && hour == 12 {
            hour = 0;
        }
        return Some(format!("{:02}:00", hour));
    }
    if let Some(caps) = EN_HOUR_PATTERN
        .captures(text)
        .or_else(|| ZH_HOUR_PATTERN.captures(text))
    {
        let hour: u32 = caps[1].parse().ok()?;
        return Some(format!("{:02}:00", hour));
    }
    None
}
