//! 意图路由
//!
//! 纯关键词表匹配：用户输入 -> 相关领域集合（mail / calendar / contacts /
//! drive / docs / maps），供工具目录过滤使用。无命中时返回空集合，
//! 引擎按「不过滤」处理（意图不明时不能饿着模型）。
//! 另提供邀请意图检测与收件人邮箱提取，供自动补发邀请使用。

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// 全部意图领域，Provider 名与领域名一一对应
pub const DOMAINS: [&str; 6] = ["mail", "calendar", "contacts", "drive", "docs", "maps"];

/// 领域 -> 关键词表。单词按词边界匹配，短语与中文按子串匹配
const DOMAIN_KEYWORDS: [(&str, &[&str]); 6] = [
    (
        "mail",
        &[
            "mail", "email", "inbox", "unread", "subject", "send email", "reply email",
            "邮件", "发邮件", "回邮件", "收件箱",
        ],
    ),
    (
        "calendar",
        &[
            "calendar", "agenda", "event", "meeting", "appointment", "schedule", "reminder",
            "remind", "日历", "日程", "会议", "提醒", "安排",
        ],
    ),
    (
        "contacts",
        &[
            "contacts", "contact", "phone number", "address book",
            "联系人", "通讯录", "电话号码",
        ],
    ),
    (
        "drive",
        &[
            "drive", "file", "folder", "upload", "download", "share file", "shared link",
            "permission", "云盘", "网盘", "文件", "上传", "下载", "分享",
        ],
    ),
    (
        "docs",
        &[
            "docs", "document", "doc", "spreadsheet", "slides",
            "文档", "表格", "幻灯片",
        ],
    ),
    (
        "maps",
        &[
            "maps", "map", "direction", "route", "location", "address", "place", "nearby",
            "distance", "地图", "路线", "导航", "地址", "附近", "距离",
        ],
    ),
];

/// 邀请意图关键词
const INVITE_KEYWORDS: [&str; 3] = ["invite", "invitation", "邀请"];

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

/// 单个关键词是否命中：纯 ASCII 单词要求词边界，短语 / 中文按子串
fn keyword_matches(lowered: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    let is_plain_word = keyword.is_ascii() && !keyword.contains(' ');
    if !is_plain_word {
        return lowered.contains(keyword);
    }
    let mut from = 0;
    while let Some(pos) = lowered[from..].find(keyword) {
        let start = from + pos;
        let end = start + keyword.len();
        let before_ok = start == 0
            || !lowered[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        let after_ok = end == lowered.len()
            || !lowered[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// 从用户输入推断相关领域集合；带邀请意图时补上 calendar + mail
pub fn infer_domains(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    let mut requested = HashSet::new();
    for (domain, keywords) in DOMAIN_KEYWORDS {
        if keywords.iter().any(|k| keyword_matches(&lowered, k)) {
            requested.insert(domain.to_string());
        }
    }
    if has_invite_intent(text) {
        requested.insert("calendar".to_string());
        requested.insert("mail".to_string());
    }
    requested
}

/// 用户是否表达了「发邀请」意图
pub fn has_invite_intent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    INVITE_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// 提取收件人邮箱：按出现顺序去重（忽略大小写）
pub fn extract_recipients(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for m in EMAIL_PATTERN.find_iter(text) {
        let lowered = m.as_str().to_lowercase();
        if seen.insert(lowered) {
            unique.push(m.as_str().to_string());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_domains_by_keyword() {
        let domains = infer_domains("Check my inbox and reply email to Bob");
        assert!(domains.contains("mail"));
        assert!(!domains.contains("maps"));
    }

    #[test]
    fn test_infer_domains_word_boundary() {
        // "mailbox" 不应命中单词 "mail"
        assert!(infer_domains("open the mailboxes page").is_empty());
        assert!(infer_domains("send mail now").contains("mail"));
    }

    #[test]
    fn test_infer_domains_chinese_substring() {
        let domains = infer_domains("帮我查一下明天的日程");
        assert!(domains.contains("calendar"));
    }

    #[test]
    fn test_infer_domains_empty_for_ambiguous_input() {
        assert!(infer_domains("hello there").is_empty());
    }

    #[test]
    fn test_invite_intent_adds_calendar_and_mail() {
        let domains = infer_domains("invite alice@example.com to dinner");
        assert!(domains.contains("calendar"));
        assert!(domains.contains("mail"));
    }

    #[test]
    fn test_extract_recipients_dedup_case_insensitive() {
        let emails =
            extract_recipients("cc Alice@Example.com and alice@example.com and bob@example.com");
        assert_eq!(emails, vec!["Alice@Example.com", "bob@example.com"]);
    }

    #[test]
    fn test_extract_recipients_none() {
        assert!(extract_recipients("no address here").is_empty());
    }
}
