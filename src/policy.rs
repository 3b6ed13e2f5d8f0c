//! Provider 策略摘要
//!
//! 每个领域配一份 Markdown 指南（docs/providers/<domain>.md），首次使用时
//! 全量加载并压缩为单行摘要（purpose / tools / notes），之后进程内缓存。
//! 摘要拼入 system prompt，让模型了解各 Provider 的用途与调用约束。

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::intent::DOMAINS;

/// 摘要中最多列出的工具名数量
const MAX_TOOLS_LISTED: usize = 12;
/// 摘要中最多拼接的约束条目数量
const MAX_NOTES_LISTED: usize = 2;

/// 领域指南库：按需一次性加载 docs 目录，缓存进程生命周期
pub struct PolicyLibrary {
    docs_dir: PathBuf,
    cache: OnceLock<HashMap<String, String>>,
}

impl PolicyLibrary {
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
            cache: OnceLock::new(),
        }
    }

    /// 是否已完成加载（显式可测，避免隐式全局状态）
    pub fn is_loaded(&self) -> bool {
        self.cache.get().is_some()
    }

    fn policies(&self) -> &HashMap<String, String> {
        self.cache.get_or_init(|| load_policy_docs(&self.docs_dir))
    }

    /// 组合指定领域的策略摘要块；没有任何可用摘要时返回空串
    pub fn summary_for(&self, domains: &BTreeSet<String>) -> String {
        if domains.is_empty() {
            return String::new();
        }
        let policies = self.policies();
        let lines: Vec<String> = domains
            .iter()
            .filter_map(|d| policies.get(d).map(|p| format!("- {}", p)))
            .collect();
        if lines.is_empty() {
            return String::new();
        }
        format!("Provider policy summary:\n{}", lines.join("\n"))
    }
}

/// 读取 docs 目录下每个领域的指南文件；缺失或读不出的文件直接跳过
fn load_policy_docs(docs_dir: &Path) -> HashMap<String, String> {
    let mut cache = HashMap::new();
    for domain in DOMAINS {
        let path = docs_dir.join(format!("{}.md", domain));
        let Ok(body) = std::fs::read_to_string(&path) else {
            continue;
        };
        cache.insert(domain.to_string(), extract_policy(domain, &body));
    }
    cache
}

/// 从指南正文提取摘要：Purpose 段首行 + Tool catalog 的工具名 + 约束条目
fn extract_policy(domain: &str, body: &str) -> String {
    let note_sections = [
        "important limitations for calling agents",
        "constraints",
        "constraints and limits",
        "reliability notes for calling agents",
    ];

    let mut section = String::new();
    let mut purpose = String::new();
    let mut tools: Vec<String> = Vec::new();
    let mut notes: Vec<String> = Vec::new();

    for raw_line in body.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(heading) = line.strip_prefix("## ") {
            section = heading.trim().to_lowercase();
            continue;
        }
        if section == "purpose" && purpose.is_empty() {
            purpose = line.to_string();
            continue;
        }
        if section == "tool catalog" {
            if let Some(rest) = line.strip_prefix("- `") {
                if let Some((name, _)) = rest.split_once('`') {
                    tools.push(name.to_string());
                }
            }
            continue;
        }
        if note_sections.contains(&section.as_str()) {
            if let Some(rest) = line.strip_prefix("- ") {
                notes.push(rest.trim().to_string());
            }
        }
    }

    let tool_preview = if tools.is_empty() {
        "no tools listed".to_string()
    } else {
        tools
            .iter()
            .take(MAX_TOOLS_LISTED)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let note_preview = if notes.is_empty() {
        "no additional constraints".to_string()
    } else {
        notes
            .iter()
            .take(MAX_NOTES_LISTED)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
    };
    let purpose_text = if purpose.is_empty() {
        "no purpose section"
    } else {
        purpose.as_str()
    };
    format!(
        "{}: purpose={}; tools={}; notes={}",
        domain, purpose_text, tool_preview, note_preview
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Mail provider\n\n\
        ## Purpose\n\
        Send and search mail on behalf of the user.\n\n\
        ## Tool catalog\n\
        - `send_email` send a plain message\n\
        - `search_email` query the mailbox\n\n\
        ## Constraints\n\
        - Attachments are not supported\n\
        - Bodies are plain text only\n\
        - Third note that should be cut\n";

    #[test]
    fn test_extract_policy_sections() {
        let line = extract_policy("mail", SAMPLE);
        assert!(line.starts_with("mail: purpose=Send and search mail"));
        assert!(line.contains("tools=send_email, search_email"));
        assert!(line.contains("Attachments are not supported; Bodies are plain text only"));
        assert!(!line.contains("Third note"));
    }

    #[test]
    fn test_extract_policy_missing_sections() {
        let line = extract_policy("maps", "just prose, no headings");
        assert!(line.contains("purpose=no purpose section"));
        assert!(line.contains("tools=no tools listed"));
        assert!(line.contains("notes=no additional constraints"));
    }

    #[test]
    fn test_summary_for_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mail.md"), SAMPLE).unwrap();
        let library = PolicyLibrary::new(dir.path());
        assert!(!library.is_loaded());

        let domains: BTreeSet<String> = ["mail".to_string()].into_iter().collect();
        let block = library.summary_for(&domains);
        assert!(block.starts_with("Provider policy summary:"));
        assert!(library.is_loaded());

        // 已缓存：删除文件后仍能取到
        std::fs::remove_file(dir.path().join("mail.md")).unwrap();
        assert_eq!(library.summary_for(&domains), block);
    }

    #[test]
    fn test_summary_for_empty_domains() {
        let library = PolicyLibrary::new("does/not/exist");
        assert_eq!(library.summary_for(&BTreeSet::new()), "");
    }
}
