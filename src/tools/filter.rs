//! 工具集过滤
//!
//! 按推断出的领域集合收窄目录：只保留所属 Provider 命中的工具。
//! 领域集合为空（意图不明）时原样放行，宁可多给模型工具也不能少给。

use std::collections::HashSet;

use crate::tools::provider::ToolDescriptor;

/// 过滤工具描述列表；domains 为空时全量放行
pub fn filter_descriptors(
    descriptors: Vec<ToolDescriptor>,
    domains: &HashSet<String>,
) -> Vec<ToolDescriptor> {
    if domains.is_empty() {
        return descriptors;
    }
    descriptors
        .into_iter()
        .filter(|d| domains.contains(&d.provider))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str, provider: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({}),
            provider: provider.to_string(),
        }
    }

    #[test]
    fn test_filter_keeps_matching_providers() {
        let all = vec![
            descriptor("send_email", "mail"),
            descriptor("add_event", "calendar"),
            descriptor("search_place", "maps"),
        ];
        let domains: HashSet<String> =
            ["mail".to_string(), "calendar".to_string()].into_iter().collect();
        let kept = filter_descriptors(all, &domains);
        let names: Vec<&str> = kept.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["send_email", "add_event"]);
    }

    #[test]
    fn test_empty_domains_pass_through() {
        let all = vec![descriptor("send_email", "mail"), descriptor("search_place", "maps")];
        let kept = filter_descriptors(all.clone(), &HashSet::new());
        assert_eq!(kept.len(), all.len());
    }
}
