//! 工具目录
//!
//! 进程级共享：首次请求触发初始化（显式 OnceCell，可测），之后只读。
//! 初始化时并发启动全部 Provider 并收集工具清单；单个 Provider 启动失败
//! 只记为不可用，不影响整体。invoke 对每次调用施加独立超时，并输出一行
//! JSON 审计日志。调用本身无共享状态，支持并发请求复用同一目录。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::text::log_preview;
use crate::tools::provider::{ToolDescriptor, ToolProvider};

/// 初始化完成后的目录快照
struct CatalogState {
    descriptors: Vec<ToolDescriptor>,
    routes: HashMap<String, Arc<dyn ToolProvider>>,
    provider_names: Vec<String>,
    unavailable: Vec<String>,
}

/// 工具目录：持有 Provider 句柄与单次调用超时
pub struct ToolCatalog {
    providers: Vec<Arc<dyn ToolProvider>>,
    invoke_timeout: Duration,
    state: OnceCell<CatalogState>,
}

impl ToolCatalog {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>, invoke_timeout_secs: u64) -> Self {
        Self {
            providers,
            invoke_timeout: Duration::from_secs(invoke_timeout_secs),
            state: OnceCell::new(),
        }
    }

    /// 是否已完成初始化
    pub fn is_started(&self) -> bool {
        self.state.initialized()
    }

    /// 确保目录已初始化（惰性、只执行一次、并发安全）
    async fn started(&self) -> &CatalogState {
        self.state
            .get_or_init(|| async { self.discover().await })
            .await
    }

    /// 并发启动全部 Provider 并收集工具；失败的记入 unavailable
    async fn discover(&self) -> CatalogState {
        let listings = join_all(
            self.providers
                .iter()
                .map(|p| async move { (p.clone(), p.list_tools().await) }),
        )
        .await;

        let mut descriptors = Vec::new();
        let mut routes: HashMap<String, Arc<dyn ToolProvider>> = HashMap::new();
        let mut provider_names = Vec::new();
        let mut unavailable = Vec::new();
        for (provider, listing) in listings {
            match listing {
                Ok(tools) => {
                    provider_names.push(provider.name().to_string());
                    for descriptor in tools {
                        routes.insert(descriptor.name.clone(), provider.clone());
                        descriptors.push(descriptor);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to start provider {}: {}", provider.name(), e);
                    unavailable.push(provider.name().to_string());
                }
            }
        }
        tracing::info!(
            "Tool catalog ready: {} tools from {} provider(s), {} unavailable",
            descriptors.len(),
            provider_names.len(),
            unavailable.len()
        );
        CatalogState {
            descriptors,
            routes,
            provider_names,
            unavailable,
        }
    }

    /// 全部工具描述（已初始化后的快照副本）
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.started().await.descriptors.clone()
    }

    /// 启动成功的 Provider 名列表
    pub async fn provider_names(&self) -> Vec<String> {
        self.started().await.provider_names.clone()
    }

    /// 启动失败的 Provider 名列表
    pub async fn unavailable_providers(&self) -> Vec<String> {
        self.started().await.unavailable.clone()
    }

    /// 工具所属 Provider 名；未知工具返回 None
    pub async fn provider_of(&self, tool_name: &str) -> Option<String> {
        self.started()
            .await
            .routes
            .get(tool_name)
            .map(|p| p.name().to_string())
    }

    /// 目录中是否存在指定工具
    pub async fn has_tool(&self, tool_name: &str) -> bool {
        self.started().await.routes.contains_key(tool_name)
    }

    /// 调用指定工具：未知工具与超时都作为 Err 文本返回，由归一化层收敛；
    /// 每次调用输出 JSON 审计日志
    pub async fn invoke(&self, tool_name: &str, args: Value) -> Result<String, String> {
        let state = self.started().await;
        let start = Instant::now();
        let args_preview = log_preview(&args.to_string());

        let result = match state.routes.get(tool_name) {
            Some(provider) => match timeout(self.invoke_timeout, provider.invoke(tool_name, args))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(format!(
                    "Tool '{}' timed out after {}s",
                    tool_name,
                    self.invoke_timeout.as_secs()
                )),
            },
            None => Err(format!("Tool '{}' is not available in the catalog", tool_name)),
        };

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(e) if e.contains("timed out") => (false, "timeout"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct FakeProvider {
        name: &'static str,
        fail_start: bool,
        slow: bool,
    }

    #[async_trait]
    impl ToolProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
            if self.fail_start {
                return Err("transport refused".to_string());
            }
            Ok(vec![ToolDescriptor {
                name: format!("{}_tool", self.name),
                description: "fake".to_string(),
                input_schema: json!({"type": "object", "properties": {}}),
                provider: self.name.to_string(),
            }])
        }

        async fn invoke(&self, tool_name: &str, _args: Value) -> Result<String, String> {
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(format!("{} done", tool_name))
        }
    }

    fn catalog_of(providers: Vec<FakeProvider>, timeout_secs: u64) -> ToolCatalog {
        ToolCatalog::new(
            providers
                .into_iter()
                .map(|p| Arc::new(p) as Arc<dyn ToolProvider>)
                .collect(),
            timeout_secs,
        )
    }

    #[tokio::test]
    async fn test_failed_provider_excluded_not_fatal() {
        let catalog = catalog_of(
            vec![
                FakeProvider { name: "mail", fail_start: true, slow: false },
                FakeProvider { name: "calendar", fail_start: false, slow: false },
            ],
            5,
        );
        assert!(!catalog.is_started());
        let descriptors = catalog.descriptors().await;
        assert!(catalog.is_started());
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].provider, "calendar");
        assert_eq!(catalog.unavailable_providers().await, vec!["mail"]);
        assert_eq!(catalog.provider_names().await, vec!["calendar"]);
    }

    #[tokio::test]
    async fn test_invoke_routes_by_name() {
        let catalog = catalog_of(
            vec![FakeProvider { name: "mail", fail_start: false, slow: false }],
            5,
        );
        let out = catalog.invoke("mail_tool", json!({})).await.unwrap();
        assert_eq!(out, "mail_tool done");
        assert_eq!(catalog.provider_of("mail_tool").await.as_deref(), Some("mail"));
        assert!(catalog.has_tool("mail_tool").await);
        assert!(!catalog.has_tool("nope").await);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_is_call_error() {
        let catalog = catalog_of(
            vec![FakeProvider { name: "mail", fail_start: false, slow: false }],
            5,
        );
        let err = catalog.invoke("nope", json!({})).await.unwrap_err();
        assert!(err.contains("not available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_bounded_by_deadline() {
        let catalog = catalog_of(
            vec![FakeProvider { name: "drive", fail_start: false, slow: true }],
            1,
        );
        let err = catalog.invoke("drive_tool", json!({})).await.unwrap_err();
        assert!(err.contains("timed out"));
    }
}
