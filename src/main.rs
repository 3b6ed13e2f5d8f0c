//! Clerk - Rust 办公助理智能体
//!
//! 入口：初始化日志与配置，组装工具目录 / 模型后端 / 引擎，
//! 运行一个逐行读取 stdin 的对话循环。

use std::io::{BufRead, Write};
use std::sync::Arc;

use clerk::config::load_config;
use clerk::core::{ChatEngine, JsonlMetricsSink, Turn};
use clerk::llm::create_backends_from_config;
use clerk::policy::PolicyLibrary;
use clerk::tools::{EchoProvider, ToolCatalog, ToolProvider};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clerk::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    let providers: Vec<Arc<dyn ToolProvider>> = vec![Arc::new(EchoProvider)];
    let catalog = Arc::new(ToolCatalog::new(providers, cfg.tools.invoke_timeout_secs));
    let backends = create_backends_from_config(&cfg);
    let engine = ChatEngine::new(
        catalog,
        backends,
        PolicyLibrary::new(&cfg.policy.docs_dir),
        Arc::new(JsonlMetricsSink::new(&cfg.metrics.path)),
        &cfg.app.base_instruction,
    )
    .with_max_tool_content_chars(cfg.tools.max_result_chars);

    let model = cfg.app.default_model.clone();
    let mut history: Vec<Turn> = Vec::new();
    let stdin = std::io::stdin();

    println!("clerk ready (model: {}). Ctrl-D to exit.", model);
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let (next_history, outcome) = engine
            .run(&line, &history, &model, None, CancellationToken::new())
            .await;
        history = next_history;
        if !outcome.final_text.is_empty() {
            println!("{}", outcome.final_text);
        }
    }

    Ok(())
}
