//! AgentView - stdio 宿主
//!
//! 入口：初始化日志、加载配置、装配编排器，并把 stdin/stdout 当作 UI 通道（每行一个 JSON 信封）。
//!
//! 运行方式：
//! ```bash
//! cargo run -- [config.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use agentview::config::load_config;
use agentview::gateway::{spawn_json_reader, spawn_json_writer, UiChannel};
use agentview::observability;
use agentview::runtime::MockRuntime;
use agentview::OrchestratorBuilder;
use tokio::io::BufReader;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let runtime = MockRuntime::new(Duration::from_millis(cfg.runtime.latency_ms))
        .with_bots(cfg.runtime.bots.clone());
    let orchestrator = OrchestratorBuilder::new(cfg, Arc::new(runtime)).build().await;

    let (ui, outbound_rx) = UiChannel::new();
    orchestrator.attach_view(ui).await;
    let writer = spawn_json_writer(outbound_rx, tokio::io::stdout());

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let _reader = spawn_json_reader(BufReader::new(tokio::io::stdin()), inbound_tx);

    tracing::info!("AgentView ready on stdio");
    let interrupted = tokio::select! {
        _ = Arc::clone(&orchestrator).run(inbound_rx) => {
            tracing::info!("UI disconnected");
            false
        }
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, shutting down...");
            true
        }
    };

    orchestrator.shutdown().await;
    orchestrator.detach_view().await;
    drop(orchestrator);
    // 视图的发送端全部释放后 writer 才会退出
    match tokio::time::timeout(Duration::from_secs(2), writer).await {
        Ok(Err(e)) => tracing::warn!("Writer task failed: {}", e),
        Err(_) => tracing::warn!("Timed out flushing pending UI messages"),
        Ok(Ok(())) => {}
    }

    if interrupted {
        // stdin 读取阻塞在后台线程上，直接退出
        std::process::exit(0);
    }
    Ok(())
}
