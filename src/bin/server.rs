//! 在办小助手 HTTP 服务
//!
//! 启动: cargo run --bin zaiban-server --features server [配置文件]
//! 监听地址取 [server].addr（默认 0.0.0.0:8000），Ctrl+C 优雅退出。

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use tokio_util::sync::CancellationToken;
    use zaiban::gateway::WorkerPool;
    use zaiban::integrations::http::{create_router, HttpState};
    use zaiban::planning::{parse_plan_time, DailyPlanner, LogNotifier};
    use zaiban::{create_assistant, load_config, observability};

    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let assistant = Arc::new(create_assistant(&cfg).context("Failed to create assistant")?);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, shutting down");
                token.cancel();
            }
        });
    }

    let (pool, pool_handle) = WorkerPool::start(assistant.clone(), &cfg.workers, token.clone());
    assistant.spawn_maintenance(Duration::from_secs(300), token.clone());
    if cfg.schedule.enabled {
        match parse_plan_time(&cfg.schedule.daily_plan_time) {
            Some(at) => {
                let planner = Arc::new(DailyPlanner::from_assistant(&assistant));
                planner.spawn(at, Arc::new(LogNotifier), token.clone());
            }
            None => tracing::warn!(value = %cfg.schedule.daily_plan_time, "invalid daily_plan_time, planner disabled"),
        }
    }

    let app = create_router(Arc::new(HttpState { assistant, pool }));
    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.addr))?;
    tracing::info!("zaiban server listening on http://{}", cfg.server.addr);

    let shutdown = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    let _ = pool_handle.await;
    Ok(())
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("请使用 --features server 编译: cargo run --bin zaiban-server --features server");
    std::process::exit(1);
}
