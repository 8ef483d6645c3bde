mod api;
mod bridge;
mod config;
mod context;
mod reconciler;
mod submitter;

use clap::Parser;
use config::{Cli, Config};
use context::AppContext;
use reconciler::Reconciler;
use task_store::TaskStore;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli);
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(config.logs_dir())?;

    let store = TaskStore::open(&config.db_path())?;
    let listen = config.listen.clone();
    let ctx = AppContext::new(store, config);

    let reconciler = Reconciler::spawn(ctx.clone());

    let app = api::router(ctx).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(addr = %listen, "local-proxy listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    reconciler.stop().await;
    Ok(())
}
