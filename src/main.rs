use std::sync::Arc;

use anyhow::Context;

use realty_pipeline_lib::analytics::SnapshotScheduler;
use realty_pipeline_lib::config::ServerConfig;
use realty_pipeline_lib::db::Database;
use realty_pipeline_lib::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env();
    log::info!("Opening database at {}", config.db_path);

    let db = Arc::new(Database::new(&config.db_path).context("database initialization failed")?);

    let scheduler = SnapshotScheduler::new(db.clone());
    scheduler.start(config.snapshot_interval_secs).await;

    let app = server::router(db);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
