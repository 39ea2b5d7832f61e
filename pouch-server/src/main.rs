use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pouch_blob::{BlobConfig, SessionSweeper};
use pouch_core::config::PouchConfig;
use pouch_queue::LeaseReaper;
use pouch_server::jobs::{AssetCompletionJob, EmailJob, ASSETS_QUEUE, EMAILS_QUEUE};
use pouch_server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = PouchConfig::new();
    config.load_env("POUCH__");
    let snapshot = config.snapshot();

    let host = snapshot
        .get_string("server.host")
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = snapshot.get_u64("server.port").unwrap_or(3030);

    let blob_config = BlobConfig::default()
        .with_max_upload_bytes(
            snapshot
                .get_u64("upload.max_bytes")
                .unwrap_or(50 * 1024 * 1024),
        )
        .with_session_ttl(Duration::from_secs(
            snapshot
                .get_u64("upload.session_ttl_secs")
                .unwrap_or(24 * 60 * 60),
        ))
        .with_url_ttl(Duration::from_secs(
            snapshot.get_u64("upload.url_ttl_secs").unwrap_or(300),
        ));

    let state = AppState::in_memory(blob_config);

    state.queue.register_job::<AssetCompletionJob>().await?;
    state.queue.register_job::<EmailJob>().await?;

    let worker = state.queue.start_workers(
        state.worker_context(),
        vec![ASSETS_QUEUE.to_string(), EMAILS_QUEUE.to_string()],
    );

    let reaper = LeaseReaper::new(state.queue.backend_arc());
    tokio::spawn(async move {
        let _ = reaper.start().await;
    });

    let sweeper = SessionSweeper::new(
        Arc::clone(&state.gateway),
        Duration::from_secs(snapshot.get_u64("upload.sweep_interval_secs").unwrap_or(60)),
    )
    .start();

    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "pouch-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down");
    sweeper.shutdown().await;
    worker.shutdown().await?;
    Ok(())
}
