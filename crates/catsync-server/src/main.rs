//! catsync-server — admin HTTP surface over the catsync core.
//!
//! Usage: `catsync-server [config.json]` (or `CATSYNC_CONFIG=path`).

mod routes;
mod state;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use catsync::{
    Database, FsObjectStore, ObjectStore, Reconciler, RunCoordinator, RunProgressBroadcaster,
    ScriptRunner, SyncPipeline,
};

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CATSYNC_CONFIG").ok())
        .unwrap_or_else(|| "catsync.json".to_string());
    let config = catsync::load_config(Path::new(&config_path))?;
    tracing::info!(config = %config_path, "configuration loaded");

    let db = Database::open(&config.database_path)?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.store.root));
    let broadcaster = Arc::new(RunProgressBroadcaster::default());

    let pipeline = Arc::new(SyncPipeline::new(
        db.clone(),
        Arc::clone(&store),
        Arc::new(ScriptRunner::new()),
        config.scripts.clone(),
        config.store.clone(),
    ));
    let coordinator = Arc::new(RunCoordinator::new(
        db.clone(),
        pipeline,
        Arc::clone(&broadcaster),
    ));
    let reconciler = Arc::new(Reconciler::new(
        db.clone(),
        Arc::clone(&store),
        config.store.clone(),
        config.reconcile.clone(),
    ));

    spawn_progress_logger(&broadcaster);

    let app = routes::router(AppState {
        db,
        coordinator,
        reconciler,
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("catsync-server listening on {}", config.server.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bridges `log` records into tracing and installs the fmt subscriber.
fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Mirrors run progress events into the server log so operators can
/// follow background runs without a streaming client attached.
fn spawn_progress_logger(broadcaster: &Arc<RunProgressBroadcaster>) {
    let mut rx = broadcaster.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    tracing::info!(
                        run_id = %event.run_id,
                        client = %event.client_name,
                        phase = %event.phase,
                        "{}",
                        event.message
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("progress stream lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
