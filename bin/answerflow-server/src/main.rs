//! answerflow-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Connect the status store and the blob store.
//! 4. Wire the media and transcription engines.
//! 5. Start the orchestrator and the event router.
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use answerflow_core::services::blob::BlobStore;
use answerflow_core::services::blob::local::LocalBlobStore;
use answerflow_core::services::blob::s3::{S3BlobStore, S3Config};
use answerflow_core::services::media::ffmpeg::FfmpegEngine;
use answerflow_core::services::store::StatusStore;
use answerflow_core::services::store::graphql::{GraphqlStatusStore, GraphqlStoreConfig};
use answerflow_core::services::store::sqlite::SqliteStatusStore;
use answerflow_core::services::transcribe::http::{HttpTranscriber, HttpTranscriberConfig};
use answerflow_core::{EventRouter, Orchestrator, Services};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{BlobBackend, Config, StoreBackend};
use crate::state::AppState;

/// Transcription events buffered between the engine and the router.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: ANSWERFLOW_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "answerflow-server starting");

    // ── 3. Stores ──────────────────────────────────────────────────────────────
    let store: Arc<dyn StatusStore> = match cfg.store_backend {
        StoreBackend::Sqlite => {
            let store = SqliteStatusStore::connect(&cfg.database_url).await?;
            info!(database_url = %cfg.database_url, "sqlite status store ready");
            Arc::new(store)
        }
        StoreBackend::Graphql => {
            info!(endpoint = %cfg.graphql_endpoint, "using graphql status store");
            Arc::new(GraphqlStatusStore::new(GraphqlStoreConfig {
                endpoint: cfg.graphql_endpoint.clone(),
                api_secret: cfg.graphql_api_secret.clone(),
            }))
        }
    };

    let blobs: Arc<dyn BlobStore> = match cfg.blob_backend {
        BlobBackend::Local => {
            info!(root = %cfg.blob_root.display(), "using local blob store");
            Arc::new(LocalBlobStore::new(cfg.blob_root.clone()))
        }
        BlobBackend::S3 => {
            info!(region = %cfg.s3_region, endpoint = ?cfg.s3_endpoint, "using s3 blob store");
            Arc::new(S3BlobStore::new(S3Config {
                region: cfg.s3_region.clone(),
                endpoint: cfg.s3_endpoint.clone(),
                access_key_id: cfg.s3_access_key_id.clone(),
                secret_access_key: cfg.s3_secret_access_key.clone(),
            }))
        }
    };

    // ── 4. Engines ─────────────────────────────────────────────────────────────
    let media = Arc::new(FfmpegEngine::new(cfg.ffmpeg_path.clone(), cfg.ffprobe_path.clone()));

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let transcriber = Arc::new(HttpTranscriber::new(
        HttpTranscriberConfig {
            endpoint: cfg.transcribe_endpoint.clone(),
            model: cfg.transcribe_model.clone(),
            api_key: cfg.transcribe_api_key.clone(),
        },
        Arc::clone(&blobs),
        events_tx,
    ));

    // ── 5. Orchestrator + event router ─────────────────────────────────────────
    let services = Services::new(cfg.pipeline.clone(), store, blobs, media, transcriber);
    let orchestrator = Orchestrator::start(services.clone(), cfg.queue_capacity, cfg.max_concurrent);
    let events = EventRouter::new(services);
    let event_loop = events.clone().spawn(events_rx);
    info!(
        queue_capacity = cfg.queue_capacity,
        max_concurrent = cfg.max_concurrent,
        "orchestrator started"
    );

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        orchestrator,
        events,
    });

    // ── 6. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let live = state.orchestrator.storage().live().await;
    if live > 0 {
        warn!(live, "stopping with workflows still in flight");
    }
    event_loop.abort();

    info!("answerflow-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
