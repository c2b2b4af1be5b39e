mod ingest;
mod tailer;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use siem_common::config::Settings;
use siem_common::database::{init_db, test_connection};
use siem_common::enrich::Enricher;
use siem_common::parsers::Normalizer;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use ingest::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "siem_collector=info,siem_common=info".into()),
        )
        .init();

    let settings = Settings::from_env().context("configuration")?;

    info!("starting SIEM collector");
    let pool = init_db(&settings.database_url)
        .await
        .context("connecting to the event store")?;
    if let Err(e) = test_connection(&pool).await {
        warn!("store connectivity probe failed: {e}");
    }

    let enricher = Enricher::new(settings.geoip_db_path.as_deref(), true);
    let normalizer = Arc::new(Normalizer::new(enricher));
    let state = Arc::new(AppState {
        pool: pool.clone(),
        normalizer: normalizer.clone(),
    });

    let cancel = CancellationToken::new();

    // file tailer, if any files are configured
    let tailer_handle = if settings.log_files.is_empty() {
        None
    } else {
        let files = settings.log_files.clone();
        let tail_pool = pool.clone();
        let tail_normalizer = normalizer.clone();
        let tail_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = tailer::run_tailer(files, tail_pool, tail_normalizer, tail_cancel).await
            {
                warn!("tailer exited with error: {e}");
            }
        }))
    };

    let app = Router::new()
        .route("/collect", post(ingest::collect_log))
        .route("/alerts", get(ingest::get_alerts))
        .route("/health", get(ingest::health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.collector_addr)
        .await
        .with_context(|| format!("binding {}", settings.collector_addr))?;
    info!("collector listening on {}", settings.collector_addr);

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await
        .context("serving")?;

    if let Some(handle) = tailer_handle {
        let _ = handle.await;
    }
    info!("collector stopped");
    Ok(())
}
