mod config;
mod error;
mod result_zip;
mod routes;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser as _;
use k2p_intake::Intake;
use k2p_metrics::Metrics;
use k2p_store::Store;
use k2p_util::root_logger;
use slog::info;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let log = root_logger(config.log_format, config.log_level);
    info!(log, "k2pweb-server starting"; "bind_addr" => %config.bind_addr);

    let store = Store::connect(&config.database_url, config.database_max_connections).await?;
    store.migrate().await?;
    store.log_settings(&log, &config.database_url_redacted(), config.database_max_connections);

    let metrics = Arc::new(Metrics::new().context("constructing metric registry")?);
    let job_storage_root = k2p_util::JobStorageRootBuf::new(config.job_storage_root.clone());
    let result_storage_root = k2p_util::ResultStorageRootBuf::new(config.result_storage_root.clone());

    let intake = Intake::new(store.clone(), metrics.clone(), log.clone(), config.intake_limits(), job_storage_root.clone());

    let state = AppState {
        intake,
        store,
        metrics,
        job_storage_root,
        result_storage_root,
        log: log.clone(),
    };

    let app = Router::new()
        .route("/jobs", post(routes::create_job))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id/logs", get(routes::get_logs))
        .route("/jobs/:id/result.zip", get(routes::get_result_zip))
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes.as_u64() as usize + 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.context("binding server socket")?;
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}
