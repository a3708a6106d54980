mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use k2p_container::ContainerBackend;
use k2p_dispatcher::{Backend, Supervisor};
use k2p_metrics::Metrics;
use k2p_orchestrator::OrchestratorBackend;
use k2p_store::Store;
use k2p_util::{root_logger, JobStorageRootBuf, ResultStorageRootBuf, RunnerBackendKind};
use slog::info;
use tokio::sync::watch;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    let log = root_logger(config.log_format, config.log_level);

    if let Some(zip_path) = &config.run_once {
        return run_once(&config, &log, zip_path).await;
    }

    info!(log, "k2pweb-dispatcherd starting"; "backend" => ?config.backend);

    let store = Store::connect(&config.database_url, config.database_max_connections).await?;
    store.migrate().await?;
    store.log_settings(&log, &config.database_url_redacted(), config.database_max_connections);

    let metrics = Arc::new(Metrics::new().context("constructing metric registry")?);
    let backend: Arc<dyn Backend> = match config.backend {
        RunnerBackendKind::Container => Arc::new(ContainerBackend::new(config.container_config(), log.clone())),
        RunnerBackendKind::Orchestrator => Arc::new(OrchestratorBackend::new(config.orchestrator_config(), log.clone())),
    };

    let job_storage_root: JobStorageRootBuf = JobStorageRootBuf::new(config.job_storage_root.clone());
    let result_storage_root: ResultStorageRootBuf = ResultStorageRootBuf::new(config.result_storage_root.clone());

    let supervisor = Supervisor::new(
        store,
        backend,
        metrics,
        log.clone(),
        job_storage_root,
        result_storage_root,
        Duration::from_secs(config.tick_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await
}

/// Manual single-shot runner: always uses the Container backend regardless
/// of `JOB_RUNNER_BACKEND`, since it's an operator smoke-test of the image,
/// not a lifecycle-tracked job (SPEC_FULL.md "`k2p_run_once`-style").
async fn run_once(config: &Config, log: &slog::Logger, zip_path: &std::path::Path) -> Result<()> {
    let backend = ContainerBackend::new(config.container_config(), log.clone());
    let out_dir = std::env::temp_dir().join(format!("k2p-run-once-{}", uuid::Uuid::new_v4()));
    let job_id = k2p_base::JobId::new();
    let outcome = backend.run_once(job_id, zip_path, &out_dir).await?;
    info!(log, "run-once finished";
        "succeeded" => outcome.succeeded,
        "exit_code" => ?outcome.exit_code,
        "out_dir" => %out_dir.display(),
    );
    if !outcome.succeeded {
        anyhow::bail!("run-once failed: {}", outcome.error_message.unwrap_or_default());
    }
    Ok(())
}
