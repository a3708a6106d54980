use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use k2p_base::{Job, JobId, JobStatus};
use k2p_metrics::Metrics;
use k2p_store::{JobUpdate, Store};
use k2p_util::fs::Fs;
use k2p_util::{JobStorageRootBuf, ResultStorageRootBuf};
use slog::{error, info, Logger};
use tokio::sync::watch;

use crate::backend::{Backend, Outcome, PollResult, StartResult};

/// Long-running supervisor implementing the tick cycle of spec §4.5: one
/// claim-and-run per tick, then a reconcile pass over everything already
/// `RUNNING`.
pub struct Supervisor {
    store: Store,
    backend: Arc<dyn Backend>,
    metrics: Arc<Metrics>,
    log: Logger,
    job_storage_root: JobStorageRootBuf,
    result_storage_root: ResultStorageRootBuf,
    tick_interval: Duration,
}

impl Supervisor {
    pub fn new(
        store: Store,
        backend: Arc<dyn Backend>,
        metrics: Arc<Metrics>,
        log: Logger,
        job_storage_root: JobStorageRootBuf,
        result_storage_root: ResultStorageRootBuf,
        tick_interval: Duration,
    ) -> Self {
        Self { store, backend, metrics, log, job_storage_root, result_storage_root, tick_interval }
    }

    /// Runs ticks until `shutdown` is signaled. On shutdown, finishes the
    /// current tick and returns without sleeping (spec §5 "Cancellation").
    /// A tick error is logged, counted, and re-raised so the process can be
    /// restarted by its supervisor (spec §4.5 "Heartbeat + error isolation").
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if let Err(err) = self.tick().await {
                self.metrics.worker_errors_total.inc();
                error!(self.log, "dispatcher tick failed"; "error" => %err);
                return Err(err);
            }
            self.metrics.worker_heartbeat_timestamp_seconds.set(Utc::now().timestamp() as f64);

            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        self.submit_one().await?;
        self.reconcile_running().await?;
        Ok(())
    }

    async fn submit_one(&self) -> Result<()> {
        let Some(job) = self.store.claim_next_queued().await? else {
            return Ok(());
        };

        let Some(input_key) = job.input_key.clone() else {
            self.terminally_fail(job.id, k2p_base::ErrorCode::InputMissing, "job has no persisted input").await?;
            return Ok(());
        };
        let input_path = self.job_storage_root.join(&input_key);
        if !input_path.exists() {
            self.terminally_fail(job.id, k2p_base::ErrorCode::InputMissing, "persisted archive is missing").await?;
            return Ok(());
        }

        let result_key = format!("jobs/{}/", job.id);
        let out_dir = self.result_storage_root.join(&result_key);
        Fs.create_dir_all(&out_dir).context("creating result directory")?;

        match self.backend.start(&job, &input_path, &out_dir).await {
            Ok(StartResult::Terminal(outcome)) => {
                self.persist_terminal(&job, outcome, result_key).await?;
            }
            Ok(StartResult::Submitted { backend_ref }) => {
                self.store.update(job.id, &JobUpdate::new().backend_ref(backend_ref)).await?;
            }
            Err(err) => {
                info!(self.log, "backend start failed"; "job_id" => %job.id, "error" => %err);
                self.terminally_fail(job.id, k2p_base::ErrorCode::GeneralFailure, err.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn reconcile_running(&self) -> Result<()> {
        for job in self.store.list_running_with_backend_ref().await? {
            let Some(backend_ref) = job.backend_ref.clone() else { continue };
            match self.backend.poll(&backend_ref).await {
                Ok(PollResult::Running) => {}
                Ok(PollResult::Terminal(outcome)) => {
                    let result_key = format!("jobs/{}/", job.id);
                    self.persist_terminal(&job, outcome, result_key).await?;
                }
                Err(err) => {
                    error!(self.log, "backend poll failed"; "job_id" => %job.id, "error" => %err);
                }
            }
        }
        Ok(())
    }

    async fn persist_terminal(&self, job: &Job, outcome: Outcome, result_key: String) -> Result<()> {
        let finished_at = Utc::now();
        let status = if outcome.succeeded { JobStatus::Succeeded } else { JobStatus::Failed };

        let mut update = JobUpdate::new()
            .status(status)
            .finished_at(finished_at)
            .stdout_tail(outcome.stdout_tail)
            .stderr_tail(outcome.stderr_tail)
            .result_key(result_key);
        if let Some(exit_code) = outcome.exit_code {
            update = update.exit_code(exit_code);
            self.metrics.observe_exit_code(exit_code);
        }
        if let (Some(code), Some(message)) = (outcome.error_code, outcome.error_message) {
            update = update.error(code, message);
        }

        self.store.update(job.id, &update).await?;

        if let Some(started_at) = job.started_at {
            let queue_wait = (started_at - job.created_at).num_milliseconds() as f64 / 1000.0;
            let run = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
            let end_to_end = (finished_at - job.created_at).num_milliseconds() as f64 / 1000.0;
            self.metrics.observe_terminal(status, queue_wait, run, end_to_end);
        }
        Ok(())
    }

    async fn terminally_fail(&self, job_id: JobId, code: k2p_base::ErrorCode, message: impl Into<String>) -> Result<()> {
        self.store
            .update(
                job_id,
                &JobUpdate::new()
                    .status(JobStatus::Failed)
                    .finished_at(Utc::now())
                    .error(code, message),
            )
            .await
    }
}
