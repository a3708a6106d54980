//! Job Store (C3): durable job records and settings metadata over Postgres,
//! with exclusive-claim queue semantics safe across multiple dispatcher
//! processes.
//!
//! The store is the only component permitted to mutate `jobs`/
//! `job_settings_meta` rows; every write outside of `create` goes through
//! [`JobUpdate`].

mod row;
mod update;

use anyhow::{Context as _, Result};
use chrono::Utc;
use futures::TryStreamExt as _;
use k2p_base::{Job, JobId, JobSettingsMeta, JobStatus};
use slog::{info, Logger};
use sqlx::postgres::{PgPoolOptions, PgRow, Postgres};
use sqlx::{PgPool, QueryBuilder, Row as _};

pub use update::JobUpdate;

use row::row_to_job;

/// Default page size for [`Store::list_running_with_backend_ref`], chosen
/// to bound memory while streaming (spec §4.3).
pub const RUNNING_PAGE_SIZE: i64 = 50;

/// Handle onto the durable Job Store. Cheaply cloneable; wraps a pooled
/// connection, mirroring how the broker side of most of these systems
/// hands a shared pool handle to every task that needs it.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connects with a small fixed-size pool. `max_connections` should
    /// exceed the dispatcher's expected concurrency plus API server
    /// headroom; sizing is a deployment concern, not a store concern.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to job store database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running job store migrations")
    }

    /// Logs non-secret connection settings at boot, the way a service
    /// typically reports its effective DB configuration once on startup.
    pub fn log_settings(&self, log: &Logger, database_url_redacted: &str, max_connections: u32) {
        info!(log, "job store configured";
            "database_url" => database_url_redacted,
            "max_connections" => max_connections,
            "pool_size" => self.pool.size(),
        );
    }

    pub async fn healthcheck(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts a new job row (spec §4.3 `create`).
    pub async fn create(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, status, created_at, started_at, finished_at,
                original_filename, input_size, input_sha256, input_key,
                backend_ref, exit_code, stdout_tail, stderr_tail, result_key,
                error_code, error_message
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9,
                $10, $11, $12, $13, $14,
                $15, $16
            )
            "#,
        )
        .bind(job.id.0)
        .bind(job.status.to_string())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.original_filename)
        .bind(job.input_size)
        .bind(&job.input_sha256)
        .bind(&job.input_key)
        .bind(&job.backend_ref)
        .bind(job.exit_code)
        .bind(&job.stdout_tail)
        .bind(&job.stderr_tail)
        .bind(&job.result_key)
        .bind(job.error_code.map(|c| c.to_string()))
        .bind(&job.error_message)
        .execute(&self.pool)
        .await
        .context("inserting job")?;
        Ok(())
    }

    /// Atomically claims the oldest `QUEUED` job and transitions it to
    /// `RUNNING`, returning `None` if the queue is empty. Safe across
    /// concurrent dispatchers: `FOR UPDATE SKIP LOCKED` ensures no two
    /// callers observe the same row (spec §4.3 claim semantics, I1).
    pub async fn claim_next_queued(&self) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await.context("beginning claim transaction")?;

        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = 'QUEUED'
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .context("selecting next queued job")?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let id: uuid::Uuid = row.try_get("id")?;
        let started_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'RUNNING', started_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(started_at)
        .execute(&mut *tx)
        .await
        .context("claiming job")?;

        let mut job = row_to_job(&row)?;
        job.status = JobStatus::Running;
        job.started_at = Some(started_at);

        tx.commit().await.context("committing claim transaction")?;
        Ok(Some(job))
    }

    /// Partial field update (spec §4.3 `update`). Only fields present in
    /// `fields` are written.
    pub async fn update(&self, job_id: JobId, fields: &JobUpdate) -> Result<()> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE jobs SET ");
        let mut sep = builder.separated(", ");
        let mut any = false;

        macro_rules! set {
            ($col:literal, $value:expr) => {
                if let Some(value) = $value {
                    sep.push(concat!($col, " = "));
                    sep.push_bind_unseparated(value);
                    any = true;
                }
            };
        }

        set!("status", fields.status.map(|s| s.to_string()));
        set!("started_at", fields.started_at);
        set!("finished_at", fields.finished_at);
        set!("input_key", fields.input_key.clone());
        set!("input_sha256", fields.input_sha256.clone());
        set!("backend_ref", fields.backend_ref.clone());
        set!("exit_code", fields.exit_code);
        set!("stdout_tail", fields.stdout_tail.clone());
        set!("stderr_tail", fields.stderr_tail.clone());
        set!("result_key", fields.result_key.clone());
        set!("error_code", fields.error_code.map(|c| c.to_string()));
        set!("error_message", fields.error_message.clone());

        if !any {
            return Ok(());
        }

        builder.push(" WHERE id = ");
        builder.push_bind(job_id.0);

        builder
            .build()
            .execute(&self.pool)
            .await
            .context("updating job")?;
        Ok(())
    }

    /// Streams `RUNNING` jobs with a non-empty `backend_ref` in pages of
    /// `RUNNING_PAGE_SIZE` (spec §4.3 `list_running_with_backend_ref`).
    pub async fn list_running_with_backend_ref(&self) -> Result<Vec<Job>> {
        let mut out = Vec::new();
        let mut after: Option<(chrono::DateTime<Utc>, uuid::Uuid)> = None;

        loop {
            let rows: Vec<PgRow> = match after {
                None => sqlx::query(
                    r#"
                    SELECT * FROM jobs
                    WHERE status = 'RUNNING' AND backend_ref IS NOT NULL AND backend_ref != ''
                    ORDER BY created_at ASC, id ASC
                    LIMIT $1
                    "#,
                )
                .bind(RUNNING_PAGE_SIZE)
                .fetch(&self.pool)
                .try_collect()
                .await
                .context("listing running jobs")?,
                Some((created_at, id)) => sqlx::query(
                    r#"
                    SELECT * FROM jobs
                    WHERE status = 'RUNNING' AND backend_ref IS NOT NULL AND backend_ref != ''
                        AND (created_at, id) > ($2, $3)
                    ORDER BY created_at ASC, id ASC
                    LIMIT $1
                    "#,
                )
                .bind(RUNNING_PAGE_SIZE)
                .bind(created_at)
                .bind(id)
                .fetch(&self.pool)
                .try_collect()
                .await
                .context("listing running jobs")?,
            };

            if rows.is_empty() {
                break;
            }
            let page_len = rows.len();
            for row in &rows {
                let job = row_to_job(row)?;
                after = Some((job.created_at, job.id.0));
                out.push(job);
            }
            if (page_len as i64) < RUNNING_PAGE_SIZE {
                break;
            }
        }

        Ok(out)
    }

    /// Queue-depth probe for admission control (spec §4.3 `count_by_status`,
    /// §4.4 step 1).
    pub async fn count_by_status(&self, statuses: &[JobStatus]) -> Result<i64> {
        let tags: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = ANY($1)")
            .bind(&tags)
            .fetch_one(&self.pool)
            .await
            .context("counting jobs by status")?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    /// Per-status job counts for every [`JobStatus`] variant, zero-filled
    /// for any status with no current rows so a gauge doesn't stick at a
    /// stale nonzero value once a status empties out. Used by the
    /// `/metrics` route to refresh `jobs_by_state`/`job_queue_depth` on
    /// scrape, mirroring `metrics_api.py`'s `JobsDbMetricsCollector`.
    pub async fn counts_by_status_all(&self) -> Result<Vec<(JobStatus, i64)>> {
        let rows: Vec<PgRow> = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("counting jobs by status")?;

        let mut counts = [
            (JobStatus::Queued, 0i64),
            (JobStatus::Running, 0i64),
            (JobStatus::Succeeded, 0i64),
            (JobStatus::Failed, 0i64),
        ];
        for row in &rows {
            let status: String = row.try_get("status")?;
            let Ok(status) = status.parse::<JobStatus>() else { continue };
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == status) {
                slot.1 = row.try_get("n")?;
            }
        }
        Ok(counts.to_vec())
    }

    /// Unix timestamp of the most recently finished job, or `None` if no
    /// job has ever finished (mirrors `JobsDbMetricsCollector`'s `Max`
    /// aggregate over `finished_at`).
    pub async fn last_finished_at(&self) -> Result<Option<chrono::DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(finished_at) AS latest FROM jobs")
            .fetch_one(&self.pool)
            .await
            .context("fetching most recent finished_at")?;
        Ok(row.try_get("latest")?)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row: Option<PgRow> = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .context("fetching job")?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn delete(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .context("deleting job")?;
        Ok(())
    }

    /// Inserts the settings-metadata rows derived for a job (spec §4.4
    /// step 8). Replaces any existing rows for the job.
    pub async fn replace_settings_meta(&self, job_id: JobId, rows: &[JobSettingsMeta]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM job_settings_meta WHERE job_id = $1")
            .bind(job_id.0)
            .execute(&mut *tx)
            .await?;
        for meta in rows {
            sqlx::query(
                r#"
                INSERT INTO job_settings_meta (job_id, file_name, factory, node_name, name)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(job_id.0)
            .bind(&meta.file_name)
            .bind(&meta.factory)
            .bind(&meta.node_name)
            .bind(&meta.name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("persisting settings metadata")?;
        Ok(())
    }

    pub async fn list_settings_meta(&self, job_id: JobId) -> Result<Vec<JobSettingsMeta>> {
        let rows: Vec<PgRow> = sqlx::query(
            "SELECT job_id, file_name, factory, node_name, name FROM job_settings_meta WHERE job_id = $1",
        )
        .bind(job_id.0)
        .fetch_all(&self.pool)
        .await
        .context("listing settings metadata")?;

        rows.iter()
            .map(|row| {
                Ok(JobSettingsMeta {
                    job_id,
                    file_name: row.try_get("file_name")?,
                    factory: row.try_get("factory")?,
                    node_name: row.try_get("node_name")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }
}
