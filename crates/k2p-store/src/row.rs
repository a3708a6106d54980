use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use k2p_base::{ErrorCode, Job, JobId, JobStatus};
use sqlx::postgres::PgRow;
use sqlx::Row as _;

pub fn row_to_job(row: &PgRow) -> Result<Job> {
    let status_raw: String = row.try_get("status").context("reading status column")?;
    let status = JobStatus::from_str(&status_raw).context("decoding job status")?;

    let error_code = row
        .try_get::<Option<String>, _>("error_code")
        .context("reading error_code column")?
        .map(|raw| ErrorCode::from_str(&raw).context("decoding error_code"))
        .transpose()?;

    Ok(Job {
        id: JobId(row.try_get("id")?),
        status,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        original_filename: row.try_get("original_filename")?,
        input_size: row.try_get("input_size")?,
        input_sha256: row.try_get("input_sha256")?,
        input_key: row.try_get("input_key")?,
        backend_ref: row.try_get("backend_ref")?,
        exit_code: row.try_get("exit_code")?,
        stdout_tail: row.try_get("stdout_tail")?,
        stderr_tail: row.try_get("stderr_tail")?,
        result_key: row.try_get("result_key")?,
        error_code,
        error_message: row.try_get("error_message")?,
    })
}
