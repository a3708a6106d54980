use std::sync::Arc;

use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use k2p_base::{Job, JobId, JobStatus};
use k2p_intake::UploadRequest;
use k2p_metrics::Metrics;
use k2p_store::Store;
use k2p_util::fs::is_descendant_of;
use k2p_util::{JobStorageRootBuf, ResultStorageRootBuf};
use serde_json::json;
use slog::{error, Logger};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{api_error, ApiError};
use crate::result_zip::build_result_zip;

#[derive(Clone)]
pub struct AppState {
    pub intake: k2p_intake::Intake,
    pub store: Store,
    pub metrics: Arc<Metrics>,
    pub job_storage_root: JobStorageRootBuf,
    pub result_storage_root: ResultStorageRootBuf,
    pub log: Logger,
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// DB connectivity + storage-root writability probe (SPEC_FULL.md
/// "Health/readiness probe"), 503 on any failing check.
pub async fn readyz(State(state): State<AppState>) -> Response {
    let mut checks = serde_json::Map::new();
    let mut ok = true;

    match state.store.healthcheck().await {
        Ok(()) => {
            checks.insert("db".to_string(), json!("ok"));
        }
        Err(err) => {
            ok = false;
            checks.insert("db".to_string(), json!(format!("error: {err}")));
        }
    }

    for (key, root) in [
        ("job_storage_root", state.job_storage_root.path()),
        ("result_storage_root", state.result_storage_root.path()),
    ] {
        match probe_writable(root) {
            Ok(()) => {
                checks.insert(key.to_string(), json!("ok"));
            }
            Err(err) => {
                ok = false;
                checks.insert(key.to_string(), json!(format!("error: {err}")));
            }
        }
    }

    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(json!({"status": if ok { "ok" } else { "fail" }, "checks": checks}))).into_response()
}

fn probe_writable(root: &std::path::Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)?;
    let probe = tempfile::NamedTempFile::new_in(root)?;
    drop(probe);
    Ok(())
}

/// Refreshes the DB-backed gauges on every scrape, the way
/// `metrics_api.py`'s `JobsDbMetricsCollector` recomputes `jobs_by_state`/
/// `job_queue_depth`/`last_job_finished_timestamp_seconds` from a fresh
/// query rather than keeping them updated incrementally.
pub async fn metrics(State(state): State<AppState>) -> Response {
    use prometheus::Encoder as _;

    match state.store.counts_by_status_all().await {
        Ok(counts) => state.metrics.set_state_gauges(&counts),
        Err(err) => error!(state.log, "failed to refresh state gauges"; "error" => %err),
    }
    match state.store.last_finished_at().await {
        Ok(Some(ts)) => state.metrics.last_job_finished_timestamp_seconds.set(ts.timestamp() as f64),
        Ok(None) => {}
        Err(err) => error!(state.log, "failed to refresh last-finished gauge"; "error" => %err),
    }

    let encoder = prometheus::TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buf) {
        error!(state.log, "failed to encode metrics"; "error" => %err);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([("content-type", encoder.format_type())], buf).into_response()
}

pub async fn create_job(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, ApiError> {
    let mut bundle: Option<(String, Option<String>, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| anyhow::anyhow!("reading multipart field: {e}"))? {
        if field.name() != Some("bundle") {
            continue;
        }
        let original_filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| anyhow::anyhow!("reading multipart bundle: {e}"))?;
        bundle = Some((original_filename, content_type, bytes.to_vec()));
    }
    let Some((original_filename, content_type, bytes)) = bundle else {
        return Ok(api_error(StatusCode::BAD_REQUEST, "invalid_request", "multipart field 'bundle' is required"));
    };

    let job = state
        .intake
        .create_job(UploadRequest { original_filename, content_type, bytes })
        .await?;
    Ok((StatusCode::CREATED, Json(job_json(&job))).into_response())
}

pub async fn get_job(State(state): State<AppState>, AxumPath(id): AxumPath<Uuid>) -> Result<Response, ApiError> {
    match state.store.get(JobId(id)).await? {
        Some(job) => Ok(Json(job_json(&job)).into_response()),
        None => Ok(api_error(StatusCode::NOT_FOUND, "invalid_request", "job not found")),
    }
}

pub async fn get_logs(State(state): State<AppState>, AxumPath(id): AxumPath<Uuid>) -> Result<Response, ApiError> {
    match state.store.get(JobId(id)).await? {
        Some(job) => Ok(Json(json!({
            "id": job.id.to_string(),
            "status": job.status.to_string(),
            "stdout_tail": job.stdout_tail,
            "stderr_tail": job.stderr_tail,
        }))
        .into_response()),
        None => Ok(api_error(StatusCode::NOT_FOUND, "invalid_request", "job not found")),
    }
}

pub async fn get_result_zip(State(state): State<AppState>, AxumPath(id): AxumPath<Uuid>) -> Result<Response, ApiError> {
    let Some(job) = state.store.get(JobId(id)).await? else {
        return Ok(api_error(StatusCode::NOT_FOUND, "invalid_request", "job not found"));
    };
    if job.status != JobStatus::Succeeded {
        return Ok(api_error(
            StatusCode::CONFLICT,
            "job_not_ready",
            format!("job is not finished yet (status={})", job.status),
        ));
    }
    let result_key = job.result_key.clone().unwrap_or_else(|| format!("jobs/{}/", job.id));
    let results_dir = state.result_storage_root.join(&result_key);

    let canonical_root = match std::fs::canonicalize(state.result_storage_root.path()) {
        Ok(p) => p,
        Err(_) => return Ok(api_error(StatusCode::INTERNAL_SERVER_ERROR, "missing_results", "result storage root is missing")),
    };
    let canonical_dir = match std::fs::canonicalize(&results_dir) {
        Ok(p) => p,
        Err(_) => return Ok(api_error(StatusCode::INTERNAL_SERVER_ERROR, "missing_results", "results directory does not exist")),
    };
    if !is_descendant_of(&canonical_root, &canonical_dir) {
        return Ok(api_error(StatusCode::INTERNAL_SERVER_ERROR, "general_failure", "invalid results path"));
    }

    let file = build_result_zip(&canonical_dir).map_err(|e| anyhow::anyhow!(e))?;
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    let body = axum::body::Body::from_stream(stream);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/zip"),
            ("content-disposition", "attachment; filename=\"result.zip\""),
        ],
        body,
    )
        .into_response())
}

fn job_json(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id.to_string(),
        "status": job.status.to_string(),
        "created_at": job.created_at,
        "started_at": job.started_at,
        "finished_at": job.finished_at,
        "original_filename": job.original_filename,
        "input_size": job.input_size,
        "input_sha256": job.input_sha256,
        "exit_code": job.exit_code,
        "error_code": job.error_code.map(|c| c.to_string()),
        "error_message": job.error_message,
    })
}
