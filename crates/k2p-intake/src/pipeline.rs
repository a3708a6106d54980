use std::io::Cursor;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use k2p_archive::{check_well_formed, extract_settings_meta, is_housekeeping, validate};
use k2p_base::{find_k2p_error, ErrorCode, Job, JobStatus, K2pError};
use k2p_store::JobUpdate;
use k2p_util::{safe_stem, Fs};
use sha2::{Digest, Sha256};
use slog::{info, warn};
use zip::ZipArchive;

use crate::Intake;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "",
    "application/zip",
    "application/x-zip-compressed",
    "multipart/x-zip",
    "application/octet-stream",
];

/// A bundle as received at the HTTP boundary, before any pipeline step has
/// run (spec §4.4).
pub struct UploadRequest {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Intake {
    /// Runs the full admission-control and persistence pipeline for one
    /// upload (spec §4.4 steps 1-9). Returns the finalized, QUEUED job.
    pub async fn create_job(&self, upload: UploadRequest) -> Result<Job> {
        self.check_admission().await?;
        self.check_surface(&upload)?;

        let input_size = upload.bytes.len() as i64;
        let mut job = Job::new_queued(truncate(&upload.original_filename, 255), input_size);
        self.store.create(&job).await?;
        self.metrics.job_created_total.inc();

        if let Err(err) = self.run_persist_pipeline(&mut job, &upload.bytes).await {
            // Every failure from the persist pipeline must stamp a terminal
            // state (spec §4.4 "All steps 5-8 that fail stamp an error_code",
            // invariant P1) even when it's a plain I/O/DB error rather than a
            // tagged K2pError (e.g. a failed store update or filesystem write).
            let tagged = match find_k2p_error(&err) {
                Some(k2p_err) => k2p_err.clone(),
                None => K2pError::new(ErrorCode::GeneralFailure, err.to_string()),
            };
            self.fail_job(job.id, &tagged).await?;
            self.metrics.error_total.inc();
            return Err(err);
        }

        Ok(job)
    }

    async fn check_admission(&self) -> Result<()> {
        let in_flight = self
            .store
            .count_by_status(&[JobStatus::Queued, JobStatus::Running])
            .await?;
        if in_flight >= self.limits.max_queued_jobs {
            self.metrics.enqueue_rejected_total.inc();
            return Err(K2pError::new(ErrorCode::QueueFull, "job queue is full").into());
        }
        Ok(())
    }

    fn check_surface(&self, upload: &UploadRequest) -> Result<()> {
        if !filename_has_zip_suffix(&upload.original_filename) {
            return Err(K2pError::new(ErrorCode::InvalidRequest, "filename must end in .zip").into());
        }
        if !is_allowed_content_type(upload.content_type.as_deref()) {
            let content_type = upload.content_type.as_deref().unwrap_or("");
            return Err(
                K2pError::new(ErrorCode::InvalidRequest, format!("unsupported content type {content_type}"))
                    .into(),
            );
        }
        Ok(())
    }

    async fn run_persist_pipeline(&self, job: &mut Job, bytes: &[u8]) -> Result<()> {
        if job.input_size > self.limits.max_upload_bytes {
            return Err(K2pError::new(ErrorCode::UploadTooLarge, "upload exceeds the configured size cap").into());
        }

        let names = {
            let mut archive = ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| K2pError::new(ErrorCode::InvalidZip, e.to_string()))?;
            validate(&mut archive, &self.limits.zip_limits)?
        };

        let has_workflow_root = names
            .iter()
            .any(|name| !name.contains('/') && name.eq_ignore_ascii_case("workflow.knime"));
        if !has_workflow_root {
            return Err(K2pError::new(
                ErrorCode::MissingWorkflowRoot,
                "archive has no top-level workflow.knime entry",
            )
            .into());
        }

        let stem = safe_stem(&job.original_filename);
        let input_key = format!("jobs/{}/{stem}.zip", job.id);
        let dest_path = self.job_storage_root.join(&input_key);
        if let Some(parent) = dest_path.parent() {
            Fs.create_dir_all(parent)?;
        }

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let sha256 = hex::encode(hasher.finalize());
        Fs.write(&dest_path, bytes)?;

        if let Err(err) = self.check_xml_well_formedness(bytes) {
            Fs.remove_file(&dest_path).ok();
            return Err(err);
        }

        let settings_meta = {
            let mut archive = ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| K2pError::new(ErrorCode::InvalidZip, e.to_string()))?;
            extract_settings_meta(&mut archive, job.id)?
        };
        self.store.replace_settings_meta(job.id, &settings_meta).await?;

        job.input_key = Some(input_key.clone());
        job.input_sha256 = Some(sha256.clone());
        self.store
            .update(job.id, &JobUpdate::new().input_key(input_key).input_sha256(sha256))
            .await?;

        info!(self.log, "job queued";
            "job_id" => %job.id,
            "input_size" => job.input_size,
            "settings_count" => settings_meta.len(),
        );
        Ok(())
    }

    /// Spec §4.4 step 7: a strict well-formedness pass over every
    /// non-housekeeping `.xml` entry and `workflow.knime`, independent of
    /// the tolerant scan the Metadata Extractor runs later.
    fn check_xml_well_formedness(&self, bytes: &[u8]) -> Result<()> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| K2pError::new(ErrorCode::InvalidZip, e.to_string()))?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| K2pError::new(ErrorCode::InvalidZip, e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if is_housekeeping(&name) {
                continue;
            }
            let is_xml = name.to_ascii_lowercase().ends_with(".xml");
            let is_workflow_root = Path::new(&name)
                .file_name()
                .and_then(|f| f.to_str())
                .map(|f| f.eq_ignore_ascii_case("workflow.knime"))
                .unwrap_or(false);
            if !is_xml && !is_workflow_root {
                continue;
            }

            let mut contents = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut contents)
                .map_err(|e| K2pError::new(ErrorCode::GeneralFailure, e.to_string()))?;
            if let Err(e) = check_well_formed(&contents) {
                return Err(K2pError::new(ErrorCode::InvalidXml, format!("{name}: {e}")).into());
            }
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: k2p_base::JobId, err: &K2pError) -> Result<()> {
        warn!(self.log, "job failed during intake"; "job_id" => %job_id, "code" => %err.code, "message" => &err.message);
        self.store
            .update(
                job_id,
                &JobUpdate::new()
                    .status(JobStatus::Failed)
                    .finished_at(Utc::now())
                    .error(err.code, err.message.clone()),
            )
            .await
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn filename_has_zip_suffix(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

fn is_allowed_content_type(content_type: Option<&str>) -> bool {
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES.contains(&content_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_zip_suffix_case_insensitively() {
        assert!(filename_has_zip_suffix("bundle.ZIP"));
        assert!(filename_has_zip_suffix("bundle.zip"));
        assert!(!filename_has_zip_suffix("bundle.tar.gz"));
        assert!(!filename_has_zip_suffix("bundle"));
    }

    #[test]
    fn accepts_known_content_types() {
        assert!(is_allowed_content_type(None));
        assert!(is_allowed_content_type(Some("")));
        assert!(is_allowed_content_type(Some("application/zip")));
        assert!(is_allowed_content_type(Some("APPLICATION/OCTET-STREAM")));
        assert!(!is_allowed_content_type(Some("text/plain")));
    }

    #[test]
    fn truncates_to_max_chars() {
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
