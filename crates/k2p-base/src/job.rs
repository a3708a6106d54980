use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Opaque job identifier. A thin wrapper rather than a bare `Uuid` so that
/// job ids, backend refs, and other stringy ids can't be swapped by
/// accident at a call site.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a [`Job`]. A job starts `Queued` and ends in exactly
/// one of `Succeeded`/`Failed`; see invariant I1/I2 in spec §3.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A job submission and its execution outcome. See spec §3 for the
/// invariants this type is built to uphold; the Job Store (`k2p-store`) is
/// the only component allowed to mutate rows, always through a typed
/// `JobUpdate`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub original_filename: String,
    pub input_size: i64,
    pub input_sha256: Option<String>,
    pub input_key: Option<String>,

    /// Sanitized external job name for the Orchestrator backend; empty for
    /// the Container backend (spec §3, §4.5(a)).
    pub backend_ref: Option<String>,
    /// Set iff the backend produced a terminal exit (invariant I3). The
    /// Orchestrator backend synthesizes `1` for a failed Kubernetes Job,
    /// since the Job API does not surface a real process exit code — see
    /// the Open Questions in SPEC_FULL.md.
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub result_key: Option<String>,

    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl Job {
    /// Constructs a freshly `QUEUED` job as the Intake Service does in
    /// step 3 of spec §4.4, before the size cap or archive validation runs.
    pub fn new_queued(original_filename: String, input_size: i64) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            original_filename,
            input_size,
            input_sha256: None,
            input_key: None,
            backend_ref: None,
            exit_code: None,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            result_key: None,
            error_code: None,
            error_message: None,
        }
    }
}

/// Per-node metadata parsed out of a `settings.xml` entry (spec §3/§4.2).
/// Every field is optional because a malformed or namespace-shifted entry
/// is tolerated, not rejected, during metadata extraction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobSettingsMeta {
    pub job_id: JobId,
    pub file_name: String,
    pub factory: Option<String>,
    pub node_name: Option<String>,
    pub name: Option<String>,
}

/// Enumerated limits an uploaded archive is checked against (spec §3). A
/// negative value means "unbounded" for that dimension.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ZipLimits {
    pub max_files: i64,
    pub max_path_depth: i64,
    pub max_unpacked_bytes: i64,
    pub max_file_bytes: i64,
}

impl ZipLimits {
    pub const fn unbounded() -> Self {
        Self {
            max_files: -1,
            max_path_depth: -1,
            max_unpacked_bytes: -1,
            max_file_bytes: -1,
        }
    }
}

impl Default for ZipLimits {
    /// Matches the defaults `k2p_run_once` falls back to in the original
    /// implementation when settings are absent.
    fn default() -> Self {
        Self {
            max_files: 2000,
            max_path_depth: 20,
            max_unpacked_bytes: 300 * 1024 * 1024,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn new_queued_job_has_no_terminal_fields_set() {
        let job = Job::new_queued("bundle.zip".to_string(), 1024);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
        assert!(job.input_key.is_none());
    }
}
