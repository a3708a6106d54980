use chrono::{DateTime, Utc};
use k2p_base::{ErrorCode, JobStatus};

/// Partial update applied to a single job row (spec §4.3 `update`). Every
/// field left `None` is left untouched; this mirrors the Dispatcher's use
/// (spec §4.5) of one update call per terminal transition rather than
/// separate calls per column.
#[derive(Clone, Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_key: Option<String>,
    pub input_sha256: Option<String>,
    pub backend_ref: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout_tail: Option<String>,
    pub stderr_tail: Option<String>,
    pub result_key: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.finished_at = Some(at);
        self
    }

    pub fn input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    pub fn input_sha256(mut self, sha: impl Into<String>) -> Self {
        self.input_sha256 = Some(sha.into());
        self
    }

    pub fn backend_ref(mut self, backend_ref: impl Into<String>) -> Self {
        self.backend_ref = Some(backend_ref.into());
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn stdout_tail(mut self, tail: impl Into<String>) -> Self {
        self.stdout_tail = Some(tail.into());
        self
    }

    pub fn stderr_tail(mut self, tail: impl Into<String>) -> Self {
        self.stderr_tail = Some(tail.into());
        self
    }

    pub fn result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self
    }
}
