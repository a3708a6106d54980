use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Short tags from the error taxonomy, stored on the `Job` and echoed back to
/// HTTP callers. Order within each group matches the precedence a validator
/// checks them in; it carries no runtime meaning beyond documentation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    UploadTooLarge,
    QueueFull,

    InvalidZip,
    MissingWorkflowRoot,
    ZipTooManyFiles,
    ZipPathUnsafe,
    ZipEncrypted,
    ZipSymlink,
    ZipPathTooDeep,
    ZipEntryTooLarge,
    ZipBomb,
    ZipPathTraversal,

    InvalidXml,

    ImagePullFailed,
    RunnerFailed,

    K8sSubmitFailed,
    K8sJobFailed,

    InputMissing,

    GeneralFailure,
}

/// A tagged error carrying the taxonomy code plus a human-readable message
/// and, for archive/XML errors, the offending entry name. Cheap to clone so
/// it can be stamped onto a `Job` and also logged.
#[derive(Clone, Debug, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct K2pError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<String>,
}

impl K2pError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Pulls a [`K2pError`] back out of an `anyhow::Error` chain, the same
/// downcast idiom `maelstrom-run` uses at its top-level error boundary.
pub fn find_k2p_error(err: &anyhow::Error) -> Option<&K2pError> {
    err.chain().find_map(|cause| cause.downcast_ref::<K2pError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_snake_case() {
        assert_eq!(ErrorCode::ZipPathTraversal.to_string(), "zip_path_traversal");
        assert_eq!(
            serde_json::to_string(&ErrorCode::QueueFull).unwrap(),
            "\"queue_full\""
        );
    }

    #[test]
    fn find_k2p_error_downcasts_through_context() {
        let base = K2pError::new(ErrorCode::ZipBomb, "too much data");
        let wrapped: anyhow::Error = anyhow::Error::new(base.clone()).context("validating archive");
        let found = find_k2p_error(&wrapped).expect("should find wrapped error");
        assert_eq!(found.code, ErrorCode::ZipBomb);
    }
}
