use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use k2p_base::{find_k2p_error, ErrorCode};
use serde_json::json;

/// Wraps any failure reaching an HTTP handler and renders it as the error
/// payload shape of spec §6: `{"error": {"code", "message", "details"?}}`.
pub struct ApiError(pub anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::QueueFull => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCode::InvalidRequest
        | ErrorCode::InvalidZip
        | ErrorCode::MissingWorkflowRoot
        | ErrorCode::ZipTooManyFiles
        | ErrorCode::ZipPathUnsafe
        | ErrorCode::ZipEncrypted
        | ErrorCode::ZipSymlink
        | ErrorCode::ZipPathTooDeep
        | ErrorCode::ZipEntryTooLarge
        | ErrorCode::ZipBomb
        | ErrorCode::ZipPathTraversal
        | ErrorCode::InvalidXml => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(k2p_err) = find_k2p_error(&self.0) {
            let status = status_for(k2p_err.code);
            let body = json!({
                "error": {
                    "code": k2p_err.code.to_string(),
                    "message": k2p_err.message,
                    "details": k2p_err.detail,
                }
            });
            return (status, Json(body)).into_response();
        }
        let body = json!({
            "error": { "code": "general_failure", "message": self.0.to_string() }
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// A domain-level HTTP error that doesn't necessarily carry a [`K2pError`]
/// (job-not-found, job-not-ready, missing results). Constructs the same
/// error payload shape directly.
pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = json!({ "error": { "code": code, "message": message.into() } });
    (status, Json(body)).into_response()
}
