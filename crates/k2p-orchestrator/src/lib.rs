//! Orchestrator Backend (C7): an alternate execution backend that submits a
//! declarative Kubernetes Job manifest to a remote cluster via `kubectl`
//! and polls for terminal state (spec §4.7).

mod backend;
mod manifest;

pub use backend::{OrchestratorBackend, OrchestratorConfig};
pub use manifest::render_job_manifest;
