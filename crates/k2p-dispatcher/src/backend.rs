use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use k2p_base::{ErrorCode, Job};

/// Terminal outcome of a job run, regardless of which backend produced it
/// (spec §9 "Backend polymorphism").
#[derive(Clone, Debug)]
pub struct Outcome {
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl Outcome {
    pub fn success(exit_code: i32, stdout_tail: String, stderr_tail: String) -> Self {
        Self {
            succeeded: true,
            exit_code: Some(exit_code),
            stdout_tail,
            stderr_tail,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failure(
        error_code: ErrorCode,
        error_message: impl Into<String>,
        exit_code: Option<i32>,
        stdout_tail: String,
        stderr_tail: String,
    ) -> Self {
        Self {
            succeeded: false,
            exit_code,
            stdout_tail,
            stderr_tail,
            error_code: Some(error_code),
            error_message: Some(error_message.into()),
        }
    }
}

/// What `start` produced: either the job already ran to completion
/// (Container backend, which is synchronous within a tick) or it was
/// handed off and must be polled later (Orchestrator backend).
pub enum StartResult {
    Terminal(Outcome),
    Submitted { backend_ref: String },
}

pub enum PollResult {
    Running,
    Terminal(Outcome),
}

/// The capability set a dispatcher needs from an execution backend (spec
/// §9 "Backend polymorphism"): start a claimed job, and later poll a
/// submitted one for terminal state.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn start(&self, job: &Job, input_path: &Path, out_dir: &Path) -> Result<StartResult>;
    async fn poll(&self, backend_ref: &str) -> Result<PollResult>;
}
