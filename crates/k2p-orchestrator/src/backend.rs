use std::path::Path;
use std::process::Stdio;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k2p_base::{standard_tail, ErrorCode, Job};
use k2p_dispatcher::{Backend, Outcome, PollResult, StartResult};
use k2p_util::normalize_job_name;
use serde_json::Value;
use slog::{info, warn, Logger};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use crate::manifest::render_job_manifest;

/// Tunables for the Orchestrator backend (spec §4.7, §6).
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub kubectl_bin: String,
    pub namespace: String,
    pub image: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { kubectl_bin: "kubectl".to_string(), namespace: "k2p".to_string(), image: "ghcr.io/k2pweb/k2p:main".to_string() }
    }
}

/// Alternate backend targeting a Kubernetes-shaped API via `kubectl` (spec
/// §4.7). `start` only submits the manifest; `poll` observes completion on
/// a later dispatcher tick (spec §4.5 "Concurrency between backends").
pub struct OrchestratorBackend {
    config: OrchestratorConfig,
    log: Logger,
}

impl OrchestratorBackend {
    pub fn new(config: OrchestratorConfig, log: Logger) -> Self {
        Self { config, log }
    }

    /// Pipes rendered YAML into `kubectl apply -f -` (spec §4.7 `apply`).
    async fn apply(&self, yaml: &str) -> Result<(bool, String, String)> {
        let mut child = Command::new(&self.config.kubectl_bin)
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning kubectl apply")?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(yaml.as_bytes()).await.context("writing manifest to kubectl stdin")?;
        drop(stdin);

        let output = child.wait_with_output().await.context("waiting for kubectl apply")?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    /// Fetches a Job's status as JSON, or `None` if `kubectl get` fails
    /// (not yet visible, or already cleaned up) (spec §4.7 `get_job`).
    async fn get_job(&self, name: &str) -> Result<Option<Value>> {
        let output = Command::new(&self.config.kubectl_bin)
            .args(["-n", &self.config.namespace, "get", "job", name, "-o", "json"])
            .output()
            .await
            .context("running kubectl get job")?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = serde_json::from_slice(&output.stdout).context("parsing kubectl get job output")?;
        Ok(Some(value))
    }
}

/// Classifies a Kubernetes Job's status JSON into a terminal state and a
/// synthesized exit code (spec §4.7 `job_state`). `exit_code = 1` for a
/// failed Job is a stand-in: the Job API surfaces no real process exit
/// status (see SPEC_FULL.md Open Questions).
fn job_state(job_json: &Value) -> (&'static str, Option<i32>) {
    let status = job_json.get("status");
    let succeeded = status.and_then(|s| s.get("succeeded")).and_then(Value::as_i64).unwrap_or(0);
    if succeeded >= 1 {
        return ("SUCCEEDED", Some(0));
    }
    let failed = status.and_then(|s| s.get("failed")).and_then(Value::as_i64).unwrap_or(0);
    if failed >= 1 {
        return ("FAILED", Some(1));
    }
    ("RUNNING", None)
}

#[async_trait]
impl Backend for OrchestratorBackend {
    async fn start(&self, job: &Job, input_path: &Path, out_dir: &Path) -> Result<StartResult> {
        let job_name = normalize_job_name(&job.id.to_string());
        let manifest = render_job_manifest(
            &self.config.namespace,
            &job_name,
            &self.config.image,
            &input_path.display().to_string(),
            &out_dir.display().to_string(),
        );
        let yaml = serde_yaml::to_string(&manifest).context("rendering job manifest as YAML")?;

        let (ok, _stdout, stderr) = self.apply(&yaml).await?;
        if !ok {
            warn!(self.log, "kubectl apply failed"; "job_id" => %job.id, "stderr" => &stderr);
            return Ok(StartResult::Terminal(Outcome::failure(
                ErrorCode::K8sSubmitFailed,
                standard_tail(stderr.as_bytes()),
                None,
                String::new(),
                String::new(),
            )));
        }

        info!(self.log, "kubernetes job submitted"; "job_id" => %job.id, "backend_ref" => &job_name);
        Ok(StartResult::Submitted { backend_ref: job_name })
    }

    async fn poll(&self, backend_ref: &str) -> Result<PollResult> {
        let Some(job_json) = self.get_job(backend_ref).await? else {
            return Ok(PollResult::Running);
        };
        match job_state(&job_json) {
            ("RUNNING", _) => Ok(PollResult::Running),
            ("SUCCEEDED", exit_code) => Ok(PollResult::Terminal(Outcome::success(exit_code.unwrap_or(0), String::new(), String::new()))),
            (_, exit_code) => Ok(PollResult::Terminal(Outcome::failure(
                ErrorCode::K8sJobFailed,
                "Kubernetes Job failed (check cluster logs)",
                exit_code,
                String::new(),
                String::new(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_state_classifies_succeeded() {
        let value = json!({"status": {"succeeded": 1}});
        assert_eq!(job_state(&value), ("SUCCEEDED", Some(0)));
    }

    #[test]
    fn job_state_classifies_failed() {
        let value = json!({"status": {"failed": 1}});
        assert_eq!(job_state(&value), ("FAILED", Some(1)));
    }

    #[test]
    fn job_state_classifies_running_by_default() {
        let value = json!({"status": {}});
        assert_eq!(job_state(&value), ("RUNNING", None));
    }
}
