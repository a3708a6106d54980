use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k2p_base::{standard_tail, ErrorCode, Job};
use k2p_dispatcher::{Backend, Outcome, PollResult, StartResult};
use k2p_util::Fs;
use slog::{info, Logger};
use tokio::process::Command;

use crate::config::ContainerConfig;

/// Deterministic container name so a timed-out run can be force-removed by
/// name (spec §4.6 "Name").
fn container_name(job_id: &k2p_base::JobId) -> String {
    format!("k2pweb-job-{job_id}")
}

/// Launches an untrusted workload as a child process under the isolation
/// policy mandated by spec §4.6. The only backend whose `start` runs to
/// completion synchronously within one dispatcher tick; `poll` is never
/// reached in practice since `start` never returns [`StartResult::Submitted`].
pub struct ContainerBackend {
    config: ContainerConfig,
    log: Logger,
}

impl ContainerBackend {
    pub fn new(config: ContainerConfig, log: Logger) -> Self {
        Self { config, log }
    }

    /// Inspects whether `image` is present locally, pulling it on a miss.
    /// Failure to obtain the image is terminal (`image_pull_failed`, spec
    /// §4.6 "Image readiness").
    async fn ensure_image(&self) -> Result<(), Outcome> {
        let inspect = Command::new(&self.config.runtime_bin)
            .args(["image", "inspect", &self.config.image])
            .output()
            .await;
        if matches!(&inspect, Ok(out) if out.status.success()) {
            return Ok(());
        }

        let pull = Command::new(&self.config.runtime_bin)
            .args(["pull", &self.config.image])
            .output()
            .await
            .map_err(|e| {
                Outcome::failure(ErrorCode::ImagePullFailed, format!("pulling image: {e}"), None, String::new(), String::new())
            })?;
        if !pull.status.success() {
            return Err(Outcome::failure(
                ErrorCode::ImagePullFailed,
                format!("docker pull failed: {}", standard_tail(&pull.stderr)),
                pull.status.code(),
                standard_tail(&pull.stdout),
                standard_tail(&pull.stderr),
            ));
        }
        Ok(())
    }

    fn base_args(&self, name: &str, host_in: &Path, host_out: &Path, entrypoint: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--read-only".to_string(),
            "--cpus".to_string(),
            self.config.cpu.clone(),
            "--memory".to_string(),
            self.config.memory.clone(),
            "--pids-limit".to_string(),
            self.config.pids_limit.clone(),
            "--user".to_string(),
            self.config.user.clone(),
            "--tmpfs".to_string(),
            "/tmp:rw,noexec,nosuid,size=64m".to_string(),
            "-v".to_string(),
            format!("{}:/work/input.zip:ro", host_in.display()),
            "-v".to_string(),
            format!("{}:/work/out:rw", host_out.display()),
            "-w".to_string(),
            "/work".to_string(),
        ];
        if let Some(entrypoint) = entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.to_string());
        }
        args.push(self.config.image.clone());
        args
    }

    async fn force_remove(&self, name: &str) {
        let _ = Command::new(&self.config.runtime_bin).args(["rm", "-f", name]).output().await;
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    async fn start(&self, job: &Job, input_path: &Path, out_dir: &Path) -> Result<StartResult> {
        if let Err(outcome) = self.ensure_image().await {
            return Ok(StartResult::Terminal(outcome));
        }

        let name = container_name(&job.id);
        let host_in = self.config.resolve_host_path(input_path);
        let host_out = self.config.resolve_host_path(out_dir);

        let entrypoint = self.config.entrypoint().context("validating configured entrypoint")?;
        let extra_args = self.config.render_args().context("rendering args template")?;
        let mut args = self.base_args(&name, &host_in, &host_out, entrypoint.as_deref());
        args.extend(extra_args);

        let stdout_path = out_dir.join("stdout.log");
        let stderr_path = out_dir.join("stderr.log");
        let stdout_file = std::fs::File::create(&stdout_path).context("creating stdout.log")?;
        let stderr_file = std::fs::File::create(&stderr_path).context("creating stderr.log")?;

        info!(self.log, "container run starting"; "job_id" => %job.id, "image" => &self.config.image);

        let mut child = Command::new(&self.config.runtime_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .context("spawning container runtime")?;

        let outcome = match tokio::time::timeout(Duration::from_secs(self.config.timeout_s), child.wait()).await {
            Err(_elapsed) => {
                self.force_remove(&name).await;
                let stdout_tail = standard_tail(&Fs.read(&stdout_path).unwrap_or_default());
                let stderr_tail = standard_tail(&Fs.read(&stderr_path).unwrap_or_default());
                Outcome::failure(
                    ErrorCode::RunnerFailed,
                    format!("timeout after {}s", self.config.timeout_s),
                    None,
                    stdout_tail,
                    stderr_tail,
                )
            }
            Ok(status) => {
                let status = status.context("waiting for container runtime")?;
                let stdout_tail = standard_tail(&Fs.read(&stdout_path).unwrap_or_default());
                let stderr_tail = standard_tail(&Fs.read(&stderr_path).unwrap_or_default());
                match status.code() {
                    Some(0) => {
                        let artifacts = enumerate_artifacts(out_dir);
                        info!(self.log, "container run finished"; "job_id" => %job.id, "artifacts" => artifacts.len());
                        Outcome::success(0, stdout_tail, stderr_tail)
                    }
                    code => Outcome::failure(
                        ErrorCode::RunnerFailed,
                        format!("non-zero exit: {}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())),
                        code,
                        stdout_tail,
                        stderr_tail,
                    ),
                }
            }
        };
        Ok(StartResult::Terminal(outcome))
    }

    /// Never reached: the Container backend always returns
    /// [`StartResult::Terminal`] from `start`, so the dispatcher never
    /// stores a non-empty `backend_ref` for a container job.
    async fn poll(&self, _backend_ref: &str) -> Result<PollResult> {
        anyhow::bail!("container backend does not support polling a submitted job")
    }
}

/// Every regular file under `out_dir`, recursively, reported relative to
/// `out_dir` (spec §4.6 "Artifacts").
fn enumerate_artifacts(out_dir: &Path) -> Vec<String> {
    walkdir::WalkDir::new(out_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(out_dir).ok().map(|p| p.to_string_lossy().into_owned()))
        .collect()
}

/// Manual single-shot runner for operator smoke-testing, outside the job
/// lifecycle (SPEC_FULL.md "`k2p_run_once`-style manual single-shot
/// runner"). Not part of the HTTP contract.
#[doc(hidden)]
impl ContainerBackend {
    pub async fn run_once(&self, job_id: k2p_base::JobId, input_zip: &Path, out_dir: &Path) -> Result<Outcome> {
        Fs.create_dir_all(out_dir)?;
        let job = Job::new_queued("run-once.zip".to_string(), 0);
        let mut job = job;
        job.id = job_id;
        match self.start(&job, input_zip, out_dir).await? {
            StartResult::Terminal(outcome) => Ok(outcome),
            StartResult::Submitted { .. } => anyhow::bail!("container backend unexpectedly submitted a job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn test_logger() -> Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// Writes a fake `docker`-shaped script so `run_once` can be exercised
    /// end to end without a real container runtime. `image inspect` always
    /// succeeds; `run` executes `body` against its `-v host:container` mount
    /// arguments so the script can write into the faked `/work/out` bind.
    fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-docker");
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  image) exit 0 ;;\n  run) shift; {body} ;;\nesac\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn run_once_reports_success_and_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input.zip");
        std::fs::write(&input, b"not a real zip").unwrap();
        let out_dir = tmp.path().join("out");

        // Finds the host `-v` mount for /work/out and drops an artifact
        // there, then exits 0, mimicking a successful workload run.
        let body = r#"
out=""
prev=""
for arg in "$@"; do
  case "$prev" in
    -v) case "$arg" in *":/work/out:rw") out="${arg%%:/work/out:rw}" ;; esac ;;
  esac
  prev="$arg"
done
echo "hello" > "$out/result.txt"
exit 0
"#;
        let runtime_bin = fake_runtime(tmp.path(), body);

        let config = ContainerConfig { runtime_bin: runtime_bin.to_string_lossy().into_owned(), ..Default::default() };
        let backend = ContainerBackend::new(config, test_logger());

        let outcome = backend.run_once(k2p_base::JobId::new(), &input, &out_dir).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(out_dir.join("stdout.log").exists());
        assert!(out_dir.join("stderr.log").exists());
    }

    #[tokio::test]
    async fn run_once_reports_non_zero_exit_as_runner_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input.zip");
        std::fs::write(&input, b"not a real zip").unwrap();
        let out_dir = tmp.path().join("out");

        let runtime_bin = fake_runtime(tmp.path(), "echo boom 1>&2; exit 7");
        let config = ContainerConfig { runtime_bin: runtime_bin.to_string_lossy().into_owned(), ..Default::default() };
        let backend = ContainerBackend::new(config, test_logger());

        let outcome = backend.run_once(k2p_base::JobId::new(), &input, &out_dir).await.unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.exit_code, Some(7));
        assert_eq!(outcome.error_code, Some(ErrorCode::RunnerFailed));
        assert!(outcome.stderr_tail.contains("boom"));
    }

    #[tokio::test]
    async fn run_once_reports_image_pull_failure_as_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input.zip");
        std::fs::write(&input, b"not a real zip").unwrap();
        let out_dir = tmp.path().join("out");

        let path = tmp.path().join("fake-docker");
        std::fs::write(&path, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ContainerConfig { runtime_bin: path.to_string_lossy().into_owned(), ..Default::default() };
        let backend = ContainerBackend::new(config, test_logger());

        let outcome = backend.run_once(k2p_base::JobId::new(), &input, &out_dir).await.unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error_code, Some(ErrorCode::ImagePullFailed));
    }
}
