use std::path::{Path, PathBuf};

/// Tunables for the Container backend (spec §4.6, §6 "configuration keys").
/// One `command`/`args_template` pair and one set of resource caps per
/// deployment; there is no per-job override.
#[derive(Clone, Debug)]
pub struct ContainerConfig {
    /// Container runtime binary, e.g. `docker` or `podman`.
    pub runtime_bin: String,
    pub image: String,
    pub timeout_s: u64,
    pub cpu: String,
    pub memory: String,
    pub pids_limit: String,
    /// Non-root `uid:gid` the workload runs as (spec §4.6 "Identity").
    pub user: String,
    /// Entrypoint override. Must be a single token (no embedded arguments);
    /// `args_template` supplies arguments separately (spec §4.6).
    pub command: Option<String>,
    /// Shell-tokenized with `{input}`/`{output}` substituted for
    /// `/work/input.zip`/`/work/out` (spec §4.6).
    pub args_template: Option<String>,

    pub container_repo_root: Option<PathBuf>,
    pub container_job_storage_root: Option<PathBuf>,
    pub container_result_storage_root: Option<PathBuf>,
    pub host_repo_root: Option<PathBuf>,
    pub host_job_storage_root: Option<PathBuf>,
    pub host_result_storage_root: Option<PathBuf>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime_bin: "docker".to_string(),
            image: "ghcr.io/k2pweb/k2p:main".to_string(),
            timeout_s: 900,
            cpu: "1".to_string(),
            memory: "1g".to_string(),
            pids_limit: "256".to_string(),
            user: "65534:65534".to_string(),
            command: None,
            args_template: None,
            container_repo_root: None,
            container_job_storage_root: None,
            container_result_storage_root: None,
            host_repo_root: None,
            host_job_storage_root: None,
            host_result_storage_root: None,
        }
    }
}

impl ContainerConfig {
    /// Remaps a container-internal path onto its host equivalent by
    /// checking each configured `container_*_root` in turn and, on the
    /// first match, substituting the corresponding `host_*_root` (spec
    /// §4.6 "Host-path resolution"). Passed through unchanged when no
    /// remap applies.
    pub fn resolve_host_path(&self, path: &Path) -> PathBuf {
        let pairs = [
            (&self.container_job_storage_root, &self.host_job_storage_root),
            (&self.container_result_storage_root, &self.host_result_storage_root),
            (&self.container_repo_root, &self.host_repo_root),
        ];
        for (container_root, host_root) in pairs {
            if let (Some(container_root), Some(host_root)) = (container_root, host_root) {
                if let Ok(rel) = path.strip_prefix(container_root) {
                    return host_root.join(rel);
                }
            }
        }
        path.to_path_buf()
    }

    /// Splits `command` into a single executable token, rejecting any
    /// configuration that supplies arguments alongside it (spec §4.6
    /// "Entrypoint override").
    pub fn entrypoint(&self) -> anyhow::Result<Option<String>> {
        let Some(command) = &self.command else { return Ok(None) };
        let tokens = shlex::split(command).ok_or_else(|| anyhow::anyhow!("cannot tokenize K2P_COMMAND"))?;
        if tokens.len() != 1 {
            anyhow::bail!("command must be a single executable with no arguments");
        }
        Ok(tokens.into_iter().next())
    }

    /// Renders `args_template` with `{input}`/`{output}` substituted, or
    /// the default `--in-zip /work/input.zip --out /work/out` (spec §4.6).
    pub fn render_args(&self) -> anyhow::Result<Vec<String>> {
        let rendered = match &self.args_template {
            Some(template) => template.replace("{input}", "/work/input.zip").replace("{output}", "/work/out"),
            None => "--in-zip /work/input.zip --out /work/out".to_string(),
        };
        shlex::split(&rendered).ok_or_else(|| anyhow::anyhow!("cannot tokenize args_template"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_host_path_remaps_under_job_storage_root() {
        let config = ContainerConfig {
            container_job_storage_root: Some(PathBuf::from("/data/jobs")),
            host_job_storage_root: Some(PathBuf::from("/host/jobs")),
            ..Default::default()
        };
        let resolved = config.resolve_host_path(Path::new("/data/jobs/jobs/abc/bundle.zip"));
        assert_eq!(resolved, PathBuf::from("/host/jobs/jobs/abc/bundle.zip"));
    }

    #[test]
    fn resolve_host_path_passes_through_when_no_remap_applies() {
        let config = ContainerConfig::default();
        let resolved = config.resolve_host_path(Path::new("/some/path"));
        assert_eq!(resolved, PathBuf::from("/some/path"));
    }

    #[test]
    fn entrypoint_rejects_multi_token_command() {
        let config = ContainerConfig { command: Some("k2p --verbose".to_string()), ..Default::default() };
        assert!(config.entrypoint().is_err());
    }

    #[test]
    fn entrypoint_accepts_single_token() {
        let config = ContainerConfig { command: Some("k2p".to_string()), ..Default::default() };
        assert_eq!(config.entrypoint().unwrap(), Some("k2p".to_string()));
    }

    #[test]
    fn render_args_substitutes_placeholders() {
        let config = ContainerConfig {
            args_template: Some("run --in {input} --out-dir {output}".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.render_args().unwrap(),
            vec!["run", "--in", "/work/input.zip", "--out-dir", "/work/out"],
        );
    }

    #[test]
    fn render_args_defaults_to_standard_flags() {
        let config = ContainerConfig::default();
        assert_eq!(config.render_args().unwrap(), vec!["--in-zip", "/work/input.zip", "--out", "/work/out"]);
    }
}
