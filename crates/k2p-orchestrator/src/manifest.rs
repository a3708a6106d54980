use serde::Serialize;

/// A `batch/v1` `Job` manifest shaped exactly as spec §4.7 describes: one
/// container, non-root security context, fixed CPU/memory request/limit,
/// and three volumes (input bind-mount, output directory, tmpfs `/tmp`).
#[derive(Serialize)]
pub struct JobManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: Metadata,
    pub spec: JobSpec,
}

#[derive(Serialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    pub labels: std::collections::BTreeMap<&'static str, &'static str>,
}

#[derive(Serialize)]
pub struct JobSpec {
    #[serde(rename = "backoffLimit")]
    pub backoff_limit: u32,
    #[serde(rename = "ttlSecondsAfterFinished")]
    pub ttl_seconds_after_finished: u32,
    pub template: PodTemplate,
}

#[derive(Serialize)]
pub struct PodTemplate {
    pub metadata: PodMetadata,
    pub spec: PodSpec,
}

#[derive(Serialize)]
pub struct PodMetadata {
    pub labels: std::collections::BTreeMap<String, String>,
}

#[derive(Serialize)]
pub struct PodSpec {
    #[serde(rename = "restartPolicy")]
    pub restart_policy: &'static str,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

#[derive(Serialize)]
pub struct Container {
    pub name: &'static str,
    pub image: String,
    pub args: Vec<String>,
    #[serde(rename = "securityContext")]
    pub security_context: SecurityContext,
    pub resources: Resources,
    #[serde(rename = "volumeMounts")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Serialize)]
pub struct SecurityContext {
    #[serde(rename = "runAsNonRoot")]
    pub run_as_non_root: bool,
    #[serde(rename = "runAsUser")]
    pub run_as_user: u32,
    #[serde(rename = "runAsGroup")]
    pub run_as_group: u32,
    #[serde(rename = "readOnlyRootFilesystem")]
    pub read_only_root_filesystem: bool,
    #[serde(rename = "allowPrivilegeEscalation")]
    pub allow_privilege_escalation: bool,
}

#[derive(Serialize)]
pub struct Resources {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

#[derive(Serialize)]
pub struct ResourceQuantities {
    pub cpu: &'static str,
    pub memory: &'static str,
}

#[derive(Serialize)]
pub struct VolumeMount {
    pub name: &'static str,
    #[serde(rename = "mountPath")]
    pub mount_path: String,
    #[serde(rename = "readOnly", skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

#[derive(Serialize)]
pub struct Volume {
    pub name: &'static str,
    #[serde(rename = "hostPath", skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolume>,
    #[serde(rename = "emptyDir", skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolume>,
}

#[derive(Serialize)]
pub struct HostPathVolume {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Serialize, Default)]
pub struct EmptyDirVolume {}

const CONTAINER_INPUT_PATH: &str = "/in/bundle.zip";
const CONTAINER_OUTPUT_PATH: &str = "/out";

/// Renders the manifest for one job (spec §4.7 "Manifest").
pub fn render_job_manifest(namespace: &str, job_name: &str, image: &str, host_input: &str, host_output: &str) -> JobManifest {
    let mut job_labels = std::collections::BTreeMap::new();
    job_labels.insert("app", "k2p");
    let mut pod_labels = std::collections::BTreeMap::new();
    pod_labels.insert("app".to_string(), "k2p".to_string());
    pod_labels.insert("job-name".to_string(), job_name.to_string());

    JobManifest {
        api_version: "batch/v1",
        kind: "Job",
        metadata: Metadata { name: job_name.to_string(), namespace: namespace.to_string(), labels: job_labels },
        spec: JobSpec {
            backoff_limit: 0,
            ttl_seconds_after_finished: 3600,
            template: PodTemplate {
                metadata: PodMetadata { labels: pod_labels },
                spec: PodSpec {
                    restart_policy: "Never",
                    containers: vec![Container {
                        name: "k2p",
                        image: image.to_string(),
                        args: vec!["--in-zip".to_string(), CONTAINER_INPUT_PATH.to_string(), "--out".to_string(), CONTAINER_OUTPUT_PATH.to_string()],
                        security_context: SecurityContext {
                            run_as_non_root: true,
                            run_as_user: 65532,
                            run_as_group: 65532,
                            read_only_root_filesystem: true,
                            allow_privilege_escalation: false,
                        },
                        resources: Resources {
                            requests: ResourceQuantities { cpu: "250m", memory: "256Mi" },
                            limits: ResourceQuantities { cpu: "1", memory: "1Gi" },
                        },
                        volume_mounts: vec![
                            VolumeMount { name: "inzip", mount_path: CONTAINER_INPUT_PATH.to_string(), read_only: true },
                            VolumeMount { name: "outdir", mount_path: CONTAINER_OUTPUT_PATH.to_string(), read_only: false },
                            VolumeMount { name: "tmp", mount_path: "/tmp".to_string(), read_only: false },
                        ],
                    }],
                    volumes: vec![
                        Volume {
                            name: "inzip",
                            host_path: Some(HostPathVolume { path: host_input.to_string(), kind: "File" }),
                            empty_dir: None,
                        },
                        Volume {
                            name: "outdir",
                            host_path: Some(HostPathVolume { path: host_output.to_string(), kind: "DirectoryOrCreate" }),
                            empty_dir: None,
                        },
                        Volume { name: "tmp", host_path: None, empty_dir: Some(EmptyDirVolume::default()) },
                    ],
                },
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_expected_shape() {
        let manifest = render_job_manifest("k2p", "k2p-abc", "ghcr.io/k2p:main", "/host/in.zip", "/host/out");
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        assert!(yaml.contains("backoffLimit: 0"));
        assert!(yaml.contains("runAsUser: 65532"));
        assert!(yaml.contains("ttlSecondsAfterFinished: 3600"));
    }
}
