use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ExecAction, ObjectFieldSelector,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SecretKeySelector, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::request::JobRequest;
use crate::config::WorkerConfig;
use crate::kubernetes::resources::{
    ANNOTATION_CREATED_AT, ANNOTATION_CREATED_BY, ANNOTATION_REPLACED_EXISTING, LABEL_APP,
    LABEL_COMPONENT, LABEL_JOB_NAME, LABEL_JOB_TYPE, LABEL_MANAGED_BY, LABEL_WORKLOAD_IDENTITY,
};

pub const DEFAULT_CPU_REQUEST: &str = "500m";
pub const DEFAULT_MEMORY_REQUEST: &str = "1Gi";
pub const DEFAULT_CPU_LIMIT: &str = "1000m";
pub const DEFAULT_MEMORY_LIMIT: &str = "2Gi";

pub const CONTAINER_NAME: &str = "indexer";
pub const RESTART_POLICY: &str = "OnFailure";
pub const IMAGE_PULL_POLICY: &str = "Always";

pub const SCRATCH_VOLUME: &str = "temp-storage";
pub const SCRATCH_MOUNT_PATH: &str = "/tmp/indexing";
pub const SCRATCH_SIZE_LIMIT: &str = "5Gi";

pub const RUN_AS_USER: i64 = 1000;
const METRICS_PORT: &str = "8080";

/// Filled from the pod's own metadata when it starts.
pub const FIELD_ENV: [(&str, &str); 3] = [
    ("JOB_NAME", "metadata.labels['job-name']"),
    ("POD_NAME", "metadata.name"),
    ("NAMESPACE", "metadata.namespace"),
];

/// Credentials for the worker's downstream services, read from the secret store.
pub const SECRET_ENV: [&str; 5] = [
    "AZURE_OPENAI_ENDPOINT",
    "AZURE_OPENAI_API_KEY",
    "AZURE_SEARCH_ENDPOINT",
    "AZURE_SEARCH_KEY",
    "AZURE_STORAGE_CONNECTION_STRING",
];

fn default_command() -> Vec<String> {
    vec!["python".to_string()]
}

fn default_args() -> Vec<String> {
    vec!["-m".to_string(), "indexer.main".to_string()]
}

pub fn is_reserved_env_name(name: &str) -> bool {
    FIELD_ENV.iter().any(|(reserved, _)| *reserved == name) || SECRET_ENV.contains(&name)
}

/// Turns a validated [`JobRequest`] into a complete `batch/v1` Job.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    worker: WorkerConfig,
}

impl SpecBuilder {
    pub fn new(worker: WorkerConfig) -> Self {
        Self { worker }
    }

    pub fn worker(&self) -> &WorkerConfig {
        &self.worker
    }

    pub fn build(
        &self,
        request: &JobRequest,
        name: &str,
        namespace: &str,
        replaced_existing: bool,
        now: DateTime<Utc>,
    ) -> Job {
        let config = request.configuration();

        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.job_labels(request)),
                annotations: Some({
                    let mut annotations = BTreeMap::new();
                    annotations.insert(
                        ANNOTATION_CREATED_BY.to_string(),
                        self.worker.manager_name.clone(),
                    );
                    annotations.insert(
                        ANNOTATION_CREATED_AT.to_string(),
                        now.to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                    annotations.insert(
                        ANNOTATION_REPLACED_EXISTING.to_string(),
                        replaced_existing.to_string(),
                    );
                    annotations
                }),
                ..Default::default()
            },
            spec: Some(JobSpec {
                parallelism: Some(config.parallelism),
                completions: Some(config.completions),
                backoff_limit: Some(config.backoff_limit),
                active_deadline_seconds: Some(config.active_deadline_seconds),
                ttl_seconds_after_finished: Some(config.ttl_seconds_after_finished),
                template: self.pod_template(request, name),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn job_labels(&self, request: &JobRequest) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_APP.to_string(), self.worker.app_label.clone());
        labels.insert(LABEL_COMPONENT.to_string(), "job".to_string());
        labels.insert(LABEL_MANAGED_BY.to_string(), self.worker.manager_name.clone());
        labels.insert(LABEL_JOB_TYPE.to_string(), request.job_type().to_string());
        labels.insert(LABEL_WORKLOAD_IDENTITY.to_string(), "true".to_string());
        labels
    }

    fn pod_template(&self, request: &JobRequest, name: &str) -> PodTemplateSpec {
        let command = request.command.clone().unwrap_or_else(default_command);
        let args = request.args.clone().unwrap_or_else(default_args);
        let liveness_probe = if request.enable_probes {
            Some(process_probe(&command))
        } else {
            None
        };

        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some({
                    let mut labels = BTreeMap::new();
                    labels.insert(LABEL_APP.to_string(), self.worker.app_label.clone());
                    labels.insert(LABEL_COMPONENT.to_string(), "job-pod".to_string());
                    labels.insert(LABEL_JOB_NAME.to_string(), name.to_string());
                    labels.insert(LABEL_WORKLOAD_IDENTITY.to_string(), "true".to_string());
                    labels
                }),
                annotations: Some({
                    let mut annotations = BTreeMap::new();
                    annotations.insert(
                        "cluster-autoscaler.kubernetes.io/safe-to-evict".to_string(),
                        "false".to_string(),
                    );
                    annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
                    annotations.insert("prometheus.io/port".to_string(), METRICS_PORT.to_string());
                    annotations
                }),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                restart_policy: Some(RESTART_POLICY.to_string()),
                service_account_name: Some(self.worker.service_account.clone()),
                node_selector: request.node_selector.clone().filter(|s| !s.is_empty()),
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: Some(
                        request
                            .image
                            .clone()
                            .unwrap_or_else(|| self.worker.image.clone()),
                    ),
                    image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
                    command: Some(command),
                    args: Some(args),
                    env: Some(self.env(request)),
                    resources: Some(resources(request)),
                    liveness_probe,
                    volume_mounts: Some(vec![VolumeMount {
                        name: SCRATCH_VOLUME.to_string(),
                        mount_path: SCRATCH_MOUNT_PATH.to_string(),
                        ..Default::default()
                    }]),
                    security_context: Some(SecurityContext {
                        run_as_non_root: Some(true),
                        run_as_user: Some(RUN_AS_USER),
                        allow_privilege_escalation: Some(false),
                        read_only_root_filesystem: Some(false),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: SCRATCH_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource {
                        size_limit: Some(Quantity(SCRATCH_SIZE_LIMIT.to_string())),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                security_context: Some(PodSecurityContext {
                    run_as_non_root: Some(true),
                    run_as_user: Some(RUN_AS_USER),
                    fs_group: Some(RUN_AS_USER),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    /// Field references, then secret references, then the caller's entries.
    fn env(&self, request: &JobRequest) -> Vec<EnvVar> {
        let field_refs = FIELD_ENV.iter().map(|(name, path)| EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: path.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let secret_refs = SECRET_ENV.iter().map(|name| EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(self.worker.secret_name.clone()),
                    key: name.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let user = request
            .env_strings()
            .into_iter()
            .filter(|(name, _)| !is_reserved_env_name(name))
            .map(|(name, value)| EnvVar {
                name,
                value: Some(value),
                ..Default::default()
            });

        field_refs.chain(secret_refs).chain(user).collect()
    }
}

fn resources(request: &JobRequest) -> ResourceRequirements {
    let quantity = |value: &Option<String>, default: &str| {
        Quantity(value.clone().unwrap_or_else(|| default.to_string()))
    };

    ResourceRequirements {
        requests: Some({
            let mut requests = BTreeMap::new();
            requests.insert("cpu".to_string(), quantity(&request.cpu_request, DEFAULT_CPU_REQUEST));
            requests.insert(
                "memory".to_string(),
                quantity(&request.memory_request, DEFAULT_MEMORY_REQUEST),
            );
            requests
        }),
        limits: Some({
            let mut limits = BTreeMap::new();
            limits.insert("cpu".to_string(), quantity(&request.cpu_limit, DEFAULT_CPU_LIMIT));
            limits.insert(
                "memory".to_string(),
                quantity(&request.memory_limit, DEFAULT_MEMORY_LIMIT),
            );
            limits
        }),
        ..Default::default()
    }
}

/// Liveness check that the worker's main process is still present.
fn process_probe(command: &[String]) -> Probe {
    let process = command.first().cloned().unwrap_or_else(|| "python".to_string());
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["pgrep".to_string(), "-f".to_string(), process]),
        }),
        initial_delay_seconds: Some(30),
        period_seconds: Some(30),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}
