//! In-process stand-in for the Kubernetes API.
//!
//! Used by the test suite and by `--backend memory` for local runs without a
//! cluster. It keeps enough of the API server's behaviour to exercise the job
//! service: name uniqueness, foreground deletion that can lag behind the
//! delete call, label selectors, and per-pod logs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::api::{
    batch::v1::{Job, JobStatus},
    core::v1::{ContainerStatus, Pod, PodSpec, PodStatus},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use super::{
    resources::{selector_matches, LABEL_JOB_NAME},
    Orchestrator,
};
use crate::{Error, Result};

type Key = (String, String);

struct StoredJob {
    job: Job,
    /// Reads left before a deleted job disappears. `None` while live.
    terminating: Option<u32>,
}

#[derive(Default)]
struct State {
    jobs: BTreeMap<Key, StoredJob>,
    pods: BTreeMap<Key, Pod>,
    logs: HashMap<Key, String>,
    deletion_lag: u32,
    last_created: Option<DateTime<Utc>>,
    next_uid: u64,
}

#[derive(Default)]
pub struct InMemoryOrchestrator {
    state: Mutex<State>,
    calls: AtomicUsize,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::KubeApi {
        code: 404,
        reason: "NotFound".to_string(),
        message: format!("{} \"{}\" not found", kind, name),
    }
}

fn poisoned() -> Error {
    Error::Kubernetes("in-memory orchestrator state is poisoned".to_string())
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep deleted jobs visible for `reads` further `get_job` calls, the way a
    /// foreground delete leaves the owner around until its pods are gone.
    pub fn with_deletion_lag(self, reads: u32) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.deletion_lag = reads;
        }
        self
    }

    /// Number of trait calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Peek at a stored job without counting as an API call.
    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        let state = self.state.lock().ok()?;
        state.jobs.get(&key(namespace, name)).map(|stored| stored.job.clone())
    }

    /// Overwrite the status of a stored job, as the job controller would.
    pub fn set_job_status(&self, namespace: &str, name: &str, status: JobStatus) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match state.jobs.get_mut(&key(namespace, name)) {
            Some(stored) => {
                stored.job.status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Register a pod owned by `job_name`.
    pub fn add_job_pod(
        &self,
        namespace: &str,
        job_name: &str,
        pod_name: &str,
        phase: &str,
        node: Option<&str>,
        restarts: &[i32],
    ) {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_JOB_NAME.to_string(), job_name.to_string());

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                start_time: Some(Time(Utc::now())),
                container_statuses: Some(
                    restarts
                        .iter()
                        .enumerate()
                        .map(|(i, count)| ContainerStatus {
                            name: format!("container-{}", i),
                            restart_count: *count,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        };

        if let Ok(mut state) = self.state.lock() {
            state.pods.insert(key(namespace, pod_name), pod);
        }
    }

    pub fn set_pod_logs(&self, namespace: &str, pod_name: &str, logs: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.logs.insert(key(namespace, pod_name), logs.to_string());
        }
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.record_call();
        let name = job
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Validation("job has no metadata.name".to_string()))?;

        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let k = key(namespace, &name);
        if state.jobs.contains_key(&k) {
            return Err(Error::KubeApi {
                code: 409,
                reason: "AlreadyExists".to_string(),
                message: format!("jobs.batch \"{}\" already exists", name),
            });
        }

        // Creation timestamps strictly increase, even within one clock tick.
        let mut created = Utc::now();
        if let Some(last) = state.last_created {
            if created <= last {
                created = last + ChronoDuration::microseconds(1);
            }
        }
        state.last_created = Some(created);
        state.next_uid += 1;

        let mut stored = job.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(format!("uid-{}", state.next_uid));
        stored.metadata.resource_version = Some(state.next_uid.to_string());
        stored.metadata.creation_timestamp = Some(Time(created));
        stored.status = Some(JobStatus::default());

        state.jobs.insert(
            k,
            StoredJob {
                job: stored.clone(),
                terminating: None,
            },
        );
        Ok(stored)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.record_call();
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let k = key(namespace, name);

        match state.jobs.get(&k).map(|stored| stored.terminating) {
            None => Ok(None),
            Some(Some(0)) => {
                state.jobs.remove(&k);
                Ok(None)
            }
            Some(Some(left)) => {
                let stored = state
                    .jobs
                    .get_mut(&k)
                    .ok_or_else(|| not_found("jobs.batch", name))?;
                stored.terminating = Some(left - 1);
                Ok(Some(stored.job.clone()))
            }
            Some(None) => Ok(state.jobs.get(&k).map(|stored| stored.job.clone())),
        }
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>> {
        self.record_call();
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state
            .jobs
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, stored)| stored.terminating != Some(0))
            .filter(|(_, stored)| {
                selector_matches(label_selector, stored.job.metadata.labels.as_ref())
            })
            .map(|(_, stored)| stored.job.clone())
            .collect())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool> {
        self.record_call();
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let k = key(namespace, name);
        let lag = state.deletion_lag;

        match state.jobs.get(&k).map(|stored| stored.terminating) {
            None => return Ok(false),
            Some(Some(0)) => {
                state.jobs.remove(&k);
                return Ok(false);
            }
            Some(Some(_)) => return Ok(true),
            Some(None) if lag == 0 => {
                state.jobs.remove(&k);
            }
            Some(None) => {
                if let Some(stored) = state.jobs.get_mut(&k) {
                    stored.terminating = Some(lag);
                    stored.job.metadata.deletion_timestamp = Some(Time(Utc::now()));
                }
            }
        }

        // Foreground propagation: owned pods go with the job.
        let owned: Vec<Key> = state
            .pods
            .iter()
            .filter(|((ns, _), pod)| {
                ns == namespace
                    && pod
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.get(LABEL_JOB_NAME))
                        .map(|job| job == name)
                        .unwrap_or(false)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for pod_key in owned {
            state.pods.remove(&pod_key);
            state.logs.remove(&pod_key);
        }

        Ok(true)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.record_call();
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, pod)| selector_matches(label_selector, pod.metadata.labels.as_ref()))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod_name: &str, tail_lines: i64) -> Result<String> {
        self.record_call();
        let state = self.state.lock().map_err(|_| poisoned())?;
        let logs = state
            .logs
            .get(&key(namespace, pod_name))
            .ok_or_else(|| not_found("pods/log", pod_name))?;

        let lines: Vec<&str> = logs.lines().collect();
        let keep = usize::try_from(tail_lines).unwrap_or(0).min(lines.len());
        Ok(lines[lines.len() - keep..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::resources::pod_selector;

    fn job(name: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let orchestrator = InMemoryOrchestrator::new();
        tokio_test::assert_ok!(orchestrator.create_job("default", &job("a")).await);

        let err = orchestrator.create_job("default", &job("a")).await.unwrap_err();
        assert_eq!(err.api_code(), Some(409));
    }

    #[tokio::test]
    async fn deleted_job_lingers_for_configured_reads() {
        let orchestrator = InMemoryOrchestrator::new().with_deletion_lag(2);
        orchestrator.create_job("default", &job("a")).await.unwrap();

        assert!(orchestrator.delete_job("default", "a").await.unwrap());
        assert!(orchestrator.get_job("default", "a").await.unwrap().is_some());
        assert!(orchestrator.get_job("default", "a").await.unwrap().is_some());
        assert!(orchestrator.get_job("default", "a").await.unwrap().is_none());
        assert!(!orchestrator.delete_job("default", "a").await.unwrap());
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_pods() {
        let orchestrator = InMemoryOrchestrator::new();
        orchestrator.create_job("default", &job("a")).await.unwrap();
        orchestrator.add_job_pod("default", "a", "a-1", "Running", None, &[0]);
        orchestrator.add_job_pod("default", "b", "b-1", "Running", None, &[0]);

        orchestrator.delete_job("default", "a").await.unwrap();

        assert!(orchestrator.list_pods("default", &pod_selector("a")).await.unwrap().is_empty());
        assert_eq!(orchestrator.list_pods("default", &pod_selector("b")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn logs_are_tailed() {
        let orchestrator = InMemoryOrchestrator::new();
        orchestrator.set_pod_logs("default", "p", "one\ntwo\nthree");

        assert_eq!(orchestrator.pod_logs("default", "p", 2).await.unwrap(), "two\nthree");
        assert!(orchestrator.pod_logs("default", "missing", 2).await.is_err());
    }
}
