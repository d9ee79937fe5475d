use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{
    conflict::{ConflictResolver, Resolution},
    request::{generate_job_name, validate_job_type, JobConfiguration, JobRequest},
    spec::SpecBuilder,
    status::{job_phase, JobSummary, PodSummary, StatusReport, LOGS_UNAVAILABLE},
};
use crate::{
    config::Config,
    kubernetes::{
        resources::{job_selector, pod_selector},
        Orchestrator,
    },
    metrics, Error, Result,
};

/// Pod log reads in flight at once for one status request.
const LOG_FETCH_CONCURRENCY: usize = 4;

/// Status location of a job. The namespace is always carried so the URL stays
/// valid for jobs outside the default namespace.
pub fn status_url(job_name: &str, namespace: &str) -> String {
    format!("/api/jobs/{}/status?namespace={}", job_name, namespace)
}

/// Result of a successful create.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedJob {
    pub job_name: String,
    pub namespace: String,
    pub replaced_existing: bool,
    pub configuration: JobConfiguration,
    pub status_url: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete. Normal for repeated deletes.
    AlreadyAbsent,
}

/// Query parameters of `GET /api/jobs`, echoed back in the response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilters {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub namespace: Option<String>,
}

impl ListFilters {
    fn status(&self) -> Option<&str> {
        self.status.as_deref().filter(|s| !s.trim().is_empty())
    }

    fn job_type(&self) -> Option<&str> {
        self.job_type.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
    pub filters: ListFilters,
}

/// Create, inspect, list and delete indexing jobs.
///
/// Holds no job state of its own; every call reads the orchestrator, so one
/// instance can be shared by all request handlers.
pub struct JobService {
    orchestrator: Arc<dyn Orchestrator>,
    resolver: ConflictResolver,
    builder: SpecBuilder,
    default_namespace: String,
    log_tail_lines: i64,
    clock: fn() -> DateTime<Utc>,
}

impl JobService {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, config: &Config) -> Self {
        Self {
            resolver: ConflictResolver::new(
                orchestrator.clone(),
                config.kube.delete_wait_timeout,
                config.kube.delete_poll_interval,
            ),
            orchestrator,
            builder: SpecBuilder::new(config.worker.clone()),
            default_namespace: config.kube.namespace.clone(),
            log_tail_lines: config.kube.log_tail_lines,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used for generated names and durations.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn namespace<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.default_namespace)
    }

    /// Validates the body, clears or rejects a same-named job, then submits the
    /// assembled spec.
    pub async fn create(&self, body: &Value) -> Result<CreatedJob> {
        let result = self.create_inner(body).await;
        metrics::record("create", &result);
        result
    }

    async fn create_inner(&self, body: &Value) -> Result<CreatedJob> {
        let request = JobRequest::from_body(body)?;
        request.validate()?;

        let now = (self.clock)();
        let name = match &request.job_name {
            Some(name) => name.clone(),
            None => generate_job_name(body, now),
        };
        let namespace = self.namespace(request.namespace.as_deref()).to_string();

        let resolution = self
            .resolver
            .resolve(&namespace, &name, request.replace_existing)
            .await?;
        let replaced = resolution == Resolution::Replaced;

        let job = self.builder.build(&request, &name, &namespace, replaced, now);
        let created = match self.orchestrator.create_job(&namespace, &job).await {
            Ok(created) => created,
            Err(Error::KubeApi { code: 409, .. }) => {
                warn!("Job {}/{} was created concurrently by another request", namespace, name);
                let current_status = match self.orchestrator.get_job(&namespace, &name).await {
                    Ok(job) => job.as_ref().map(job_phase),
                    Err(e) => {
                        debug!(
                            "Could not read concurrently created job {}/{}: {}",
                            namespace, name, e
                        );
                        None
                    }
                };
                return Err(Error::Conflict {
                    job_name: name,
                    namespace,
                    current_status,
                });
            }
            Err(e) => {
                if replaced {
                    error!(
                        "Job {}/{} was deleted but its replacement could not be created: {}",
                        namespace, name, e
                    );
                }
                return Err(e);
            }
        };

        let job_name = created.metadata.name.clone().unwrap_or(name);
        info!(
            "Created job {}/{} (replaced existing: {})",
            namespace, job_name, replaced
        );

        Ok(CreatedJob {
            status_url: status_url(&job_name, &namespace),
            job_name,
            namespace,
            replaced_existing: replaced,
            configuration: request.configuration(),
            created_at: created.metadata.creation_timestamp.map(|t| t.0),
        })
    }

    /// Fresh status of one job, including its pods and their recent logs.
    pub async fn get_status(&self, namespace: Option<&str>, name: &str) -> Result<StatusReport> {
        let result = self.get_status_inner(namespace, name).await;
        metrics::record("status", &result);
        result
    }

    async fn get_status_inner(&self, namespace: Option<&str>, name: &str) -> Result<StatusReport> {
        let namespace = self.namespace(namespace);
        let job = self
            .orchestrator
            .get_job(namespace, name)
            .await?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let pods = self
            .orchestrator
            .list_pods(namespace, &pod_selector(name))
            .await?;

        let lookups: Vec<_> = pods
            .iter()
            .map(|pod| self.summarize_pod(namespace, pod))
            .collect();
        let summaries: Vec<PodSummary> = stream::iter(lookups)
            .buffered(LOG_FETCH_CONCURRENCY)
            .collect()
            .await;

        Ok(StatusReport::new(&job, namespace, summaries, (self.clock)()))
    }

    async fn summarize_pod(&self, namespace: &str, pod: &Pod) -> PodSummary {
        let mut summary = PodSummary::from_pod(pod);
        if summary.has_logs() {
            let logs = match self
                .orchestrator
                .pod_logs(namespace, &summary.name, self.log_tail_lines)
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    debug!("Could not read logs of pod {}/{}: {}", namespace, summary.name, e);
                    LOGS_UNAVAILABLE.to_string()
                }
            };
            summary.logs = Some(logs);
        }
        summary
    }

    /// Jobs managed by this API, optionally narrowed by type and normalised status.
    pub async fn list(&self, filters: ListFilters) -> Result<JobList> {
        let result = self.list_inner(filters).await;
        metrics::record("list", &result);
        result
    }

    async fn list_inner(&self, filters: ListFilters) -> Result<JobList> {
        if let Some(job_type) = filters.job_type() {
            validate_job_type(job_type)?;
        }
        let namespace = self.namespace(filters.namespace.as_deref());
        let selector = job_selector(&self.builder.worker().app_label, filters.job_type());

        let jobs = self.orchestrator.list_jobs(namespace, &selector).await?;

        // The orchestrator cannot filter on a derived status; do it here.
        let jobs: Vec<JobSummary> = jobs
            .iter()
            .map(JobSummary::from_job)
            .filter(|summary| match filters.status() {
                Some(wanted) => summary.status.matches(wanted),
                None => true,
            })
            .collect();

        Ok(JobList {
            total: jobs.len(),
            jobs,
            filters,
        })
    }

    /// Cascading delete of a job and its pods.
    pub async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<DeleteOutcome> {
        let namespace = self.namespace(namespace);
        let result = self.orchestrator.delete_job(namespace, name).await.map(|deleted| {
            if deleted {
                info!("Deleted job {}/{}", namespace, name);
                DeleteOutcome::Deleted
            } else {
                info!("Job {}/{} was already absent", namespace, name);
                DeleteOutcome::AlreadyAbsent
            }
        });
        metrics::record("delete", &result);
        result
    }
}
