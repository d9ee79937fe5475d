use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use serde::Serialize;

use super::JobPhase;

/// Values the orchestrator assumes when a job spec leaves them unset.
pub const ORCHESTRATOR_DEFAULT_COMPLETIONS: i32 = 1;
pub const ORCHESTRATOR_DEFAULT_BACKOFF_LIMIT: i32 = 6;

pub const LOGS_UNAVAILABLE: &str = "Logs not available";

/// Maps pod counters onto a [`JobPhase`].
///
/// Precedence is fixed: completion beats failure, failure beats activity. A
/// job that has reached its completions is `Completed` even while stragglers
/// are still active.
pub fn normalize(
    succeeded: i32,
    failed: i32,
    active: i32,
    completions: i32,
    backoff_limit: i32,
) -> JobPhase {
    if succeeded > 0 && succeeded >= completions {
        JobPhase::Completed
    } else if failed > 0 && failed >= backoff_limit {
        JobPhase::Failed
    } else if active > 0 {
        JobPhase::Running
    } else {
        JobPhase::Pending
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    succeeded: i32,
    failed: i32,
    active: i32,
    ready: i32,
}

fn counters(job: &Job) -> Counters {
    job.status
        .as_ref()
        .map(|status| Counters {
            succeeded: status.succeeded.unwrap_or(0),
            failed: status.failed.unwrap_or(0),
            active: status.active.unwrap_or(0),
            ready: status.ready.unwrap_or(0),
        })
        .unwrap_or_default()
}

/// Phase of a live job record. List and status queries both go through here.
pub fn job_phase(job: &Job) -> JobPhase {
    let c = counters(job);
    let spec = job.spec.as_ref();
    let completions = spec
        .and_then(|s| s.completions)
        .unwrap_or(ORCHESTRATOR_DEFAULT_COMPLETIONS);
    let backoff_limit = spec
        .and_then(|s| s.backoff_limit)
        .unwrap_or(ORCHESTRATOR_DEFAULT_BACKOFF_LIMIT);
    normalize(c.succeeded, c.failed, c.active, completions, backoff_limit)
}

/// Wall-clock duration of a job, if it can be stated.
pub fn duration_seconds(
    phase: JobPhase,
    start: Option<DateTime<Utc>>,
    completion: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let elapsed = match (start, completion) {
        (Some(start), Some(completion)) => completion - start,
        (Some(start), None) if !phase.is_terminal() => now - start,
        _ => return None,
    };
    Some(elapsed.num_milliseconds() as f64 / 1000.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusConfiguration {
    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
    pub backoff_limit: Option<i32>,
    pub active_deadline_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMetrics {
    pub succeeded: i32,
    pub active: i32,
    pub failed: i32,
    pub ready: i32,
    pub total_pods: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConditionReport {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub restarts: i32,
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl PodSummary {
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            phase: status.and_then(|s| s.phase.clone()),
            start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
            restarts: status
                .and_then(|s| s.container_statuses.as_ref())
                .map(|statuses| statuses.iter().map(|cs| cs.restart_count).sum::<i32>())
                .unwrap_or(0),
            node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            logs: None,
        }
    }

    /// Pods that have started have logs worth fetching.
    pub fn has_logs(&self) -> bool {
        matches!(
            self.phase.as_deref(),
            Some("Running") | Some("Succeeded") | Some("Failed")
        )
    }
}

/// Full answer to `GET /api/jobs/{name}/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub namespace: String,
    pub status: JobPhase,
    pub created: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub configuration: StatusConfiguration,
    pub metrics: StatusMetrics,
    pub conditions: Vec<ConditionReport>,
    pub pods: Vec<PodSummary>,
}

impl StatusReport {
    pub fn new(job: &Job, namespace: &str, pods: Vec<PodSummary>, now: DateTime<Utc>) -> Self {
        let phase = job_phase(job);
        let c = counters(job);
        let spec = job.spec.as_ref();
        let status = job.status.as_ref();
        let start_time = status.and_then(|s| s.start_time.as_ref()).map(|t| t.0);
        let completion_time = status.and_then(|s| s.completion_time.as_ref()).map(|t| t.0);

        let conditions = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| ConditionReport {
                        type_: c.type_.clone(),
                        status: c.status.clone(),
                        reason: c.reason.clone(),
                        message: c.message.clone(),
                        last_transition_time: c.last_transition_time.as_ref().map(|t| t.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: job.metadata.name.clone().unwrap_or_default(),
            namespace: namespace.to_string(),
            status: phase,
            created: job.metadata.creation_timestamp.as_ref().map(|t| t.0),
            start_time,
            completion_time,
            duration_seconds: duration_seconds(phase, start_time, completion_time, now),
            configuration: StatusConfiguration {
                parallelism: spec.and_then(|s| s.parallelism),
                completions: spec.and_then(|s| s.completions),
                backoff_limit: spec.and_then(|s| s.backoff_limit),
                active_deadline_seconds: spec.and_then(|s| s.active_deadline_seconds),
            },
            metrics: StatusMetrics {
                succeeded: c.succeeded,
                active: c.active,
                failed: c.failed,
                ready: c.ready,
                total_pods: pods.len(),
            },
            conditions,
            pods,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryConfiguration {
    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
    pub backoff_limit: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryMetrics {
    pub succeeded: i32,
    pub active: i32,
    pub failed: i32,
}

/// One entry of `GET /api/jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub status: JobPhase,
    pub created: Option<DateTime<Utc>>,
    pub configuration: SummaryConfiguration,
    pub metrics: SummaryMetrics,
    pub labels: BTreeMap<String, String>,
}

impl JobSummary {
    pub fn from_job(job: &Job) -> Self {
        let c = counters(job);
        let spec = job.spec.as_ref();
        Self {
            name: job.metadata.name.clone().unwrap_or_default(),
            status: job_phase(job),
            created: job.metadata.creation_timestamp.as_ref().map(|t| t.0),
            configuration: SummaryConfiguration {
                parallelism: spec.and_then(|s| s.parallelism),
                completions: spec.and_then(|s| s.completions),
                backoff_limit: spec.and_then(|s| s.backoff_limit),
            },
            metrics: SummaryMetrics {
                succeeded: c.succeeded,
                active: c.active,
                failed: c.failed,
            },
            labels: job.metadata.labels.clone().unwrap_or_default(),
        }
    }
}
