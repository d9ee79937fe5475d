//! Narrow view of the Kubernetes API used by the job service.
//!
//! The service only ever talks to an [`Orchestrator`]; `main` decides whether
//! that is the real cluster ([`KubeOrchestrator`]) or the in-memory stand-in
//! ([`InMemoryOrchestrator`]).

pub mod client;
pub mod memory;
pub mod resources;

use async_trait::async_trait;
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};

use crate::Result;

pub use client::KubeOrchestrator;
pub use memory::InMemoryOrchestrator;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submit a new job. An existing job with the same name is a 409 `KubeApi` error.
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;

    /// Read a job; `None` when it does not exist.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>>;

    /// Foreground (cascading) delete. Returns `false` when the job was already gone.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// Last `tail_lines` lines of a pod's log.
    async fn pod_logs(&self, namespace: &str, pod_name: &str, tail_lines: i64) -> Result<String>;
}
