use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, PostParams},
    Client,
};
use tokio::time::timeout;
use tracing::debug;

use super::Orchestrator;
use crate::{config::KubeConfig, Error, Result};

/// [`Orchestrator`] backed by the cluster's API server.
pub struct KubeOrchestrator {
    client: Client,
    request_timeout: Duration,
    log_limit_bytes: i64,
}

impl KubeOrchestrator {
    pub fn new(client: Client, config: &KubeConfig) -> Self {
        Self {
            client,
            request_timeout: config.request_timeout,
            log_limit_bytes: config.log_limit_bytes,
        }
    }

    /// Builds a client from the in-cluster environment or the local kubeconfig.
    pub async fn try_default(config: &KubeConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, config))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn bounded<T, F>(&self, operation: impl Into<String>, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        bounded(self.request_timeout, operation, call).await
    }
}

/// Runs one API call under `limit`. Timed-out calls are not retried.
pub async fn bounded<T, F>(limit: Duration, operation: impl Into<String>, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    match timeout(limit, call).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout {
            operation: operation.into(),
            after: limit,
        }),
    }
}

/// Outcome of a delete call: `true` if something was deleted, `false` if the
/// job was already gone.
fn deleted<T>(result: Result<T>, namespace: &str, name: &str) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(Error::KubeApi { code: 404, .. }) => {
            debug!("Job {}/{} was already gone", namespace, name);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let jobs = self.jobs(namespace);
        self.bounded(
            format!("creating job in {}", namespace),
            jobs.create(&PostParams::default(), job),
        )
        .await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let jobs = self.jobs(namespace);
        self.bounded(format!("reading job {}/{}", namespace, name), jobs.get_opt(name))
            .await
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs(namespace);
        let params = ListParams::default().labels(label_selector);
        let list = self
            .bounded(format!("listing jobs in {}", namespace), jobs.list(&params))
            .await?;
        Ok(list.items)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool> {
        let jobs = self.jobs(namespace);
        let result = self
            .bounded(
                format!("deleting job {}/{}", namespace, name),
                jobs.delete(name, &DeleteParams::foreground()),
            )
            .await;
        deleted(result, namespace, name)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let pods = self.pods(namespace);
        let params = ListParams::default().labels(label_selector);
        let list = self
            .bounded(format!("listing pods in {}", namespace), pods.list(&params))
            .await?;
        Ok(list.items)
    }

    async fn pod_logs(&self, namespace: &str, pod_name: &str, tail_lines: i64) -> Result<String> {
        let pods = self.pods(namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            limit_bytes: Some(self.log_limit_bytes),
            ..Default::default()
        };
        self.bounded(
            format!("reading logs of pod {}/{}", namespace, pod_name),
            pods.logs(pod_name, &params),
        )
        .await
    }
}
