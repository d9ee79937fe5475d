use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use super::status::job_phase;
use crate::{kubernetes::Orchestrator, Error, Result};

/// What happened to a same-named job before a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No job with the name existed.
    Absent,
    /// An existing job was deleted and is confirmed gone.
    Replaced,
}

/// Decides whether a create may proceed under a given name.
pub struct ConflictResolver {
    orchestrator: Arc<dyn Orchestrator>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl ConflictResolver {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        wait_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            wait_timeout,
            poll_interval,
        }
    }

    /// Absent: go ahead. Present without `replace_existing`: `Error::Conflict`,
    /// nothing is touched. Present with `replace_existing`: foreground delete,
    /// then wait until the job can no longer be read.
    pub async fn resolve(
        &self,
        namespace: &str,
        name: &str,
        replace_existing: bool,
    ) -> Result<Resolution> {
        let existing = match self.orchestrator.get_job(namespace, name).await? {
            None => return Ok(Resolution::Absent),
            Some(job) => job,
        };

        if !replace_existing {
            return Err(Error::Conflict {
                job_name: name.to_string(),
                namespace: namespace.to_string(),
                current_status: Some(job_phase(&existing)),
            });
        }

        info!("Deleting existing job {}/{} before re-creating it", namespace, name);
        if !self.orchestrator.delete_job(namespace, name).await? {
            debug!("Job {}/{} disappeared before it could be deleted", namespace, name);
        }

        match timeout(self.wait_timeout, self.poll_until_absent(namespace, name)).await {
            Ok(result) => result.map(|_| Resolution::Replaced),
            Err(_) => Err(Error::Timeout {
                operation: format!("waiting for job {}/{} to be deleted", namespace, name),
                after: self.wait_timeout,
            }),
        }
    }

    async fn poll_until_absent(&self, namespace: &str, name: &str) -> Result<()> {
        loop {
            if self.orchestrator.get_job(namespace, name).await?.is_none() {
                return Ok(());
            }
            debug!("Job {}/{} is still terminating", namespace, name);
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobPhase;
    use crate::kubernetes::{InMemoryOrchestrator, MockOrchestrator};
    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn named(name: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn resolver(orchestrator: Arc<dyn Orchestrator>) -> ConflictResolver {
        ConflictResolver::new(orchestrator, Duration::from_secs(2), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn absent_name_proceeds() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let resolution = resolver(orchestrator).resolve("default", "fresh", false).await;
        assert_eq!(tokio_test::assert_ok!(resolution), Resolution::Absent);
    }

    #[tokio::test]
    async fn existing_without_replace_is_a_conflict_and_untouched() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        orchestrator.create_job("default", &named("busy")).await.unwrap();
        orchestrator.set_job_status(
            "default",
            "busy",
            JobStatus {
                active: Some(2),
                ..Default::default()
            },
        );
        let before = orchestrator.job("default", "busy").unwrap();

        let err = resolver(orchestrator.clone())
            .resolve("default", "busy", false)
            .await
            .unwrap_err();

        match err {
            Error::Conflict {
                job_name,
                current_status,
                ..
            } => {
                assert_eq!(job_name, "busy");
                assert_eq!(current_status, Some(JobPhase::Running));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(orchestrator.job("default", "busy"), Some(before));
    }

    #[tokio::test]
    async fn replace_waits_for_lagging_deletion() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new().with_deletion_lag(3));
        orchestrator.create_job("default", &named("old")).await.unwrap();

        let resolution = resolver(orchestrator.clone())
            .resolve("default", "old", true)
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Replaced);
        assert!(orchestrator.job("default", "old").is_none());
    }

    #[tokio::test]
    async fn replace_gives_up_after_the_wait_timeout() {
        let mut mock = MockOrchestrator::new();
        mock.expect_get_job()
            .returning(|_, name| Ok(Some(named(name))));
        mock.expect_delete_job().times(1).returning(|_, _| Ok(true));
        mock.expect_create_job().never();

        let resolver = ConflictResolver::new(
            Arc::new(mock),
            Duration::from_millis(50),
            Duration::from_millis(5),
        );
        let err = resolver.resolve("default", "stuck", true).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn lookup_errors_propagate_without_deleting() {
        let mut mock = MockOrchestrator::new();
        mock.expect_get_job().returning(|_, _| {
            Err(Error::KubeApi {
                code: 403,
                reason: "Forbidden".to_string(),
                message: "jobs.batch is forbidden".to_string(),
            })
        });
        mock.expect_delete_job().never();

        let err = resolver(Arc::new(mock))
            .resolve("default", "x", true)
            .await
            .unwrap_err();
        assert_eq!(err.api_code(), Some(403));
    }
}
