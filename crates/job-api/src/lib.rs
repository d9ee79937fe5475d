pub mod config;
pub mod jobs;
pub mod kubernetes;
pub mod metrics;
pub mod server;

use std::time::Duration;

use thiserror::Error;

use crate::jobs::JobPhase;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Job {namespace}/{job_name} already exists")]
    Conflict {
        job_name: String,
        namespace: String,
        /// `None` when the existing job could not be read back.
        current_status: Option<JobPhase>,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Kubernetes API error ({code} {reason}): {message}")]
    KubeApi {
        code: u16,
        reason: String,
        message: String,
    },
    #[error("Kubernetes error: {0}")]
    Kubernetes(String),
    #[error("Timed out after {after:?} while {operation}")]
    Timeout { operation: String, after: Duration },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => Error::KubeApi {
                code: response.code,
                reason: response.reason,
                message: response.message,
            },
            other => Error::Kubernetes(other.to_string()),
        }
    }
}

impl Error {
    /// HTTP status code reported by the orchestrator, if the error came from it.
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::KubeApi { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
