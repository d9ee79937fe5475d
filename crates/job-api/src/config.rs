use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrchestratorBackend {
    #[serde(rename = "kubernetes")]
    Kubernetes,
    #[serde(rename = "memory")]
    Memory,
}

impl Default for OrchestratorBackend {
    fn default() -> Self {
        OrchestratorBackend::Kubernetes
    }
}

impl std::str::FromStr for OrchestratorBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(OrchestratorBackend::Kubernetes),
            "memory" | "in-memory" => Ok(OrchestratorBackend::Memory),
            other => Err(crate::Error::Config(format!(
                "Unknown orchestrator backend '{}', expected 'kubernetes' or 'memory'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub backend: OrchestratorBackend,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend: OrchestratorBackend::Kubernetes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub kube: KubeConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeConfig {
    /// Namespace used when a request does not name one.
    pub namespace: String,
    /// Upper bound for every single call to the Kubernetes API.
    pub request_timeout: Duration,
    /// How long a replace waits for the old job to disappear.
    pub delete_wait_timeout: Duration,
    pub delete_poll_interval: Duration,
    pub log_tail_lines: i64,
    pub log_limit_bytes: i64,
}

/// Settings baked into every job the API submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub image: String,
    pub service_account: String,
    pub secret_name: String,
    pub app_label: String,
    pub manager_name: String,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                addr: env_or("SERVER_ADDR", defaults.server.addr),
            },
            kube: KubeConfig {
                namespace: env_or("KUBERNETES_NAMESPACE", defaults.kube.namespace),
                request_timeout: Duration::from_secs(env_parse(
                    "KUBE_REQUEST_TIMEOUT_SECS",
                    defaults.kube.request_timeout.as_secs(),
                )?),
                delete_wait_timeout: Duration::from_secs(env_parse(
                    "DELETE_WAIT_TIMEOUT_SECS",
                    defaults.kube.delete_wait_timeout.as_secs(),
                )?),
                delete_poll_interval: Duration::from_millis(env_parse(
                    "DELETE_POLL_INTERVAL_MS",
                    defaults.kube.delete_poll_interval.as_millis() as u64,
                )?),
                log_tail_lines: env_parse("LOG_TAIL_LINES", defaults.kube.log_tail_lines)?,
                log_limit_bytes: env_parse("LOG_LIMIT_BYTES", defaults.kube.log_limit_bytes)?,
            },
            worker: WorkerConfig {
                image: env_or("WORKER_IMAGE", defaults.worker.image),
                service_account: env_or("WORKER_SERVICE_ACCOUNT", defaults.worker.service_account),
                secret_name: env_or("WORKER_SECRET_NAME", defaults.worker.secret_name),
                app_label: env_or("JOB_APP_LABEL", defaults.worker.app_label),
                manager_name: env_or("JOB_MANAGER_NAME", defaults.worker.manager_name),
            },
            execution: ExecutionConfig {
                backend: match std::env::var("ORCHESTRATOR_BACKEND") {
                    Ok(value) => value.parse()?,
                    Err(_) => OrchestratorBackend::default(),
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.kube.request_timeout.is_zero() {
            return Err(crate::Error::Config(
                "KUBE_REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.kube.delete_poll_interval.is_zero() {
            return Err(crate::Error::Config(
                "DELETE_POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.kube.log_tail_lines < 1 {
            return Err(crate::Error::Config(
                "LOG_TAIL_LINES must be at least 1".to_string(),
            ));
        }
        if self.worker.image.is_empty() {
            return Err(crate::Error::Config("WORKER_IMAGE must not be empty".to_string()));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| crate::Error::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            kube: KubeConfig {
                namespace: "default".to_string(),
                request_timeout: Duration::from_secs(30),
                delete_wait_timeout: Duration::from_secs(30),
                delete_poll_interval: Duration::from_millis(500),
                log_tail_lines: 20,
                log_limit_bytes: 64 * 1024,
            },
            worker: WorkerConfig {
                image: "indexer:latest".to_string(),
                service_account: "indexer-sa".to_string(),
                secret_name: "indexer-secrets".to_string(),
                app_label: "indexer".to_string(),
                manager_name: "indexer-job-api".to_string(),
            },
            execution: ExecutionConfig::default(),
        }
    }
}
