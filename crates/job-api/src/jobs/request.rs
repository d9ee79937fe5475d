use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::spec::is_reserved_env_name;
use crate::{Error, Result};

pub const DEFAULT_PARALLELISM: i32 = 3;
pub const DEFAULT_COMPLETIONS: i32 = 1;
pub const DEFAULT_BACKOFF_LIMIT: i32 = 5;
pub const DEFAULT_ACTIVE_DEADLINE_SECONDS: i64 = 3600;
pub const DEFAULT_TTL_SECONDS_AFTER_FINISHED: i32 = 86400;
pub const DEFAULT_JOB_TYPE: &str = "indexing";

pub const GENERATED_NAME_PREFIX: &str = "indexing-job";
const MAX_JOB_NAME_LEN: usize = 63;
const MAX_LABEL_VALUE_LEN: usize = 63;

lazy_static! {
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
    static ref LABEL_VALUE: Regex =
        Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap();
}

/// Body of `POST /api/jobs`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_name: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub replace_existing: bool,

    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
    pub backoff_limit: Option<i32>,
    pub active_deadline_seconds: Option<i64>,
    pub ttl_seconds_after_finished: Option<i32>,

    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, Value>>,

    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,

    pub node_selector: Option<BTreeMap<String, String>>,
    pub job_type: Option<String>,
    #[serde(default)]
    pub enable_probes: bool,
}

/// Job-level policy after defaults are applied. Echoed back on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub parallelism: i32,
    pub completions: i32,
    pub backoff_limit: i32,
    pub active_deadline_seconds: i64,
    pub ttl_seconds_after_finished: i32,
}

impl JobRequest {
    /// Parses a raw request body. Type mismatches (e.g. `"parallelism": 2.5`)
    /// are validation errors.
    pub fn from_body(body: &Value) -> Result<Self> {
        if !body.is_object() {
            return Err(Error::Validation("Request body must be a JSON object".to_string()));
        }
        JobRequest::deserialize(body)
            .map_err(|e| Error::Validation(format!("Invalid job request: {}", e)))
    }

    pub fn configuration(&self) -> JobConfiguration {
        JobConfiguration {
            parallelism: self.parallelism.unwrap_or(DEFAULT_PARALLELISM),
            completions: self.completions.unwrap_or(DEFAULT_COMPLETIONS),
            backoff_limit: self.backoff_limit.unwrap_or(DEFAULT_BACKOFF_LIMIT),
            active_deadline_seconds: self
                .active_deadline_seconds
                .unwrap_or(DEFAULT_ACTIVE_DEADLINE_SECONDS),
            ttl_seconds_after_finished: self
                .ttl_seconds_after_finished
                .unwrap_or(DEFAULT_TTL_SECONDS_AFTER_FINISHED),
        }
    }

    pub fn job_type(&self) -> &str {
        self.job_type.as_deref().unwrap_or(DEFAULT_JOB_TYPE)
    }

    /// Checks every invariant that can be decided without the cluster.
    pub fn validate(&self) -> Result<()> {
        let config = self.configuration();

        if config.parallelism < 1 {
            return Err(Error::Validation("Parallelism must be >= 1".to_string()));
        }
        if config.completions < 1 {
            return Err(Error::Validation("Completions must be >= 1".to_string()));
        }
        if config.backoff_limit < 0 {
            return Err(Error::Validation("backoff_limit must be >= 0".to_string()));
        }
        if config.active_deadline_seconds < 1 {
            return Err(Error::Validation(
                "active_deadline_seconds must be >= 1".to_string(),
            ));
        }
        if config.ttl_seconds_after_finished < 0 {
            return Err(Error::Validation(
                "ttl_seconds_after_finished must be >= 0".to_string(),
            ));
        }

        if let Some(name) = &self.job_name {
            validate_job_name(name)?;
        }
        if let Some(namespace) = &self.namespace {
            if !DNS_LABEL.is_match(namespace) {
                return Err(Error::Validation(format!("Invalid namespace '{}'", namespace)));
            }
        }
        if let Some(job_type) = &self.job_type {
            validate_job_type(job_type)?;
        }
        if matches!(&self.command, Some(command) if command.is_empty()) {
            return Err(Error::Validation("command must not be empty".to_string()));
        }

        if let Some(env) = &self.env {
            if let Some(reserved) = env.keys().find(|name| is_reserved_env_name(name)) {
                return Err(Error::Validation(format!(
                    "Environment variable {} is managed by the API and cannot be set",
                    reserved
                )));
            }
            if env.keys().any(|name| name.is_empty()) {
                return Err(Error::Validation(
                    "Environment variable names must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// User environment entries with values coerced to strings.
    pub fn env_strings(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .flatten()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

pub fn validate_job_name(name: &str) -> Result<()> {
    if name.len() > MAX_JOB_NAME_LEN || !DNS_LABEL.is_match(name) {
        return Err(Error::Validation(format!(
            "Invalid job_name '{}': must be at most 63 lowercase alphanumeric characters \
             or '-', starting and ending with an alphanumeric",
            name
        )));
    }
    Ok(())
}

/// `job_type` ends up as a label value and in label selectors.
pub fn validate_job_type(job_type: &str) -> Result<()> {
    if job_type.len() > MAX_LABEL_VALUE_LEN || !LABEL_VALUE.is_match(job_type) {
        return Err(Error::Validation(format!(
            "Invalid job_type '{}': must be 1 to 63 alphanumeric characters, '-', '_' \
             or '.', starting and ending with an alphanumeric",
            job_type
        )));
    }
    Ok(())
}

/// Name for a job submitted without `job_name`: unix seconds plus a short
/// hash of the body.
///
/// Byte-identical bodies submitted within the same second get the same name;
/// the second submission then goes through normal conflict handling.
pub fn generate_job_name(body: &Value, now: DateTime<Utc>) -> String {
    // serde_json::Value keeps object keys sorted, so this is canonical.
    let canonical = body.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let hash: String = format!("{:x}", digest).chars().take(8).collect();
    format!("{}-{}-{}", GENERATED_NAME_PREFIX, now.timestamp(), hash)
}
