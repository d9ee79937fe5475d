use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::Error;

lazy_static! {
    pub static ref JOB_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "indexer_job_api_operations_total",
            "Job API operations by operation and outcome."
        ),
        &["operation", "outcome"]
    )
    .unwrap();
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry
            .register(Box::new(JOB_OPERATIONS_TOTAL.clone()))
            .unwrap();
        registry
    };
}

/// Outcome label for a finished operation.
pub fn outcome<T>(result: &crate::Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(Error::Validation(_)) => "invalid",
        Err(Error::Conflict { .. }) => "conflict",
        Err(Error::NotFound(_)) => "not_found",
        Err(Error::Timeout { .. }) => "timeout",
        Err(_) => "error",
    }
}

pub fn record<T>(operation: &str, result: &crate::Result<T>) {
    JOB_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome(result)])
        .inc();
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
