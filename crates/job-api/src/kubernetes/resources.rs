use std::collections::BTreeMap;

pub const LABEL_APP: &str = "app";
pub const LABEL_COMPONENT: &str = "component";
pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const LABEL_JOB_TYPE: &str = "job-type";
pub const LABEL_JOB_NAME: &str = "job-name";
pub const LABEL_WORKLOAD_IDENTITY: &str = "azure.workload.identity/use";

pub const ANNOTATION_CREATED_BY: &str = "created-by";
pub const ANNOTATION_CREATED_AT: &str = "created-at";
pub const ANNOTATION_REPLACED_EXISTING: &str = "replaced-existing";

/// Selector for every job this API manages, optionally narrowed to one job type.
pub fn job_selector(app_label: &str, job_type: Option<&str>) -> String {
    match job_type {
        Some(job_type) => format!("{}={},{}={}", LABEL_APP, app_label, LABEL_JOB_TYPE, job_type),
        None => format!("{}={}", LABEL_APP, app_label),
    }
}

/// Selector for the pods owned by a job.
pub fn pod_selector(job_name: &str) -> String {
    format!("{}={}", LABEL_JOB_NAME, job_name)
}

/// Equality-only label selector matching (`k=v,k2=v2`).
pub fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (key, value) = match term.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => return false,
            };
            labels
                .and_then(|labels| labels.get(key))
                .map(|actual| actual == value)
                .unwrap_or(false)
        })
}
