//! Job lifecycle: request validation, naming, spec assembly, conflict
//! resolution and status normalisation.

pub mod conflict;
pub mod request;
pub mod service;
pub mod spec;
pub mod status;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use conflict::{ConflictResolver, Resolution};
pub use request::{generate_job_name, JobRequest};
pub use service::{CreatedJob, DeleteOutcome, JobList, JobService, ListFilters};
pub use spec::SpecBuilder;
pub use status::{normalize, JobSummary, StatusReport};

/// Status derived from a job's pod counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "Pending",
            JobPhase::Running => "Running",
            JobPhase::Completed => "Completed",
            JobPhase::Failed => "Failed",
        }
    }

    /// Case-insensitive exact match, used by the list filter.
    pub fn matches(&self, filter: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(filter.trim())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
