//! CI executor capability.
//!
//! The engine never builds or ships anything itself; it asks an executor to
//! run a job and then watches that job until it settles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::environment::Environment;
use crate::error::Result;

/// Opaque handle to a triggered job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRef(pub String);

impl JobRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_url: Option<String>,
}

impl JobReport {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            logs_url: None,
        }
    }

    pub fn with_logs(mut self, url: impl Into<String>) -> Self {
        self.logs_url = Some(url.into());
        self
    }
}

/// The three operations the orchestrator needs from a CI system.
pub trait CiExecutor: Send + Sync {
    fn trigger(&self, environment: &Environment, revision: &str) -> Result<JobRef>;

    fn poll(&self, job: &JobRef) -> Result<JobReport>;

    fn rollback(&self, environment: &Environment, target_revision: &str) -> Result<JobRef>;
}
