//! Deployment records and their lifecycle.
//!
//! ```text
//! queued -> triggered -> running -> succeeded
//!                               \-> failed -> rolling_back -> rolled_back
//!                                                         \-> rollback_failed
//! queued | triggered -> cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Triggered,
    Running,
    Succeeded,
    Failed,
    RollingBack,
    RolledBack,
    RollbackFailed,
    Cancelled,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 9] = [
        DeploymentStatus::Queued,
        DeploymentStatus::Triggered,
        DeploymentStatus::Running,
        DeploymentStatus::Succeeded,
        DeploymentStatus::Failed,
        DeploymentStatus::RollingBack,
        DeploymentStatus::RolledBack,
        DeploymentStatus::RollbackFailed,
        DeploymentStatus::Cancelled,
    ];

    /// Statuses that hold an environment's deploy lock.
    pub const IN_FLIGHT: [DeploymentStatus; 4] = [
        DeploymentStatus::Queued,
        DeploymentStatus::Triggered,
        DeploymentStatus::Running,
        DeploymentStatus::RollingBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Triggered => "triggered",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::RollbackFailed => "rollback_failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| {
                Error::internal_store(
                    format!("unknown deployment status '{}'", raw),
                    Some("decode status".to_string()),
                )
            })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Succeeded
                | DeploymentStatus::RolledBack
                | DeploymentStatus::RollbackFailed
                | DeploymentStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Queued, Triggered)
                | (Queued, Cancelled)
                | (Triggered, Running)
                | (Triggered, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, RollbackFailed)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to move a revision into an environment. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    #[serde(skip)]
    pub seq: i64,
    pub environment: String,
    pub revision: String,
    pub changed_paths: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    pub triggered_by: String,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub queued_at: DateTime<Utc>,
    /// Last status change or annotation.
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_job_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_job_ref: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub conflict_overrides: BTreeSet<String>,
}

/// Input to `DeploymentStore::append`.
#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub environment: String,
    pub revision: String,
    pub changed_paths: BTreeSet<String>,
    pub source_branch: Option<String>,
    pub triggered_by: String,
    pub conflict_overrides: BTreeSet<String>,
}

/// Optional fields written alongside a status change. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub reason: Option<String>,
    pub executor_job_ref: Option<String>,
    pub logs_url: Option<String>,
    pub rollback_target: Option<String>,
    pub rollback_job_ref: Option<String>,
}

impl TransitionFields {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    #[test]
    fn status_strings_round_trip() {
        for status in DeploymentStatus::ALL {
            assert_eq!(DeploymentStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DeploymentStatus::parse("exploded").is_err());
    }

    #[test]
    fn only_table_transitions_are_allowed() {
        let allowed = [
            (Queued, Triggered),
            (Queued, Cancelled),
            (Triggered, Running),
            (Triggered, Cancelled),
            (Running, Succeeded),
            (Running, Failed),
            (Failed, RollingBack),
            (RollingBack, RolledBack),
            (RollingBack, RollbackFailed),
        ];

        for from in DeploymentStatus::ALL {
            for to in DeploymentStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in DeploymentStatus::ALL.iter().filter(|s| s.is_terminal()) {
            assert!(DeploymentStatus::ALL
                .iter()
                .all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn failed_is_neither_terminal_nor_in_flight() {
        assert!(!Failed.is_terminal());
        assert!(!DeploymentStatus::IN_FLIGHT.contains(&Failed));
        assert!(DeploymentStatus::IN_FLIGHT.contains(&RollingBack));
        assert!(!DeploymentStatus::IN_FLIGHT.contains(&Succeeded));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RollbackFailed).unwrap(),
            "\"rollback_failed\""
        );
    }
}
