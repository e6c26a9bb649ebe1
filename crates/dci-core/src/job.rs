//! Job status state machine.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Status of a job.
///
/// `new → pre-run → running → post-run → success|failure`, with `killed`
/// reachable from any live status and `error` from any status. Once a job
/// reaches a terminal status it never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    New,
    PreRun,
    Running,
    PostRun,
    Success,
    Failure,
    Killed,
    Error,
}

impl JobStatus {
    /// Statuses a remoteci can have at most one job in.
    pub const LIVE: [JobStatus; 4] = [
        JobStatus::New,
        JobStatus::PreRun,
        JobStatus::Running,
        JobStatus::PostRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PreRun => "pre-run",
            Self::Running => "running",
            Self::PostRun => "post-run",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Killed => "killed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "pre-run" => Some(Self::PreRun),
            "running" => Some(Self::Running),
            "post-run" => Some(Self::PostRun),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "killed" => Some(Self::Killed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Killed | Self::Error
        )
    }

    /// Validate a status change asserted by a caller (agent report or update).
    ///
    /// `killed` is reserved for supersession by the scheduler.
    pub fn check_reported_transition(self, next: JobStatus) -> Result<()> {
        if next == JobStatus::Killed {
            return Err(Error::bad_request_with(
                "Invalid status: \"killed\"",
                serde_json::json!({ "error": "status 'killed' is set by the scheduler only" }),
            ));
        }
        if self.is_terminal() {
            return Err(Error::Conflict(format!(
                "job is in terminal status '{}' and cannot move to '{}'",
                self, next
            )));
        }
        Ok(())
    }

    pub fn live_strs() -> Vec<String> {
        Self::LIVE.iter().map(|s| s.as_str().to_string()).collect()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            Error::bad_request_with(
                format!("Invalid status: \"{}\"", s),
                serde_json::json!({
                    "valid_statuses": [
                        "new", "pre-run", "running", "post-run",
                        "success", "failure", "killed", "error"
                    ]
                }),
            )
        })
    }
}

/// Metadata the requesting agent sends along with a schedule request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub user_agent: Option<String>,
    pub client_version: Option<String>,
}
