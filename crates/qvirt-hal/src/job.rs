//! Submission lifecycle types.
//!
//! ```text
//!   submit() ──→ Queued ──→ Running ──→ Completed
//!                  │           │
//!                  │           ├──→ Failed(reason)
//!                  │           │
//!                  └───────────┴──→ Cancelled
//! ```
//!
//! Terminal states are permanent and `result()` is only valid once a
//! submission is `Completed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-assigned identifier of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    /// Create a new submission ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubmissionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Waiting in the device queue.
    Queued,
    /// Currently running.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed with an error message.
    Failed(String),
    /// Cancelled.
    Cancelled,
}

impl SubmissionStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Completed | SubmissionStatus::Failed(_) | SubmissionStatus::Cancelled
        )
    }

    /// Check if the submission is still queued or running.
    pub fn is_pending(&self) -> bool {
        matches!(self, SubmissionStatus::Queued | SubmissionStatus::Running)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Queued => write!(f, "Queued"),
            SubmissionStatus::Running => write!(f, "Running"),
            SubmissionStatus::Completed => write!(f, "Completed"),
            SubmissionStatus::Failed(msg) => write!(f, "Failed: {msg}"),
            SubmissionStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Handle returned by [`DeviceProvider::submit`](crate::DeviceProvider::submit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    /// Provider-assigned id.
    pub id: SubmissionId,
    /// Device the circuits were sent to.
    pub device: String,
    /// Number of circuits in the submission.
    pub num_experiments: usize,
    /// Shots per circuit.
    pub shots: u32,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionHandle {
    /// Create a handle stamped with the current time.
    pub fn new(
        id: impl Into<SubmissionId>,
        device: impl Into<String>,
        num_experiments: usize,
        shots: u32,
    ) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            num_experiments,
            shots,
            submitted_at: Utc::now(),
        }
    }
}

impl From<String> for SubmissionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!SubmissionStatus::Queued.is_terminal());
        assert!(SubmissionStatus::Running.is_pending());
        assert!(SubmissionStatus::Completed.is_terminal());
        assert!(SubmissionStatus::Failed("boom".into()).is_terminal());
        assert!(SubmissionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_handle() {
        let handle = SubmissionHandle::new("sub-1", "belem", 3, 1024);
        assert_eq!(handle.id.to_string(), "sub-1");
        assert_eq!(handle.num_experiments, 3);
    }
}
