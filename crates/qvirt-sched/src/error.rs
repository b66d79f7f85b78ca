//! Error handling for the execution pipeline.
//!
//! Errors fall into three groups:
//!
//! - policy exhaustion ([`SchedError::NoSuitableStrategy`],
//!   [`SchedError::NoFeasibleCut`]): the job cannot be placed and goes to the
//!   error sink
//! - invariant violations ([`SchedError::is_invariant_violation`]): the
//!   pipeline's exactly-once bookkeeping broke; the affected job is failed
//!   loudly and never reaches the caller with a partial result
//! - collaborator errors from the device provider, the cutter or the
//!   circuit layer

use qvirt_cut::CutError;
use qvirt_hal::HalError;
use qvirt_ir::IrError;
use thiserror::Error;

use crate::job::{Job, JobId, Strategy};

/// Result type for pipeline operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in the execution pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SchedError {
    /// No enabled strategy found a fitting device.
    #[error("No suitable strategy for job {job} ({qubits} qubits)")]
    NoSuitableStrategy { job: JobId, qubits: u32 },

    /// The cutter could not meet the cut constraints.
    #[error("No feasible cut for job {job} within {max_subcircuit_qubits} qubits per subcircuit")]
    NoFeasibleCut {
        job: JobId,
        max_subcircuit_qubits: u32,
    },

    /// A combined or cut job has no bookkeeping record.
    #[error("No record for job {0}")]
    MissingRecord(JobId),

    /// A completed job id is not in the job table.
    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    /// Splitting produced a different number of results than recorded jobs.
    #[error("Job {job} split into {got} results, expected {expected}")]
    SliceCountMismatch {
        job: JobId,
        expected: usize,
        got: usize,
    },

    /// Partial results of a job spanning schedule items do not line up.
    #[error("Fragment mismatch for job {job}: {reason}")]
    FragmentMismatch { job: JobId, reason: String },

    /// A job reached a result stage without an outcome.
    #[error("Job {0} has no outcome")]
    MissingOutcome(JobId),

    /// The combined job a job was aggregated into failed.
    #[error("Combined job {combined} failed: {message}")]
    CombinedFailed { combined: JobId, message: String },

    /// A sub-job of a cut job failed.
    #[error("Sub-job {sub_job} failed: {message}")]
    SubJobFailed { sub_job: JobId, message: String },

    /// A job that can never run.
    #[error("Invalid job {job}: {reason}")]
    InvalidJob { job: JobId, reason: String },

    /// Strategy tags are set once.
    #[error("Job {job} is already tagged {current}, cannot retag as {requested}")]
    StrategyLocked {
        job: JobId,
        current: Strategy,
        requested: Strategy,
    },

    /// A schedule item failed on the device.
    #[error("Submission to {device} failed: {message}")]
    SubmissionFailed { device: String, message: String },

    /// Device provider error.
    #[error("Provider error: {0}")]
    Provider(#[from] HalError),

    /// Cutter error.
    #[error("Cut error: {0}")]
    Cut(#[from] CutError),

    /// Circuit error.
    #[error("Circuit error: {0}")]
    Circuit(#[from] IrError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A downstream stage went away.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// A job without a strategy tag reached the result router.
    #[error("Job {0} has no strategy tag")]
    UnknownStrategy(JobId),

    /// A stage task panicked or was aborted.
    #[error("Stage {stage} failed: {message}")]
    StageFailed {
        stage: &'static str,
        message: String,
    },
}

impl SchedError {
    /// Whether this error means the pipeline's bookkeeping was violated.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SchedError::MissingRecord(_)
                | SchedError::UnknownJob(_)
                | SchedError::SliceCountMismatch { .. }
                | SchedError::FragmentMismatch { .. }
                | SchedError::MissingOutcome(_)
                | SchedError::StrategyLocked { .. }
        )
    }

    /// Whether no device/strategy combination could take the job.
    pub fn is_policy_exhaustion(&self) -> bool {
        matches!(
            self,
            SchedError::NoSuitableStrategy { .. } | SchedError::NoFeasibleCut { .. }
        )
    }
}

/// A job that left the pipeline through the error sink.
#[derive(Debug)]
pub struct JobFailure {
    /// Id of the failed job.
    pub job_id: JobId,
    /// The job itself, when the failing stage still held it.
    pub job: Option<Job>,
    /// What went wrong.
    pub error: SchedError,
}

impl JobFailure {
    /// Failure carrying the job.
    pub fn new(job: Job, error: SchedError) -> Self {
        Self {
            job_id: job.id(),
            job: Some(job),
            error,
        }
    }

    /// Failure for a job that is no longer available.
    pub fn without_job(job_id: JobId, error: SchedError) -> Self {
        Self {
            job_id,
            job: None,
            error,
        }
    }
}

/// Where stages report failed jobs. Without a sink, failures are logged
/// and dropped.
pub type ErrorSink = Option<tokio::sync::mpsc::UnboundedSender<JobFailure>>;

/// Send `failure` to `sink`, logging it either way.
pub(crate) fn report(sink: &ErrorSink, failure: JobFailure) {
    if failure.error.is_invariant_violation() {
        tracing::error!(job = %failure.job_id, "Invariant violated: {}", failure.error);
    } else {
        tracing::warn!(job = %failure.job_id, "Job failed: {}", failure.error);
    }
    if let Some(sink) = sink {
        if sink.send(failure).is_err() {
            tracing::warn!("Error sink closed, dropping failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let id = JobId::new();
        assert!(SchedError::UnknownJob(id).is_invariant_violation());
        assert!(SchedError::MissingRecord(id).is_invariant_violation());
        assert!(
            SchedError::NoSuitableStrategy { job: id, qubits: 7 }.is_policy_exhaustion()
        );
        assert!(!SchedError::Config("x".into()).is_invariant_violation());
        assert!(!SchedError::Provider(HalError::JobCancelled).is_policy_exhaustion());
    }

    #[test]
    fn test_error_display() {
        let err = SchedError::ChannelClosed("egress");
        assert_eq!(err.to_string(), "Channel closed: egress");

        let err = SchedError::SubmissionFailed {
            device: "belem".into(),
            message: "offline".into(),
        };
        assert_eq!(err.to_string(), "Submission to belem failed: offline");
    }
}
