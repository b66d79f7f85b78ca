//! Error types for the HAL crate.

use thiserror::Error;

/// Errors that can occur in device provider operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HalError {
    /// No device with this name is known to the provider.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device exists but is not accepting work.
    #[error("Device not available: {0}")]
    DeviceUnavailable(String),

    /// Submission was rejected.
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// Submission id is unknown.
    #[error("Submission not found: {0}")]
    SubmissionNotFound(String),

    /// Execution failed on the device.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Execution was cancelled.
    #[error("Job cancelled")]
    JobCancelled,

    /// Requested shots exceed the device's per-submission limit.
    #[error("Device {device} accepts at most {max} shots, got {shots}")]
    TooManyShots {
        /// Device name.
        device: String,
        /// Requested shots.
        shots: u32,
        /// Device limit.
        max: u32,
    },

    /// Too many circuits in one submission.
    #[error("Device {device} accepts at most {max} experiments, got {experiments}")]
    TooManyExperiments {
        /// Device name.
        device: String,
        /// Circuits in the submission.
        experiments: usize,
        /// Device limit.
        max: u32,
    },

    /// Circuit is wider than the device.
    #[error("Circuit {circuit} needs {qubits} qubits, device {device} has {max}")]
    CircuitTooLarge {
        /// Circuit name.
        circuit: String,
        /// Device name.
        device: String,
        /// Qubits the circuit uses.
        qubits: u32,
        /// Qubits on the device.
        max: u32,
    },

    /// Circuit cannot be executed.
    #[error("Invalid circuit: {0}")]
    InvalidCircuit(String),

    /// Timeout waiting for a submission.
    #[error("Timeout waiting for submission {0}")]
    Timeout(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic provider error.
    #[error("Provider error: {0}")]
    Backend(String),
}

/// Result type for HAL operations.
pub type HalResult<T> = Result<T, HalError>;
