//! Device descriptors as reported by a provider.

use serde::{Deserialize, Serialize};

/// Default per-submission shot limit.
pub const DEFAULT_MAX_SHOTS: u32 = 8192;
/// Default per-submission circuit limit.
pub const DEFAULT_MAX_EXPERIMENTS: u32 = 100;
/// Default number of concurrent jobs a device accepts.
pub const DEFAULT_MAX_JOBS: u32 = 5;

/// Capacity and status attributes of one remote device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device name, unique within a provider.
    pub name: String,
    /// Number of qubits.
    pub num_qubits: u32,
    /// Whether the device is accepting work.
    #[serde(default = "default_true")]
    pub operational: bool,
    /// Whether the device is a simulator.
    #[serde(default)]
    pub simulator: bool,
    /// Jobs waiting in the device queue.
    #[serde(default)]
    pub pending_jobs: u32,
    /// Jobs of this client currently running on the device.
    #[serde(default)]
    pub active_jobs: u32,
    /// Maximum concurrent jobs the device accepts from this client.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: u32,
    /// Human-readable status.
    #[serde(default)]
    pub status_message: String,
    /// Optional quality metric (higher is better).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    /// Maximum shots per submission.
    #[serde(default = "default_max_shots")]
    pub max_shots: u32,
    /// Maximum circuits per submission.
    #[serde(default = "default_max_experiments")]
    pub max_experiments: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_jobs() -> u32 {
    DEFAULT_MAX_JOBS
}

fn default_max_shots() -> u32 {
    DEFAULT_MAX_SHOTS
}

fn default_max_experiments() -> u32 {
    DEFAULT_MAX_EXPERIMENTS
}

impl DeviceDescriptor {
    /// Create an operational device with default limits.
    pub fn new(name: impl Into<String>, num_qubits: u32) -> Self {
        Self {
            name: name.into(),
            num_qubits,
            operational: true,
            simulator: false,
            pending_jobs: 0,
            active_jobs: 0,
            max_jobs: DEFAULT_MAX_JOBS,
            status_message: "active".into(),
            quality: None,
            max_shots: DEFAULT_MAX_SHOTS,
            max_experiments: DEFAULT_MAX_EXPERIMENTS,
        }
    }

    /// Mark as simulator.
    pub fn simulator(mut self) -> Self {
        self.simulator = true;
        self
    }

    /// Set per-submission limits.
    pub fn with_limits(mut self, max_shots: u32, max_experiments: u32) -> Self {
        self.max_shots = max_shots;
        self.max_experiments = max_experiments;
        self
    }

    /// Set the concurrent job limit.
    pub fn with_max_jobs(mut self, max_jobs: u32) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    /// Set the queue length.
    pub fn with_pending_jobs(mut self, pending_jobs: u32) -> Self {
        self.pending_jobs = pending_jobs;
        self
    }

    /// Set the quality metric.
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Set the operational flag and status message.
    pub fn with_status(mut self, operational: bool, message: impl Into<String>) -> Self {
        self.operational = operational;
        self.status_message = message.into();
        self
    }

    /// Whether a circuit of `num_qubits` fits on this device.
    pub fn fits(&self, num_qubits: u32) -> bool {
        num_qubits <= self.num_qubits
    }

    /// Whether the device can take another concurrent job.
    pub fn has_capacity(&self) -> bool {
        self.active_jobs < self.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_from_json() {
        let d: DeviceDescriptor =
            serde_json::from_str(r#"{"name": "lagos", "num_qubits": 7}"#).unwrap();
        assert!(d.operational);
        assert!(!d.simulator);
        assert_eq!(d.max_shots, DEFAULT_MAX_SHOTS);
        assert_eq!(d.max_jobs, DEFAULT_MAX_JOBS);
        assert!(d.has_capacity());
    }

    #[test]
    fn test_fits_and_capacity() {
        let mut d = DeviceDescriptor::new("belem", 5).with_max_jobs(1);
        assert!(d.fits(5));
        assert!(!d.fits(6));
        d.active_jobs = 1;
        assert!(!d.has_capacity());
    }
}
