//! Job types for the execution pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use qvirt_cut::InstanceKey;
use qvirt_hal::{DeviceDescriptor, ExperimentResult};
use qvirt_ir::Circuit;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::{SchedError, SchedResult};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a job's circuit is transformed before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Run the circuit as submitted.
    Raw,
    /// Run side by side with other jobs in one wider circuit.
    Aggregation,
    /// Cut into narrower subcircuits and reconstruct.
    Partition,
}

impl Strategy {
    /// All strategies in mapper preference order.
    pub const ALL: [Strategy; 3] = [Strategy::Aggregation, Strategy::Raw, Strategy::Partition];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Raw => write!(f, "raw"),
            Strategy::Aggregation => write!(f, "aggregation"),
            Strategy::Partition => write!(f, "partition"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Strategy::Raw),
            "aggregation" | "aggregate" => Ok(Strategy::Aggregation),
            "partition" | "cut" => Ok(Strategy::Partition),
            other => Err(SchedError::Config(format!("unknown strategy '{other}'"))),
        }
    }
}

/// The device a job is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Device name.
    pub name: String,
    /// Device width at the time of mapping.
    pub num_qubits: u32,
}

impl DeviceRef {
    /// Create a device reference.
    pub fn new(name: impl Into<String>, num_qubits: u32) -> Self {
        Self {
            name: name.into(),
            num_qubits,
        }
    }
}

impl From<&DeviceDescriptor> for DeviceRef {
    fn from(device: &DeviceDescriptor) -> Self {
        Self::new(device.name.clone(), device.num_qubits)
    }
}

/// Where a job came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Submitted by a caller.
    Submitted,
    /// Synthetic job holding several aggregated jobs.
    Combined,
    /// One instance of a cut job.
    SubCircuit {
        /// The job that was cut.
        parent: JobId,
        /// Which instance this is.
        key: InstanceKey,
    },
}

/// A unit of work flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    /// Circuit to run.
    pub circuit: Circuit,
    /// Requested shots.
    pub shots: u32,
    strategy: Option<Strategy>,
    /// Device chosen by the mapper.
    pub device: Option<DeviceRef>,
    /// Per-job overrides.
    #[serde(default)]
    pub config: JobConfig,
    /// Origin of the job.
    pub kind: JobKind,
    outcome: Option<ExperimentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    probabilities: Option<BTreeMap<String, f64>>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the outcome was attached.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new caller job.
    pub fn new(circuit: Circuit, shots: u32) -> Self {
        Self {
            id: JobId::new(),
            circuit,
            shots,
            strategy: None,
            device: None,
            config: JobConfig::default(),
            kind: JobKind::Submitted,
            outcome: None,
            probabilities: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Set per-job overrides.
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Synthetic job for an aggregated circuit.
    pub(crate) fn combined(circuit: Circuit, shots: u32, device: DeviceRef) -> Self {
        let mut job = Self::new(circuit, shots);
        job.kind = JobKind::Combined;
        job.strategy = Some(Strategy::Aggregation);
        job.device = Some(device);
        job
    }

    /// Sub-job for one instance of a cut parent.
    pub(crate) fn sub_circuit(parent: &Job, key: InstanceKey, circuit: Circuit, shots: u32) -> Self {
        let mut job = Self::new(circuit, shots);
        job.kind = JobKind::SubCircuit {
            parent: parent.id,
            key,
        };
        job.strategy = Some(Strategy::Partition);
        job.device = parent.device.clone();
        job.config = parent.config.clone();
        job
    }

    /// Job ID.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Strategy tag, once mapped.
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Name of the target device, once mapped.
    pub fn device_name(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.name.as_str())
    }

    /// Circuit width.
    pub fn num_qubits(&self) -> u32 {
        self.circuit.num_qubits()
    }

    /// Tag the job with a strategy and device.
    ///
    /// The tag is set once; assigning a different strategy later fails.
    pub fn assign(&mut self, strategy: Strategy, device: DeviceRef) -> SchedResult<()> {
        match self.strategy {
            Some(current) if current != strategy => Err(SchedError::StrategyLocked {
                job: self.id,
                current,
                requested: strategy,
            }),
            _ => {
                self.strategy = Some(strategy);
                self.device = Some(device);
                Ok(())
            }
        }
    }

    /// Attach the outcome and cache its distribution.
    pub fn set_outcome(&mut self, outcome: ExperimentResult) {
        self.probabilities = Some(outcome.probabilities());
        self.outcome = Some(outcome);
        self.completed_at = Some(Utc::now());
    }

    /// Outcome, once executed.
    pub fn outcome(&self) -> Option<&ExperimentResult> {
        self.outcome.as_ref()
    }

    /// Remove and return the outcome.
    pub(crate) fn take_outcome(&mut self) -> Option<ExperimentResult> {
        self.probabilities = None;
        self.completed_at = None;
        self.outcome.take()
    }

    /// Cached outcome distribution.
    pub fn probabilities(&self) -> Option<&BTreeMap<String, f64>> {
        self.probabilities.as_ref()
    }

    /// Whether an outcome is attached.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qvirt_hal::{Counts, ExperimentHeader};

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let parsed = JobId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_strategy_set_once() {
        let mut job = Job::new(Circuit::bell().unwrap(), 100);
        assert!(job.strategy().is_none());

        job.assign(Strategy::Raw, DeviceRef::new("a", 5)).unwrap();
        assert_eq!(job.strategy(), Some(Strategy::Raw));
        assert_eq!(job.device_name(), Some("a"));

        let err = job
            .assign(Strategy::Partition, DeviceRef::new("b", 3))
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(job.strategy(), Some(Strategy::Raw));
        assert_eq!(job.device_name(), Some("a"));
    }

    #[test]
    fn test_outcome_caches_probabilities() {
        let mut job = Job::new(Circuit::bell().unwrap(), 4);
        assert!(job.probabilities().is_none());

        job.set_outcome(ExperimentResult {
            header: ExperimentHeader::from_circuit(&job.circuit),
            shots: 4,
            counts: Counts::from_pairs([("00", 1), ("11", 3)]),
            memory: vec![],
        });

        let probs = job.probabilities().unwrap();
        assert!((probs["11"] - 0.75).abs() < 1e-12);
        assert!(job.is_complete());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("raw".parse::<Strategy>().unwrap(), Strategy::Raw);
        assert_eq!("Aggregation".parse::<Strategy>().unwrap(), Strategy::Aggregation);
        assert!("bogus".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_sub_circuit_inherits_parent() {
        let mut parent = Job::new(Circuit::ghz(4).unwrap(), 500);
        parent.assign(Strategy::Partition, DeviceRef::new("small", 3)).unwrap();

        let key = InstanceKey {
            subcircuit: 1,
            combination: 2,
        };
        let sub = Job::sub_circuit(&parent, key, Circuit::bell().unwrap(), 500);
        assert_eq!(sub.strategy(), Some(Strategy::Partition));
        assert_eq!(sub.device_name(), Some("small"));
        assert_eq!(
            sub.kind,
            JobKind::SubCircuit {
                parent: parent.id(),
                key
            }
        );
    }
}
