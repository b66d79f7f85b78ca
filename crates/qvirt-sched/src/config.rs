//! Pipeline configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with QVIRT_ prefix)
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values
//!
//! Jobs may carry a [`JobConfig`]; any field set there wins over the
//! component-level value for that job only.

use std::path::Path;
use std::time::Duration;

use qvirt_cut::CutConstraints;
use qvirt_hal::{DEFAULT_MAX_EXPERIMENTS, DEFAULT_MAX_SHOTS, DeviceDescriptor};
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::job::Strategy;

/// How the mapper trades throughput against queueing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Prefer aggregation, then raw, then partitioning.
    #[default]
    HighThroughput,
    /// Pick the least busy fitting device first, then decide the strategy.
    LowWaitingTime,
}

impl std::str::FromStr for Policy {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "high_throughput" => Ok(Policy::HighThroughput),
            "low_waiting_time" => Ok(Policy::LowWaitingTime),
            other => Err(SchedError::Config(format!("unknown policy '{other}'"))),
        }
    }
}

/// Which devices a job may run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// Allowed device names; empty allows every device.
    #[serde(default)]
    pub include: Vec<String>,

    /// Devices that are never used.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Whether simulators may be used.
    #[serde(default = "default_true")]
    pub allow_simulators: bool,

    /// Only use simulators.
    #[serde(default)]
    pub simulators_only: bool,

    /// Lowest acceptable quality metric. Devices without one pass.
    #[serde(default)]
    pub min_quality: Option<f64>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            allow_simulators: true,
            simulators_only: false,
            min_quality: None,
        }
    }
}

impl DeviceFilter {
    /// Whether `device` passes the filter.
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        if !self.include.is_empty() && !self.include.contains(&device.name) {
            return false;
        }
        if self.exclude.contains(&device.name) {
            return false;
        }
        if device.simulator && !self.allow_simulators {
            return false;
        }
        if !device.simulator && self.simulators_only {
            return false;
        }
        match (self.min_quality, device.quality) {
            (Some(min), Some(quality)) => quality >= min,
            _ => true,
        }
    }
}

/// Per-job overrides. Unset fields fall back to the pipeline config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Strategies the mapper may choose from.
    #[serde(default)]
    pub strategies: Option<Vec<Strategy>>,
    /// Mapping policy.
    #[serde(default)]
    pub policy: Option<Policy>,
    /// Device filter.
    #[serde(default)]
    pub device_filter: Option<DeviceFilter>,
    /// Widest subcircuit when cutting.
    #[serde(default)]
    pub max_subcircuit_qubits: Option<u32>,
    /// Most subcircuits when cutting.
    #[serde(default)]
    pub max_separate_parts: Option<usize>,
    /// Most wire cuts.
    #[serde(default)]
    pub max_cuts: Option<usize>,
}

impl JobConfig {
    /// Restrict the job to the given strategies.
    pub fn with_strategies(mut self, strategies: impl Into<Vec<Strategy>>) -> Self {
        self.strategies = Some(strategies.into());
        self
    }

    /// Use a specific policy for this job.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Use a specific device filter for this job.
    pub fn with_device_filter(mut self, filter: DeviceFilter) -> Self {
        self.device_filter = Some(filter);
        self
    }

    /// Cap subcircuit width when this job is cut.
    pub fn with_max_subcircuit_qubits(mut self, qubits: u32) -> Self {
        self.max_subcircuit_qubits = Some(qubits);
        self
    }

    pub fn resolve_strategies<'a>(&'a self, mapper: &'a MapperConfig) -> &'a [Strategy] {
        self.strategies
            .as_deref()
            .unwrap_or(&mapper.enabled_strategies)
    }

    pub fn resolve_policy(&self, mapper: &MapperConfig) -> Policy {
        self.policy.unwrap_or(mapper.policy)
    }

    pub fn resolve_device_filter<'a>(&'a self, mapper: &'a MapperConfig) -> &'a DeviceFilter {
        self.device_filter.as_ref().unwrap_or(&mapper.device_filter)
    }

    /// Cut constraints for this job on a device of `device_qubits`.
    pub fn resolve_cut_constraints(
        &self,
        partition: &PartitionConfig,
        device_qubits: u32,
    ) -> CutConstraints {
        let max_qubits = self
            .max_subcircuit_qubits
            .unwrap_or(partition.max_subcircuit_qubits)
            .min(device_qubits);
        CutConstraints::new(
            max_qubits,
            self.max_separate_parts.unwrap_or(partition.max_separate_parts),
            self.max_cuts.unwrap_or(partition.max_cuts),
        )
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Device registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Resource mapper settings
    #[serde(default)]
    pub mapper: MapperConfig,

    /// Aggregator settings
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Partitioner settings
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Execution handler settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Device registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Seconds a device snapshot stays fresh
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
        }
    }
}

impl RegistryConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Resource mapper settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Mapping policy
    #[serde(default)]
    pub policy: Policy,

    /// Strategies the mapper may choose
    #[serde(default = "default_strategies")]
    pub enabled_strategies: Vec<Strategy>,

    /// Devices jobs may be mapped to
    #[serde(default)]
    pub device_filter: DeviceFilter,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            enabled_strategies: default_strategies(),
            device_filter: DeviceFilter::default(),
        }
    }
}

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// How long the oldest job of a device group may wait for partners
    #[serde(default = "default_aggregation_timeout")]
    pub timeout_ms: u64,

    /// Cadence of the flush check
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_aggregation_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl AggregatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Partitioner defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Widest subcircuit
    #[serde(default = "default_max_subcircuit_qubits")]
    pub max_subcircuit_qubits: u32,

    /// Most subcircuits per job
    #[serde(default = "default_max_separate_parts")]
    pub max_separate_parts: usize,

    /// Most wire cuts per job
    #[serde(default = "default_max_cuts")]
    pub max_cuts: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_subcircuit_qubits: default_max_subcircuit_qubits(),
            max_separate_parts: default_max_separate_parts(),
            max_cuts: default_max_cuts(),
        }
    }
}

/// Execution handler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// How long the collect phase waits for more jobs
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_ms: u64,

    /// First wait when the concurrency gate is saturated
    #[serde(default = "default_gate_backoff")]
    pub gate_backoff_ms: u64,

    /// Longest wait between gate attempts
    #[serde(default = "default_gate_max_backoff")]
    pub gate_max_backoff_ms: u64,

    /// Shot limit for devices that do not report one
    #[serde(default = "default_max_shots")]
    pub default_max_shots: u32,

    /// Experiment limit for devices that do not report one
    #[serde(default = "default_max_experiments")]
    pub default_max_experiments: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_timeout_ms: default_batch_timeout(),
            gate_backoff_ms: default_gate_backoff(),
            gate_max_backoff_ms: default_gate_max_backoff(),
            default_max_shots: default_max_shots(),
            default_max_experiments: default_max_experiments(),
        }
    }
}

impl ExecutorConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn gate_backoff(&self) -> Duration {
        Duration::from_millis(self.gate_backoff_ms)
    }

    pub fn gate_max_backoff(&self) -> Duration {
        Duration::from_millis(self.gate_max_backoff_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_update_interval() -> u64 {
    10
}

fn default_strategies() -> Vec<Strategy> {
    Strategy::ALL.to_vec()
}

fn default_aggregation_timeout() -> u64 {
    10_000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_max_subcircuit_qubits() -> u32 {
    5
}

fn default_max_separate_parts() -> usize {
    4
}

fn default_max_cuts() -> usize {
    4
}

fn default_batch_timeout() -> u64 {
    500
}

fn default_gate_backoff() -> u64 {
    50
}

fn default_gate_max_backoff() -> u64 {
    2_000
}

fn default_max_shots() -> u32 {
    DEFAULT_MAX_SHOTS
}

fn default_max_experiments() -> u32 {
    DEFAULT_MAX_EXPERIMENTS
}

impl PipelineConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> SchedResult<Self> {
        serde_yaml_ng::from_str(yaml).map_err(|e| SchedError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file, apply `QVIRT_*` overrides and
    /// validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SchedResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SchedError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `QVIRT_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> SchedResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override fields from any key/value source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> SchedResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(policy) = lookup("QVIRT_POLICY") {
            self.mapper.policy = policy.parse()?;
        }
        if let Some(value) = lookup("QVIRT_AGGREGATION_TIMEOUT_MS") {
            self.aggregator.timeout_ms = parse_override("QVIRT_AGGREGATION_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("QVIRT_BATCH_TIMEOUT_MS") {
            self.executor.batch_timeout_ms = parse_override("QVIRT_BATCH_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("QVIRT_REGISTRY_UPDATE_SECS") {
            self.registry.update_interval_secs =
                parse_override("QVIRT_REGISTRY_UPDATE_SECS", &value)?;
        }
        if let Some(value) = lookup("QVIRT_MAX_SUBCIRCUIT_QUBITS") {
            self.partition.max_subcircuit_qubits =
                parse_override("QVIRT_MAX_SUBCIRCUIT_QUBITS", &value)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SchedResult<()> {
        let zero = |what: &str| Err(SchedError::Config(format!("{what} must be greater than 0")));

        if self.registry.update_interval_secs == 0 {
            return zero("registry.update_interval_secs");
        }
        if self.mapper.enabled_strategies.is_empty() {
            return Err(SchedError::Config(
                "mapper.enabled_strategies must not be empty".into(),
            ));
        }
        if self.aggregator.timeout_ms == 0 {
            return zero("aggregator.timeout_ms");
        }
        if self.aggregator.poll_interval_ms == 0 {
            return zero("aggregator.poll_interval_ms");
        }
        if self.partition.max_subcircuit_qubits == 0 {
            return zero("partition.max_subcircuit_qubits");
        }
        if self.partition.max_separate_parts == 0 {
            return zero("partition.max_separate_parts");
        }
        if self.executor.batch_timeout_ms == 0 {
            return zero("executor.batch_timeout_ms");
        }
        if self.executor.gate_backoff_ms == 0 {
            return zero("executor.gate_backoff_ms");
        }
        if self.executor.gate_max_backoff_ms < self.executor.gate_backoff_ms {
            return Err(SchedError::Config(
                "executor.gate_max_backoff_ms must be at least gate_backoff_ms".into(),
            ));
        }
        if self.executor.default_max_shots == 0 {
            return zero("executor.default_max_shots");
        }
        if self.executor.default_max_experiments == 0 {
            return zero("executor.default_max_experiments");
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> SchedResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SchedError::Config(format!("{key}: invalid value '{value}'")))
}
