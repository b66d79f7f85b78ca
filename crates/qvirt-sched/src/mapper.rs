//! Resource mapper: picks a strategy and a device for every job.
//!
//! Each decision reads one registry snapshot and is made independently of
//! every other job. Per-job overrides replace the enabled strategies, the
//! policy and the device filter.
//!
//! ```text
//!   high_throughput:   aggregation (fits 2n) ──→ raw (fits n) ──→ partition scan
//!
//!   low_waiting_time:  d = least busy device fitting n
//!                        ├─ d fits 2n ──→ aggregation on d
//!                        ├─ otherwise ──→ raw on d
//!                        └─ no d      ──→ partition scan
//! ```
//!
//! The partition scan looks for the least busy device at widths `n - 1`
//! down to 2 and cuts the job for the first one found.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{DeviceFilter, MapperConfig, Policy};
use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::job::{DeviceRef, Job, Strategy};
use crate::registry::{DeviceRegistry, DeviceSnapshot, RegistrySnapshot};

/// Where a job goes and how it is transformed on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub strategy: Strategy,
    pub device: DeviceRef,
}

impl Decision {
    fn new(strategy: Strategy, device: &DeviceSnapshot) -> Self {
        Self {
            strategy,
            device: DeviceRef::from(device),
        }
    }
}

/// Assigns jobs to devices and strategies.
pub struct ResourceMapper {
    registry: Arc<DeviceRegistry>,
    config: MapperConfig,
    errors: ErrorSink,
}

impl ResourceMapper {
    pub fn new(registry: Arc<DeviceRegistry>, config: MapperConfig) -> Self {
        Self {
            registry,
            config,
            errors: None,
        }
    }

    /// Report failed jobs to `sink`.
    pub fn with_errors(mut self, sink: ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    /// Choose a strategy and device for `job` from a fresh or cached
    /// snapshot.
    pub async fn decide(&self, job: &Job) -> SchedResult<Decision> {
        if job.shots == 0 {
            return Err(SchedError::InvalidJob {
                job: job.id(),
                reason: "zero shots requested".into(),
            });
        }
        let snapshot = self.registry.snapshot().await?;
        decide_on(&snapshot, job, &self.config)
    }

    /// Map jobs from `input` until it closes, sending each to the queue of
    /// its strategy.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        raw: mpsc::UnboundedSender<Job>,
        aggregation: mpsc::UnboundedSender<Job>,
        partition: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        info!("Resource mapper started");
        while let Some(mut job) = input.recv().await {
            let decision = match self.decide(&job).await {
                Ok(decision) => decision,
                Err(e) => {
                    report(&self.errors, JobFailure::new(job, e));
                    continue;
                }
            };
            if let Err(e) = job.assign(decision.strategy, decision.device.clone()) {
                report(&self.errors, JobFailure::new(job, e));
                continue;
            }
            debug!(
                job = %job.id(),
                strategy = %decision.strategy,
                device = %decision.device.name,
                "Mapped job"
            );

            let (queue, stage) = match decision.strategy {
                Strategy::Raw => (&raw, "raw execution"),
                Strategy::Aggregation => (&aggregation, "aggregator"),
                Strategy::Partition => (&partition, "partitioner"),
            };
            queue.send(job).map_err(|_| SchedError::ChannelClosed(stage))?;
        }
        info!("Resource mapper stopped");
        Ok(())
    }
}

/// Decide for `job` against one snapshot.
pub fn decide_on(
    snapshot: &RegistrySnapshot,
    job: &Job,
    config: &MapperConfig,
) -> SchedResult<Decision> {
    let strategies = job.config.resolve_strategies(config);
    let filter = job.config.resolve_device_filter(config);
    let qubits = job.num_qubits();
    let enabled = |s: Strategy| strategies.contains(&s);

    let decision = match job.config.resolve_policy(config) {
        Policy::HighThroughput => high_throughput(snapshot, filter, qubits, &enabled),
        Policy::LowWaitingTime => low_waiting_time(snapshot, filter, qubits, &enabled),
    };
    decision.ok_or(SchedError::NoSuitableStrategy {
        job: job.id(),
        qubits,
    })
}

fn high_throughput(
    snapshot: &RegistrySnapshot,
    filter: &DeviceFilter,
    qubits: u32,
    enabled: &dyn Fn(Strategy) -> bool,
) -> Option<Decision> {
    if enabled(Strategy::Aggregation) {
        if let Some(device) = fitting(snapshot, filter, qubits.saturating_mul(2)) {
            return Some(Decision::new(Strategy::Aggregation, device));
        }
    }
    if enabled(Strategy::Raw) {
        if let Some(device) = fitting(snapshot, filter, qubits) {
            return Some(Decision::new(Strategy::Raw, device));
        }
    }
    if enabled(Strategy::Partition) {
        return partition_scan(snapshot, filter, qubits);
    }
    None
}

fn low_waiting_time(
    snapshot: &RegistrySnapshot,
    filter: &DeviceFilter,
    qubits: u32,
    enabled: &dyn Fn(Strategy) -> bool,
) -> Option<Decision> {
    let aggregation = enabled(Strategy::Aggregation);
    let raw = enabled(Strategy::Raw);

    match fitting(snapshot, filter, qubits) {
        Some(device) => {
            if aggregation && device.fits(qubits.saturating_mul(2)) {
                return Some(Decision::new(Strategy::Aggregation, device));
            }
            if raw {
                return Some(Decision::new(Strategy::Raw, device));
            }
            if aggregation {
                if let Some(wide) = fitting(snapshot, filter, qubits.saturating_mul(2)) {
                    return Some(Decision::new(Strategy::Aggregation, wide));
                }
            }
            // Some device fits as is; cut only when nothing else may run it.
            if (raw || aggregation) || !enabled(Strategy::Partition) {
                return None;
            }
            partition_scan(snapshot, filter, qubits)
        }
        None if enabled(Strategy::Partition) => partition_scan(snapshot, filter, qubits),
        None => None,
    }
}

fn partition_scan(
    snapshot: &RegistrySnapshot,
    filter: &DeviceFilter,
    qubits: u32,
) -> Option<Decision> {
    (2..qubits)
        .rev()
        .find_map(|width| fitting(snapshot, filter, width))
        .map(|device| Decision::new(Strategy::Partition, device))
}

/// Least busy available device of at least `qubits` that passes `filter`.
fn fitting<'a>(
    snapshot: &'a RegistrySnapshot,
    filter: &DeviceFilter,
    qubits: u32,
) -> Option<&'a DeviceSnapshot> {
    snapshot.least_busy(|d| d.fits(qubits) && filter.matches(d))
}
