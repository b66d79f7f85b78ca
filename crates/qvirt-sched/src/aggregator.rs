//! Aggregator: runs several narrow jobs side by side in one wide circuit.
//!
//! Jobs are grouped by target device. A group is flushed once it holds two
//! or more jobs, or once its oldest job has waited for the aggregation
//! timeout. Flushing packs jobs first-fit into bins no wider than the
//! device; every bin of two or more jobs becomes one combined job. A lone
//! job waits for a partner until the timeout and is then forwarded as is.
//!
//! ```text
//!   5-qubit device, three 2-qubit jobs:
//!
//!   [j1 j2] ──→ combined (4 qubits, record kept)
//!   [j3]    ──→ waits, forwarded unchanged at timeout
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use qvirt_ir::Circuit;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AggregatorConfig;
use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::job::{DeviceRef, Job};
use crate::store::{AggregationRecord, AggregationRecords};

struct Group {
    device: DeviceRef,
    jobs: Vec<(Instant, Job)>,
}

impl Group {
    fn oldest(&self) -> Option<Instant> {
        self.jobs.iter().map(|(at, _)| *at).min()
    }
}

/// Combines jobs bound for the same device.
pub struct Aggregator {
    config: AggregatorConfig,
    records: Arc<AggregationRecords>,
    errors: ErrorSink,
}

impl Aggregator {
    /// Create an aggregator writing records to `records`.
    pub fn new(config: AggregatorConfig, records: Arc<AggregationRecords>) -> Self {
        Self {
            config,
            records,
            errors: None,
        }
    }

    /// Report failed jobs to `sink`.
    pub fn with_errors(mut self, sink: ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    /// Aggregate jobs from `input` until it closes. Remaining groups are
    /// flushed on close.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        output: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        info!("Aggregator started");
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        let mut open = true;

        while open {
            match tokio::time::timeout(self.config.poll_interval(), input.recv()).await {
                Ok(Some(job)) => {
                    self.enqueue(&mut groups, job);
                    while let Ok(job) = input.try_recv() {
                        self.enqueue(&mut groups, job);
                    }
                }
                Ok(None) => open = false,
                Err(_) => {}
            }
            self.flush(&mut groups, !open, &output)?;
        }

        info!("Aggregator stopped");
        Ok(())
    }

    fn enqueue(&self, groups: &mut BTreeMap<String, Group>, job: Job) {
        let Some(device) = job.device.clone() else {
            let id = job.id();
            report(
                &self.errors,
                JobFailure::new(
                    job,
                    SchedError::InvalidJob {
                        job: id,
                        reason: "no target device".into(),
                    },
                ),
            );
            return;
        };
        debug!(job = %job.id(), device = %device.name, "Queued for aggregation");
        groups
            .entry(device.name.clone())
            .or_insert_with(|| Group {
                device,
                jobs: Vec::new(),
            })
            .jobs
            .push((Instant::now(), job));
    }

    fn flush(
        &self,
        groups: &mut BTreeMap<String, Group>,
        force: bool,
        output: &mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        let now = Instant::now();
        let timeout = self.config.timeout();

        for group in groups.values_mut() {
            let timed_out = force
                || group
                    .oldest()
                    .is_some_and(|oldest| now.duration_since(oldest) >= timeout);
            if group.jobs.len() < 2 && !timed_out {
                continue;
            }

            let bins = pack_bins(std::mem::take(&mut group.jobs), group.device.num_qubits);
            for bin in bins {
                if bin.len() >= 2 {
                    for job in self.combine(&group.device, bin) {
                        send(output, job)?;
                    }
                } else if timed_out {
                    for (_, job) in bin {
                        debug!(job = %job.id(), "Forwarding job without partner");
                        send(output, job)?;
                    }
                } else {
                    group.jobs.extend(bin);
                }
            }
        }

        groups.retain(|_, group| !group.jobs.is_empty());
        Ok(())
    }

    /// Compose a bin into one job and record its members. Falls back to the
    /// members themselves if the circuits cannot be composed.
    fn combine(&self, device: &DeviceRef, bin: Vec<(Instant, Job)>) -> Vec<Job> {
        let jobs: Vec<Job> = bin.into_iter().map(|(_, job)| job).collect();
        let circuits: Vec<&Circuit> = jobs.iter().map(|job| &job.circuit).collect();
        let name = format!("aggregate_{}", jobs.len());

        let (circuit, layouts) = match Circuit::combine(name, &circuits) {
            Ok(combined) => combined,
            Err(e) => {
                warn!(device = %device.name, "Cannot aggregate {} jobs: {}", jobs.len(), e);
                return jobs;
            }
        };

        let shots = jobs.iter().map(|job| job.shots).max().unwrap_or(0);
        let mut combined = Job::combined(circuit, shots, device.clone());
        combined
            .circuit
            .set_name(format!("aggregate_{}", combined.id()));

        info!(
            job = %combined.id(),
            device = %device.name,
            members = jobs.len(),
            qubits = combined.num_qubits(),
            shots,
            "Aggregated jobs"
        );
        let id = combined.id();
        self.records.insert(id, AggregationRecord { jobs, layouts });
        vec![combined]
    }
}

fn send(output: &mpsc::UnboundedSender<Job>, job: Job) -> SchedResult<()> {
    output
        .send(job)
        .map_err(|_| SchedError::ChannelClosed("aggregator output"))
}

/// First-fit packing in arrival order; no bin exceeds `width` qubits unless
/// a single job alone does.
fn pack_bins(jobs: Vec<(Instant, Job)>, width: u32) -> Vec<Vec<(Instant, Job)>> {
    let mut bins: Vec<(u32, Vec<(Instant, Job)>)> = Vec::new();
    for entry in jobs {
        let qubits = entry.1.num_qubits();
        match bins.iter_mut().find(|(used, _)| *used + qubits <= width) {
            Some((used, bin)) => {
                *used += qubits;
                bin.push(entry);
            }
            None => bins.push((qubits, vec![entry])),
        }
    }
    bins.into_iter().map(|(_, bin)| bin).collect()
}
