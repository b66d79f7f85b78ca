//! Partition result writer and processor.
//!
//! The writer collects sub-job distributions per parent. When a parent has
//! one distribution for every sub-job in its cut record, the writer hands
//! the whole set to the processor, which reconstructs the parent's outcome
//! and consumes the record.
//!
//! ```text
//!   sub-job ──→ Writer ──(all arrived)──→ Processor ──→ parent with outcome
//!                 │                           │
//!                 └ accumulates by parent     └ takes CutRecord once
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use qvirt_cut::{CircuitCutter, Distribution, InstanceOutcomes};
use qvirt_hal::{Counts, ExperimentHeader, ExperimentResult};
use qvirt_ir::{ClbitId, QubitId};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::job::{Job, JobId, JobKind};
use crate::store::CutRecords;

/// All sub-results of one parent, ready for reconstruction.
#[derive(Debug)]
pub struct ReadyParent {
    pub parent: JobId,
    pub outcomes: InstanceOutcomes,
}

/// Accumulates sub-job distributions by parent.
pub struct PartitionResultWriter {
    records: Arc<CutRecords>,
    accumulated: FxHashMap<JobId, InstanceOutcomes>,
    errors: ErrorSink,
}

impl PartitionResultWriter {
    pub fn new(records: Arc<CutRecords>) -> Self {
        Self {
            records,
            accumulated: FxHashMap::default(),
            errors: None,
        }
    }

    /// Report failed jobs to `sink`.
    pub fn with_errors(mut self, sink: ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    /// Store one sub-job's distribution. Returns the parent's full set once
    /// the last expected sub-result has arrived.
    pub fn write(&mut self, sub: &Job) -> SchedResult<Option<ReadyParent>> {
        let JobKind::SubCircuit { parent, key } = &sub.kind else {
            return Err(SchedError::InvalidJob {
                job: sub.id(),
                reason: "not a sub-circuit job".into(),
            });
        };
        let probabilities = sub
            .probabilities()
            .cloned()
            .ok_or(SchedError::MissingOutcome(sub.id()))?;
        let Some(expected) = self.records.with(parent, |r| r.expected()) else {
            self.accumulated.remove(parent);
            return Err(SchedError::MissingRecord(*parent));
        };

        let outcomes = self.accumulated.entry(*parent).or_default();
        outcomes.insert(*key, probabilities);
        debug!(parent = %parent, received = outcomes.len(), expected, "Stored sub-result");

        if outcomes.len() < expected {
            return Ok(None);
        }
        Ok(self
            .accumulated
            .remove(parent)
            .map(|outcomes| ReadyParent {
                parent: *parent,
                outcomes,
            }))
    }

    /// Parents with some but not all sub-results.
    pub fn pending_parents(&self) -> usize {
        self.accumulated.len()
    }

    /// Store sub-jobs from `input` until it closes, sending complete parents
    /// to `ready`.
    pub async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<Job>,
        ready: mpsc::UnboundedSender<ReadyParent>,
    ) -> SchedResult<()> {
        info!("Partition result writer started");
        while let Some(sub) = input.recv().await {
            match self.write(&sub) {
                Ok(Some(parent)) => ready
                    .send(parent)
                    .map_err(|_| SchedError::ChannelClosed("partition processor"))?,
                Ok(None) => {}
                // The parent already failed through another sub-job.
                Err(SchedError::MissingRecord(parent)) => {
                    debug!(parent = %parent, sub = %sub.id(), "Dropping sub-result of untracked parent");
                }
                Err(e) => report(&self.errors, JobFailure::new(sub, e)),
            }
        }
        if self.pending_parents() > 0 {
            warn!(parents = self.pending_parents(), "Writer stopped with incomplete parents");
        }
        info!("Partition result writer stopped");
        Ok(())
    }
}

/// Reconstructs parents from their complete sub-result sets.
pub struct PartitionProcessor {
    cutter: Arc<dyn CircuitCutter>,
    records: Arc<CutRecords>,
    errors: ErrorSink,
}

impl PartitionProcessor {
    pub fn new(cutter: Arc<dyn CircuitCutter>, records: Arc<CutRecords>) -> Self {
        Self {
            cutter,
            records,
            errors: None,
        }
    }

    /// Report failed jobs to `sink`.
    pub fn with_errors(mut self, sink: ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    /// Reconstruct one parent and consume its record.
    #[allow(clippy::result_large_err)]
    pub fn process(&self, ready: ReadyParent) -> Result<Job, JobFailure> {
        let ReadyParent { parent, outcomes } = ready;
        let record = self.records.take(&parent).ok_or_else(|| {
            JobFailure::without_job(parent, SchedError::MissingRecord(parent))
        })?;

        if outcomes.len() != record.expected() {
            let error = SchedError::SliceCountMismatch {
                job: parent,
                expected: record.expected(),
                got: outcomes.len(),
            };
            return Err(JobFailure::new(record.parent, error));
        }

        let distribution = match self.cutter.reconstruct(&record.solution, &outcomes) {
            Ok(distribution) => distribution,
            Err(e) => return Err(JobFailure::new(record.parent, e.into())),
        };

        let mut job = record.parent;
        let outcome = reconstructed_outcome(&job, &record.measured, &distribution);
        info!(
            job = %parent,
            sub_jobs = outcomes.len(),
            outcomes = outcome.counts.len(),
            "Reconstructed partitioned job"
        );
        job.set_outcome(outcome);
        Ok(job)
    }

    /// Reconstruct parents from `input` until it closes.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<ReadyParent>,
        output: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        info!("Partition processor started");
        while let Some(ready) = input.recv().await {
            match self.process(ready) {
                Ok(job) => output
                    .send(job)
                    .map_err(|_| SchedError::ChannelClosed("partition processor output"))?,
                Err(failure) => report(&self.errors, failure),
            }
        }
        info!("Partition processor stopped");
        Ok(())
    }
}

/// Map a distribution over all parent qubits onto the parent's classical
/// bits and turn it into counts for the parent's shots.
fn reconstructed_outcome(
    job: &Job,
    measured: &[(QubitId, ClbitId)],
    distribution: &Distribution,
) -> ExperimentResult {
    let marginal: BTreeMap<String, f64> = if measured.is_empty() {
        distribution.clone()
    } else {
        let width = job.circuit.num_clbits() as usize;
        let mut marginal = BTreeMap::new();
        for (bits, p) in distribution {
            let qubit_bits = bits.as_bytes();
            let mut clbits = vec![b'0'; width];
            for (qubit, clbit) in measured {
                let q = qubit.0 as usize;
                let c = clbit.0 as usize;
                if q < qubit_bits.len() && c < width {
                    clbits[width - 1 - c] = qubit_bits[qubit_bits.len() - 1 - q];
                }
            }
            let key = String::from_utf8_lossy(&clbits).into_owned();
            *marginal.entry(key).or_insert(0.0) += p;
        }
        marginal
    };

    ExperimentResult {
        header: ExperimentHeader::from_circuit(&job.circuit),
        shots: job.shots,
        counts: counts_from_distribution(&marginal, job.shots),
        memory: Vec::new(),
    }
}

/// Integer counts summing to exactly `shots`, by largest remainder.
/// Negative weights are ignored.
pub fn counts_from_distribution(distribution: &BTreeMap<String, f64>, shots: u32) -> Counts {
    let total: f64 = distribution.values().filter(|p| **p > 0.0).sum();
    if total <= 0.0 || shots == 0 {
        return Counts::new();
    }

    let mut shares: Vec<(&String, u64, f64)> = distribution
        .iter()
        .filter(|(_, p)| **p > 0.0)
        .map(|(bits, p)| {
            let exact = p / total * f64::from(shots);
            let floor = exact.floor();
            (bits, floor as u64, exact - floor)
        })
        .collect();

    let assigned: u64 = shares.iter().map(|(_, n, _)| n).sum();
    let mut left = u64::from(shots).saturating_sub(assigned);

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|a, b| {
        shares[*b]
            .2
            .partial_cmp(&shares[*a].2)
            .unwrap_or(Ordering::Equal)
    });
    for i in order {
        if left == 0 {
            break;
        }
        shares[i].1 += 1;
        left -= 1;
    }

    Counts::from_pairs(
        shares
            .into_iter()
            .filter(|(_, n, _)| *n > 0)
            .map(|(bits, n, _)| (bits.clone(), n)),
    )
}
