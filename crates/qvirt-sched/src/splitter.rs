//! Aggregation splitter: turns one combined result back into per-job
//! results.
//!
//! Each original job owns a contiguous range of the combined circuit's
//! classical bits. Its outcome is that range of every shot record, cut to
//! the job's own shot count, with the job's original register names.

use std::sync::Arc;

use qvirt_hal::{ExperimentHeader, ExperimentResult, slice_bits};
use qvirt_ir::RegisterLayout;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::job::{Job, JobKind};
use crate::partition_result::counts_from_distribution;
use crate::store::AggregationRecords;

/// Splits combined jobs using their aggregation records.
pub struct AggregationSplitter {
    records: Arc<AggregationRecords>,
    errors: ErrorSink,
}

impl AggregationSplitter {
    pub fn new(records: Arc<AggregationRecords>) -> Self {
        Self {
            records,
            errors: None,
        }
    }

    /// Report failed jobs to `sink`.
    pub fn with_errors(mut self, sink: ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    /// Split a completed job.
    ///
    /// A job that was never combined is returned as is. A combined job
    /// consumes its record; a missing record means the job was lost or
    /// duplicated and is an error.
    ///
    /// On any other error the record stays in place, so its members can
    /// still be failed individually.
    pub fn split(&self, mut job: Job) -> SchedResult<Vec<Job>> {
        if job.kind != JobKind::Combined {
            return Ok(vec![job]);
        }
        let id = job.id();
        let (expected, got) = self
            .records
            .with(&id, |r| (r.jobs.len(), r.layouts.len()))
            .ok_or(SchedError::MissingRecord(id))?;
        if got != expected {
            return Err(SchedError::SliceCountMismatch {
                job: id,
                expected,
                got,
            });
        }
        let combined = job.take_outcome().ok_or(SchedError::MissingOutcome(id))?;
        let record = self.records.take(&id).ok_or(SchedError::MissingRecord(id))?;

        let split: Vec<Job> = record
            .jobs
            .into_iter()
            .zip(&record.layouts)
            .map(|(mut original, layout)| {
                let outcome = slice_outcome(&combined, &original, layout);
                original.set_outcome(outcome);
                original
            })
            .collect();
        debug!(job = %id, parts = split.len(), "Split combined job");
        Ok(split)
    }

    /// Split jobs from `input` until it closes.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        output: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        info!("Aggregation splitter started");
        while let Some(job) = input.recv().await {
            let id = job.id();
            match self.split(job) {
                Ok(jobs) => {
                    for job in jobs {
                        output
                            .send(job)
                            .map_err(|_| SchedError::ChannelClosed("splitter output"))?;
                    }
                }
                Err(e) => report(&self.errors, JobFailure::without_job(id, e)),
            }
        }
        info!("Aggregation splitter stopped");
        Ok(())
    }
}

/// One member's share of a combined outcome.
fn slice_outcome(
    combined: &ExperimentResult,
    original: &Job,
    layout: &RegisterLayout,
) -> ExperimentResult {
    let header = ExperimentHeader {
        name: original.circuit.name().to_string(),
        qreg_sizes: layout.qregs.iter().map(|r| (r.name.clone(), r.size)).collect(),
        creg_sizes: layout.cregs.iter().map(|r| (r.name.clone(), r.size)).collect(),
        memory_slots: layout.num_clbits,
        num_qubits: layout.num_qubits,
    };

    if !combined.memory.is_empty() {
        let memory = combined
            .memory
            .iter()
            .take(original.shots as usize)
            .map(|bits| slice_bits(bits, layout.clbit_offset, layout.num_clbits))
            .collect();
        return ExperimentResult::from_memory(header, memory);
    }

    // Without per-shot records the marginal is rescaled to the member's shots.
    let marginal = combined.counts.marginal(layout.clbit_offset, layout.num_clbits);
    let shots = original.shots.min(combined.shots);
    ExperimentResult {
        header,
        shots,
        counts: counts_from_distribution(&marginal.probabilities(), shots),
        memory: Vec::new(),
    }
}
