//! Partitioner: cuts a job that no device can run whole.
//!
//! ```text
//!   job ──→ remove_measurements ──→ find_cuts ──→ build_instances
//!                                                      │
//!          CutRecord (parent id) ←── record ───────────┤
//!                                                      └──→ one sub-job per instance
//! ```

use std::sync::Arc;

use qvirt_cut::{CircuitCutter, CutError, MAX_RECONSTRUCT_QUBITS};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::PartitionConfig;
use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::job::Job;
use crate::store::{CutRecord, CutRecords};

/// Cuts jobs into sub-jobs and records how to put them back together.
pub struct Partitioner {
    cutter: Arc<dyn CircuitCutter>,
    config: PartitionConfig,
    records: Arc<CutRecords>,
    errors: ErrorSink,
}

impl Partitioner {
    pub fn new(
        cutter: Arc<dyn CircuitCutter>,
        config: PartitionConfig,
        records: Arc<CutRecords>,
    ) -> Self {
        Self {
            cutter,
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

    /// Cut `job` and return its sub-jobs.
    ///
    /// Limits come from the job's overrides, then the partitioner's defaults,
    /// and never exceed the width of the job's device. A job too wide to be
    /// reconstructed is rejected before anything is recorded.
    pub fn cut(&self, job: &Job) -> SchedResult<Vec<Job>> {
        job.circuit.validate()?;
        let width = job.num_qubits();
        if width > MAX_RECONSTRUCT_QUBITS {
            return Err(CutError::TooWide(width).into());
        }

        let device_qubits = job.device.as_ref().map_or(u32::MAX, |d| d.num_qubits);
        let constraints = job.config.resolve_cut_constraints(&self.config, device_qubits);
        let body = job.circuit.remove_measurements();

        let solution = self
            .cutter
            .find_cuts(&body, &constraints)?
            .ok_or(SchedError::NoFeasibleCut {
                job: job.id(),
                max_subcircuit_qubits: constraints.max_subcircuit_qubits,
            })?;
        let instances = self.cutter.build_instances(&solution, job.shots)?;

        let sub_jobs: Vec<Job> = instances
            .into_iter()
            .map(|instance| Job::sub_circuit(job, instance.key, instance.circuit, instance.shots))
            .collect();

        info!(
            job = %job.id(),
            subcircuits = solution.subcircuits.len(),
            cuts = solution.num_cuts(),
            sub_jobs = sub_jobs.len(),
            "Partitioned job"
        );

        let record = CutRecord {
            parent: job.clone(),
            solution,
            sub_jobs: sub_jobs.iter().map(Job::id).collect(),
            measured: job.circuit.measured_qubits(),
        };
        if !self.records.insert(job.id(), record) {
            return Err(SchedError::InvalidJob {
                job: job.id(),
                reason: "already partitioned".into(),
            });
        }
        Ok(sub_jobs)
    }

    /// Cut jobs from `input` until it closes.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        output: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        info!("Partitioner started");
        while let Some(job) = input.recv().await {
            match self.cut(&job) {
                Ok(sub_jobs) => {
                    debug!(job = %job.id(), "Forwarding {} sub-jobs", sub_jobs.len());
                    for sub in sub_jobs {
                        output
                            .send(sub)
                            .map_err(|_| SchedError::ChannelClosed("partitioner output"))?;
                    }
                }
                Err(e) => report(&self.errors, JobFailure::new(job, e)),
            }
        }
        info!("Partitioner stopped");
        Ok(())
    }
}
