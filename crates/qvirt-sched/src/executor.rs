//! Execution handler: the scheduling core.
//!
//! One handler runs per device. Each cycle goes through four phases:
//!
//! ```text
//!   Collect ──→ Pack ──→ Submit (worker pool) ──→ Demultiplex
//!     │           │          │                        │
//!     │           │          ├ gate slot per item     ├ strict index order
//!     │           │          └ wait for the provider  └ one pending fragment
//!     │           └ schedule items, emitted when full
//!     └ until batch timeout or slot budget
//! ```
//!
//! Items carry a per-device index. Workers may finish out of order; the
//! demultiplexer buffers results and handles them by index so a job that
//! spans several items is stitched together from consecutive fragments.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, Mutex, PoisonError};

use qvirt_hal::{BatchResult, DEFAULT_MAX_JOBS, DeviceProvider, ExperimentResult, HalError};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::config::ExecutorConfig;
use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::gate::ConcurrencyGate;
use crate::job::{Job, JobId};
use crate::registry::DeviceRegistry;
use crate::schedule::{ScheduleEntry, ScheduleItem, ScheduleLimits, SchedulePacker, extract_fragment};

type JobTable = Arc<Mutex<FxHashMap<JobId, Job>>>;

/// A schedule item and what the device made of it.
struct Completed {
    item: ScheduleItem,
    outcome: SchedResult<BatchResult>,
}

/// Runs every job bound to one device.
pub struct ExecutionHandler {
    device: String,
    provider: Arc<dyn DeviceProvider>,
    registry: Arc<DeviceRegistry>,
    config: ExecutorConfig,
    errors: ErrorSink,
}

impl ExecutionHandler {
    /// Create a handler for `device`.
    pub fn new(
        device: impl Into<String>,
        provider: Arc<dyn DeviceProvider>,
        registry: Arc<DeviceRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            device: device.into(),
            provider,
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

    /// Process jobs from `input` until it closes, sending finished jobs to
    /// `output`.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        output: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        let snapshot = self.registry.device(&self.device).await?;
        let limits = match &snapshot {
            Some(d) => ScheduleLimits::new(d.max_shots, d.max_experiments),
            None => ScheduleLimits::new(
                self.config.default_max_shots,
                self.config.default_max_experiments,
            ),
        };
        let max_jobs = snapshot.as_ref().map_or(DEFAULT_MAX_JOBS, |d| d.max_jobs).max(1);
        let width = snapshot.as_ref().map(|d| d.num_qubits);

        info!(
            device = %self.device,
            max_shots = limits.max_shots,
            max_experiments = limits.max_experiments,
            max_jobs,
            "Execution handler started"
        );

        let gate = Arc::new(
            ConcurrencyGate::new(self.device.clone(), max_jobs)
                .with_backoff(self.config.gate_backoff(), self.config.gate_max_backoff()),
        );
        let table: JobTable = Arc::new(Mutex::new(FxHashMap::default()));

        let (item_tx, item_rx) = mpsc::channel::<ScheduleItem>(max_jobs as usize);
        let (done_tx, done_rx) = mpsc::channel::<Completed>(max_jobs as usize);
        let item_rx = Arc::new(tokio::sync::Mutex::new(item_rx));

        let submitter = Arc::new(Submitter {
            device: self.device.clone(),
            provider: self.provider.clone(),
            registry: self.registry.clone(),
            gate,
            max_shots: limits.max_shots,
        });
        let workers: Vec<JoinHandle<SchedResult<()>>> = (0..max_jobs)
            .map(|_| {
                let submitter = submitter.clone();
                let items = item_rx.clone();
                let done = done_tx.clone();
                tokio::spawn(async move { submitter.work(items, done).await })
            })
            .collect();
        drop(done_tx);

        let demux = Demultiplexer {
            device: self.device.clone(),
            table: table.clone(),
            output,
            errors: self.errors.clone(),
            next_index: 0,
            reorder: BTreeMap::new(),
            pending: None,
            failed: FxHashSet::default(),
        };
        let demux = tokio::spawn(demux.run(done_rx));

        let budget = u64::from(limits.max_experiments) * u64::from(max_jobs);
        let mut next_index = 0;
        let mut outcome = Ok(());

        while let Some(batch) = self.collect(&mut input, limits, budget).await {
            let mut packer = SchedulePacker::new(limits, next_index);
            let mut items = Vec::new();
            {
                let mut jobs = table.lock().unwrap_or_else(PoisonError::into_inner);
                for job in batch {
                    if let Some(reason) = Self::reject_reason(&job, width) {
                        let id = job.id();
                        report(&self.errors, JobFailure::new(job, SchedError::InvalidJob { job: id, reason }));
                        continue;
                    }
                    items.extend(packer.push(job.id(), &job.circuit, job.shots));
                    jobs.insert(job.id(), job);
                }
            }
            items.extend(packer.finish());
            next_index = packer.next_index();

            debug!(device = %self.device, items = items.len(), "Packed schedule items");
            for item in items {
                if item_tx.send(item).await.is_err() {
                    outcome = Err(SchedError::ChannelClosed("submission workers"));
                    break;
                }
            }
            if outcome.is_err() {
                break;
            }
        }

        drop(item_tx);
        for worker in workers {
            let result = join_stage("submission worker", worker).await;
            if outcome.is_ok() {
                outcome = result;
            }
        }
        let result = join_stage("demultiplexer", demux).await;
        if outcome.is_ok() {
            outcome = result;
        }

        info!(device = %self.device, "Execution handler stopped");
        outcome
    }

    /// Wait for the first job, then keep collecting until the batch timeout
    /// passes or the slot budget is used up. `None` once the input closes.
    async fn collect(
        &self,
        input: &mut mpsc::UnboundedReceiver<Job>,
        limits: ScheduleLimits,
        budget: u64,
    ) -> Option<Vec<Job>> {
        let first = input.recv().await?;
        let mut slots = u64::from(limits.repetitions(first.shots));
        let mut batch = vec![first];
        let deadline = Instant::now() + self.config.batch_timeout();

        while slots < budget {
            match tokio::time::timeout_at(deadline, input.recv()).await {
                Ok(Some(job)) => {
                    slots += u64::from(limits.repetitions(job.shots));
                    batch.push(job);
                }
                Ok(None) | Err(_) => break,
            }
        }
        debug!(device = %self.device, jobs = batch.len(), slots, "Collected batch");
        Some(batch)
    }

    fn reject_reason(job: &Job, width: Option<u32>) -> Option<String> {
        if job.shots == 0 {
            return Some("zero shots requested".into());
        }
        match width {
            Some(width) if job.num_qubits() > width => Some(
                HalError::CircuitTooLarge {
                    circuit: job.circuit.name().to_string(),
                    device: job.device_name().unwrap_or_default().to_string(),
                    qubits: job.num_qubits(),
                    max: width,
                }
                .to_string(),
            ),
            _ => None,
        }
    }
}

/// Shared state of the submission worker pool.
struct Submitter {
    device: String,
    provider: Arc<dyn DeviceProvider>,
    registry: Arc<DeviceRegistry>,
    gate: Arc<ConcurrencyGate>,
    max_shots: u32,
}

impl Submitter {
    async fn work(
        &self,
        items: Arc<tokio::sync::Mutex<mpsc::Receiver<ScheduleItem>>>,
        done: mpsc::Sender<Completed>,
    ) -> SchedResult<()> {
        loop {
            let item = { items.lock().await.recv().await };
            let Some(item) = item else {
                return Ok(());
            };
            let outcome = self.submit(&item).await;
            done.send(Completed { item, outcome })
                .await
                .map_err(|_| SchedError::ChannelClosed("demultiplexer"))?;
        }
    }

    #[instrument(skip(self, item), fields(device = %self.device, item = item.index))]
    async fn submit(&self, item: &ScheduleItem) -> SchedResult<BatchResult> {
        let circuits = item.circuits();
        let shots = item.submission_shots(self.max_shots);

        let _permit = self.gate.acquire(Some(&self.registry)).await;
        info!(
            experiments = circuits.len(),
            shots,
            jobs = item.entries.len(),
            "Submitting schedule item"
        );
        let handle = self.provider.submit(&self.device, &circuits, shots).await?;
        let result = self.provider.wait(&handle).await?;

        if result.experiments.len() != circuits.len() {
            return Err(SchedError::SubmissionFailed {
                device: self.device.clone(),
                message: format!(
                    "{} experiments returned for {} circuits",
                    result.experiments.len(),
                    circuits.len()
                ),
            });
        }
        debug!(submission = %handle.id, "Schedule item completed");
        Ok(result)
    }
}

/// Turns completed items back into per-job outcomes, strictly in index
/// order.
struct Demultiplexer {
    device: String,
    table: JobTable,
    output: mpsc::UnboundedSender<Job>,
    errors: ErrorSink,
    next_index: u64,
    reorder: BTreeMap<u64, Completed>,
    pending: Option<(JobId, ExperimentResult)>,
    /// Jobs failed mid-span whose later entries must be skipped.
    failed: FxHashSet<JobId>,
}

impl Demultiplexer {
    async fn run(mut self, mut done: mpsc::Receiver<Completed>) -> SchedResult<()> {
        while let Some(completed) = done.recv().await {
            self.reorder.insert(completed.item.index, completed);
            while let Some(next) = self.reorder.remove(&self.next_index) {
                self.next_index += 1;
                self.process(next)?;
            }
        }

        for (index, completed) in std::mem::take(&mut self.reorder) {
            error!(device = %self.device, index, next = self.next_index, "Schedule item never reached in order");
            for entry in &completed.item.entries {
                self.fail_entry(
                    entry,
                    SchedError::FragmentMismatch {
                        job: entry.job_id,
                        reason: format!("item {} is missing", self.next_index),
                    },
                );
            }
        }
        if let Some((id, _)) = self.pending.take() {
            self.fail_id(
                id,
                SchedError::FragmentMismatch {
                    job: id,
                    reason: "input ended mid-job".into(),
                },
            );
        }
        Ok(())
    }

    fn process(&mut self, completed: Completed) -> SchedResult<()> {
        let Completed { item, outcome } = completed;

        let batch = match outcome {
            Ok(batch) => batch,
            Err(e) => {
                let message = e.to_string();
                error!(device = %self.device, index = item.index, "Schedule item failed: {}", message);
                for entry in &item.entries {
                    self.fail_entry(
                        entry,
                        SchedError::SubmissionFailed {
                            device: self.device.clone(),
                            message: message.clone(),
                        },
                    );
                }
                return Ok(());
            }
        };

        let mut cursor = 0usize;
        for entry in &item.entries {
            let end = cursor + entry.repetitions as usize;
            let slots = batch.experiments.get(cursor..end);
            cursor = end;

            if self.failed.contains(&entry.job_id) {
                if entry.complete {
                    self.failed.remove(&entry.job_id);
                }
                continue;
            }

            let stitched = match slots {
                Some(slots) => extract_fragment(entry, slots).and_then(|f| self.stitch(entry, f)),
                None => Err(SchedError::FragmentMismatch {
                    job: entry.job_id,
                    reason: format!("slots {}..{end} missing from result", end - entry.repetitions as usize),
                }),
            };
            match stitched {
                Ok(Some(outcome)) => self.finish(entry.job_id, outcome)?,
                Ok(None) => {}
                Err(e) => self.fail_entry(entry, e),
            }
        }
        Ok(())
    }

    /// Join `fragment` with the pending one. Returns the job's outcome once
    /// its last entry has been seen.
    fn stitch(
        &mut self,
        entry: &ScheduleEntry,
        mut fragment: ExperimentResult,
    ) -> SchedResult<Option<ExperimentResult>> {
        if entry.carried_in {
            match self.pending.take() {
                Some((id, mut previous)) if id == entry.job_id => {
                    previous.append(fragment);
                    fragment = previous;
                }
                Some((id, _)) => {
                    self.fail_id(
                        id,
                        SchedError::FragmentMismatch {
                            job: id,
                            reason: format!("abandoned when {} continued", entry.job_id),
                        },
                    );
                    return Err(SchedError::FragmentMismatch {
                        job: entry.job_id,
                        reason: format!("pending fragment belongs to {id}"),
                    });
                }
                None => {
                    return Err(SchedError::FragmentMismatch {
                        job: entry.job_id,
                        reason: "no pending fragment to continue".into(),
                    });
                }
            }
        } else if let Some((id, _)) = self.pending.take() {
            self.fail_id(
                id,
                SchedError::FragmentMismatch {
                    job: id,
                    reason: "next item did not continue the job".into(),
                },
            );
        }

        if !entry.complete {
            self.pending = Some((entry.job_id, fragment));
            return Ok(None);
        }
        if fragment.shots != entry.shots_total {
            return Err(SchedError::FragmentMismatch {
                job: entry.job_id,
                reason: format!("{} shots stitched, {} requested", fragment.shots, entry.shots_total),
            });
        }
        Ok(Some(fragment))
    }

    fn finish(&mut self, id: JobId, outcome: ExperimentResult) -> SchedResult<()> {
        let job = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match job {
            Some(mut job) => {
                job.set_outcome(outcome);
                debug!(job = %id, device = %self.device, "Job executed");
                self.output
                    .send(job)
                    .map_err(|_| SchedError::ChannelClosed("execution results"))
            }
            None => {
                report(&self.errors, JobFailure::without_job(id, SchedError::UnknownJob(id)));
                Ok(())
            }
        }
    }

    fn fail_entry(&mut self, entry: &ScheduleEntry, error: SchedError) {
        if self.failed.contains(&entry.job_id) {
            if entry.complete {
                self.failed.remove(&entry.job_id);
            }
            return;
        }
        if self.pending.as_ref().is_some_and(|(id, _)| *id == entry.job_id) {
            self.pending = None;
        }
        if !entry.complete {
            self.failed.insert(entry.job_id);
        }
        self.fail_id(entry.job_id, error);
    }

    fn fail_id(&mut self, id: JobId, error: SchedError) {
        let job = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let failure = match job {
            Some(job) => JobFailure::new(job, error),
            None => JobFailure::without_job(id, error),
        };
        report(&self.errors, failure);
    }
}

/// Starts one [`ExecutionHandler`] per device on first use and forwards
/// each job to the handler of its device.
pub struct ExecutionDispatcher {
    provider: Arc<dyn DeviceProvider>,
    registry: Arc<DeviceRegistry>,
    config: ExecutorConfig,
    errors: ErrorSink,
}

impl ExecutionDispatcher {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        registry: Arc<DeviceRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
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

    /// Route jobs from `input` until it closes, then wait for every handler
    /// to drain.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        output: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        type Running = (mpsc::UnboundedSender<Job>, JoinHandle<SchedResult<()>>);
        let mut handlers: BTreeMap<String, Running> = BTreeMap::new();

        while let Some(job) = input.recv().await {
            let Some(device) = job.device_name().map(str::to_owned) else {
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
                continue;
            };

            let (sender, _) = match handlers.entry(device) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let handler = ExecutionHandler::new(
                        entry.key().clone(),
                        self.provider.clone(),
                        self.registry.clone(),
                        self.config.clone(),
                    )
                    .with_errors(self.errors.clone());
                    let handle = tokio::spawn(handler.run(rx, output.clone()));
                    entry.insert((tx, handle))
                }
            };

            if let Err(mpsc::error::SendError(job)) = sender.send(job) {
                let device = job.device_name().unwrap_or_default().to_string();
                report(
                    &self.errors,
                    JobFailure::new(
                        job,
                        SchedError::StageFailed {
                            stage: "execution handler",
                            message: format!("handler for {device} has stopped"),
                        },
                    ),
                );
            }
        }

        let mut outcome = Ok(());
        for (device, (sender, handle)) in handlers {
            drop(sender);
            if let Err(e) = join_stage("execution handler", handle).await {
                error!(device = %device, "Execution handler failed: {}", e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

/// Await a stage task, turning panics into [`SchedError::StageFailed`].
pub(crate) async fn join_stage(
    stage: &'static str,
    handle: JoinHandle<SchedResult<()>>,
) -> SchedResult<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(SchedError::StageFailed {
            stage,
            message: e.to_string(),
        }),
    }
}
