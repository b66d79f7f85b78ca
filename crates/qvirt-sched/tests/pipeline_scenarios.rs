//! End-to-end pipeline tests.
//!
//! Jobs run on simulated devices from `qvirt-adapter-sim`. A recording
//! wrapper around the simulator keeps every submission so the tests can
//! check how work was batched.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use qvirt_adapter_sim::SimulatedProvider;
use qvirt_hal::{
    BatchResult, DeviceDescriptor, DeviceProvider, HalError, HalResult, SubmissionHandle,
    SubmissionStatus,
};
use qvirt_ir::{Circuit, QubitId};
use qvirt_sched::{
    AggregatorConfig, Job, JobConfig, JobKind, PartitionConfig, Pipeline, PipelineConfig,
    SchedError, Strategy,
};

/// One `submit` call as seen by the device.
#[derive(Debug, Clone)]
struct Submission {
    device: String,
    experiments: usize,
    widths: Vec<u32>,
    shots: u32,
}

/// Simulated provider that records submissions and can reject some.
struct RecordingProvider {
    inner: SimulatedProvider,
    submissions: Mutex<Vec<Submission>>,
    reject_from: Option<usize>,
}

impl RecordingProvider {
    fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            inner: SimulatedProvider::new(devices).with_seed(7),
            submissions: Mutex::new(Vec::new()),
            reject_from: None,
        }
    }

    /// Reject every submission from the `index`-th on.
    fn rejecting_from(mut self, index: usize) -> Self {
        self.reject_from = Some(index);
        self
    }

    fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeviceProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn list_devices(&self) -> HalResult<Vec<DeviceDescriptor>> {
        self.inner.list_devices().await
    }

    async fn submit(
        &self,
        device: &str,
        circuits: &[Circuit],
        shots: u32,
    ) -> HalResult<SubmissionHandle> {
        let index = {
            let mut submissions = self.submissions.lock().unwrap_or_else(PoisonError::into_inner);
            submissions.push(Submission {
                device: device.to_string(),
                experiments: circuits.len(),
                widths: circuits.iter().map(Circuit::num_qubits).collect(),
                shots,
            });
            submissions.len() - 1
        };
        if self.reject_from.is_some_and(|from| index >= from) {
            return Err(HalError::SubmissionFailed(format!("rejected submission {index}")));
        }
        self.inner.submit(device, circuits, shots).await
    }

    async fn status(&self, handle: &SubmissionHandle) -> HalResult<SubmissionStatus> {
        self.inner.status(handle).await
    }

    async fn result(&self, handle: &SubmissionHandle) -> HalResult<BatchResult> {
        self.inner.result(handle).await
    }

    fn poll_interval(&self) -> Duration {
        self.inner.poll_interval()
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        aggregator: AggregatorConfig {
            timeout_ms: 10_000,
            poll_interval_ms: 100,
        },
        ..PipelineConfig::default()
    }
}

fn x_on_first(qubits: u32) -> Circuit {
    let mut circuit = Circuit::with_size("x_first", qubits, 0);
    circuit.x(QubitId(0)).unwrap();
    circuit.measure_all().unwrap();
    circuit
}

#[tokio::test(start_paused = true)]
async fn test_three_small_jobs_are_aggregated_and_split() {
    let provider = Arc::new(RecordingProvider::new(vec![
        DeviceDescriptor::new("five", 5).simulator(),
    ]));
    let mut pipeline = Pipeline::builder(provider.clone(), config())
        .build()
        .unwrap()
        .start();

    let jobs: Vec<Job> = vec![
        Job::new(Circuit::bell().unwrap(), 1000),
        Job::new(x_on_first(2), 1000),
        Job::new(Circuit::bell().unwrap(), 1000),
    ];
    let ids: Vec<_> = jobs.iter().map(Job::id).collect();
    for job in jobs {
        pipeline.submit(job).unwrap();
    }

    let mut done = Vec::new();
    for _ in 0..3 {
        let job = tokio::time::timeout(Duration::from_secs(60), pipeline.egress.recv())
            .await
            .expect("pipeline stalled")
            .expect("egress closed");
        done.push(job);
    }

    for job in &done {
        assert!(ids.contains(&job.id()));
        assert_eq!(job.kind, JobKind::Submitted);
        assert_eq!(job.strategy(), Some(Strategy::Aggregation));
        let outcome = job.outcome().unwrap();
        assert_eq!(outcome.shots, 1000);
        assert_eq!(outcome.counts.total(), 1000);
        assert_eq!(outcome.memory.len(), 1000);
        assert_eq!(outcome.header.memory_slots, 2);
    }

    // The X job always reads 01; the Bell jobs only ever read 00 or 11.
    let flipped = done.iter().find(|j| j.id() == ids[1]).unwrap();
    assert_eq!(flipped.outcome().unwrap().counts.get("01"), 1000);
    let bell = done.iter().find(|j| j.id() == ids[0]).unwrap();
    let counts = &bell.outcome().unwrap().counts;
    assert_eq!(counts.get("00") + counts.get("11"), 1000);

    // Two of the jobs ran side by side in a 4-qubit circuit.
    let submissions = provider.submissions();
    assert!(submissions.iter().all(|s| s.device == "five"));
    let widths: Vec<u32> = submissions.iter().flat_map(|s| s.widths.clone()).collect();
    assert!(widths.contains(&4));
    assert!(widths.iter().all(|w| *w <= 5));

    let drained = pipeline.shutdown().await;
    assert!(drained.completed.is_empty());
    assert!(drained.failed.is_empty());
}

#[tokio::test]
async fn test_wide_job_is_cut_and_reconstructed() {
    let provider = Arc::new(RecordingProvider::new(vec![
        DeviceDescriptor::new("four", 4).simulator(),
    ]));
    let config = PipelineConfig {
        partition: PartitionConfig {
            max_subcircuit_qubits: 3,
            ..PartitionConfig::default()
        },
        ..config()
    };
    let mut pipeline = Pipeline::builder(provider.clone(), config)
        .build()
        .unwrap()
        .start();

    let job = Job::new(Circuit::ghz(6).unwrap(), 2000);
    let id = pipeline.submit(job).unwrap();

    let done = tokio::time::timeout(Duration::from_secs(60), pipeline.egress.recv())
        .await
        .expect("pipeline stalled")
        .expect("egress closed");
    assert_eq!(done.id(), id);
    assert_eq!(done.strategy(), Some(Strategy::Partition));
    assert!(!pipeline.cut_records().contains(&id));

    let outcome = done.outcome().unwrap();
    assert_eq!(outcome.counts.total(), 2000);
    let (top, _) = outcome.counts.most_frequent().unwrap();
    assert!(top == "000000" || top == "111111", "unexpected top outcome {top}");

    // Every submitted circuit was a subcircuit of at most 3 qubits.
    let submissions = provider.submissions();
    assert!(!submissions.is_empty());
    assert!(submissions.iter().flat_map(|s| &s.widths).all(|w| *w <= 3));

    let drained = pipeline.shutdown().await;
    assert!(drained.completed.is_empty());
    assert!(drained.failed.is_empty());
}

#[tokio::test]
async fn test_large_shot_count_spans_schedule_items() {
    let provider = Arc::new(RecordingProvider::new(vec![
        DeviceDescriptor::new("narrow", 2)
            .simulator()
            .with_limits(8192, 1),
    ]));
    let mut pipeline = Pipeline::builder(provider.clone(), config())
        .build()
        .unwrap()
        .start();

    let job = Job::new(Circuit::bell().unwrap(), 20_000)
        .with_config(JobConfig::default().with_strategies([Strategy::Raw]));
    let id = pipeline.submit(job).unwrap();

    let done = tokio::time::timeout(Duration::from_secs(60), pipeline.egress.recv())
        .await
        .expect("pipeline stalled")
        .expect("egress closed");
    assert_eq!(done.id(), id);
    assert_eq!(done.strategy(), Some(Strategy::Raw));

    let outcome = done.outcome().unwrap();
    assert_eq!(outcome.shots, 20_000);
    assert_eq!(outcome.memory.len(), 20_000);
    assert_eq!(outcome.counts.total(), 20_000);

    let submissions = provider.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions.iter().all(|s| s.experiments == 1));
    let mut shots: Vec<u32> = submissions.iter().map(|s| s.shots).collect();
    shots.sort_unstable();
    assert_eq!(shots, vec![3616, 8192, 8192]);
    assert_eq!(shots.iter().sum::<u32>(), 20_000);

    assert!(pipeline.shutdown().await.stage_error.is_none());
}

#[tokio::test]
async fn test_unplaceable_job_reaches_error_sink() {
    let provider = Arc::new(RecordingProvider::new(vec![
        DeviceDescriptor::new("tiny", 2).simulator(),
    ]));
    let mut pipeline = Pipeline::builder(provider, config())
        .build()
        .unwrap()
        .start();

    let job = Job::new(Circuit::ghz(5).unwrap(), 100)
        .with_config(JobConfig::default().with_strategies([Strategy::Raw, Strategy::Aggregation]));
    let id = pipeline.submit(job).unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(10), pipeline.errors.recv())
        .await
        .expect("no failure reported")
        .expect("errors closed");
    assert_eq!(failure.job_id, id);
    assert!(matches!(failure.error, SchedError::NoSuitableStrategy { .. }));
    assert!(failure.job.is_some());

    assert!(pipeline.shutdown().await.stage_error.is_none());
}

#[tokio::test]
async fn test_failed_submission_fails_aggregated_members() {
    let provider = Arc::new(
        RecordingProvider::new(vec![DeviceDescriptor::new("five", 5).simulator()])
            .rejecting_from(0),
    );
    let config = PipelineConfig {
        aggregator: AggregatorConfig {
            timeout_ms: 50,
            poll_interval_ms: 5,
        },
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::builder(provider, config)
        .build()
        .unwrap()
        .start();

    let a = pipeline.submit(Job::new(Circuit::bell().unwrap(), 100)).unwrap();
    let b = pipeline.submit(Job::new(Circuit::bell().unwrap(), 100)).unwrap();

    let drained = pipeline.shutdown().await;
    assert!(drained.completed.is_empty());

    let mut failed: Vec<_> = drained.failed.iter().map(|f| f.job_id).collect();
    failed.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(failed, expected);
    assert!(drained.failed.iter().all(|f| matches!(
        f.error,
        SchedError::CombinedFailed { .. } | SchedError::SubmissionFailed { .. }
    )));
}
