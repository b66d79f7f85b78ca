//! Pipeline assembly.
//!
//! [`Pipeline::start`] spawns every stage as its own task and wires them
//! together with channels:
//!
//! ```text
//!   ingress ─→ mapper ─┬─ raw ─────────────────────┐
//!                      ├─ aggregation ─→ aggregator ┼─→ dispatcher ─→ router ─┬─→ egress
//!                      └─ partition ──→ partitioner ┘   (handler per device)  ├─→ splitter ──→ egress
//!                                                                             └─→ writer ─→ processor ─→ egress
//!
//!   every stage ─→ failure router ─→ errors
//! ```
//!
//! Dropping the ingress sender stops the stages one after another as their
//! inputs close. [`PipelineHandle::shutdown`] does that and waits for them.

use std::sync::Arc;

use futures::future::join_all;
use qvirt_cut::{CircuitCutter, WireCutter};
use qvirt_hal::DeviceProvider;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::config::PipelineConfig;
use crate::error::{JobFailure, SchedError, SchedResult};
use crate::executor::{ExecutionDispatcher, join_stage};
use crate::job::{Job, JobId};
use crate::mapper::ResourceMapper;
use crate::partition_result::{PartitionProcessor, PartitionResultWriter};
use crate::partitioner::Partitioner;
use crate::registry::DeviceRegistry;
use crate::router::{FailureRouter, ResultRouter};
use crate::splitter::AggregationSplitter;
use crate::store::{AggregationRecords, CutRecords};

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    provider: Arc<dyn DeviceProvider>,
    config: PipelineConfig,
    cutter: Option<Arc<dyn CircuitCutter>>,
}

impl PipelineBuilder {
    /// Use a different cut finder. Defaults to [`WireCutter`].
    pub fn cutter(mut self, cutter: Arc<dyn CircuitCutter>) -> Self {
        self.cutter = Some(cutter);
        self
    }

    /// Validate the configuration and build the pipeline.
    pub fn build(self) -> SchedResult<Pipeline> {
        self.config.validate()?;
        let registry = Arc::new(DeviceRegistry::new(
            self.provider.clone(),
            self.config.registry.update_interval(),
        ));
        Ok(Pipeline {
            provider: self.provider,
            config: self.config,
            cutter: self.cutter.unwrap_or_else(|| Arc::new(WireCutter)),
            registry,
        })
    }
}

/// A configured, not yet running pipeline.
pub struct Pipeline {
    provider: Arc<dyn DeviceProvider>,
    config: PipelineConfig,
    cutter: Arc<dyn CircuitCutter>,
    registry: Arc<DeviceRegistry>,
}

impl Pipeline {
    pub fn builder(provider: Arc<dyn DeviceProvider>, config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            provider,
            config,
            cutter: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Spawn every stage. Must be called from within a tokio runtime.
    pub fn start(self) -> PipelineHandle {
        let aggregation_records = Arc::new(AggregationRecords::new());
        let cut_records = Arc::new(CutRecords::new());

        let (ingress, mapper_rx) = mpsc::unbounded_channel();
        let (exec_tx, exec_rx) = mpsc::unbounded_channel();
        let (aggregation_tx, aggregation_rx) = mpsc::unbounded_channel();
        let (partition_tx, partition_rx) = mpsc::unbounded_channel();
        let (routed_tx, routed_rx) = mpsc::unbounded_channel();
        let (splitter_tx, splitter_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (egress_tx, egress) = mpsc::unbounded_channel();
        let (fail_tx, fail_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();

        let sink = || Some(fail_tx.clone());
        let mut tasks: Vec<(&'static str, JoinHandle<SchedResult<()>>)> = Vec::new();

        let mapper = ResourceMapper::new(self.registry.clone(), self.config.mapper.clone())
            .with_errors(sink());
        tasks.push((
            "mapper",
            tokio::spawn(mapper.run(mapper_rx, exec_tx.clone(), aggregation_tx, partition_tx)),
        ));

        let aggregator = Aggregator::new(self.config.aggregator.clone(), aggregation_records.clone())
            .with_errors(sink());
        tasks.push((
            "aggregator",
            tokio::spawn(aggregator.run(aggregation_rx, exec_tx.clone())),
        ));

        let partitioner = Partitioner::new(
            self.cutter.clone(),
            self.config.partition.clone(),
            cut_records.clone(),
        )
        .with_errors(sink());
        tasks.push((
            "partitioner",
            tokio::spawn(partitioner.run(partition_rx, exec_tx)),
        ));

        let dispatcher = ExecutionDispatcher::new(
            self.provider.clone(),
            self.registry.clone(),
            self.config.executor.clone(),
        )
        .with_errors(sink());
        tasks.push(("dispatcher", tokio::spawn(dispatcher.run(exec_rx, routed_tx))));

        let router = ResultRouter::new().with_errors(sink());
        tasks.push((
            "result router",
            tokio::spawn(router.run(routed_rx, egress_tx.clone(), splitter_tx, writer_tx)),
        ));

        let splitter = AggregationSplitter::new(aggregation_records.clone()).with_errors(sink());
        tasks.push((
            "aggregation splitter",
            tokio::spawn(splitter.run(splitter_rx, egress_tx.clone())),
        ));

        let writer = PartitionResultWriter::new(cut_records.clone()).with_errors(sink());
        tasks.push((
            "partition writer",
            tokio::spawn(writer.run(writer_rx, ready_tx)),
        ));

        let processor =
            PartitionProcessor::new(self.cutter.clone(), cut_records.clone()).with_errors(sink());
        tasks.push((
            "partition processor",
            tokio::spawn(processor.run(ready_rx, egress_tx)),
        ));

        drop(fail_tx);
        let failures = FailureRouter::new(aggregation_records.clone(), cut_records.clone());
        tasks.push((
            "failure router",
            tokio::spawn(failures.run(fail_rx, errors_tx)),
        ));

        info!(
            provider = self.provider.name(),
            policy = ?self.config.mapper.policy,
            stages = tasks.len(),
            "Pipeline started"
        );

        PipelineHandle {
            ingress,
            egress,
            errors,
            tasks,
            registry: self.registry,
            aggregation_records,
            cut_records,
        }
    }
}

/// Everything left in the pipeline's outputs after shutdown.
#[derive(Debug, Default)]
pub struct Drained {
    pub completed: Vec<Job>,
    pub failed: Vec<JobFailure>,
    /// First error a stage task exited with.
    pub stage_error: Option<SchedError>,
}

impl Drained {
    fn collect(
        results: Vec<(&'static str, SchedResult<()>)>,
        egress: &mut mpsc::UnboundedReceiver<Job>,
        errors: &mut mpsc::UnboundedReceiver<JobFailure>,
    ) -> Self {
        let mut drained = Drained::default();
        while let Ok(job) = egress.try_recv() {
            drained.completed.push(job);
        }
        while let Ok(failure) = errors.try_recv() {
            drained.failed.push(failure);
        }
        for (stage, result) in results {
            if let Err(e) = result {
                error!(stage, "Stage failed: {}", e);
                drained.stage_error.get_or_insert(e);
            }
        }
        drained
    }
}

/// A running pipeline.
pub struct PipelineHandle {
    /// Jobs to run.
    pub ingress: mpsc::UnboundedSender<Job>,
    /// Finished jobs with their outcomes.
    pub egress: mpsc::UnboundedReceiver<Job>,
    /// Jobs that could not be run.
    pub errors: mpsc::UnboundedReceiver<JobFailure>,
    tasks: Vec<(&'static str, JoinHandle<SchedResult<()>>)>,
    registry: Arc<DeviceRegistry>,
    aggregation_records: Arc<AggregationRecords>,
    cut_records: Arc<CutRecords>,
}

impl PipelineHandle {
    /// Queue a job and return its id.
    pub fn submit(&self, job: Job) -> SchedResult<JobId> {
        let id = job.id();
        self.ingress
            .send(job)
            .map_err(|_| SchedError::ChannelClosed("ingress"))?;
        Ok(id)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Combined jobs whose results have not been split yet.
    pub fn aggregation_records(&self) -> &Arc<AggregationRecords> {
        &self.aggregation_records
    }

    /// Cut jobs whose results have not been reconstructed yet.
    pub fn cut_records(&self) -> &Arc<CutRecords> {
        &self.cut_records
    }

    /// Close the ingress, wait for every stage to drain, and collect what
    /// is left on the egress and error queues.
    ///
    /// A stage that exited with an error does not discard the outputs of
    /// the others; its error lands in [`Drained::stage_error`].
    pub async fn shutdown(self) -> Drained {
        let PipelineHandle {
            ingress,
            mut egress,
            mut errors,
            tasks,
            ..
        } = self;
        drop(ingress);

        let results = join_all(
            tasks
                .into_iter()
                .map(|(stage, handle)| async move { (stage, join_stage(stage, handle).await) }),
        )
        .await;
        let drained = Drained::collect(results, &mut egress, &mut errors);
        info!(
            completed = drained.completed.len(),
            failed = drained.failed.len(),
            stage_error = drained.stage_error.is_some(),
            "Pipeline stopped"
        );
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregatorConfig, PipelineConfig, RegistryConfig};
    use crate::job::Strategy;
    use crate::testing::StaticProvider;
    use qvirt_hal::DeviceDescriptor;
    use qvirt_ir::Circuit;

    fn provider() -> Arc<StaticProvider> {
        Arc::new(StaticProvider::new(vec![DeviceDescriptor::new("dev", 5)]))
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = PipelineConfig {
            registry: RegistryConfig {
                update_interval_secs: 0,
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(
            Pipeline::builder(provider(), config).build(),
            Err(SchedError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_pipeline_shuts_down() {
        let handle = Pipeline::builder(provider(), PipelineConfig::default())
            .build()
            .unwrap()
            .start();
        let drained = handle.shutdown().await;
        assert!(drained.completed.is_empty());
        assert!(drained.failed.is_empty());
        assert!(drained.stage_error.is_none());
    }

    #[test]
    fn test_stage_error_keeps_queued_outputs() {
        let (egress_tx, mut egress) = mpsc::unbounded_channel();
        let (errors_tx, mut errors) = mpsc::unbounded_channel();
        let done = Job::new(Circuit::bell().unwrap(), 16);
        let done_id = done.id();
        let lost = Job::new(Circuit::bell().unwrap(), 16);
        let lost_id = lost.id();
        egress_tx.send(done).unwrap();
        errors_tx
            .send(JobFailure::new(lost, SchedError::ChannelClosed("dispatch")))
            .unwrap();

        let results = vec![
            ("mapper", Ok(())),
            (
                "splitter",
                Err(SchedError::StageFailed {
                    stage: "splitter",
                    message: "panicked".into(),
                }),
            ),
            ("processor", Err(SchedError::ChannelClosed("egress"))),
        ];
        let drained = Drained::collect(results, &mut egress, &mut errors);

        assert_eq!(drained.completed.len(), 1);
        assert_eq!(drained.completed[0].id(), done_id);
        assert_eq!(drained.failed.len(), 1);
        assert_eq!(drained.failed[0].job_id, lost_id);
        assert!(matches!(
            drained.stage_error,
            Some(SchedError::StageFailed { stage: "splitter", .. })
        ));
    }

    #[tokio::test]
    async fn test_jobs_flow_to_egress_and_errors() {
        let config = PipelineConfig {
            aggregator: AggregatorConfig {
                timeout_ms: 50,
                poll_interval_ms: 5,
            },
            ..PipelineConfig::default()
        };
        let handle = Pipeline::builder(provider(), config)
            .build()
            .unwrap()
            .start();

        let bell = handle.submit(Job::new(Circuit::bell().unwrap(), 64)).unwrap();
        let mut zero = Job::new(Circuit::bell().unwrap(), 64);
        zero.shots = 0;
        let zero = handle.submit(zero).unwrap();

        let drained = handle.shutdown().await;
        assert_eq!(drained.completed.len(), 1);
        let done = &drained.completed[0];
        assert_eq!(done.id(), bell);
        assert_eq!(done.strategy(), Some(Strategy::Aggregation));
        assert_eq!(done.outcome().unwrap().counts.total(), 64);

        assert_eq!(drained.failed.len(), 1);
        assert_eq!(drained.failed[0].job_id, zero);
    }
}
