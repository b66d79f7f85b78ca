//! qvirt execution pipeline
//!
//! Multiplexes many small circuit jobs onto a few capacity-limited devices.
//! Every job is run raw, aggregated with other jobs into one wider circuit,
//! or partitioned into narrower subcircuits; the pipeline then batches the
//! resulting work against each device's shot, experiment and concurrency
//! limits and turns the device results back into one outcome per job.
//!
//! # Stages
//!
//! ```text
//!   ingress
//!      │
//!      ▼
//!   ResourceMapper ──── DeviceRegistry (cached snapshots)
//!      │
//!      ├─ raw ─────────────────────────┐
//!      ├─ aggregation ─→ Aggregator ───┤
//!      └─ partition ──→ Partitioner ───┤
//!                                      ▼
//!                          ExecutionHandler (per device)
//!                          collect → pack → submit → demultiplex
//!                                      │
//!                                      ▼
//!                               ResultRouter
//!      ┌──────────────────────┬────────┴──────────────────────────┐
//!      ▼                      ▼                                   ▼
//!   egress          AggregationSplitter        PartitionResultWriter → PartitionProcessor
//! ```
//!
//! Each stage is a tokio task reading from one channel. Combined and cut
//! jobs are tracked in [`AggregationRecords`] and [`CutRecords`]; each
//! record is consumed exactly once when its result is turned back into
//! per-job results.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use qvirt_adapter_sim::SimulatedProvider;
//! use qvirt_ir::Circuit;
//! use qvirt_sched::{Job, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(SimulatedProvider::with_defaults());
//!     let mut pipeline = Pipeline::builder(provider, PipelineConfig::default())
//!         .build()?
//!         .start();
//!
//!     pipeline.submit(Job::new(Circuit::bell()?, 1000))?;
//!     if let Some(job) = pipeline.egress.recv().await {
//!         println!("{:?}", job.outcome().map(|o| &o.counts));
//!     }
//!     if let Some(e) = pipeline.shutdown().await.stage_error {
//!         return Err(e.into());
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod job;
pub mod mapper;
pub mod partition_result;
pub mod partitioner;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod schedule;
pub mod splitter;
pub mod store;

#[cfg(test)]
mod testing;

pub use aggregator::Aggregator;
pub use config::{
    AggregatorConfig, DeviceFilter, ExecutorConfig, JobConfig, MapperConfig, PartitionConfig,
    PipelineConfig, Policy, RegistryConfig,
};
pub use error::{ErrorSink, JobFailure, SchedError, SchedResult};
pub use executor::{ExecutionDispatcher, ExecutionHandler};
pub use gate::{ConcurrencyGate, GatePermit};
pub use job::{DeviceRef, Job, JobId, JobKind, Strategy};
pub use mapper::{Decision, ResourceMapper};
pub use partition_result::{PartitionProcessor, PartitionResultWriter, ReadyParent};
pub use partitioner::Partitioner;
pub use pipeline::{Drained, Pipeline, PipelineBuilder, PipelineHandle};
pub use registry::{DeviceRegistry, DeviceSnapshot, RegistrySnapshot};
pub use router::{FailureRouter, ResultRouter, Route};
pub use schedule::{ScheduleEntry, ScheduleItem, ScheduleLimits, SchedulePacker};
pub use splitter::AggregationSplitter;
pub use store::{AggregationRecord, AggregationRecords, CutRecord, CutRecords, RecordStore};
