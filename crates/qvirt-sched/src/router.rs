//! Result and failure routing.
//!
//! [`ResultRouter`] sends every completed job to the stage that finishes it,
//! chosen by the job's strategy tag. [`FailureRouter`] sits in front of the
//! public error sink and turns failures of internal jobs into failures of
//! the jobs callers actually submitted.
//!
//! ```text
//!   executed job ──→ Raw ─────────→ egress
//!                ├─→ Aggregation ─→ splitter ──→ egress
//!                └─→ Partition ───→ writer ──→ processor ──→ egress
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ErrorSink, JobFailure, SchedError, SchedResult, report};
use crate::job::{Job, JobKind, Strategy};
use crate::store::{AggregationRecords, CutRecords};

/// Result stage for a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Finished; goes to the caller.
    Output,
    /// Aggregation splitter.
    Splitter,
    /// Partition result writer.
    PartitionWriter,
}

/// Route for `job`. Untagged jobs have none.
pub fn route(job: &Job) -> SchedResult<Route> {
    match job.strategy() {
        Some(Strategy::Raw) => Ok(Route::Output),
        Some(Strategy::Aggregation) => Ok(Route::Splitter),
        Some(Strategy::Partition) => Ok(Route::PartitionWriter),
        None => Err(SchedError::UnknownStrategy(job.id())),
    }
}

/// Dispatches executed jobs by strategy tag.
#[derive(Default)]
pub struct ResultRouter {
    errors: ErrorSink,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report unroutable jobs to `sink`.
    pub fn with_errors(mut self, sink: ErrorSink) -> Self {
        self.errors = sink;
        self
    }

    /// Route jobs from `input` until it closes.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Job>,
        output: mpsc::UnboundedSender<Job>,
        splitter: mpsc::UnboundedSender<Job>,
        writer: mpsc::UnboundedSender<Job>,
    ) -> SchedResult<()> {
        info!("Result router started");
        while let Some(job) = input.recv().await {
            let route = match route(&job) {
                Ok(route) => route,
                Err(e) => {
                    report(&self.errors, JobFailure::new(job, e));
                    continue;
                }
            };
            debug!(job = %job.id(), ?route, "Routing result");
            let (queue, stage) = match route {
                Route::Output => (&output, "egress"),
                Route::Splitter => (&splitter, "aggregation splitter"),
                Route::PartitionWriter => (&writer, "partition writer"),
            };
            queue.send(job).map_err(|_| SchedError::ChannelClosed(stage))?;
        }
        info!("Result router stopped");
        Ok(())
    }
}

/// Maps failures of combined jobs and sub-jobs onto the submitted jobs
/// they stand for.
///
/// A failed combined job fails each of its members, and its aggregation
/// record is consumed. The first failed sub-job of a cut job fails the
/// parent and consumes the cut record; later failures of the same parent's
/// sub-jobs find no record and are dropped.
pub struct FailureRouter {
    aggregation_records: Arc<AggregationRecords>,
    cut_records: Arc<CutRecords>,
}

impl FailureRouter {
    pub fn new(aggregation_records: Arc<AggregationRecords>, cut_records: Arc<CutRecords>) -> Self {
        Self {
            aggregation_records,
            cut_records,
        }
    }

    /// Failures of submitted jobs that `failure` amounts to.
    pub fn resolve(&self, failure: JobFailure) -> Vec<JobFailure> {
        let sub_job_parent = match failure.job.as_ref().map(|job| &job.kind) {
            Some(JobKind::SubCircuit { parent, .. }) => Some(*parent),
            _ => None,
        };

        if let Some(parent) = sub_job_parent {
            return match self.cut_records.take(&parent) {
                Some(record) => {
                    let error = SchedError::SubJobFailed {
                        sub_job: failure.job_id,
                        message: failure.error.to_string(),
                    };
                    vec![JobFailure::new(record.parent, error)]
                }
                None => {
                    debug!(parent = %parent, sub = %failure.job_id, "Parent already failed");
                    Vec::new()
                }
            };
        }

        match self.aggregation_records.take(&failure.job_id) {
            Some(record) => {
                let message = failure.error.to_string();
                record
                    .jobs
                    .into_iter()
                    .map(|job| {
                        let error = SchedError::CombinedFailed {
                            combined: failure.job_id,
                            message: message.clone(),
                        };
                        JobFailure::new(job, error)
                    })
                    .collect()
            }
            None => vec![failure],
        }
    }

    /// Resolve failures from `input` until it closes.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<JobFailure>,
        output: mpsc::UnboundedSender<JobFailure>,
    ) -> SchedResult<()> {
        while let Some(failure) = input.recv().await {
            let original = failure.job_id;
            for resolved in self.resolve(failure) {
                if resolved.job_id != original {
                    info!(job = %resolved.job_id, "Failing submitted job: {}", resolved.error);
                }
                if output.send(resolved).is_err() {
                    debug!("Error receiver dropped, discarding failure");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use crate::job::DeviceRef;
    use crate::partitioner::Partitioner;
    use crate::store::AggregationRecord;
    use qvirt_cut::WireCutter;
    use qvirt_ir::Circuit;

    fn tagged(strategy: Strategy) -> Job {
        let mut job = Job::new(Circuit::ghz(4).unwrap(), 10);
        job.assign(strategy, DeviceRef::new("dev", 3)).unwrap();
        job
    }

    fn failure(job: Job) -> JobFailure {
        JobFailure::new(
            job,
            SchedError::SubmissionFailed {
                device: "dev".into(),
                message: "rejected".into(),
            },
        )
    }

    #[test]
    fn test_route_by_tag() {
        assert_eq!(route(&tagged(Strategy::Raw)).unwrap(), Route::Output);
        assert_eq!(route(&tagged(Strategy::Aggregation)).unwrap(), Route::Splitter);
        assert_eq!(
            route(&tagged(Strategy::Partition)).unwrap(),
            Route::PartitionWriter
        );
        let untagged = Job::new(Circuit::bell().unwrap(), 1);
        assert!(matches!(
            route(&untagged),
            Err(SchedError::UnknownStrategy(_))
        ));
    }

    #[tokio::test]
    async fn test_router_reports_untagged_and_continues() {
        let (err_tx, mut errors) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out) = mpsc::unbounded_channel();
        let (split_tx, mut split) = mpsc::unbounded_channel();
        let (writer_tx, _writer) = mpsc::unbounded_channel();
        let handle = tokio::spawn(
            ResultRouter::new()
                .with_errors(Some(err_tx))
                .run(in_rx, out_tx, split_tx, writer_tx),
        );

        in_tx.send(Job::new(Circuit::bell().unwrap(), 1)).unwrap();
        in_tx.send(tagged(Strategy::Raw)).unwrap();
        in_tx.send(tagged(Strategy::Aggregation)).unwrap();
        drop(in_tx);
        handle.await.unwrap().unwrap();

        assert!(matches!(
            errors.recv().await.unwrap().error,
            SchedError::UnknownStrategy(_)
        ));
        assert!(out.recv().await.is_some());
        assert!(split.recv().await.is_some());
    }

    #[test]
    fn test_combined_failure_fails_members() {
        let aggregation = Arc::new(AggregationRecords::new());
        let router = FailureRouter::new(aggregation.clone(), Arc::new(CutRecords::new()));

        let a = tagged(Strategy::Aggregation);
        let b = tagged(Strategy::Aggregation);
        let ids = vec![a.id(), b.id()];
        let (circuit, layouts) = Circuit::combine("agg", &[&a.circuit, &b.circuit]).unwrap();
        let combined = Job::combined(circuit, 10, DeviceRef::new("dev", 8));
        aggregation.insert(
            combined.id(),
            AggregationRecord {
                jobs: vec![a, b],
                layouts,
            },
        );

        let combined_id = combined.id();
        let resolved = router.resolve(failure(combined));
        assert_eq!(resolved.iter().map(|f| f.job_id).collect::<Vec<_>>(), ids);
        assert!(resolved.iter().all(|f| matches!(
            &f.error,
            SchedError::CombinedFailed { combined, .. } if *combined == combined_id
        )));
        assert!(aggregation.is_empty());
    }

    #[test]
    fn test_sub_job_failure_fails_parent_once() {
        let cuts = Arc::new(CutRecords::new());
        let router = FailureRouter::new(Arc::new(AggregationRecords::new()), cuts.clone());
        let partitioner =
            Partitioner::new(Arc::new(WireCutter), PartitionConfig::default(), cuts.clone());
        let parent = tagged(Strategy::Partition);
        let subs = partitioner.cut(&parent).unwrap();
        assert!(subs.len() >= 2);

        let first = router.resolve(failure(subs[0].clone()));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].job_id, parent.id());
        assert!(matches!(first[0].error, SchedError::SubJobFailed { .. }));
        assert!(!cuts.contains(&parent.id()));

        assert!(router.resolve(failure(subs[1].clone())).is_empty());
    }

    #[test]
    fn test_plain_failure_passes_through() {
        let router = FailureRouter::new(
            Arc::new(AggregationRecords::new()),
            Arc::new(CutRecords::new()),
        );
        let job = tagged(Strategy::Raw);
        let id = job.id();
        let resolved = router.resolve(failure(job));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].job_id, id);
        assert!(matches!(
            resolved[0].error,
            SchedError::SubmissionFailed { .. }
        ));
    }
}
