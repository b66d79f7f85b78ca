//! Device provider trait.
//!
//! ```text
//!   list_devices() ──→ submit() ──→ status() ──→ result()
//! ```
//!
//! | Method | Required | Returns |
//! |--------|----------|---------|
//! | `name()` | yes | `&str` |
//! | `list_devices()` | yes | `HalResult<Vec<DeviceDescriptor>>` |
//! | `submit()` | yes | `HalResult<SubmissionHandle>` |
//! | `status()` | yes | `HalResult<SubmissionStatus>` |
//! | `result()` | yes | `HalResult<BatchResult>` |
//! | `wait()` | provided | `HalResult<BatchResult>` |

use std::time::Duration;

use async_trait::async_trait;
use qvirt_ir::Circuit;
use tracing::debug;

use crate::device::DeviceDescriptor;
use crate::error::{HalError, HalResult};
use crate::job::{SubmissionHandle, SubmissionStatus};
use crate::result::BatchResult;

/// A source of devices that can run batches of circuits.
///
/// `submit` sends every circuit with the same shot count; the resulting
/// [`BatchResult`] holds one experiment per circuit in submission order.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Current descriptors of every device.
    async fn list_devices(&self) -> HalResult<Vec<DeviceDescriptor>>;

    /// Submit `circuits` to `device`, each run for `shots` shots.
    async fn submit(
        &self,
        device: &str,
        circuits: &[Circuit],
        shots: u32,
    ) -> HalResult<SubmissionHandle>;

    /// Status of a submission.
    async fn status(&self, handle: &SubmissionHandle) -> HalResult<SubmissionStatus>;

    /// Result of a completed submission.
    ///
    /// Only valid once `status()` reports `Completed`.
    async fn result(&self, handle: &SubmissionHandle) -> HalResult<BatchResult>;

    /// Interval between status polls in [`wait`](Self::wait).
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Upper bound on [`wait`](Self::wait).
    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// Wait for a submission to finish and return its result.
    async fn wait(&self, handle: &SubmissionHandle) -> HalResult<BatchResult> {
        let poll_interval = self.poll_interval();
        let deadline = tokio::time::Instant::now() + self.wait_timeout();

        loop {
            match self.status(handle).await? {
                SubmissionStatus::Completed => return self.result(handle).await,
                SubmissionStatus::Failed(msg) => return Err(HalError::JobFailed(msg)),
                SubmissionStatus::Cancelled => return Err(HalError::JobCancelled),
                SubmissionStatus::Queued | SubmissionStatus::Running => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(HalError::Timeout(handle.id.to_string()));
                    }
                    debug!(submission = %handle.id, "Submission pending, polling again");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}
