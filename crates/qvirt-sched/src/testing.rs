//! Scripted provider for unit tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use qvirt_hal::{
    BatchResult, DeviceDescriptor, DeviceProvider, ExperimentHeader, ExperimentResult, HalError,
    HalResult, SubmissionHandle, SubmissionId, SubmissionStatus,
};
use qvirt_ir::Circuit;

/// One call to `submit`.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub device: String,
    pub circuits: Vec<Circuit>,
    pub shots: u32,
}

/// Completes every submission immediately. Shot `i` of a circuit with `n`
/// bits records `i mod 2^n` as its bitstring.
pub struct StaticProvider {
    devices: Mutex<Vec<DeviceDescriptor>>,
    submissions: Mutex<Vec<Submitted>>,
    failing: Mutex<BTreeSet<usize>>,
    list_calls: AtomicU32,
    fail_listing: AtomicBool,
}

impl StaticProvider {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices: Mutex::new(devices),
            submissions: Mutex::new(Vec::new()),
            failing: Mutex::new(BTreeSet::new()),
            list_calls: AtomicU32::new(0),
            fail_listing: AtomicBool::new(false),
        }
    }

    /// Make the `index`-th submission (0-based) fail.
    pub fn fail_submission(&self, index: usize) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn update(&self, name: &str, f: impl FnOnce(&mut DeviceDescriptor)) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = devices.iter_mut().find(|d| d.name == name) {
            f(device);
        }
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Submitted> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub fn counting_memory(num_clbits: u32, shots: u32) -> Vec<String> {
    let modulus = 1u64 << num_clbits.min(63);
    (0..u64::from(shots))
        .map(|i| {
            if num_clbits == 0 {
                String::new()
            } else {
                format!("{:0width$b}", i % modulus, width = num_clbits as usize)
            }
        })
        .collect()
}

#[async_trait]
impl DeviceProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_devices(&self) -> HalResult<Vec<DeviceDescriptor>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(HalError::Backend("listing disabled".into()));
        }
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn submit(
        &self,
        device: &str,
        circuits: &[Circuit],
        shots: u32,
    ) -> HalResult<SubmissionHandle> {
        let mut submissions = self.submissions.lock().unwrap_or_else(PoisonError::into_inner);
        let index = submissions.len();
        submissions.push(Submitted {
            device: device.to_string(),
            circuits: circuits.to_vec(),
            shots,
        });
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&index)
        {
            return Err(HalError::SubmissionFailed(format!("scripted failure {index}")));
        }
        Ok(SubmissionHandle::new(
            index.to_string(),
            device,
            circuits.len(),
            shots,
        ))
    }

    async fn status(&self, _handle: &SubmissionHandle) -> HalResult<SubmissionStatus> {
        Ok(SubmissionStatus::Completed)
    }

    async fn result(&self, handle: &SubmissionHandle) -> HalResult<BatchResult> {
        let index: usize = handle
            .id
            .0
            .parse()
            .map_err(|_| HalError::SubmissionNotFound(handle.id.to_string()))?;
        let submitted = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
            .ok_or_else(|| HalError::SubmissionNotFound(handle.id.to_string()))?;

        let experiments = submitted
            .circuits
            .iter()
            .map(|c| {
                ExperimentResult::from_memory(
                    ExperimentHeader::from_circuit(c),
                    counting_memory(c.num_clbits(), submitted.shots),
                )
            })
            .collect();

        Ok(BatchResult {
            submission: SubmissionId::new(handle.id.0.clone()),
            device: submitted.device,
            experiments,
            execution_time_ms: Some(0),
        })
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }
}
