//! Simulated device provider.

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use qvirt_hal::{
    BatchResult, DeviceDescriptor, DeviceProvider, ExperimentHeader, ExperimentResult, HalError,
    HalResult, SubmissionHandle, SubmissionStatus,
};
use qvirt_ir::Circuit;

use crate::statevector::{Sampler, Statevector};

/// Widest circuit the statevector engine will run.
pub const MAX_SIMULATED_QUBITS: u32 = 24;

/// One stored submission.
struct SimSubmission {
    device: String,
    ready_at: Instant,
    result: BatchResult,
}

/// A provider of simulated devices.
///
/// Each device is described by a [`DeviceDescriptor`] whose limits are
/// enforced on `submit`. Circuits run immediately on a shared statevector
/// engine; with a latency set, the submission reports `Running` until the
/// latency has passed and counts as an active job on its device meanwhile.
pub struct SimulatedProvider {
    name: String,
    devices: Mutex<Vec<DeviceDescriptor>>,
    submissions: Mutex<FxHashMap<String, SimSubmission>>,
    rng: Mutex<StdRng>,
    latency: Duration,
}

impl SimulatedProvider {
    /// Create a provider with the given devices and a fixed seed.
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            name: "simulated".into(),
            devices: Mutex::new(devices),
            submissions: Mutex::new(FxHashMap::default()),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            latency: Duration::ZERO,
        }
    }

    /// A provider with three small simulated devices.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            DeviceDescriptor::new("sim_belem", 5).simulator(),
            DeviceDescriptor::new("sim_lagos", 7).simulator().with_pending_jobs(3),
            DeviceDescriptor::new("sim_guadalupe", 16).simulator().with_pending_jobs(10),
        ])
    }

    /// Reseed the sampling RNG.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            StdRng::seed_from_u64(seed);
        self
    }

    /// Delay before submissions complete.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the provider name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mutate a device descriptor in place, e.g. to change its queue length.
    pub fn update_device(
        &self,
        name: &str,
        update: impl FnOnce(&mut DeviceDescriptor),
    ) -> HalResult<()> {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let device = devices
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| HalError::DeviceNotFound(name.to_string()))?;
        update(device);
        Ok(())
    }

    /// Number of submissions accepted so far.
    pub fn submission_count(&self) -> usize {
        self.submissions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn descriptor(&self, name: &str) -> HalResult<DeviceDescriptor> {
        self.devices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| HalError::DeviceNotFound(name.to_string()))
    }

    fn in_flight(&self, device: &str, now: Instant) -> u32 {
        self.submissions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|s| s.device == device && s.ready_at > now)
            .count() as u32
    }

    fn check_limits(device: &DeviceDescriptor, circuits: &[Circuit], shots: u32) -> HalResult<()> {
        if !device.operational {
            return Err(HalError::DeviceUnavailable(format!(
                "{}: {}",
                device.name, device.status_message
            )));
        }
        if shots == 0 {
            return Err(HalError::SubmissionFailed("shots must be positive".into()));
        }
        if shots > device.max_shots {
            return Err(HalError::TooManyShots {
                device: device.name.clone(),
                shots,
                max: device.max_shots,
            });
        }
        if circuits.is_empty() {
            return Err(HalError::SubmissionFailed("no circuits".into()));
        }
        if circuits.len() > device.max_experiments as usize {
            return Err(HalError::TooManyExperiments {
                device: device.name.clone(),
                experiments: circuits.len(),
                max: device.max_experiments,
            });
        }
        for circuit in circuits {
            let max = device.num_qubits.min(MAX_SIMULATED_QUBITS);
            if circuit.num_qubits() > max {
                return Err(HalError::CircuitTooLarge {
                    circuit: circuit.name().to_string(),
                    device: device.name.clone(),
                    qubits: circuit.num_qubits(),
                    max,
                });
            }
            circuit
                .validate()
                .map_err(|e| HalError::InvalidCircuit(e.to_string()))?;
        }
        Ok(())
    }

    /// Run one circuit and record per-shot memory.
    #[instrument(skip(self, circuit), fields(circuit = circuit.name()))]
    fn run_simulation(&self, circuit: &Circuit, shots: u32) -> ExperimentResult {
        let mut sv = Statevector::new(circuit.num_qubits() as usize);
        for inst in circuit.instructions() {
            sv.apply(inst);
        }

        let sampler = Sampler::new(&sv.probabilities());
        let measured = circuit.measured_qubits();
        let num_clbits = circuit.num_clbits() as usize;

        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let memory = (0..shots)
            .map(|_| {
                let outcome = sampler.sample(&mut *rng);
                let mut bits = vec![b'0'; num_clbits];
                for (qubit, clbit) in &measured {
                    if (outcome >> qubit.0) & 1 == 1 {
                        bits[num_clbits - 1 - clbit.0 as usize] = b'1';
                    }
                }
                String::from_utf8_lossy(&bits).into_owned()
            })
            .collect();

        debug!("Simulated {} shots", shots);
        ExperimentResult::from_memory(ExperimentHeader::from_circuit(circuit), memory)
    }

    fn lookup<T>(
        &self,
        handle: &SubmissionHandle,
        f: impl FnOnce(&SimSubmission) -> T,
    ) -> HalResult<T> {
        let submissions = self
            .submissions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        submissions
            .get(&handle.id.0)
            .map(f)
            .ok_or_else(|| HalError::SubmissionNotFound(handle.id.0.clone()))
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl DeviceProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_devices(&self) -> HalResult<Vec<DeviceDescriptor>> {
        let now = Instant::now();
        let devices = self
            .devices
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        Ok(devices
            .into_iter()
            .map(|mut d| {
                let running = self.in_flight(&d.name, now);
                d.active_jobs += running;
                d.pending_jobs += running;
                d
            })
            .collect())
    }

    #[instrument(skip(self, circuits), fields(experiments = circuits.len()))]
    async fn submit(
        &self,
        device: &str,
        circuits: &[Circuit],
        shots: u32,
    ) -> HalResult<SubmissionHandle> {
        let descriptor = self.descriptor(device)?;
        Self::check_limits(&descriptor, circuits, shots)?;

        let started = Instant::now();
        let experiments: Vec<_> = circuits
            .iter()
            .map(|c| self.run_simulation(c, shots))
            .collect();

        let handle = SubmissionHandle::new(Uuid::new_v4().to_string(), device, circuits.len(), shots);
        let result = BatchResult {
            submission: handle.id.clone(),
            device: device.to_string(),
            experiments,
            execution_time_ms: Some(started.elapsed().as_millis() as u64),
        };

        self.submissions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                handle.id.0.clone(),
                SimSubmission {
                    device: device.to_string(),
                    ready_at: started + self.latency,
                    result,
                },
            );

        debug!(submission = %handle.id, "Submitted to {}", device);
        Ok(handle)
    }

    async fn status(&self, handle: &SubmissionHandle) -> HalResult<SubmissionStatus> {
        let now = Instant::now();
        self.lookup(handle, |s| {
            if s.ready_at > now {
                SubmissionStatus::Running
            } else {
                SubmissionStatus::Completed
            }
        })
    }

    async fn result(&self, handle: &SubmissionHandle) -> HalResult<BatchResult> {
        let now = Instant::now();
        self.lookup(handle, |s| (s.ready_at <= now).then(|| s.result.clone()))?
            .ok_or_else(|| HalError::Backend(format!("submission {} not finished", handle.id)))
    }

    fn poll_interval(&self) -> Duration {
        (self.latency / 4).clamp(Duration::from_millis(1), Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> SimulatedProvider {
        SimulatedProvider::new(vec![
            DeviceDescriptor::new("small", 5).simulator().with_limits(1000, 2),
            DeviceDescriptor::new("offline", 5).with_status(false, "maintenance"),
        ])
        .with_seed(42)
    }

    #[tokio::test]
    async fn test_bell_state_memory() {
        let provider = provider();
        let handle = provider
            .submit("small", &[Circuit::bell().unwrap()], 1000)
            .await
            .unwrap();
        let result = provider.wait(&handle).await.unwrap();

        let experiment = &result.experiments[0];
        assert_eq!(experiment.shots, 1000);
        assert_eq!(experiment.memory.len(), 1000);
        let counts = &experiment.counts;
        assert_eq!(counts.get("00") + counts.get("11"), 1000);
        assert!(counts.get("00") > 0 && counts.get("11") > 0);
    }

    #[tokio::test]
    async fn test_clbit_zero_is_rightmost() {
        let provider = provider();
        let mut circuit = Circuit::with_size("x_on_q0", 2, 0);
        circuit.x(qvirt_ir::QubitId(0)).unwrap();
        circuit.measure_all().unwrap();

        let handle = provider.submit("small", &[circuit], 10).await.unwrap();
        let result = provider.wait(&handle).await.unwrap();
        assert_eq!(result.experiments[0].counts.get("01"), 10);
    }

    #[tokio::test]
    async fn test_limits_enforced() {
        let provider = provider();
        let bell = Circuit::bell().unwrap();

        let err = provider.submit("small", &[bell.clone()], 1001).await.unwrap_err();
        assert!(matches!(err, HalError::TooManyShots { .. }));

        let three = vec![bell.clone(), bell.clone(), bell.clone()];
        let err = provider.submit("small", &three, 10).await.unwrap_err();
        assert!(matches!(err, HalError::TooManyExperiments { .. }));

        let wide = Circuit::ghz(6).unwrap();
        let err = provider.submit("small", &[wide], 10).await.unwrap_err();
        assert!(matches!(err, HalError::CircuitTooLarge { .. }));

        let err = provider.submit("offline", &[bell.clone()], 10).await.unwrap_err();
        assert!(matches!(err, HalError::DeviceUnavailable(_)));

        let err = provider.submit("missing", &[bell], 10).await.unwrap_err();
        assert!(matches!(err, HalError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_latency_counts_active_jobs() {
        let provider = provider().with_latency(Duration::from_millis(50));
        let handle = provider
            .submit("small", &[Circuit::bell().unwrap()], 10)
            .await
            .unwrap();

        let devices = provider.list_devices().await.unwrap();
        assert_eq!(devices[0].active_jobs, 1);
        assert_eq!(provider.status(&handle).await.unwrap(), SubmissionStatus::Running);

        provider.wait(&handle).await.unwrap();
        let devices = provider.list_devices().await.unwrap();
        assert_eq!(devices[0].active_jobs, 0);
    }

    #[tokio::test]
    async fn test_update_device() {
        let provider = provider();
        provider
            .update_device("small", |d| d.pending_jobs = 9)
            .unwrap();
        let devices = provider.list_devices().await.unwrap();
        assert_eq!(devices[0].pending_jobs, 9);
        assert!(provider.update_device("missing", |_| {}).is_err());
    }
}
