//! Per-device concurrency gate.
//!
//! Bounds the number of in-flight submissions to one device. A slot is
//! granted only while both our own count and the device's reported active
//! job count are below the device limit. Slots are held as [`GatePermit`]s
//! and returned on drop, so a failed submission still releases its slot.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::registry::DeviceRegistry;

/// Counting gate for one device.
#[derive(Debug)]
pub struct ConcurrencyGate {
    device: String,
    max_jobs: u32,
    active: Mutex<u32>,
    backoff: Duration,
    max_backoff: Duration,
}

/// One granted slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<ConcurrencyGate>,
}

impl ConcurrencyGate {
    /// Create a gate allowing `max_jobs` concurrent submissions.
    pub fn new(device: impl Into<String>, max_jobs: u32) -> Self {
        Self {
            device: device.into(),
            max_jobs: max_jobs.max(1),
            active: Mutex::new(0),
            backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }

    /// Set the first and the longest wait between acquire attempts.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Device this gate guards.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Slot limit.
    pub fn max_jobs(&self) -> u32 {
        self.max_jobs
    }

    /// Slots currently held through this gate.
    pub fn active(&self) -> u32 {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a slot if one is free, given the device's reported active count.
    pub fn try_acquire(self: &Arc<Self>, reported_active: u32) -> Option<GatePermit> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if (*active).max(reported_active) >= self.max_jobs {
            return None;
        }
        *active += 1;
        Some(GatePermit { gate: self.clone() })
    }

    /// Wait for a slot, backing off exponentially while the gate is full.
    ///
    /// With a registry, the device's reported active count also has to be
    /// below the limit.
    pub async fn acquire(self: &Arc<Self>, registry: Option<&DeviceRegistry>) -> GatePermit {
        let mut backoff = self.backoff;
        loop {
            let reported = match registry {
                Some(registry) => match registry.device(&self.device).await {
                    Ok(Some(device)) => device.active_jobs,
                    _ => 0,
                },
                None => 0,
            };
            if let Some(permit) = self.try_acquire(reported) {
                return permit;
            }
            debug!(
                device = %self.device,
                active = self.active(),
                reported,
                backoff_ms = backoff.as_millis() as u64,
                "Concurrency gate full, waiting"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }

    fn release(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
