//! Cached device snapshots.
//!
//! The registry is a read cache over [`DeviceProvider::list_devices`]. A
//! snapshot is an immutable map shared behind an `Arc`; a refresh builds a
//! new map and swaps it in, so readers never see a half-updated view.
//!
//! ```text
//!   snapshot() ──fresh──→ cached Arc<RegistrySnapshot>
//!        │
//!        └──stale (> update_interval)──→ list_devices() ──→ swap
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use qvirt_hal::{DeviceDescriptor, DeviceProvider};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SchedResult;

/// Attributes of one device as of the last refresh.
pub type DeviceSnapshot = DeviceDescriptor;

/// Every known device as of one refresh.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Devices by name.
    pub devices: BTreeMap<String, DeviceSnapshot>,
    /// When the provider was queried.
    pub taken_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Look up a device.
    pub fn get(&self, name: &str) -> Option<&DeviceSnapshot> {
        self.devices.get(name)
    }

    /// Operational device with spare capacity that satisfies `predicate`,
    /// with the fewest pending jobs. Ties go to the first device by name.
    pub fn least_busy<P>(&self, predicate: P) -> Option<&DeviceSnapshot>
    where
        P: Fn(&DeviceSnapshot) -> bool,
    {
        self.devices
            .values()
            .filter(|d| d.operational && d.has_capacity() && predicate(d))
            .min_by_key(|d| d.pending_jobs)
    }
}

struct Cached {
    snapshot: Arc<RegistrySnapshot>,
    refreshed: Instant,
}

/// Refreshing cache of device snapshots.
pub struct DeviceRegistry {
    provider: Arc<dyn DeviceProvider>,
    update_interval: Duration,
    cache: RwLock<Option<Cached>>,
    refreshes: AtomicU64,
}

impl DeviceRegistry {
    /// Create a registry that re-queries `provider` at most once per
    /// `update_interval`.
    pub fn new(provider: Arc<dyn DeviceProvider>, update_interval: Duration) -> Self {
        Self {
            provider,
            update_interval,
            cache: RwLock::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// The provider this registry reads from.
    pub fn provider(&self) -> &Arc<dyn DeviceProvider> {
        &self.provider
    }

    /// Current snapshot, refreshed first if it is older than the update
    /// interval.
    ///
    /// If a refresh fails and an older snapshot exists, the older snapshot is
    /// served for another interval before the provider is asked again.
    pub async fn snapshot(&self) -> SchedResult<Arc<RegistrySnapshot>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.refreshed.elapsed() < self.update_interval {
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.refreshed.elapsed() < self.update_interval {
                return Ok(cached.snapshot.clone());
            }
        }

        match self.provider.list_devices().await {
            Ok(devices) => {
                let snapshot = Arc::new(RegistrySnapshot {
                    devices: devices.into_iter().map(|d| (d.name.clone(), d)).collect(),
                    taken_at: Utc::now(),
                });
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                debug!(
                    provider = self.provider.name(),
                    devices = snapshot.devices.len(),
                    "Refreshed device registry"
                );
                *cache = Some(Cached {
                    snapshot: snapshot.clone(),
                    refreshed: Instant::now(),
                });
                Ok(snapshot)
            }
            Err(e) => match cache.as_mut() {
                Some(cached) => {
                    warn!("Device refresh failed, serving stale snapshot: {}", e);
                    // Retry no sooner than one interval from this attempt.
                    cached.refreshed = Instant::now();
                    Ok(cached.snapshot.clone())
                }
                None => Err(e.into()),
            },
        }
    }

    /// Drop the cache so the next read re-queries the provider.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Snapshot of one device.
    pub async fn device(&self, name: &str) -> SchedResult<Option<DeviceSnapshot>> {
        Ok(self.snapshot().await?.get(name).cloned())
    }

    /// See [`RegistrySnapshot::least_busy`].
    pub async fn least_busy<P>(&self, predicate: P) -> SchedResult<Option<DeviceSnapshot>>
    where
        P: Fn(&DeviceSnapshot) -> bool,
    {
        Ok(self.snapshot().await?.least_busy(predicate).cloned())
    }

    /// Number of provider queries so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("provider", &self.provider.name())
            .field("update_interval", &self.update_interval)
            .finish_non_exhaustive()
    }
}
