//! qvirt device provider abstraction
//!
//! The execution pipeline talks to remote quantum devices only through the
//! [`DeviceProvider`] trait:
//!
//! - [`DeviceDescriptor`] reports capacity and queue state per device
//! - [`DeviceProvider::submit`] runs a batch of circuits with one shot count
//! - [`BatchResult`] holds one [`ExperimentResult`] per circuit, with
//!   [`Counts`] and per-shot memory
//!
//! # Example
//!
//! ```ignore
//! use qvirt_hal::DeviceProvider;
//! use qvirt_adapter_sim::SimulatedProvider;
//! use qvirt_ir::Circuit;
//!
//! let provider = SimulatedProvider::with_defaults();
//! let devices = provider.list_devices().await?;
//! let handle = provider.submit(&devices[0].name, &[Circuit::bell()?], 1000).await?;
//! let result = provider.wait(&handle).await?;
//! println!("{:?}", result.experiments[0].counts.most_frequent());
//! ```

pub mod device;
pub mod error;
pub mod job;
pub mod provider;
pub mod result;

pub use device::{DEFAULT_MAX_EXPERIMENTS, DEFAULT_MAX_JOBS, DEFAULT_MAX_SHOTS, DeviceDescriptor};
pub use error::{HalError, HalResult};
pub use job::{SubmissionHandle, SubmissionId, SubmissionStatus};
pub use provider::DeviceProvider;
pub use result::{BatchResult, Counts, ExperimentHeader, ExperimentResult, slice_bits};
