//! Simulated qvirt devices
//!
//! [`SimulatedProvider`] implements [`qvirt_hal::DeviceProvider`] over a set
//! of [`qvirt_hal::DeviceDescriptor`]s. Each device enforces its shot,
//! experiment and qubit limits, and every circuit runs on a local statevector
//! engine with per-shot memory. Sampling uses a seeded RNG, so a provider
//! built with the same seed and fed the same submissions returns the same
//! memory.
//!
//! | Qubits | Memory |
//! |--------|--------|
//! | 10 | ~16 KB |
//! | 20 | ~16 MB |
//! | 24 | ~256 MB |
//!
//! # Example
//!
//! ```ignore
//! use qvirt_adapter_sim::SimulatedProvider;
//! use qvirt_hal::{DeviceDescriptor, DeviceProvider};
//! use qvirt_ir::Circuit;
//!
//! let provider = SimulatedProvider::new(vec![DeviceDescriptor::new("belem", 5)]).with_seed(7);
//! let handle = provider.submit("belem", &[Circuit::bell()?], 1000).await?;
//! let result = provider.wait(&handle).await?;
//! println!("{:?}", result.experiments[0].counts);
//! ```

mod simulator;
mod statevector;

pub use simulator::{MAX_SIMULATED_QUBITS, SimulatedProvider};
