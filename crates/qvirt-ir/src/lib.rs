//! qvirt circuit representation
//!
//! The execution pipeline treats circuits as opaque values that it only needs
//! to size, compose side by side, and (un)measure. This crate provides that
//! value: named quantum and classical registers plus a flat instruction list.
//!
//! # Example
//!
//! ```rust
//! use qvirt_ir::{Circuit, QubitId};
//!
//! let mut circuit = Circuit::with_size("bell", 2, 0);
//! circuit.h(QubitId(0)).unwrap();
//! circuit.cx(QubitId(0), QubitId(1)).unwrap();
//! circuit.measure_all().unwrap();
//!
//! let (wide, layouts) = Circuit::combine("pair", &[&circuit, &circuit]).unwrap();
//! assert_eq!(wide.num_qubits(), 4);
//! assert_eq!(layouts[1].clbit_offset, 2);
//! ```

pub mod circuit;
pub mod error;
pub mod gate;
pub mod instruction;
pub mod qubit;

pub use circuit::{Circuit, MEASURE_REGISTER, RegisterLayout, aggregated_register_name};
pub use error::{IrError, IrResult};
pub use gate::StandardGate;
pub use instruction::{Instruction, InstructionKind};
pub use qubit::{ClbitId, QubitId, Register};
