//! Error types for the cut crate.

use thiserror::Error;

use qvirt_ir::IrError;

/// Errors raised while cutting a circuit or recombining its pieces.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CutError {
    /// An instance outcome needed for reconstruction is absent.
    #[error("Missing outcome for subcircuit {subcircuit}, combination {combination}")]
    MissingInstance {
        /// Subcircuit index.
        subcircuit: usize,
        /// Combination index.
        combination: usize,
    },

    /// An outcome bitstring could not be decoded.
    #[error("Malformed outcome '{bitstring}' for subcircuit {subcircuit}")]
    MalformedOutcome {
        /// Subcircuit index.
        subcircuit: usize,
        /// Offending bitstring.
        bitstring: String,
    },

    /// The parent is too wide to hold a dense distribution.
    #[error("Cannot reconstruct {0} qubits densely")]
    TooWide(u32),

    /// Subcircuit construction failed.
    #[error("Circuit error: {0}")]
    Circuit(#[from] IrError),
}

/// Result type for cut operations.
pub type CutResult<T> = Result<T, CutError>;
