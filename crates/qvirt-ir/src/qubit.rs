//! Qubit, classical bit and register types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a qubit within a circuit.
///
/// Qubits are numbered across all quantum registers in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QubitId(pub u32);

impl QubitId {
    /// Shift this qubit by an offset.
    pub fn offset(self, by: u32) -> Self {
        QubitId(self.0 + by)
    }
}

impl fmt::Display for QubitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl From<u32> for QubitId {
    fn from(id: u32) -> Self {
        QubitId(id)
    }
}

/// Index of a classical bit within a circuit.
///
/// Bit 0 is the rightmost character of every outcome bitstring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClbitId(pub u32);

impl ClbitId {
    /// Shift this bit by an offset.
    pub fn offset(self, by: u32) -> Self {
        ClbitId(self.0 + by)
    }
}

impl fmt::Display for ClbitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl From<u32> for ClbitId {
    fn from(id: u32) -> Self {
        ClbitId(id)
    }
}

/// A named, contiguous block of bits (quantum or classical).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    /// Register name, unique per kind within a circuit.
    pub name: String,
    /// Number of bits in the register.
    pub size: u32,
}

impl Register {
    /// Create a new register.
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(QubitId(3).to_string(), "q3");
        assert_eq!(ClbitId(0).to_string(), "c0");
    }

    #[test]
    fn test_offset() {
        assert_eq!(QubitId(2).offset(3), QubitId(5));
        assert_eq!(ClbitId(1).offset(4), ClbitId(5));
    }
}
