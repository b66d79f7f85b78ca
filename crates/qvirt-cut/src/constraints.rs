//! Limits a cut solution must respect.

use serde::{Deserialize, Serialize};

/// Constraints passed to [`CircuitCutter::find_cuts`](crate::CircuitCutter::find_cuts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutConstraints {
    /// Widest allowed subcircuit.
    pub max_subcircuit_qubits: u32,
    /// Accepted numbers of subcircuits.
    pub allowed_part_counts: Vec<usize>,
    /// Most wire cuts allowed.
    pub max_cuts: usize,
}

impl CutConstraints {
    /// Accept any part count from 1 up to `max_separate_parts`.
    pub fn new(max_subcircuit_qubits: u32, max_separate_parts: usize, max_cuts: usize) -> Self {
        Self {
            max_subcircuit_qubits,
            allowed_part_counts: (1..=max_separate_parts).collect(),
            max_cuts,
        }
    }

    /// Whether a solution with `parts` subcircuits and `cuts` cuts is allowed.
    pub fn admits(&self, parts: usize, cuts: usize) -> bool {
        cuts <= self.max_cuts && self.allowed_part_counts.contains(&parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits() {
        let c = CutConstraints::new(3, 3, 2);
        assert!(c.admits(1, 0));
        assert!(c.admits(3, 2));
        assert!(!c.admits(4, 2));
        assert!(!c.admits(2, 3));
    }
}
