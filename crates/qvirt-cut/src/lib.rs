//! qvirt wire cutting
//!
//! Splits a circuit that is too wide for any device into narrower
//! subcircuits joined by wire cuts, builds the measured instances that have
//! to be executed, and recombines their outcome distributions into the
//! parent's distribution.
//!
//! ```text
//!   find_cuts() ──→ build_instances() ──→ (execute) ──→ reconstruct()
//! ```
//!
//! A subcircuit with `a` incoming and `b` outgoing cuts has `4^a · 3^b`
//! instances: every incoming cut wire is prepared in one of |0⟩, |1⟩, |+⟩,
//! |+i⟩ and every outgoing one is measured in the I, X or Y basis.
//!
//! # Example
//!
//! ```rust
//! use qvirt_cut::{CircuitCutter, CutConstraints, WireCutter};
//! use qvirt_ir::Circuit;
//!
//! let body = Circuit::ghz(6).unwrap().remove_measurements();
//! let solution = WireCutter
//!     .find_cuts(&body, &CutConstraints::new(3, 4, 4))
//!     .unwrap()
//!     .expect("a 6-qubit chain splits into 3-qubit pieces");
//! assert_eq!(solution.num_cuts(), 2);
//! assert_eq!(solution.total_instances(), 19);
//! ```

pub mod constraints;
pub mod error;
mod finder;
pub mod instance;
pub mod reconstruct;
pub mod solution;

use qvirt_ir::Circuit;

pub use constraints::CutConstraints;
pub use error::{CutError, CutResult};
pub use instance::{InitState, MeasBasis};
pub use reconstruct::{Distribution, InstanceOutcomes, MAX_RECONSTRUCT_QUBITS};
pub use solution::{CutSlot, CutSolution, InstanceKey, Segment, Subcircuit, SubcircuitInstance, WireCut};

/// Cut finding, instance generation and reconstruction.
pub trait CircuitCutter: Send + Sync {
    /// Search for a cut of an unmeasured circuit. `None` when the constraints
    /// cannot be met.
    fn find_cuts(
        &self,
        circuit: &Circuit,
        constraints: &CutConstraints,
    ) -> CutResult<Option<CutSolution>>;

    /// Every measured instance that has to run.
    fn build_instances(
        &self,
        solution: &CutSolution,
        shots: u32,
    ) -> CutResult<Vec<SubcircuitInstance>>;

    /// Recombine the outcome of every instance into the parent's
    /// distribution over all of its qubits.
    fn reconstruct(
        &self,
        solution: &CutSolution,
        outcomes: &InstanceOutcomes,
    ) -> CutResult<Distribution>;
}

/// Greedy wire cutter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCutter;

impl CircuitCutter for WireCutter {
    fn find_cuts(
        &self,
        circuit: &Circuit,
        constraints: &CutConstraints,
    ) -> CutResult<Option<CutSolution>> {
        finder::find_cuts(circuit, constraints)
    }

    fn build_instances(
        &self,
        solution: &CutSolution,
        shots: u32,
    ) -> CutResult<Vec<SubcircuitInstance>> {
        instance::build_instances(solution, shots)
    }

    fn reconstruct(
        &self,
        solution: &CutSolution,
        outcomes: &InstanceOutcomes,
    ) -> CutResult<Distribution> {
        reconstruct::reconstruct(solution, outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qvirt_ir::QubitId;

    #[test]
    fn test_instances_per_subcircuit() {
        let body = Circuit::ghz(6).unwrap().remove_measurements();
        let solution = WireCutter
            .find_cuts(&body, &CutConstraints::new(3, 4, 4))
            .unwrap()
            .unwrap();
        let instances = WireCutter.build_instances(&solution, 500).unwrap();

        // 3 upstream-only, 4·3 middle, 4 downstream-only.
        assert_eq!(instances.len(), 19);
        assert!(instances.iter().all(|i| i.circuit.num_qubits() <= 3));
        assert!(instances.iter().all(|i| i.circuit.has_measurements()));
        assert!(instances.iter().all(|i| i.shots == 500));
        assert_eq!(
            instances.iter().filter(|i| i.key.subcircuit == 1).count(),
            12
        );
    }

    #[test]
    fn test_reconstruct_without_cuts_is_relabeling() {
        let mut body = Circuit::with_size("pairs", 2, 0);
        body.x(QubitId(1)).unwrap();
        let solution = WireCutter
            .find_cuts(&body, &CutConstraints::new(1, 2, 0))
            .unwrap()
            .unwrap();
        assert_eq!(solution.subcircuits.len(), 2);

        let mut outcomes = InstanceOutcomes::default();
        for (s, sub) in solution.subcircuits.iter().enumerate() {
            let bit = if sub.segments[0].qubit == QubitId(1) { "1" } else { "0" };
            outcomes.insert(
                InstanceKey {
                    subcircuit: s,
                    combination: 0,
                },
                Distribution::from([(bit.to_string(), 1.0)]),
            );
        }

        let dist = WireCutter.reconstruct(&solution, &outcomes).unwrap();
        assert_eq!(dist.len(), 1);
        assert!((dist["10"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_instance_is_an_error() {
        let body = Circuit::ghz(4).unwrap().remove_measurements();
        let solution = WireCutter
            .find_cuts(&body, &CutConstraints::new(3, 4, 4))
            .unwrap()
            .unwrap();
        let err = WireCutter
            .reconstruct(&solution, &InstanceOutcomes::default())
            .unwrap_err();
        assert!(matches!(err, CutError::MissingInstance { .. }));
    }

    #[test]
    fn test_single_cut_exact_reconstruction() {
        // X on q0 copied down a CX chain; the cut on q1 must give |111⟩.
        let mut body = Circuit::with_size("copy", 3, 0);
        body.x(QubitId(0)).unwrap();
        body.cx(QubitId(0), QubitId(1)).unwrap();
        body.cx(QubitId(1), QubitId(2)).unwrap();
        let solution = WireCutter
            .find_cuts(&body, &CutConstraints::new(2, 2, 1))
            .unwrap()
            .unwrap();
        assert_eq!(solution.num_cuts(), 1);

        // Upstream: segments (q0, q1) both |1⟩; I basis is deterministic, X and Y
        // are uniform on the cut bit.
        let mut outcomes = InstanceOutcomes::default();
        let up = |combination| InstanceKey {
            subcircuit: 0,
            combination,
        };
        outcomes.insert(up(0), Distribution::from([("11".to_string(), 1.0)]));
        for c in [1, 2] {
            outcomes.insert(
                up(c),
                Distribution::from([("01".to_string(), 0.5), ("11".to_string(), 0.5)]),
            );
        }

        // Downstream: segments (q1', q2) with CX(q1', q2).
        let down = |combination| InstanceKey {
            subcircuit: 1,
            combination,
        };
        outcomes.insert(down(0), Distribution::from([("00".to_string(), 1.0)]));
        outcomes.insert(down(1), Distribution::from([("11".to_string(), 1.0)]));
        for c in [2, 3] {
            outcomes.insert(
                down(c),
                Distribution::from([("00".to_string(), 0.5), ("11".to_string(), 0.5)]),
            );
        }

        let dist = WireCutter.reconstruct(&solution, &outcomes).unwrap();
        assert!((dist["111"] - 1.0).abs() < 1e-12);
    }
}
