//! Instance generation for cut subcircuits.

use qvirt_ir::{Circuit, QubitId};

use crate::error::CutResult;
use crate::solution::{CutSlot, CutSolution, InstanceKey, SubcircuitInstance, decode_combination};

/// State prepared on a segment that starts at a cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// |0⟩
    Zero,
    /// |1⟩
    One,
    /// |+⟩
    Plus,
    /// |+i⟩
    PlusI,
}

impl InitState {
    /// Order used by combination digits.
    pub const ALL: [InitState; 4] = [
        InitState::Zero,
        InitState::One,
        InitState::Plus,
        InitState::PlusI,
    ];

    /// Combination digit of this state.
    pub fn digit(self) -> usize {
        self as usize
    }
}

/// Basis a segment ending at a cut is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasBasis {
    /// Computational basis; serves both the I and Z terms.
    I,
    /// X basis.
    X,
    /// Y basis.
    Y,
}

impl MeasBasis {
    /// Order used by combination digits.
    pub const ALL: [MeasBasis; 3] = [MeasBasis::I, MeasBasis::X, MeasBasis::Y];

    /// Combination digit of this basis.
    pub fn digit(self) -> usize {
        self as usize
    }
}

/// Build one measured instance of subcircuit `subcircuit`.
pub(crate) fn build_instance(
    solution: &CutSolution,
    key: InstanceKey,
    shots: u32,
) -> CutResult<SubcircuitInstance> {
    let sub = &solution.subcircuits[key.subcircuit];
    let slots = sub.slots();
    let digits = decode_combination(&slots, key.combination);

    let mut circuit = Circuit::with_size(
        format!("{}_c{}", sub.body.name(), key.combination),
        sub.width(),
        0,
    );

    for (slot, digit) in slots.iter().zip(&digits) {
        if let CutSlot::Init { segment, .. } = slot {
            let q = QubitId(*segment as u32);
            match InitState::ALL[*digit] {
                InitState::Zero => {}
                InitState::One => {
                    circuit.x(q)?;
                }
                InitState::Plus => {
                    circuit.h(q)?;
                }
                InitState::PlusI => {
                    circuit.h(q)?.s(q)?;
                }
            }
        }
    }

    let mut circuit = circuit.compose(&sub.body, 0, 0)?;

    for (slot, digit) in slots.iter().zip(&digits) {
        if let CutSlot::Meas { segment, .. } = slot {
            let q = QubitId(*segment as u32);
            match MeasBasis::ALL[*digit] {
                MeasBasis::I => {}
                MeasBasis::X => {
                    circuit.h(q)?;
                }
                MeasBasis::Y => {
                    circuit.sdg(q)?.h(q)?;
                }
            }
        }
    }

    let all: Vec<_> = (0..sub.width()).map(QubitId).collect();
    Ok(SubcircuitInstance {
        key,
        circuit: circuit.add_measurements(&all)?,
        shots,
    })
}

/// Every instance of every subcircuit, subcircuit by subcircuit.
pub(crate) fn build_instances(
    solution: &CutSolution,
    shots: u32,
) -> CutResult<Vec<SubcircuitInstance>> {
    let mut instances = Vec::with_capacity(solution.total_instances());
    for (subcircuit, sub) in solution.subcircuits.iter().enumerate() {
        for combination in 0..sub.num_instances() {
            instances.push(build_instance(
                solution,
                InstanceKey {
                    subcircuit,
                    combination,
                },
                shots,
            )?);
        }
    }
    Ok(instances)
}
