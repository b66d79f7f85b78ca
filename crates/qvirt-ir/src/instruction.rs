//! Instructions: a gate, measurement, reset or barrier plus its operands.

use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::gate::StandardGate;
use crate::qubit::{ClbitId, QubitId};

/// What an instruction does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Gate(StandardGate),
    /// Qubit `i` into clbit `i`, pairwise.
    Measure,
    Reset,
    /// No effect on the state; excluded from depth.
    Barrier,
}

/// One operation with its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub qubits: Vec<QubitId>,
    /// Empty for everything except measurements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clbits: Vec<ClbitId>,
}

impl Instruction {
    fn new(kind: InstructionKind, qubits: Vec<QubitId>, clbits: Vec<ClbitId>) -> Self {
        Self {
            kind,
            qubits,
            clbits,
        }
    }

    pub fn gate(gate: StandardGate, qubits: impl IntoIterator<Item = QubitId>) -> Self {
        Self::new(InstructionKind::Gate(gate), qubits.into_iter().collect(), Vec::new())
    }

    pub fn measure(qubit: QubitId, clbit: ClbitId) -> Self {
        Self::new(InstructionKind::Measure, vec![qubit], vec![clbit])
    }

    /// Measure several qubits at once. Both lists must have the same length.
    pub fn measure_many(
        qubits: impl IntoIterator<Item = QubitId>,
        clbits: impl IntoIterator<Item = ClbitId>,
    ) -> IrResult<Self> {
        let qubits: Vec<_> = qubits.into_iter().collect();
        let clbits: Vec<_> = clbits.into_iter().collect();
        if qubits.len() != clbits.len() {
            return Err(IrError::MeasureArity {
                qubits: qubits.len(),
                clbits: clbits.len(),
            });
        }
        Ok(Self::new(InstructionKind::Measure, qubits, clbits))
    }

    pub fn reset(qubit: QubitId) -> Self {
        Self::new(InstructionKind::Reset, vec![qubit], Vec::new())
    }

    pub fn barrier(qubits: impl IntoIterator<Item = QubitId>) -> Self {
        Self::new(InstructionKind::Barrier, qubits.into_iter().collect(), Vec::new())
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            InstructionKind::Gate(gate) => gate.name(),
            InstructionKind::Measure => "measure",
            InstructionKind::Reset => "reset",
            InstructionKind::Barrier => "barrier",
        }
    }

    pub fn is_gate(&self) -> bool {
        matches!(self.kind, InstructionKind::Gate(_))
    }

    pub fn is_measure(&self) -> bool {
        self.kind == InstructionKind::Measure
    }

    pub fn is_barrier(&self) -> bool {
        self.kind == InstructionKind::Barrier
    }

    /// The same operation placed `qubit_offset`/`clbit_offset` further along
    /// a wider circuit.
    pub fn shifted(&self, qubit_offset: u32, clbit_offset: u32) -> Self {
        Self::new(
            self.kind.clone(),
            self.qubits.iter().map(|q| q.offset(qubit_offset)).collect(),
            self.clbits.iter().map(|c| c.offset(clbit_offset)).collect(),
        )
    }
}
