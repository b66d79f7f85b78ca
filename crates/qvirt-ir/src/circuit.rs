//! High-level circuit builder API.

use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::gate::StandardGate;
use crate::instruction::{Instruction, InstructionKind};
use crate::qubit::{ClbitId, QubitId, Register};

/// Name of the classical register created by [`Circuit::measure_all`] and
/// [`Circuit::add_measurements`].
pub const MEASURE_REGISTER: &str = "meas";

/// Register name used for member `index` inside an aggregated circuit.
pub fn aggregated_register_name(index: usize, original: &str) -> String {
    format!("circ{index}reg{original}")
}

/// Where one member circuit lives inside an aggregated circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLayout {
    /// First qubit of the member inside the combined circuit.
    pub qubit_offset: u32,
    /// Number of qubits the member occupies.
    pub num_qubits: u32,
    /// First classical bit of the member inside the combined circuit.
    pub clbit_offset: u32,
    /// Number of classical bits the member occupies.
    pub num_clbits: u32,
    /// The member's quantum registers under their original names.
    pub qregs: Vec<Register>,
    /// The member's classical registers under their original names.
    pub cregs: Vec<Register>,
}

/// A quantum circuit.
///
/// Qubits and classical bits are addressed by flat indices across all
/// registers, in the order the registers were declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// Name of the circuit.
    name: String,
    /// Quantum registers in declaration order.
    qregs: Vec<Register>,
    /// Classical registers in declaration order.
    cregs: Vec<Register>,
    /// Instructions in program order.
    instructions: Vec<Instruction>,
}

impl Circuit {
    /// Create a new empty circuit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qregs: vec![],
            cregs: vec![],
            instructions: vec![],
        }
    }

    /// Create a circuit with a `q` register and, if non-empty, a `c` register.
    pub fn with_size(name: impl Into<String>, num_qubits: u32, num_clbits: u32) -> Self {
        let mut circuit = Self::new(name);
        if num_qubits > 0 {
            circuit.qregs.push(Register::new("q", num_qubits));
        }
        if num_clbits > 0 {
            circuit.cregs.push(Register::new("c", num_clbits));
        }
        circuit
    }

    /// Create a GHZ circuit over `n` qubits, measured into `meas`.
    pub fn ghz(n: u32) -> IrResult<Self> {
        let mut circuit = Self::with_size(format!("ghz_{n}"), n, 0);
        if n > 0 {
            circuit.h(QubitId(0))?;
        }
        for i in 1..n {
            circuit.cx(QubitId(i - 1), QubitId(i))?;
        }
        circuit.measure_all()?;
        Ok(circuit)
    }

    /// Create a measured Bell-state circuit.
    pub fn bell() -> IrResult<Self> {
        let mut circuit = Self::ghz(2)?;
        circuit.name = "bell".into();
        Ok(circuit)
    }

    /// Add a quantum register and return its qubits.
    pub fn add_qreg(&mut self, name: impl Into<String>, size: u32) -> IrResult<Vec<QubitId>> {
        let name = name.into();
        if self.qregs.iter().any(|r| r.name == name) {
            return Err(IrError::DuplicateRegister(name));
        }
        let start = self.num_qubits();
        self.qregs.push(Register::new(name, size));
        Ok((start..start + size).map(QubitId).collect())
    }

    /// Add a classical register and return its bits.
    pub fn add_creg(&mut self, name: impl Into<String>, size: u32) -> IrResult<Vec<ClbitId>> {
        let name = name.into();
        if self.cregs.iter().any(|r| r.name == name) {
            return Err(IrError::DuplicateRegister(name));
        }
        let start = self.num_clbits();
        self.cregs.push(Register::new(name, size));
        Ok((start..start + size).map(ClbitId).collect())
    }

    /// Name of the circuit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the circuit.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Total number of qubits.
    pub fn num_qubits(&self) -> u32 {
        self.qregs.iter().map(|r| r.size).sum()
    }

    /// Total number of classical bits.
    pub fn num_clbits(&self) -> u32 {
        self.cregs.iter().map(|r| r.size).sum()
    }

    /// Quantum registers in declaration order.
    pub fn qregs(&self) -> &[Register] {
        &self.qregs
    }

    /// Classical registers in declaration order.
    pub fn cregs(&self) -> &[Register] {
        &self.cregs
    }

    /// Instructions in program order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Check whether the circuit contains any measurement.
    pub fn has_measurements(&self) -> bool {
        self.instructions.iter().any(Instruction::is_measure)
    }

    /// `(qubit, clbit)` pairs of every measurement, in program order.
    pub fn measured_qubits(&self) -> Vec<(QubitId, ClbitId)> {
        self.instructions
            .iter()
            .filter(|inst| inst.is_measure())
            .flat_map(|inst| inst.qubits.iter().copied().zip(inst.clbits.iter().copied()))
            .collect()
    }

    /// Circuit depth (longest path through non-barrier instructions).
    pub fn depth(&self) -> usize {
        let mut qubit_level = vec![0usize; self.num_qubits() as usize];
        let mut clbit_level = vec![0usize; self.num_clbits() as usize];
        let mut depth = 0;

        for inst in self.instructions.iter().filter(|i| !i.is_barrier()) {
            let level = inst
                .qubits
                .iter()
                .map(|q| qubit_level[q.0 as usize])
                .chain(inst.clbits.iter().map(|c| clbit_level[c.0 as usize]))
                .max()
                .unwrap_or(0)
                + 1;
            for q in &inst.qubits {
                qubit_level[q.0 as usize] = level;
            }
            for c in &inst.clbits {
                clbit_level[c.0 as usize] = level;
            }
            depth = depth.max(level);
        }

        depth
    }

    /// Append an instruction after checking its operands.
    pub fn push(&mut self, instruction: Instruction) -> IrResult<&mut Self> {
        self.check_instruction(&instruction)?;
        self.instructions.push(instruction);
        Ok(self)
    }

    /// Check every instruction against the circuit's registers.
    pub fn validate(&self) -> IrResult<()> {
        self.instructions
            .iter()
            .try_for_each(|inst| self.check_instruction(inst))
    }

    fn check_instruction(&self, inst: &Instruction) -> IrResult<()> {
        let num_qubits = self.num_qubits();
        let num_clbits = self.num_clbits();
        let gate_name = || Some(inst.name().to_string());

        if let InstructionKind::Gate(gate) = &inst.kind {
            let got = inst.qubits.len() as u32;
            if got != gate.num_qubits() {
                return Err(IrError::QubitCountMismatch {
                    gate_name: gate.name().to_string(),
                    expected: gate.num_qubits(),
                    got,
                });
            }
        }
        if inst.is_measure() && inst.qubits.len() != inst.clbits.len() {
            return Err(IrError::MeasureArity {
                qubits: inst.qubits.len(),
                clbits: inst.clbits.len(),
            });
        }

        for (i, q) in inst.qubits.iter().enumerate() {
            if q.0 >= num_qubits {
                return Err(IrError::QubitNotFound {
                    qubit: *q,
                    gate_name: gate_name(),
                });
            }
            if inst.qubits[..i].contains(q) {
                return Err(IrError::DuplicateQubit {
                    qubit: *q,
                    gate_name: gate_name(),
                });
            }
        }
        for c in &inst.clbits {
            if c.0 >= num_clbits {
                return Err(IrError::ClbitNotFound {
                    clbit: *c,
                    gate_name: gate_name(),
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Gates
    // =========================================================================

    fn gate(&mut self, gate: StandardGate, qubits: &[QubitId]) -> IrResult<&mut Self> {
        self.push(Instruction::gate(gate, qubits.iter().copied()))
    }

    /// Apply Hadamard gate.
    pub fn h(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::H, &[qubit])
    }

    /// Apply Pauli-X gate.
    pub fn x(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::X, &[qubit])
    }

    /// Apply Pauli-Y gate.
    pub fn y(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Y, &[qubit])
    }

    /// Apply Pauli-Z gate.
    pub fn z(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Z, &[qubit])
    }

    /// Apply S gate.
    pub fn s(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::S, &[qubit])
    }

    /// Apply S-dagger gate.
    pub fn sdg(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Sdg, &[qubit])
    }

    /// Apply T gate.
    pub fn t(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::T, &[qubit])
    }

    /// Apply T-dagger gate.
    pub fn tdg(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Tdg, &[qubit])
    }

    /// Apply sqrt(X) gate.
    pub fn sx(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::SX, &[qubit])
    }

    /// Apply Rx rotation gate.
    pub fn rx(&mut self, theta: f64, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Rx(theta), &[qubit])
    }

    /// Apply Ry rotation gate.
    pub fn ry(&mut self, theta: f64, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Ry(theta), &[qubit])
    }

    /// Apply Rz rotation gate.
    pub fn rz(&mut self, theta: f64, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Rz(theta), &[qubit])
    }

    /// Apply phase gate.
    pub fn p(&mut self, theta: f64, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::P(theta), &[qubit])
    }

    /// Apply CNOT gate.
    pub fn cx(&mut self, control: QubitId, target: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::CX, &[control, target])
    }

    /// Apply controlled-Y gate.
    pub fn cy(&mut self, control: QubitId, target: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::CY, &[control, target])
    }

    /// Apply controlled-Z gate.
    pub fn cz(&mut self, control: QubitId, target: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::CZ, &[control, target])
    }

    /// Apply SWAP gate.
    pub fn swap(&mut self, q1: QubitId, q2: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::Swap, &[q1, q2])
    }

    /// Apply controlled phase gate.
    pub fn cp(&mut self, theta: f64, control: QubitId, target: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::CP(theta), &[control, target])
    }

    /// Apply Toffoli gate.
    pub fn ccx(&mut self, c1: QubitId, c2: QubitId, target: QubitId) -> IrResult<&mut Self> {
        self.gate(StandardGate::CCX, &[c1, c2, target])
    }

    /// Reset a qubit to |0⟩.
    pub fn reset(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.push(Instruction::reset(qubit))
    }

    /// Insert a barrier across the given qubits.
    pub fn barrier(&mut self, qubits: impl IntoIterator<Item = QubitId>) -> IrResult<&mut Self> {
        self.push(Instruction::barrier(qubits))
    }

    // =========================================================================
    // Measurement
    // =========================================================================

    /// Measure a qubit into a classical bit.
    pub fn measure(&mut self, qubit: QubitId, clbit: ClbitId) -> IrResult<&mut Self> {
        self.push(Instruction::measure(qubit, clbit))
    }

    /// Measure every qubit into a fresh `meas` register.
    pub fn measure_all(&mut self) -> IrResult<&mut Self> {
        let qubits: Vec<_> = (0..self.num_qubits()).map(QubitId).collect();
        let name = self.fresh_creg_name(MEASURE_REGISTER);
        let clbits = self.add_creg(name, qubits.len() as u32)?;
        self.push(Instruction::measure_many(qubits, clbits)?)
    }

    /// Copy of this circuit without measurements or classical registers.
    pub fn remove_measurements(&self) -> Circuit {
        Circuit {
            name: self.name.clone(),
            qregs: self.qregs.clone(),
            cregs: vec![],
            instructions: self
                .instructions
                .iter()
                .filter(|inst| !inst.is_measure())
                .cloned()
                .collect(),
        }
    }

    /// Copy of this circuit that measures `qubits`, in order, into a fresh
    /// classical register.
    pub fn add_measurements(&self, qubits: &[QubitId]) -> IrResult<Circuit> {
        let mut circuit = self.clone();
        let name = circuit.fresh_creg_name(MEASURE_REGISTER);
        let clbits = circuit.add_creg(name, qubits.len() as u32)?;
        circuit.push(Instruction::measure_many(qubits.iter().copied(), clbits)?)?;
        Ok(circuit)
    }

    fn fresh_creg_name(&self, base: &str) -> String {
        let mut name = base.to_string();
        let mut n = 0;
        while self.cregs.iter().any(|r| r.name == name) {
            n += 1;
            name = format!("{base}{n}");
        }
        name
    }

    // =========================================================================
    // Composition
    // =========================================================================

    /// Copy of this circuit with `other`'s instructions appended, its qubits
    /// shifted by `qubit_offset` and its classical bits by `clbit_offset`.
    pub fn compose(&self, other: &Circuit, qubit_offset: u32, clbit_offset: u32) -> IrResult<Circuit> {
        if qubit_offset + other.num_qubits() > self.num_qubits()
            || clbit_offset + other.num_clbits() > self.num_clbits()
        {
            return Err(IrError::ComposeOutOfRange {
                name: other.name.clone(),
                qubit_offset,
                clbit_offset,
            });
        }

        let mut circuit = self.clone();
        for inst in &other.instructions {
            circuit.push(inst.shifted(qubit_offset, clbit_offset))?;
        }
        Ok(circuit)
    }

    /// Place `members` side by side in one wider circuit.
    ///
    /// Member `i`'s registers are renamed to `circ{i}reg{name}`. Returns the
    /// combined circuit and one [`RegisterLayout`] per member, in order.
    pub fn combine(
        name: impl Into<String>,
        members: &[&Circuit],
    ) -> IrResult<(Circuit, Vec<RegisterLayout>)> {
        let mut combined = Circuit::new(name);
        let mut layouts = Vec::with_capacity(members.len());

        for (index, member) in members.iter().enumerate() {
            let layout = RegisterLayout {
                qubit_offset: combined.num_qubits(),
                num_qubits: member.num_qubits(),
                clbit_offset: combined.num_clbits(),
                num_clbits: member.num_clbits(),
                qregs: member.qregs.clone(),
                cregs: member.cregs.clone(),
            };
            for reg in &member.qregs {
                combined.add_qreg(aggregated_register_name(index, &reg.name), reg.size)?;
            }
            for reg in &member.cregs {
                combined.add_creg(aggregated_register_name(index, &reg.name), reg.size)?;
            }
            layouts.push(layout);
        }

        for (member, layout) in members.iter().zip(&layouts) {
            combined = combined.compose(member, layout.qubit_offset, layout.clbit_offset)?;
        }

        Ok((combined, layouts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bell_circuit() {
        let circuit = Circuit::bell().unwrap();
        assert_eq!(circuit.num_qubits(), 2);
        assert_eq!(circuit.num_clbits(), 2);
        assert_eq!(circuit.depth(), 3);
        assert!(circuit.has_measurements());
        assert_eq!(circuit.cregs()[0].name, MEASURE_REGISTER);
    }

    #[test]
    fn test_registers() {
        let mut circuit = Circuit::new("regs");
        let a = circuit.add_qreg("a", 2).unwrap();
        let b = circuit.add_qreg("b", 3).unwrap();
        assert_eq!(a, vec![QubitId(0), QubitId(1)]);
        assert_eq!(b[0], QubitId(2));
        assert_eq!(circuit.num_qubits(), 5);
        assert!(matches!(
            circuit.add_qreg("a", 1),
            Err(IrError::DuplicateRegister(_))
        ));
    }

    #[test]
    fn test_operand_checks() {
        let mut circuit = Circuit::with_size("small", 2, 1);
        assert!(matches!(
            circuit.h(QubitId(2)),
            Err(IrError::QubitNotFound { .. })
        ));
        assert!(matches!(
            circuit.cx(QubitId(1), QubitId(1)),
            Err(IrError::DuplicateQubit { .. })
        ));
        assert!(matches!(
            circuit.measure(QubitId(0), ClbitId(3)),
            Err(IrError::ClbitNotFound { .. })
        ));
        assert!(circuit.validate().is_ok());
    }

    #[test]
    fn test_remove_and_add_measurements() {
        let circuit = Circuit::ghz(3).unwrap();
        let stripped = circuit.remove_measurements();
        assert!(!stripped.has_measurements());
        assert_eq!(stripped.num_clbits(), 0);
        assert_eq!(stripped.num_qubits(), 3);

        let remeasured = stripped.add_measurements(&[QubitId(2), QubitId(0)]).unwrap();
        assert_eq!(remeasured.num_clbits(), 2);
        assert_eq!(
            remeasured.measured_qubits(),
            vec![(QubitId(2), ClbitId(0)), (QubitId(0), ClbitId(1))]
        );
    }

    #[test]
    fn test_combine_renames_and_offsets() {
        let bell = Circuit::bell().unwrap();
        let ghz = Circuit::ghz(3).unwrap();
        let (combined, layouts) = Circuit::combine("agg", &[&bell, &ghz]).unwrap();

        assert_eq!(combined.num_qubits(), 5);
        assert_eq!(combined.num_clbits(), 5);
        assert_eq!(combined.qregs()[0].name, "circ0regq");
        assert_eq!(combined.qregs()[1].name, "circ1regq");
        assert_eq!(combined.cregs()[1].name, "circ1regmeas");

        assert_eq!(layouts[1].qubit_offset, 2);
        assert_eq!(layouts[1].clbit_offset, 2);
        assert_eq!(layouts[1].cregs[0].name, "meas");
        assert_eq!(
            combined.instructions().len(),
            bell.instructions().len() + ghz.instructions().len()
        );
        // The second member's CX chain is shifted past the Bell pair.
        assert!(
            combined
                .instructions()
                .iter()
                .any(|inst| inst.qubits == vec![QubitId(3), QubitId(4)])
        );
    }

    #[test]
    fn test_compose_out_of_range() {
        let small = Circuit::with_size("small", 2, 0);
        let big = Circuit::ghz(3).unwrap();
        assert!(matches!(
            small.compose(&big, 0, 0),
            Err(IrError::ComposeOutOfRange { .. })
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_combined_layouts_are_contiguous(sizes in prop::collection::vec(1u32..6, 1..5)) {
                let members: Vec<Circuit> = sizes.iter().map(|n| Circuit::ghz(*n).unwrap()).collect();
                let refs: Vec<&Circuit> = members.iter().collect();
                let (combined, layouts) = Circuit::combine("agg", &refs).unwrap();

                prop_assert_eq!(layouts.len(), members.len());
                let mut next_qubit = 0;
                let mut next_clbit = 0;
                for (member, layout) in members.iter().zip(&layouts) {
                    prop_assert_eq!(layout.qubit_offset, next_qubit);
                    prop_assert_eq!(layout.clbit_offset, next_clbit);
                    prop_assert_eq!(layout.num_qubits, member.num_qubits());
                    prop_assert_eq!(layout.num_clbits, member.num_clbits());
                    next_qubit += layout.num_qubits;
                    next_clbit += layout.num_clbits;
                }
                prop_assert_eq!(combined.num_qubits(), next_qubit);
                prop_assert_eq!(combined.num_clbits(), next_clbit);
                prop_assert_eq!(
                    combined.instructions().len(),
                    members.iter().map(|m| m.instructions().len()).sum::<usize>()
                );
                prop_assert!(combined.validate().is_ok());
            }
        }
    }
}
