//! Dense statevector engine.
//!
//! Every gate is expressed as a 2x2 unitary on one target qubit, optionally
//! conditioned on a set of control qubits. Qubit `q` is bit `q` of the basis
//! state index, so bitstrings read with qubit 0 rightmost.

use num_complex::Complex64;
use rand::Rng;
use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, FRAC_PI_4};

use qvirt_ir::{Instruction, InstructionKind, StandardGate};

type Matrix = [[Complex64; 2]; 2];

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

fn diagonal(theta: f64) -> Matrix {
    [[ONE, ZERO], [ZERO, Complex64::from_polar(1.0, theta)]]
}

fn unitary(gate: StandardGate) -> Option<Matrix> {
    let h = Complex64::new(FRAC_1_SQRT_2, 0.0);
    Some(match gate {
        StandardGate::I => [[ONE, ZERO], [ZERO, ONE]],
        StandardGate::X | StandardGate::CX | StandardGate::CCX => [[ZERO, ONE], [ONE, ZERO]],
        StandardGate::Y | StandardGate::CY => [[ZERO, -I], [I, ZERO]],
        StandardGate::Z | StandardGate::CZ => diagonal(std::f64::consts::PI),
        StandardGate::H => [[h, h], [h, -h]],
        StandardGate::S => diagonal(FRAC_PI_2),
        StandardGate::Sdg => diagonal(-FRAC_PI_2),
        StandardGate::T => diagonal(FRAC_PI_4),
        StandardGate::Tdg => diagonal(-FRAC_PI_4),
        StandardGate::P(theta) | StandardGate::CP(theta) => diagonal(theta),
        StandardGate::SX => rx(FRAC_PI_2),
        StandardGate::Rx(theta) => rx(theta),
        StandardGate::Ry(theta) => {
            let (s, c) = (theta / 2.0).sin_cos();
            [[ONE * c, ONE * -s], [ONE * s, ONE * c]]
        }
        StandardGate::Rz(theta) => [
            [Complex64::from_polar(1.0, -theta / 2.0), ZERO],
            [ZERO, Complex64::from_polar(1.0, theta / 2.0)],
        ],
        StandardGate::Swap => return None,
    })
}

fn rx(theta: f64) -> Matrix {
    let (s, c) = (theta / 2.0).sin_cos();
    let off = Complex64::new(0.0, -s);
    [[ONE * c, off], [off, ONE * c]]
}

/// Amplitudes of an `n`-qubit register.
pub struct Statevector {
    amplitudes: Vec<Complex64>,
}

impl Statevector {
    /// |0...0⟩ on `num_qubits` qubits.
    pub fn new(num_qubits: usize) -> Self {
        let mut amplitudes = vec![ZERO; 1 << num_qubits];
        amplitudes[0] = ONE;
        Self { amplitudes }
    }

    /// Apply an instruction. Measurements and barriers leave the state alone.
    pub fn apply(&mut self, instruction: &Instruction) {
        let qubits: Vec<usize> = instruction.qubits.iter().map(|q| q.0 as usize).collect();
        match &instruction.kind {
            InstructionKind::Gate(gate) => self.apply_gate(*gate, &qubits),
            InstructionKind::Reset => {
                if let Some(&qubit) = qubits.first() {
                    self.reset(qubit);
                }
            }
            InstructionKind::Measure | InstructionKind::Barrier => {}
        }
    }

    fn apply_gate(&mut self, gate: StandardGate, qubits: &[usize]) {
        let Some((&target, controls)) = qubits.split_last() else {
            return;
        };
        match unitary(gate) {
            Some(matrix) => {
                let control_mask = controls.iter().fold(0usize, |m, c| m | (1 << c));
                self.apply_controlled(control_mask, target, &matrix);
            }
            None => {
                if let [a, b] = qubits {
                    self.swap(*a, *b);
                }
            }
        }
    }

    /// Apply `matrix` to `target` on every basis state whose `control_mask`
    /// bits are all set.
    fn apply_controlled(&mut self, control_mask: usize, target: usize, matrix: &Matrix) {
        let bit = 1 << target;
        for low in 0..self.amplitudes.len() {
            if low & bit != 0 || low & control_mask != control_mask {
                continue;
            }
            let high = low | bit;
            let (a, b) = (self.amplitudes[low], self.amplitudes[high]);
            self.amplitudes[low] = matrix[0][0] * a + matrix[0][1] * b;
            self.amplitudes[high] = matrix[1][0] * a + matrix[1][1] * b;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        let (bit_a, bit_b) = (1 << a, 1 << b);
        for index in 0..self.amplitudes.len() {
            if index & bit_a != 0 && index & bit_b == 0 {
                self.amplitudes.swap(index, index ^ bit_a ^ bit_b);
            }
        }
    }

    /// Fold the |1⟩ half of `qubit` onto |0⟩, then renormalize.
    fn reset(&mut self, qubit: usize) {
        let bit = 1 << qubit;
        let mut norm = 0.0;
        for index in 0..self.amplitudes.len() {
            if index & bit == 0 {
                let merged = (self.amplitudes[index].norm_sqr()
                    + self.amplitudes[index | bit].norm_sqr())
                .sqrt();
                self.amplitudes[index] = ONE * merged;
                self.amplitudes[index | bit] = ZERO;
                norm += merged * merged;
            }
        }
        if norm > 0.0 {
            let scale = norm.sqrt().recip();
            self.amplitudes.iter_mut().for_each(|a| *a *= scale);
        }
    }

    /// Probability of each computational basis state.
    pub fn probabilities(&self) -> Vec<f64> {
        self.amplitudes.iter().map(Complex64::norm_sqr).collect()
    }
}

/// Draws basis states from a fixed distribution.
pub struct Sampler {
    cumulative: Vec<f64>,
}

impl Sampler {
    /// Build a sampler over `probabilities`.
    pub fn new(probabilities: &[f64]) -> Self {
        let cumulative = probabilities
            .iter()
            .scan(0.0, |acc, p| {
                *acc += p;
                Some(*acc)
            })
            .collect();
        Self { cumulative }
    }

    /// Sample one basis state index.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let r: f64 = rng.r#gen::<f64>() * total;
        self.cumulative
            .partition_point(|c| *c <= r)
            .min(self.cumulative.len().saturating_sub(1))
    }
}
