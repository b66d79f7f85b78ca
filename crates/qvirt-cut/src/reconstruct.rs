//! Classical recombination of subcircuit outcomes.
//!
//! Each cut wire is expanded in the Pauli basis,
//! `ρ = ½ Σ_{O ∈ {I,X,Y,Z}} Tr(Oρ) O`. For one assignment `e` of Paulis to
//! the `K` cuts every subcircuit contributes a term `f_s(x_s; e)` over its
//! output bits, and the parent distribution is
//! `P(x) = 2^-K Σ_e Π_s f_s(x_s; e)`.
//!
//! Upstream ends take the I and Z terms from the computational-basis run
//! (Z with the sign of the cut bit) and X/Y from the rotated runs. Downstream
//! ends rebuild the operator from initial states:
//! `I = ρ0 + ρ1`, `Z = ρ0 - ρ1`, `X = 2ρ+ - ρ0 - ρ1`, `Y = 2ρ+i - ρ0 - ρ1`.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{CutError, CutResult};
use crate::instance::{InitState, MeasBasis};
use crate::solution::{CutSlot, CutSolution, InstanceKey, encode_combination};

/// Widest parent the dense reconstruction accepts.
pub const MAX_RECONSTRUCT_QUBITS: u32 = 24;

/// Probability distribution keyed by bitstring.
pub type Distribution = BTreeMap<String, f64>;

/// Outcome distribution of every executed instance.
pub type InstanceOutcomes = FxHashMap<InstanceKey, Distribution>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pauli {
    I,
    X,
    Y,
    Z,
}

impl Pauli {
    fn from_digit(digit: usize) -> Self {
        match digit % 4 {
            0 => Pauli::I,
            1 => Pauli::X,
            2 => Pauli::Y,
            _ => Pauli::Z,
        }
    }

    fn init_terms(self) -> &'static [(InitState, f64)] {
        match self {
            Pauli::I => &[(InitState::Zero, 1.0), (InitState::One, 1.0)],
            Pauli::Z => &[(InitState::Zero, 1.0), (InitState::One, -1.0)],
            Pauli::X => &[
                (InitState::Plus, 2.0),
                (InitState::Zero, -1.0),
                (InitState::One, -1.0),
            ],
            Pauli::Y => &[
                (InitState::PlusI, 2.0),
                (InitState::Zero, -1.0),
                (InitState::One, -1.0),
            ],
        }
    }

    fn meas_basis(self) -> MeasBasis {
        match self {
            Pauli::I | Pauli::Z => MeasBasis::I,
            Pauli::X => MeasBasis::X,
            Pauli::Y => MeasBasis::Y,
        }
    }
}

fn digit_of(index: usize, position: usize) -> usize {
    (index >> (2 * position)) & 3
}

/// `f_s(x_s; e)` for every local Pauli assignment `e` (rows) and output
/// pattern `x_s` (columns).
fn subcircuit_tensor(
    solution: &CutSolution,
    subcircuit: usize,
    outcomes: &InstanceOutcomes,
) -> CutResult<Array2<f64>> {
    let sub = &solution.subcircuits[subcircuit];
    let slots = sub.slots();
    let outputs = sub.outputs();

    let mut decoded = Vec::with_capacity(sub.num_instances());
    for combination in 0..sub.num_instances() {
        let key = InstanceKey {
            subcircuit,
            combination,
        };
        let dist = outcomes.get(&key).ok_or(CutError::MissingInstance {
            subcircuit,
            combination,
        })?;
        let mut entries = Vec::with_capacity(dist.len());
        for (bitstring, p) in dist {
            let bits = usize::from_str_radix(bitstring, 2).map_err(|_| {
                CutError::MalformedOutcome {
                    subcircuit,
                    bitstring: bitstring.clone(),
                }
            })?;
            entries.push((bits, *p));
        }
        decoded.push(entries);
    }

    let rows = 1usize << (2 * slots.len());
    let mut table = Array2::<f64>::zeros((rows, 1 << outputs.len()));

    for e in 0..rows {
        let paulis: Vec<Pauli> = (0..slots.len())
            .map(|j| Pauli::from_digit(digit_of(e, j)))
            .collect();

        // Expand every downstream end into its initial-state terms.
        let mut terms: Vec<(Vec<usize>, f64)> = vec![(vec![0; slots.len()], 1.0)];
        for (j, slot) in slots.iter().enumerate() {
            match slot {
                CutSlot::Meas { .. } => {
                    for (digits, _) in &mut terms {
                        digits[j] = paulis[j].meas_basis().digit();
                    }
                }
                CutSlot::Init { .. } => {
                    terms = terms
                        .into_iter()
                        .flat_map(|(digits, coef)| {
                            paulis[j].init_terms().iter().map(move |(state, c)| {
                                let mut digits = digits.clone();
                                digits[j] = state.digit();
                                (digits, coef * c)
                            })
                        })
                        .collect();
                }
            }
        }

        for (digits, coef) in terms {
            let combination = encode_combination(&slots, &digits);
            for &(bits, p) in &decoded[combination] {
                let mut sign = 1.0;
                for (j, slot) in slots.iter().enumerate() {
                    if let CutSlot::Meas { segment, .. } = slot {
                        if paulis[j] != Pauli::I && (bits >> segment) & 1 == 1 {
                            sign = -sign;
                        }
                    }
                }
                let x = outputs
                    .iter()
                    .enumerate()
                    .fold(0usize, |acc, (k, (segment, _))| {
                        acc | (((bits >> segment) & 1) << k)
                    });
                table[[e, x]] += coef * sign * p;
            }
        }
    }

    Ok(table)
}

/// Recombine instance outcomes into the parent's distribution over all of
/// its qubits (parent qubit `q` is bit `q`, rightmost first).
///
/// Shot noise can push individual terms negative; those are clipped to zero
/// and the result renormalized.
pub(crate) fn reconstruct(
    solution: &CutSolution,
    outcomes: &InstanceOutcomes,
) -> CutResult<Distribution> {
    let n = solution.num_qubits;
    if n > MAX_RECONSTRUCT_QUBITS {
        return Err(CutError::TooWide(n));
    }
    let size = 1usize << n;
    let num_cuts = solution.num_cuts();

    let tables = (0..solution.subcircuits.len())
        .map(|s| subcircuit_tensor(solution, s, outcomes))
        .collect::<CutResult<Vec<_>>>()?;

    // Output pattern of each subcircuit for every parent state.
    let gathers: Vec<Vec<usize>> = solution
        .subcircuits
        .iter()
        .map(|sub| {
            let outputs = sub.outputs();
            (0..size)
                .map(|x| {
                    outputs.iter().enumerate().fold(0usize, |acc, (k, (_, q))| {
                        acc | (((x >> q.0) & 1) << k)
                    })
                })
                .collect()
        })
        .collect();
    let slot_cuts: Vec<Vec<usize>> = solution
        .subcircuits
        .iter()
        .map(|sub| sub.slots().iter().map(CutSlot::cut).collect())
        .collect();

    let mut probs = Array1::<f64>::zeros(size);
    for e in 0..(1usize << (2 * num_cuts)) {
        let rows: Vec<_> = tables
            .iter()
            .zip(&slot_cuts)
            .map(|(table, cuts)| {
                let local = cuts
                    .iter()
                    .enumerate()
                    .fold(0usize, |acc, (j, cut)| acc | (digit_of(e, *cut) << (2 * j)));
                table.row(local)
            })
            .collect();
        if rows.iter().any(|row| row.iter().all(|v| *v == 0.0)) {
            continue;
        }
        for x in 0..size {
            let term: f64 = rows
                .iter()
                .zip(&gathers)
                .map(|(row, gather)| row[gather[x]])
                .product();
            probs[x] += term;
        }
    }

    probs *= 0.5f64.powi(num_cuts as i32);
    probs.mapv_inplace(|p| p.max(0.0));
    let total = probs.sum();
    if total > 0.0 {
        probs /= total;
    }
    debug!(qubits = n, cuts = num_cuts, "Reconstructed distribution");

    Ok(probs
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > 0.0)
        .map(|(x, p)| (format!("{:0width$b}", x, width = n as usize), *p))
        .collect())
}
