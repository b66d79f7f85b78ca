//! Cut solutions and instance bookkeeping.

use serde::{Deserialize, Serialize};

use qvirt_ir::{Circuit, QubitId};

/// Position of one wire segment inside a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    /// Subcircuit index.
    pub subcircuit: usize,
    /// Segment (subcircuit qubit) index.
    pub segment: usize,
}

/// A stretch of one parent qubit's wire that lives in one subcircuit.
///
/// A segment that starts at a cut is prepared in a cut initialization state;
/// one that ends at a cut is measured in a cut basis. A segment with no
/// outgoing cut carries the parent qubit's final value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Parent qubit this segment belongs to.
    pub qubit: QubitId,
    /// Cut feeding this segment, if any.
    pub init_cut: Option<usize>,
    /// Cut this segment feeds, if any.
    pub meas_cut: Option<usize>,
}

impl Segment {
    /// Whether this segment holds its qubit's final value.
    pub fn is_output(&self) -> bool {
        self.meas_cut.is_none()
    }
}

/// A wire cut between two segments of the same parent qubit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCut {
    /// Parent qubit that was cut.
    pub qubit: QubitId,
    /// Segment measured at the cut.
    pub upstream: SegmentRef,
    /// Segment initialized at the cut.
    pub downstream: SegmentRef,
}

/// One piece of a cut circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subcircuit {
    /// Unmeasured body; qubit `i` is `segments[i]`.
    pub body: Circuit,
    /// Wire segments in subcircuit qubit order.
    pub segments: Vec<Segment>,
}

/// A cut endpoint inside a subcircuit, in the order used by combination
/// indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutSlot {
    /// Segment `segment` is initialized from cut `cut`.
    Init {
        /// Cut index.
        cut: usize,
        /// Segment index.
        segment: usize,
    },
    /// Segment `segment` is measured into cut `cut`.
    Meas {
        /// Cut index.
        cut: usize,
        /// Segment index.
        segment: usize,
    },
}

impl CutSlot {
    /// Number of instance variants this slot contributes.
    pub fn radix(&self) -> usize {
        match self {
            CutSlot::Init { .. } => 4,
            CutSlot::Meas { .. } => 3,
        }
    }

    /// Cut index of this slot.
    pub fn cut(&self) -> usize {
        match self {
            CutSlot::Init { cut, .. } | CutSlot::Meas { cut, .. } => *cut,
        }
    }
}

impl Subcircuit {
    /// Number of qubits.
    pub fn width(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Cut endpoints in combination order.
    pub fn slots(&self) -> Vec<CutSlot> {
        let mut slots = Vec::new();
        for (segment, s) in self.segments.iter().enumerate() {
            if let Some(cut) = s.init_cut {
                slots.push(CutSlot::Init { cut, segment });
            }
            if let Some(cut) = s.meas_cut {
                slots.push(CutSlot::Meas { cut, segment });
            }
        }
        slots
    }

    /// Number of distinct instances to run.
    pub fn num_instances(&self) -> usize {
        self.slots().iter().map(CutSlot::radix).product()
    }

    /// `(segment index, parent qubit)` of every output segment.
    pub fn outputs(&self) -> Vec<(usize, QubitId)> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_output())
            .map(|(i, s)| (i, s.qubit))
            .collect()
    }
}

/// Result of a successful cut search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSolution {
    /// Width of the parent circuit.
    pub num_qubits: u32,
    /// The pieces.
    pub subcircuits: Vec<Subcircuit>,
    /// Wire cuts between pieces.
    pub cuts: Vec<WireCut>,
}

impl CutSolution {
    /// Number of wire cuts.
    pub fn num_cuts(&self) -> usize {
        self.cuts.len()
    }

    /// Widest subcircuit.
    pub fn max_width(&self) -> u32 {
        self.subcircuits.iter().map(Subcircuit::width).max().unwrap_or(0)
    }

    /// Instances across all subcircuits.
    pub fn total_instances(&self) -> usize {
        self.subcircuits.iter().map(Subcircuit::num_instances).sum()
    }
}

/// Identifies one executed instance of one subcircuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Subcircuit index.
    pub subcircuit: usize,
    /// Mixed-radix index over the subcircuit's cut slots.
    pub combination: usize,
}

/// A runnable instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcircuitInstance {
    /// Which instance this is.
    pub key: InstanceKey,
    /// Measured circuit; classical bit `i` records qubit `i`.
    pub circuit: Circuit,
    /// Shots to run.
    pub shots: u32,
}

/// Split a combination index into per-slot digits, first slot least
/// significant.
pub fn decode_combination(slots: &[CutSlot], mut combination: usize) -> Vec<usize> {
    slots
        .iter()
        .map(|slot| {
            let digit = combination % slot.radix();
            combination /= slot.radix();
            digit
        })
        .collect()
}

/// Inverse of [`decode_combination`].
pub fn encode_combination(slots: &[CutSlot], digits: &[usize]) -> usize {
    slots
        .iter()
        .zip(digits)
        .rev()
        .fold(0, |acc, (slot, digit)| acc * slot.radix() + digit)
}
