//! Greedy wire-cut search.
//!
//! Qubits are first grouped into connected components of the interaction
//! graph. Components that fit the width limit are packed first-fit into
//! shared subcircuits without any cut. Wider components are walked gate by
//! gate: each gate goes to the feasible subcircuit that needs the fewest new
//! cuts and the fewest extra qubits, opening a new subcircuit when none fits.
//! A wire cut is recorded whenever a qubit continues in a different
//! subcircuit than the one holding its previous gate.

use petgraph::algo::tarjan_scc;
use petgraph::graph::UnGraph;
use rustc_hash::FxHashMap;
use tracing::debug;

use qvirt_ir::{Circuit, Instruction, QubitId};

use crate::constraints::CutConstraints;
use crate::error::CutResult;
use crate::solution::{CutSolution, Segment, SegmentRef, Subcircuit, WireCut};

/// Subcircuit under construction. Instructions already use segment indices.
#[derive(Default)]
struct PartBuilder {
    segments: Vec<Segment>,
    instructions: Vec<Instruction>,
}

/// Greedy gate-to-subcircuit assignment over one group of qubits.
struct Assigner<'a> {
    max_width: usize,
    parts: Vec<PartBuilder>,
    cuts: Vec<WireCut>,
    /// Current segment of each parent qubit.
    home: FxHashMap<u32, SegmentRef>,
    /// Single-qubit operations seen before the qubit was placed.
    pending: FxHashMap<u32, Vec<&'a Instruction>>,
}

impl<'a> Assigner<'a> {
    fn new(max_width: usize) -> Self {
        Self {
            max_width,
            parts: Vec::new(),
            cuts: Vec::new(),
            home: FxHashMap::default(),
            pending: FxHashMap::default(),
        }
    }

    /// `(new cuts, extra qubits)` for running `qubits` in `part`.
    fn cost(&self, part: usize, qubits: &[QubitId]) -> (usize, usize) {
        let mut cuts = 0;
        let mut extra = 0;
        for q in qubits {
            match self.home.get(&q.0) {
                Some(r) if r.subcircuit == part => {}
                Some(_) => {
                    cuts += 1;
                    extra += 1;
                }
                None => extra += 1,
            }
        }
        (cuts, extra)
    }

    fn width(&self, part: usize) -> usize {
        self.parts.get(part).map_or(0, |p| p.segments.len())
    }

    /// Pick the cheapest feasible part; `parts.len()` means a new one.
    fn choose(&self, qubits: &[QubitId]) -> Option<usize> {
        (0..=self.parts.len())
            .filter_map(|part| {
                let (cuts, extra) = self.cost(part, qubits);
                (self.width(part) + extra <= self.max_width).then_some((cuts, extra, part))
            })
            .min()
            .map(|(_, _, part)| part)
    }

    /// Give `qubit` a live segment in `part`, cutting its wire if it lives
    /// elsewhere.
    fn bring(&mut self, qubit: QubitId, part: usize) {
        if self.home.get(&qubit.0).is_some_and(|r| r.subcircuit == part) {
            return;
        }
        if part == self.parts.len() {
            self.parts.push(PartBuilder::default());
        }

        let segment = self.parts[part].segments.len();
        let here = SegmentRef {
            subcircuit: part,
            segment,
        };
        let mut init_cut = None;

        if let Some(prev) = self.home.get(&qubit.0).copied() {
            let cut = self.cuts.len();
            self.parts[prev.subcircuit].segments[prev.segment].meas_cut = Some(cut);
            self.cuts.push(WireCut {
                qubit,
                upstream: prev,
                downstream: here,
            });
            init_cut = Some(cut);
        }

        self.parts[part].segments.push(Segment {
            qubit,
            init_cut,
            meas_cut: None,
        });
        self.home.insert(qubit.0, here);

        for inst in self.pending.remove(&qubit.0).unwrap_or_default() {
            self.emit(part, inst);
        }
    }

    fn emit(&mut self, part: usize, inst: &Instruction) {
        let mut mapped = inst.clone();
        for q in &mut mapped.qubits {
            if let Some(r) = self.home.get(&q.0) {
                *q = QubitId(r.segment as u32);
            }
        }
        self.parts[part].instructions.push(mapped);
    }

    /// Place one operation. Returns `false` when no subcircuit can hold it.
    fn place(&mut self, inst: &'a Instruction) -> bool {
        if inst.qubits.len() == 1 && !self.home.contains_key(&inst.qubits[0].0) {
            self.pending.entry(inst.qubits[0].0).or_default().push(inst);
            return true;
        }
        let Some(part) = self.choose(&inst.qubits) else {
            return false;
        };
        for q in &inst.qubits {
            self.bring(*q, part);
        }
        self.emit(part, inst);
        true
    }

    /// Place qubits no multi-qubit gate has touched yet.
    fn place_idle(&mut self, qubits: &[QubitId]) -> bool {
        for q in qubits {
            if self.home.contains_key(&q.0) {
                continue;
            }
            match self.choose(std::slice::from_ref(q)) {
                Some(part) => self.bring(*q, part),
                None => return false,
            }
        }
        true
    }
}

/// Qubit groups: connected components, with the narrow ones packed together.
fn qubit_groups(circuit: &Circuit, max_width: usize) -> Vec<Vec<QubitId>> {
    let n = circuit.num_qubits() as usize;
    let mut graph = UnGraph::<u32, ()>::with_capacity(n, 0);
    let nodes: Vec<_> = (0..n as u32).map(|q| graph.add_node(q)).collect();
    for inst in circuit.instructions().iter().filter(|i| i.is_gate()) {
        for pair in inst.qubits.windows(2) {
            graph.update_edge(nodes[pair[0].0 as usize], nodes[pair[1].0 as usize], ());
        }
    }

    let mut components: Vec<Vec<QubitId>> = tarjan_scc(&graph)
        .into_iter()
        .map(|c| {
            let mut qubits: Vec<_> = c.into_iter().map(|idx| QubitId(graph[idx])).collect();
            qubits.sort();
            qubits
        })
        .collect();
    components.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

    let mut groups: Vec<Vec<QubitId>> = Vec::new();
    for component in components {
        if component.len() > max_width {
            groups.push(component);
            continue;
        }
        match groups
            .iter_mut()
            .find(|g| g.len() + component.len() <= max_width)
        {
            Some(group) => group.extend(component),
            None => groups.push(component),
        }
    }
    groups
}

/// Run the greedy search. `None` when the constraints cannot be met.
pub(crate) fn find_cuts(
    circuit: &Circuit,
    constraints: &CutConstraints,
) -> CutResult<Option<CutSolution>> {
    let max_width = constraints.max_subcircuit_qubits as usize;
    if max_width == 0 {
        return Ok(None);
    }

    let mut subcircuits: Vec<Subcircuit> = Vec::new();
    let mut cuts: Vec<WireCut> = Vec::new();

    for group in qubit_groups(circuit, max_width) {
        let mut assigner = Assigner::new(max_width);
        for inst in circuit
            .instructions()
            .iter()
            .filter(|i| {
                !i.is_barrier()
                    && !i.is_measure()
                    && i.qubits.first().is_some_and(|q| group.contains(q))
            })
        {
            if !assigner.place(inst) {
                debug!(gate = inst.name(), "No subcircuit can hold gate");
                return Ok(None);
            }
        }
        if !assigner.place_idle(&group) {
            return Ok(None);
        }

        let part_offset = subcircuits.len();
        let cut_offset = cuts.len();
        let shift = |r: SegmentRef| SegmentRef {
            subcircuit: r.subcircuit + part_offset,
            segment: r.segment,
        };

        cuts.extend(assigner.cuts.into_iter().map(|c| WireCut {
            qubit: c.qubit,
            upstream: shift(c.upstream),
            downstream: shift(c.downstream),
        }));

        for part in assigner.parts {
            let index = subcircuits.len();
            let mut body = Circuit::with_size(
                format!("{}_sub{index}", circuit.name()),
                part.segments.len() as u32,
                0,
            );
            for inst in part.instructions {
                body.push(inst)?;
            }
            let segments = part
                .segments
                .into_iter()
                .map(|s| Segment {
                    qubit: s.qubit,
                    init_cut: s.init_cut.map(|c| c + cut_offset),
                    meas_cut: s.meas_cut.map(|c| c + cut_offset),
                })
                .collect();
            subcircuits.push(Subcircuit { body, segments });
        }
    }

    if !constraints.admits(subcircuits.len(), cuts.len()) {
        debug!(
            parts = subcircuits.len(),
            cuts = cuts.len(),
            "Greedy cut outside constraints"
        );
        return Ok(None);
    }

    Ok(Some(CutSolution {
        num_qubits: circuit.num_qubits(),
        subcircuits,
        cuts,
    }))
}
