//! Schedule items: capacity-bounded bundles of work for one submission.
//!
//! A job needs `ceil(shots / max_shots)` experiment slots. The packer fills
//! items slot by slot; a job that does not fit in what is left of an item
//! continues in the next one. In every item only the last entry can carry
//! shots out and only the first entry can carry shots in, so the
//! demultiplexer needs a single pending fragment to stitch jobs back
//! together.
//!
//! ```text
//!   max_shots = 8192, max_experiments = 1, shots = 20000
//!
//!   item 0: [job 8192/20000 →]
//!   item 1: [→ job 8192/20000 →]
//!   item 2: [→ job 3616/20000 ✓]
//! ```

use qvirt_hal::{Counts, ExperimentResult};
use qvirt_ir::Circuit;

use crate::error::{SchedError, SchedResult};
use crate::job::JobId;

/// Per-submission limits of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleLimits {
    /// Most shots per experiment slot.
    pub max_shots: u32,
    /// Most experiment slots per submission.
    pub max_experiments: u32,
}

impl ScheduleLimits {
    /// Create limits; zero is raised to one.
    pub fn new(max_shots: u32, max_experiments: u32) -> Self {
        Self {
            max_shots: max_shots.max(1),
            max_experiments: max_experiments.max(1),
        }
    }

    /// Slots a job with `shots` shots needs.
    pub fn repetitions(&self, shots: u32) -> u32 {
        shots.div_ceil(self.max_shots)
    }
}

/// One job's share of a schedule item.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Job the shots belong to.
    pub job_id: JobId,
    /// Circuit to run.
    pub circuit: Circuit,
    /// Consecutive experiment slots used by this entry.
    pub repetitions: u32,
    /// Shots this entry contributes.
    pub shots_this_item: u32,
    /// Shots the job requested overall.
    pub shots_total: u32,
    /// Continues a fragment from the previous item.
    pub carried_in: bool,
    /// The job's last entry.
    pub complete: bool,
}

/// Work for one submission.
#[derive(Debug, Clone)]
pub struct ScheduleItem {
    /// Position in the device's item sequence.
    pub index: u64,
    /// Entries in slot order.
    pub entries: Vec<ScheduleEntry>,
}

impl ScheduleItem {
    /// Experiment slots used.
    pub fn experiments(&self) -> u32 {
        self.entries.iter().map(|e| e.repetitions).sum()
    }

    /// Shots per slot for the submission: enough for every entry, never
    /// more than the device limit.
    pub fn submission_shots(&self, max_shots: u32) -> u32 {
        self.entries
            .iter()
            .map(|e| e.shots_this_item.min(max_shots))
            .max()
            .unwrap_or(0)
    }

    /// Circuits in slot order, each entry repeated once per slot.
    pub fn circuits(&self) -> Vec<Circuit> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::repeat_n(&e.circuit, e.repetitions as usize).cloned())
            .collect()
    }

    /// Whether the last entry continues in the next item.
    pub fn carries_out(&self) -> bool {
        self.entries.last().is_some_and(|e| !e.complete)
    }

    /// Distinct jobs in this item.
    pub fn job_ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.entries.iter().map(|e| e.job_id)
    }
}

/// Folds jobs into schedule items.
#[derive(Debug)]
pub struct SchedulePacker {
    limits: ScheduleLimits,
    next_index: u64,
    entries: Vec<ScheduleEntry>,
    used_slots: u32,
}

impl SchedulePacker {
    /// Start a packer whose first item gets `first_index`.
    pub fn new(limits: ScheduleLimits, first_index: u64) -> Self {
        Self {
            limits,
            next_index: first_index,
            entries: Vec::new(),
            used_slots: 0,
        }
    }

    /// Index the next emitted item will get.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Add a job. Returns every item that became full.
    pub fn push(&mut self, job_id: JobId, circuit: &Circuit, shots: u32) -> Vec<ScheduleItem> {
        let mut full = Vec::new();
        let mut remaining = shots;
        let mut carried_in = false;

        while remaining > 0 {
            let free = self.limits.max_experiments - self.used_slots;
            let repetitions = self.limits.repetitions(remaining).min(free);
            let capacity = u64::from(repetitions) * u64::from(self.limits.max_shots);
            let placed = capacity.min(u64::from(remaining)) as u32;
            remaining -= placed;

            self.entries.push(ScheduleEntry {
                job_id,
                circuit: circuit.clone(),
                repetitions,
                shots_this_item: placed,
                shots_total: shots,
                carried_in,
                complete: remaining == 0,
            });
            self.used_slots += repetitions;
            carried_in = true;

            if self.used_slots >= self.limits.max_experiments {
                full.push(self.emit());
            }
        }
        full
    }

    /// Emit the partly filled item, if any.
    pub fn finish(&mut self) -> Option<ScheduleItem> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    fn emit(&mut self) -> ScheduleItem {
        let item = ScheduleItem {
            index: self.next_index,
            entries: std::mem::take(&mut self.entries),
        };
        self.next_index += 1;
        self.used_slots = 0;
        item
    }
}

/// Cut one entry's outcome out of its experiment slots.
///
/// Memory records are taken in slot order until the entry's shot count is
/// reached, so any overshoot is dropped from the end of the last slot.
/// Providers that return only counts must return exactly the entry's shots.
pub fn extract_fragment(
    entry: &ScheduleEntry,
    slots: &[ExperimentResult],
) -> SchedResult<ExperimentResult> {
    let Some(first) = slots.first() else {
        return Err(SchedError::FragmentMismatch {
            job: entry.job_id,
            reason: "no experiment slots".into(),
        });
    };
    let needed = entry.shots_this_item as usize;

    let recorded: usize = slots.iter().map(|s| s.memory.len()).sum();
    if recorded >= needed {
        let memory = slots
            .iter()
            .flat_map(|s| s.memory.iter().cloned())
            .take(needed)
            .collect();
        return Ok(ExperimentResult::from_memory(first.header.clone(), memory));
    }

    if recorded == 0 {
        let mut counts = Counts::new();
        for slot in slots {
            counts.merge(&slot.counts);
        }
        if counts.total() == needed as u64 {
            return Ok(ExperimentResult {
                header: first.header.clone(),
                shots: entry.shots_this_item,
                counts,
                memory: Vec::new(),
            });
        }
        return Err(SchedError::FragmentMismatch {
            job: entry.job_id,
            reason: format!(
                "{} counted shots without memory, need exactly {needed}",
                counts.total()
            ),
        });
    }

    Err(SchedError::FragmentMismatch {
        job: entry.job_id,
        reason: format!("{recorded} memory records, need {needed}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use qvirt_hal::ExperimentHeader;
    use rustc_hash::FxHashMap;

    fn pack(limits: ScheduleLimits, jobs: &[(JobId, u32)]) -> Vec<ScheduleItem> {
        let circuit = Circuit::bell().unwrap();
        let mut packer = SchedulePacker::new(limits, 0);
        let mut items = Vec::new();
        for (id, shots) in jobs {
            items.extend(packer.push(*id, &circuit, *shots));
        }
        items.extend(packer.finish());
        items
    }

    fn slot(memory: &[&str]) -> ExperimentResult {
        ExperimentResult::from_memory(
            ExperimentHeader::default(),
            memory.iter().map(|m| (*m).to_string()).collect(),
        )
    }

    #[test]
    fn test_spanning_job() {
        let job = JobId::new();
        let items = pack(ScheduleLimits::new(8192, 1), &[(job, 20_000)]);

        assert_eq!(items.len(), 3);
        let shots: Vec<u32> = items.iter().map(|i| i.entries[0].shots_this_item).collect();
        assert_eq!(shots, vec![8192, 8192, 3616]);
        assert!(!items[0].entries[0].carried_in);
        assert!(items[1].entries[0].carried_in && items[2].entries[0].carried_in);
        assert!(items[0].carries_out() && items[1].carries_out());
        assert!(items[2].entries[0].complete);
        assert_eq!(items[2].submission_shots(8192), 3616);
    }

    #[test]
    fn test_repetitions_within_one_item() {
        let job = JobId::new();
        let items = pack(ScheduleLimits::new(8192, 10), &[(job, 20_000)]);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entries[0].repetitions, 3);
        assert_eq!(items[0].experiments(), 3);
        assert_eq!(items[0].circuits().len(), 3);
        assert_eq!(items[0].submission_shots(8192), 8192);
    }

    #[test]
    fn test_small_jobs_share_items() {
        let jobs: Vec<(JobId, u32)> = (0..5).map(|_| (JobId::new(), 100)).collect();
        let items = pack(ScheduleLimits::new(1000, 2), &jobs);

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].entries.len(), 2);
        assert_eq!(items[2].entries.len(), 1);
        assert_eq!(items.iter().map(|i| i.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(items.iter().all(|i| !i.carries_out()));
    }

    #[test]
    fn test_extract_trims_last_slot() {
        let entry = ScheduleEntry {
            job_id: JobId::new(),
            circuit: Circuit::bell().unwrap(),
            repetitions: 2,
            shots_this_item: 5,
            shots_total: 5,
            carried_in: false,
            complete: true,
        };
        let slots = [slot(&["00", "01", "10"]), slot(&["11", "11", "00"])];

        let fragment = extract_fragment(&entry, &slots).unwrap();
        assert_eq!(fragment.shots, 5);
        assert_eq!(fragment.memory, vec!["00", "01", "10", "11", "11"]);
        assert_eq!(fragment.counts.get("11"), 2);
        assert_eq!(fragment.counts.get("00"), 1);
        assert_eq!(fragment.counts.total(), 5);
    }

    #[test]
    fn test_extract_short_memory_is_an_error() {
        let entry = ScheduleEntry {
            job_id: JobId::new(),
            circuit: Circuit::bell().unwrap(),
            repetitions: 1,
            shots_this_item: 4,
            shots_total: 4,
            carried_in: false,
            complete: true,
        };
        let err = extract_fragment(&entry, &[slot(&["00"])]).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_extract_counts_only() {
        let entry = ScheduleEntry {
            job_id: JobId::new(),
            circuit: Circuit::bell().unwrap(),
            repetitions: 1,
            shots_this_item: 4,
            shots_total: 4,
            carried_in: false,
            complete: true,
        };
        let counts_only = ExperimentResult {
            header: ExperimentHeader::default(),
            shots: 4,
            counts: Counts::from_pairs([("00", 3), ("11", 1)]),
            memory: vec![],
        };
        let fragment = extract_fragment(&entry, &[counts_only]).unwrap();
        assert_eq!(fragment.counts.total(), 4);
    }

    proptest! {
        #[test]
        fn prop_single_job_shots_conserved(
            shots in 1u32..200_000,
            max_shots in 1u32..10_000,
            max_experiments in 1u32..16,
        ) {
            let limits = ScheduleLimits::new(max_shots, max_experiments);
            let job = JobId::new();
            let items = pack(limits, &[(job, shots)]);

            let repetitions: u32 = items.iter().flat_map(|i| &i.entries).map(|e| e.repetitions).sum();
            let placed: u64 = items
                .iter()
                .flat_map(|i| &i.entries)
                .map(|e| u64::from(e.shots_this_item))
                .sum();
            prop_assert_eq!(repetitions, shots.div_ceil(max_shots));
            prop_assert_eq!(placed, u64::from(shots));
            prop_assert_eq!(items.len() as u32, repetitions.div_ceil(max_experiments));

            for item in &items {
                prop_assert!(item.experiments() <= max_experiments);
                let per_slot = item.submission_shots(max_shots);
                prop_assert!(per_slot <= max_shots);
                for entry in &item.entries {
                    prop_assert!(u64::from(entry.repetitions) * u64::from(per_slot)
                        >= u64::from(entry.shots_this_item));
                }
            }
        }

        #[test]
        fn prop_only_edges_carry(
            shots in proptest::collection::vec(1u32..30_000, 1..12),
            max_shots in 1u32..5_000,
            max_experiments in 1u32..8,
        ) {
            let limits = ScheduleLimits::new(max_shots, max_experiments);
            let jobs: Vec<(JobId, u32)> = shots.iter().map(|s| (JobId::new(), *s)).collect();
            let items = pack(limits, &jobs);

            let mut per_job: FxHashMap<JobId, u64> = FxHashMap::default();
            for (n, item) in items.iter().enumerate() {
                prop_assert_eq!(item.index, n as u64);
                prop_assert!(item.experiments() <= max_experiments);
                let last = item.entries.len() - 1;
                for (i, entry) in item.entries.iter().enumerate() {
                    if i != last {
                        prop_assert!(entry.complete);
                    }
                    if i != 0 {
                        prop_assert!(!entry.carried_in);
                    }
                    *per_job.entry(entry.job_id).or_default() += u64::from(entry.shots_this_item);
                }
            }
            for (id, shots) in &jobs {
                prop_assert_eq!(per_job[id], u64::from(*shots));
            }
        }
    }
}
