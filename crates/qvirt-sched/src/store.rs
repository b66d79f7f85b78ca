//! Bookkeeping records for aggregated and cut jobs.
//!
//! A record is written once by the stage that creates the transformed job
//! and taken once by the stage that reassembles its result. Taking removes
//! the record, so reassembly runs at most once per record.

use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use qvirt_cut::CutSolution;
use qvirt_ir::{ClbitId, QubitId, RegisterLayout};
use rustc_hash::FxHashMap;

use crate::job::{Job, JobId};

/// A map of records behind a lock, shared between two stages.
#[derive(Debug)]
pub struct RecordStore<K, V> {
    records: Mutex<FxHashMap<K, V>>,
}

impl<K: Eq + Hash, V> RecordStore<K, V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(FxHashMap::default()),
        }
    }

    /// Insert a record. Returns `false` and keeps the existing record if the
    /// key is already present.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&key) {
            return false;
        }
        records.insert(key, value);
        true
    }

    /// Remove and return a record.
    pub fn take(&self, key: &K) -> Option<V> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Run `f` on a record without removing it.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(f)
    }

    /// Whether a record exists.
    pub fn contains(&self, key: &K) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Default for RecordStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The jobs folded into one combined job.
#[derive(Debug, Clone)]
pub struct AggregationRecord {
    /// Original jobs in composition order.
    pub jobs: Vec<Job>,
    /// Where each original sits inside the combined circuit.
    pub layouts: Vec<RegisterLayout>,
}

/// Everything needed to reassemble a cut job.
#[derive(Debug, Clone)]
pub struct CutRecord {
    /// The job that was cut.
    pub parent: Job,
    /// The cut.
    pub solution: CutSolution,
    /// Ids of the generated sub-jobs.
    pub sub_jobs: Vec<JobId>,
    /// Which qubit feeds which classical bit in the parent circuit.
    pub measured: Vec<(QubitId, ClbitId)>,
}

impl CutRecord {
    /// Number of sub-results reconstruction needs.
    pub fn expected(&self) -> usize {
        self.sub_jobs.len()
    }
}

/// Aggregation records keyed by combined job id.
pub type AggregationRecords = RecordStore<JobId, AggregationRecord>;

/// Cut records keyed by parent job id.
pub type CutRecords = RecordStore<JobId, CutRecord>;
