//! Execution results.
//!
//! Bitstrings follow the usual little-endian display convention: classical
//! bit 0 is the rightmost character.

use std::collections::BTreeMap;

use qvirt_ir::Circuit;
use serde::{Deserialize, Serialize};

use crate::job::SubmissionId;

/// Extract bits `[offset, offset + len)` from a bitstring.
///
/// Bits past the end of `bitstring` read as `0`.
pub fn slice_bits(bitstring: &str, offset: u32, len: u32) -> String {
    let bytes = bitstring.as_bytes();
    let n = bytes.len();
    (0..len)
        .rev()
        .map(|i| {
            let pos = (offset + i) as usize;
            if pos < n { bytes[n - 1 - pos] as char } else { '0' }
        })
        .collect()
}

/// Measurement counts keyed by bitstring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counts {
    counts: BTreeMap<String, u64>,
}

impl Counts {
    /// Create empty counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build counts from `(bitstring, count)` pairs.
    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, u64)>) -> Self {
        let mut counts = Self::new();
        for (bitstring, count) in pairs {
            counts.insert(bitstring, count);
        }
        counts
    }

    /// Histogram per-shot memory records.
    pub fn from_memory<S: AsRef<str>>(memory: &[S]) -> Self {
        let mut counts = Self::new();
        for record in memory {
            *counts.counts.entry(record.as_ref().to_string()).or_default() += 1;
        }
        counts
    }

    /// Add `count` observations of `bitstring`.
    pub fn insert(&mut self, bitstring: impl Into<String>, count: u64) {
        *self.counts.entry(bitstring.into()).or_default() += count;
    }

    /// Observations of `bitstring`.
    pub fn get(&self, bitstring: &str) -> u64 {
        self.counts.get(bitstring).copied().unwrap_or(0)
    }

    /// Total observations.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct outcomes.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether there are no observations.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterate `(bitstring, count)` in bitstring order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.counts.iter()
    }

    /// Add every observation of `other`.
    pub fn merge(&mut self, other: &Counts) {
        for (bitstring, count) in &other.counts {
            *self.counts.entry(bitstring.clone()).or_default() += count;
        }
    }

    /// Normalized distribution. Empty counts give an empty map.
    pub fn probabilities(&self) -> BTreeMap<String, f64> {
        let total = self.total();
        if total == 0 {
            return BTreeMap::new();
        }
        self.counts
            .iter()
            .map(|(k, v)| (k.clone(), *v as f64 / total as f64))
            .collect()
    }

    /// Most frequent outcome; ties go to the smaller bitstring.
    pub fn most_frequent(&self) -> Option<(&str, u64)> {
        self.top(1).into_iter().next()
    }

    /// The `n` most frequent outcomes, most frequent first.
    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        let mut entries: Vec<_> = self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        entries.truncate(n);
        entries
    }

    /// Counts over bits `[offset, offset + len)` only.
    pub fn marginal(&self, offset: u32, len: u32) -> Counts {
        let mut out = Counts::new();
        for (bitstring, count) in &self.counts {
            out.insert(slice_bits(bitstring, offset, len), *count);
        }
        out
    }
}

/// Register and size metadata for one executed circuit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentHeader {
    /// Circuit name.
    pub name: String,
    /// `(register, size)` for each quantum register.
    pub qreg_sizes: Vec<(String, u32)>,
    /// `(register, size)` for each classical register.
    pub creg_sizes: Vec<(String, u32)>,
    /// Number of classical bits recorded per shot.
    pub memory_slots: u32,
    /// Number of qubits.
    pub num_qubits: u32,
}

impl ExperimentHeader {
    /// Describe `circuit`.
    pub fn from_circuit(circuit: &Circuit) -> Self {
        Self {
            name: circuit.name().to_string(),
            qreg_sizes: circuit.qregs().iter().map(|r| (r.name.clone(), r.size)).collect(),
            creg_sizes: circuit.cregs().iter().map(|r| (r.name.clone(), r.size)).collect(),
            memory_slots: circuit.num_clbits(),
            num_qubits: circuit.num_qubits(),
        }
    }
}

/// Outcome of one circuit in a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Circuit metadata.
    pub header: ExperimentHeader,
    /// Shots executed.
    pub shots: u32,
    /// Outcome histogram.
    pub counts: Counts,
    /// Per-shot bitstrings in execution order.
    #[serde(default)]
    pub memory: Vec<String>,
}

impl ExperimentResult {
    /// Build a result from per-shot memory.
    pub fn from_memory(header: ExperimentHeader, memory: Vec<String>) -> Self {
        Self {
            header,
            shots: memory.len() as u32,
            counts: Counts::from_memory(&memory),
            memory,
        }
    }

    /// Keep only the first `shots` memory records and recompute counts.
    pub fn truncate(&mut self, shots: u32) {
        if (shots as usize) < self.memory.len() {
            self.memory.truncate(shots as usize);
            self.counts = Counts::from_memory(&self.memory);
            self.shots = shots;
        }
    }

    /// Append the shots of `other` after our own.
    pub fn append(&mut self, other: ExperimentResult) {
        self.shots += other.shots;
        self.counts.merge(&other.counts);
        self.memory.extend(other.memory);
    }

    /// Normalized outcome distribution.
    pub fn probabilities(&self) -> BTreeMap<String, f64> {
        self.counts.probabilities()
    }
}

/// Result of one submission: one entry per circuit, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Submission this result belongs to.
    pub submission: SubmissionId,
    /// Device that ran it.
    pub device: String,
    /// Per-circuit outcomes.
    pub experiments: Vec<ExperimentResult>,
    /// Wall-clock execution time in milliseconds, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl BatchResult {
    /// Outcome of circuit `index`.
    pub fn experiment(&self, index: usize) -> Option<&ExperimentResult> {
        self.experiments.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_bits_rightmost_is_bit_zero() {
        assert_eq!(slice_bits("10110", 0, 2), "10");
        assert_eq!(slice_bits("10110", 2, 3), "101");
        assert_eq!(slice_bits("10110", 1, 1), "1");
        assert_eq!(slice_bits("1", 0, 3), "001");
    }

    #[test]
    fn test_counts_from_memory() {
        let memory = vec!["00", "11", "11", "01"];
        let counts = Counts::from_memory(&memory);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.get("11"), 2);
        assert_eq!(counts.most_frequent(), Some(("11", 2)));
        let probs = counts.probabilities();
        assert!((probs["11"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_marginal_and_merge() {
        let mut counts = Counts::from_pairs([("0110", 3), ("1010", 1)]);
        let low = counts.marginal(0, 2);
        assert_eq!(low.get("10"), 4);
        let high = counts.marginal(2, 2);
        assert_eq!(high.get("01"), 3);
        assert_eq!(high.get("10"), 1);

        counts.merge(&Counts::from_pairs([("0110", 2)]));
        assert_eq!(counts.get("0110"), 5);
    }

    #[test]
    fn test_experiment_truncate_and_append() {
        let memory: Vec<String> = ["0", "1", "1", "0", "1"].iter().map(|s| s.to_string()).collect();
        let mut result = ExperimentResult::from_memory(ExperimentHeader::default(), memory);
        result.truncate(3);
        assert_eq!(result.shots, 3);
        assert_eq!(result.counts.total(), 3);
        assert_eq!(result.counts.get("1"), 2);

        let other = ExperimentResult::from_memory(ExperimentHeader::default(), vec!["0".into()]);
        result.append(other);
        assert_eq!(result.shots, 4);
        assert_eq!(result.memory.len(), 4);
        assert_eq!(result.counts.get("0"), 2);
    }

    #[test]
    fn test_header_from_circuit() {
        let circuit = Circuit::ghz(3).unwrap();
        let header = ExperimentHeader::from_circuit(&circuit);
        assert_eq!(header.num_qubits, 3);
        assert_eq!(header.memory_slots, 3);
        assert_eq!(header.creg_sizes, vec![("meas".to_string(), 3)]);
    }
}
