//! Shared utilities for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use serde::{Deserialize, Serialize};

use qvirt_adapter_sim::SimulatedProvider;
use qvirt_hal::{DeviceDescriptor, ExperimentResult};
use qvirt_ir::Circuit;
use qvirt_sched::{Job, JobConfig, PipelineConfig};

/// Contents of a CLI config file: the simulated devices plus the pipeline
/// settings at the top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Simulated devices. Empty means the simulator's default set.
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,

    /// Sampling seed.
    #[serde(default)]
    pub seed: u64,

    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

impl CliConfig {
    /// Parse YAML and apply `QVIRT_*` overrides to the pipeline settings.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: CliConfig = serde_yaml_ng::from_str(yaml)?;
        config.pipeline.apply_env_overrides()?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// The config at `path`, or the user config file, or defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(path) => PathBuf::from(path),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Self::from_yaml_str("{}"),
            },
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// A simulated provider for the configured devices.
    pub fn provider(&self) -> Arc<SimulatedProvider> {
        let provider = if self.devices.is_empty() {
            SimulatedProvider::with_defaults()
        } else {
            SimulatedProvider::new(self.devices.clone())
        };
        Arc::new(provider.with_seed(self.seed))
    }
}

/// `~/.config/qvirt/config.yaml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("qvirt").join("config.yaml"))
}

/// Where a job's circuit comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitSpec {
    /// Two-qubit Bell pair.
    Bell,
    /// `n`-qubit GHZ state.
    Ghz(u32),
    /// A full circuit.
    Circuit(Circuit),
}

impl CircuitSpec {
    pub fn build(&self) -> Result<Circuit> {
        Ok(match self {
            CircuitSpec::Bell => Circuit::bell()?,
            CircuitSpec::Ghz(n) => Circuit::ghz(*n)?,
            CircuitSpec::Circuit(circuit) => circuit.clone(),
        })
    }
}

/// One entry of a job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub circuit: CircuitSpec,

    #[serde(default = "default_shots")]
    pub shots: u32,

    #[serde(default)]
    pub config: JobConfig,
}

fn default_shots() -> u32 {
    1024
}

impl JobSpec {
    pub fn into_job(self) -> Result<Job> {
        Ok(Job::new(self.circuit.build()?, self.shots).with_config(self.config))
    }
}

/// Read a JSON list of jobs.
pub fn load_jobs(path: impl AsRef<Path>) -> Result<Vec<Job>> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let specs: Vec<JobSpec> =
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    specs.into_iter().map(JobSpec::into_job).collect()
}

/// Print the `top` most frequent outcomes.
pub fn print_outcome(outcome: &ExperimentResult, top: usize) {
    let total = outcome.counts.total().max(1) as f64;
    let shown = outcome.counts.top(top);

    for (bitstring, count) in &shown {
        let prob = *count as f64 / total * 100.0;
        let bar: String = "█".repeat((prob / 2.0).round() as usize);
        println!(
            "    {}: {:>6} ({:>5.2}%) {}",
            style(bitstring).cyan(),
            count,
            prob,
            style(bar).green()
        );
    }

    if outcome.counts.len() > shown.len() {
        println!(
            "    ... and {} more outcomes",
            outcome.counts.len() - shown.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qvirt_sched::{Policy, Strategy};
    use std::io::Write;

    #[test]
    fn test_config_with_devices_and_pipeline() {
        let yaml = r#"
seed: 7
devices:
  - name: small
    num_qubits: 5
    simulator: true
    max_shots: 4000
mapper:
  policy: low_waiting_time
aggregator:
  timeout_ms: 250
"#;
        let config = CliConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].max_shots, 4000);
        assert_eq!(config.pipeline.mapper.policy, Policy::LowWaitingTime);
        assert_eq!(config.pipeline.aggregator.timeout_ms, 250);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CliConfig::from_yaml_str("{}").unwrap();
        assert!(config.devices.is_empty());
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_load_jobs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"circuit": "bell", "shots": 100}},
                {{"circuit": {{"ghz": 6}}, "config": {{"strategies": ["partition"], "max_subcircuit_qubits": 3}}}}
            ]"#
        )
        .unwrap();

        let jobs = load_jobs(file.path()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].shots, 100);
        assert_eq!(jobs[0].num_qubits(), 2);
        assert_eq!(jobs[1].shots, 1024);
        assert_eq!(jobs[1].num_qubits(), 6);
        assert_eq!(
            jobs[1].config.strategies.as_deref(),
            Some(&[Strategy::Partition][..])
        );
    }

    #[test]
    fn test_load_jobs_missing_file() {
        assert!(load_jobs("/nonexistent/jobs.json").is_err());
    }
}
