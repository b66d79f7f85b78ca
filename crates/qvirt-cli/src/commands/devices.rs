//! Devices command implementation.

use anyhow::Result;
use console::style;

use qvirt_sched::DeviceRegistry;

use super::common::CliConfig;

/// Execute the devices command.
pub async fn execute(config: Option<&str>) -> Result<()> {
    let config = CliConfig::load(config)?;
    let registry = DeviceRegistry::new(config.provider(), config.pipeline.registry.update_interval());
    let snapshot = registry.snapshot().await?;

    println!(
        "{} {} devices:\n",
        style("qvirt").cyan().bold(),
        snapshot.devices.len()
    );

    for device in snapshot.devices.values() {
        let marker = if !device.operational {
            style("○").red()
        } else if device.has_capacity() {
            style("●").green()
        } else {
            style("●").yellow()
        };
        println!(
            "  {} {} {}",
            marker,
            style(&device.name).bold(),
            if device.simulator { "(simulator)" } else { "" }
        );
        println!("    Qubits: {}", device.num_qubits);
        println!(
            "    Jobs: {} pending, {}/{} active",
            device.pending_jobs, device.active_jobs, device.max_jobs
        );
        println!(
            "    Limits: {} shots, {} experiments per submission",
            device.max_shots, device.max_experiments
        );
        if let Some(quality) = device.quality {
            println!("    Quality: {quality:.3}");
        }
        println!("    Status: {}", device.status_message);
        println!();
    }
    Ok(())
}
