//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - circuit job virtualization for capacity-limited devices",
        style("qvirt").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  qvirt-ir           Circuit representation");
    println!("  qvirt-hal          Device provider interface");
    println!("  qvirt-cut          Wire cutting and reconstruction");
    println!("  qvirt-sched        Execution pipeline");
    println!("  qvirt-adapter-sim  Simulated devices");
    println!();
    println!("License:    {}", style("Apache-2.0").dim());
}
