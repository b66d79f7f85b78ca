//! qvirt command-line interface
//!
//! Runs job files through the execution pipeline against simulated devices.
//!
//! ```text
//!   qvirt run --config devices.yaml --jobs jobs.json -v
//!   qvirt devices --config devices.yaml
//!   qvirt version
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use console::style;

mod commands;
mod logging;

use commands::{devices, run, version};

/// qvirt - run many small circuits on a few devices
#[derive(Parser)]
#[command(name = "qvirt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job file through the pipeline
    Run {
        /// Pipeline and device configuration (YAML)
        #[arg(short, long, env = "QVIRT_CONFIG")]
        config: Option<String>,

        /// Jobs to run (JSON list)
        #[arg(short, long)]
        jobs: String,

        /// Outcomes to print per job
        #[arg(long, default_value = "8")]
        top: usize,
    },

    /// List the configured devices
    Devices {
        /// Pipeline and device configuration (YAML)
        #[arg(short, long, env = "QVIRT_CONFIG")]
        config: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::TracingConfig::from_env()
        .with_verbosity(cli.verbose)
        .init()?;

    let result = match cli.command {
        Commands::Run { config, jobs, top } => run::execute(config.as_deref(), &jobs, top).await,
        Commands::Devices { config } => devices::execute(config.as_deref()).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
