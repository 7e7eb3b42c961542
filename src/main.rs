//! CLI entry point for `sweep_daq`.
//!
//! ```bash
//! sweep_daq                      # full sweep with config/sweep.toml
//! sweep_daq --simulate sweep     # force the simulated backends
//! sweep_daq goto                 # move interactively
//! sweep_daq detect               # list connected controllers
//! sweep_daq config               # print the effective settings
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use sweep_daq::config::{Backend, Settings, DEFAULT_CONFIG_PATH};
use sweep_daq::detection::detect_devices;
use sweep_daq::hardware::connect_backends;
use sweep_daq::{logging, run_goto, run_sweep};

#[derive(Parser)]
#[command(name = "sweep_daq")]
#[command(about = "Angular sweep acquisition with a rotation stage and a confocal sensor", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated devices regardless of the configured backend
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full angular sweep (default)
    Sweep,

    /// Move the stage to angles typed on stdin
    Goto,

    /// List connected controllers of the configured type
    Detect,

    /// Print the effective settings as TOML
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if cli.simulate {
        settings.application.backend = Backend::Simulated;
    }

    logging::init(&settings.application).context("Failed to initialize logging")?;

    match cli.command.unwrap_or(Commands::Sweep) {
        Commands::Sweep => {
            let backends = connect_backends(&settings).context("Failed to create device backends")?;
            let report = run_sweep(&settings, backends).await.context("Sweep failed")?;
            println!(
                "Wrote {} files to {} ({} steps skipped)",
                report.files.len(),
                settings.output.directory.display(),
                report.skipped.len()
            );
        }
        Commands::Goto => {
            let mut backends =
                connect_backends(&settings).context("Failed to create device backends")?;
            let input = BufReader::new(tokio::io::stdin());
            run_goto(&settings, backends.devices.as_mut(), input, tokio::io::stdout())
                .await
                .context("Interactive positioning failed")?;
        }
        Commands::Detect => {
            let mut backends =
                connect_backends(&settings).context("Failed to create device backends")?;
            let type_id = settings.actuator.device_type_id;
            for serial in detect_devices(backends.devices.as_mut(), type_id) {
                println!("{}", serial);
            }
        }
        Commands::Config => {
            let text = settings.to_toml().context("Failed to render settings")?;
            print!("{}", text);
        }
    }

    Ok(())
}
