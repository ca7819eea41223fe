/*!
# Laser Mount Controller

Drives the laser pointer mount over its USB serial link and bridges it to a
planetarium through the telescope server protocol: coordinates picked in the
planetarium become calibration references or goto commands, and the mount pointing is
echoed back as the planetarium's field-of-view indicator.

## Usage

### Run with the default configuration
```bash
laserctl
```

### Connect a device on start and use another telescope port
```bash
laserctl run --device /dev/ttyUSB0 --port 10002
```

### Generate a configuration file
```bash
laserctl config --output laserctl.toml
```
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod bridge;
mod config;
mod console;
mod device;
mod events;
mod orchestrator;
mod repeat_timer;
mod telescope_server;
mod transport;

use config::AppConfig;
use events::Event;
use orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "laserctl")]
#[command(about = "Laser pointer mount control with a planetarium telescope bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "laserctl.toml")]
    config: PathBuf,

    /// Print console notifications as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the telescope server and the operator console
    Run {
        /// Serial port of the mount to connect on start
        #[arg(short, long)]
        device: Option<String>,

        /// Telescope server port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "laserctl.toml")]
        output: PathBuf,
    },

    /// List USB serial ports
    Ports,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_exists = cli.config.exists();
    let mut config = if config_exists {
        AppConfig::load_from_file(&cli.config)?
    } else {
        AppConfig::new()
    };

    // Logs go to stderr so stdout only carries console output
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !config_exists {
        warn!("⚠️ {} not found, using defaults", cli.config.display());
    }

    match cli.command {
        Some(Commands::Run { device, port }) => {
            if device.is_some() {
                config.device.port = device;
            }
            if let Some(port) = port {
                config.telescope.port = port;
            }
            run(config, cli.json)
        }

        Some(Commands::Config { output }) => generate_config_file(output),

        Some(Commands::Ports) => list_ports(),

        None => run(config, cli.json),
    }
}

/// Run the orchestration loop with the stdin console until quit or Ctrl+C
fn run(config: AppConfig, json: bool) -> Result<()> {
    let (events_tx, events_rx) = unbounded();
    let (notify_tx, notify_rx) = unbounded();

    let orchestrator = Orchestrator::new(config, events_tx.clone(), events_rx, notify_tx)?;
    let printer = console::spawn_printer(notify_rx, json)?;

    let shutdown = events_tx.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        let _ = shutdown.send(Event::Shutdown);
    })?;

    // The reader blocks on stdin and is left behind on exit
    console::spawn_reader(events_tx)?;
    println!("Type `help` for the command list");

    orchestrator.run();

    if printer.join().is_err() {
        warn!("Notification printer panicked");
    }
    info!("✅ Stopped");
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   laserctl --config {}", output_path.display());

    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = transport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No USB serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}
