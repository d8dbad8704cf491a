/*!
# Laser Controller

Serial controller that keeps a motorized laser pointer aimed at one of two
balloons, each tracked by its own RTK GPS receiver, while the operator sends
telecommands over the same link.

## Features

- One persistent reader thread per link (laser feedback, GPS A, GPS B)
- Links can be connected, dropped and reconnected on another port at runtime
- Fixes of the selected balloon are forwarded as GPS telecommands
- Per-session raw and CSV logs
- Standalone GPS monitor mode

## Usage

### Interactive controller (default)
```bash
laser-controller --config laser-controller.toml
```

### GPS monitor
```bash
laser-controller monitor --port /dev/ttyUSB0 --raw --locations --output ./logs/monitor
```

### Generate a configuration file
```bash
laser-controller config --output laser-controller.toml
```
*/

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select, unbounded, Receiver};
use shared::protocol::{GPS_BAUD_RATE, READ_TIMEOUT_MS};
use shared::transport::available_ports;
use shared::SerialPortOpener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::Level;

mod config;
mod console;
mod gps_source;
mod laser_link;
mod lifecycle;
mod pointing;
mod recorder;
mod sink;

use config::AppConfig;
use console::{ConsoleAction, ConsoleSink};
use gps_source::{GpsReader, GpsSource};
use lifecycle::run_reader_loop;
use pointing::{PointingController, PointingTarget};
use recorder::RecordingOptions;

#[derive(Parser)]
#[command(name = "laser-controller")]
#[command(about = "Aim a laser pointer at GPS-tracked balloons")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "laser-controller.toml")]
    config: PathBuf,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive controller (default)
    Run,

    /// Print every fix received from a single GPS receiver
    Monitor {
        /// Serial port, detected when exactly one port exists
        #[arg(short, long)]
        port: Option<String>,

        /// Record the raw NMEA stream
        #[arg(long)]
        raw: bool,

        /// Record fixes as CSV
        #[arg(long)]
        locations: bool,

        /// Output directory for recordings
        #[arg(short, long, default_value = "./logs/monitor")]
        output: PathBuf,

        /// Baud rate
        #[arg(short, long, default_value_t = GPS_BAUD_RATE)]
        baud: u32,

        /// Height offset subtracted from every fix (m)
        #[arg(long, default_value_t = 0.0)]
        height_offset: f64,
    },

    /// List available serial ports
    Ports,

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "laser-controller.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stderr only, stdout carries operator output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match cli.command {
        None | Some(Commands::Run) => run_controller(cli.config),

        Some(Commands::Monitor {
            port,
            raw,
            locations,
            output,
            baud,
            height_offset,
        }) => {
            let recording = RecordingOptions {
                directory: (raw || locations).then_some(output),
                raw,
                locations,
            };
            run_monitor(port, recording, baud, height_offset)
        }

        Some(Commands::Ports) => {
            console::print_ports();
            Ok(())
        }

        Some(Commands::Config { output }) => generate_config_file(output),
    }
}

/// Receiver that yields once Ctrl+C is pressed
fn shutdown_signal() -> Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(rx)
}

/// Run the controller with the operator console
fn run_controller(config_path: PathBuf) -> Result<()> {
    let config = AppConfig::load_or_default(&config_path)?;
    let shutdown = shutdown_signal()?;

    let controller = PointingController::start(config.controller_setup(), Arc::new(ConsoleSink))
        .context("Failed to start pointing controller")?;

    if let Some(port) = &config.laser.port {
        controller.open_laser(port);
    }
    for (target, gps) in PointingTarget::ALL.into_iter().zip([&config.gps_a, &config.gps_b]) {
        if let Some(port) = &gps.port {
            controller.open_gps(target, port);
        }
    }

    // blocks on stdin, left running at exit
    let (line_tx, lines) = unbounded();
    console::spawn_stdin_reader(line_tx).context("Failed to start console input")?;

    println!("🚀 Laser controller ready, type 'help' for commands");
    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else { break };
                match ConsoleAction::parse(&line) {
                    Ok(action) => {
                        if !console::execute(&controller, action) {
                            break;
                        }
                    }
                    Err(e) => println!("❌ {}", e),
                }
            }
            recv(shutdown) -> _ => {
                println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    controller.shutdown();
    println!("✅ Laser controller stopped");
    Ok(())
}

/// Run a single GPS reader printing every fix
fn run_monitor(
    port: Option<String>,
    recording: RecordingOptions,
    baud: u32,
    height_offset: f64,
) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => detect_port()?,
    };
    let shutdown = shutdown_signal()?;

    let source = Arc::new(GpsSource::new("GPS", height_offset));
    let opener = Arc::new(SerialPortOpener::new(baud, Duration::from_millis(READ_TIMEOUT_MS)));
    let mut reader = GpsReader::new(
        Arc::clone(&source),
        opener.clone(),
        Arc::new(ConsoleSink),
        recording,
        Box::new(|location| println!("📍 {}", location)),
    );
    let loop_source = Arc::clone(&source);
    let handle = thread::Builder::new()
        .name("gps-monitor".to_string())
        .spawn(move || run_reader_loop(loop_source.lifecycle(), &mut reader))
        .context("Failed to start GPS reader")?;

    println!(
        "📡 Monitoring {} at {} baud, {} ms read timeout, Ctrl+C to stop",
        port,
        opener.baud_rate(),
        opener.timeout().as_millis()
    );
    source.open(&port);

    // a closed channel means the handler is gone, stop as well
    let _ = shutdown.recv();
    source.stop();
    handle.join().map_err(|_| anyhow!("GPS reader thread panicked"))?;

    println!("✅ {} fixes received", source.fixes_received());
    Ok(())
}

/// The only serial port on this machine
fn detect_port() -> Result<String> {
    let ports = available_ports()?;
    if let [only] = ports.as_slice() {
        return Ok(only.name.clone());
    }

    if ports.is_empty() {
        bail!("No serial ports found");
    }
    println!("Available serial ports:");
    for port in &ports {
        println!("  {:<20} {}", port.name, port.description);
    }
    bail!("{} serial ports found, choose one with --port", ports.len())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to set ports and offsets, then run:");
    println!("   laser-controller --config {}", output_path.display());

    Ok(())
}
