mod btle;
mod codec;
mod config;
mod device;
mod device_scanner;
mod error;
#[cfg(test)]
mod mock;
mod poller;
mod protocol;
mod session;
mod transport;

use btle::BtleAdapter;
use clap::{Parser, Subcommand};
use config::Config;
use poller::{PollManager, PollUpdate};
use session::EmeraldClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;
use tokio::runtime::Runtime;

#[derive(Parser)]
#[command(name = "emerald-ble")]
#[command(about = "Polls an Emerald Energy Advisor over Bluetooth LE")]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby Energy Advisors
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Poll the configured device and print one JSON line per reading
    Poll {
        /// Override the configured device address
        #[arg(short, long)]
        address: Option<String>,
        /// Fetch a single reading and exit
        #[arg(long)]
        once: bool,
    },
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when the command ran but the last poll failed.
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Scan { duration } => {
            let rt = Runtime::new()?;
            let devices = rt.block_on(device_scanner::scan_devices(Duration::from_secs(duration)))?;
            if devices.is_empty() {
                log::info!("No Energy Advisors found");
            }
            for device in devices {
                println!("{}", serde_json::to_string(&device)?);
            }
            Ok(true)
        }
        Commands::Poll { address, once } => {
            let mut config = match &cli.config {
                Some(path) => Config::load_from(path)?,
                None => Config::load()?,
            };
            if let Some(address) = address {
                config.address = address;
            }
            poll(&config, once)
        }
    }
}

fn poll(config: &Config, once: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let identity = config.identity()?;
    let options = config.fetch_options();
    let interval = config.poll_interval();

    // Create a channel for communication between the polling thread and the output loop
    let (sender, receiver) = mpsc::channel::<PollUpdate>();

    // The poll loop owns its own runtime so the main thread only prints
    let worker = std::thread::spawn(move || {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = sender.send(PollUpdate::Failed(format!(
                    "Failed to create async runtime: {}",
                    e
                )));
                return;
            }
        };

        rt.block_on(async move {
            let adapter = match BtleAdapter::new().await {
                Ok(adapter) => adapter,
                Err(e) => {
                    let _ = sender.send(PollUpdate::Failed(e.to_string()));
                    return;
                }
            };

            let client = EmeraldClient::new(adapter, identity);
            let (manager, commands) = PollManager::new(client, options, interval, sender);
            if once {
                manager.run_once().await;
            } else {
                manager.run().await;
            }
            drop(commands);
        });
    });

    let mut last_ok = false;
    for update in receiver {
        match update {
            PollUpdate::Reading(reading) => {
                last_ok = true;
                println!("{}", serde_json::to_string(&reading)?);
            }
            PollUpdate::Failed(msg) => {
                last_ok = false;
                log::error!("Poll failed: {}", msg);
            }
            PollUpdate::Stopped(diagnostics) => {
                log::info!("Stopped: {}", serde_json::to_string(&diagnostics)?);
            }
        }
    }

    if worker.join().is_err() {
        log::error!("Polling thread panicked");
        return Ok(false);
    }
    Ok(last_ok)
}
