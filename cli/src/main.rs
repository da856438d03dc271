// bluest: command-line front end for the BlueST SDK
//
// Scans for BlueST boards, streams feature samples and pushes firmware
// images through the debug console.

mod ble;
mod config;

use anyhow::{Context, Result};
use bluestsdk_core::registry::standard_characteristic_features;
use bluestsdk_core::{
    Feature, FeatureListener, FirmwareFile, FirmwareUpgrade, FirmwareUpgradeError,
    FirmwareUpgradeListener, Manager, Node, Sample,
};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

const PUMP_INTERVAL: Duration = Duration::from_millis(200);
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(name = "bluest")]
#[command(about = "BlueST: talk to STMicroelectronics BLE sensor boards", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List BlueST boards in range
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Connect to a board and print feature samples
    Listen {
        /// Board address or advertised name
        device: String,
        /// Feature to enable (repeatable); all features when omitted
        #[arg(short, long)]
        feature: Vec<String>,
        /// How long to listen, in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,
    },
    /// Upload a firmware image through the debug console
    Upgrade {
        /// Board address or advertised name
        device: String,
        /// Firmware image (.bin)
        file: PathBuf,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Scan { timeout } => cmd_scan(timeout),
        Commands::Listen {
            device,
            feature,
            duration,
        } => cmd_listen(&device, &feature, duration),
        Commands::Upgrade { device, file } => cmd_upgrade(&device, &file),
        Commands::Config { action } => cmd_config(action),
    }
}

fn open_manager(config: &config::Config) -> Result<Arc<Manager>> {
    let adapter = ble::BtleAdapter::new(config.adapter_index)?;
    Manager::new(Box::new(adapter), config.sdk.clone()).context("Failed to start SDK")
}

fn find_node(device: &str) -> Result<Arc<Node>> {
    let config = config::Config::load()?;
    let manager = open_manager(&config)?;

    println!("{} Looking for {}...", "→".bright_blue(), device.bright_cyan());
    manager
        .discover(Duration::from_secs(config.scan_timeout))
        .context("Discovery failed")?;

    manager
        .node_with_tag(device)
        .or_else(|| manager.node_with_name(device))
        .with_context(|| format!("No BlueST board named or addressed {}", device))
}

fn connect(node: &Arc<Node>) -> Result<()> {
    node.connect(Some(standard_characteristic_features()))
        .context("Connection failed")?;
    if !node.is_connected() {
        anyhow::bail!("{} refused the connection ({})", node.name(), node.status());
    }
    println!("{} Connected to {}", "✓".green(), node.friendly_name().bright_cyan());
    Ok(())
}

fn cmd_scan(timeout: Option<u64>) -> Result<()> {
    let config = config::Config::load()?;
    let manager = open_manager(&config)?;
    let timeout = timeout.unwrap_or(config.scan_timeout);

    println!("{} Scanning for {}s...", "→".bright_blue(), timeout);
    manager
        .discover(Duration::from_secs(timeout))
        .context("Discovery failed")?;

    let nodes = manager.nodes();
    if nodes.is_empty() {
        println!("{}", "No BlueST boards found.".dimmed());
        return Ok(());
    }

    println!();
    println!("{} ({} found)", "Boards".bold(), nodes.len());
    println!();
    for node in nodes {
        let state = if node.is_sleeping() {
            "sleeping".yellow()
        } else {
            "awake".green()
        };
        println!(
            "  {} {} {}",
            "•".bright_green(),
            node.name().bright_cyan(),
            node.tag().dimmed()
        );
        println!(
            "    {:?}, {} dBm, {}",
            node.device_type(),
            node.last_rssi(),
            state
        );
        let names: Vec<_> = node.features().iter().map(|f| f.name()).collect();
        if !names.is_empty() {
            println!("    Features: {}", names.join(", "));
        }
    }
    Ok(())
}

struct SamplePrinter;

impl FeatureListener for SamplePrinter {
    fn on_update(&self, feature: &Arc<Feature>, sample: &Sample) {
        println!("{:<16} {}", feature.name().bright_cyan(), sample);
    }
}

fn cmd_listen(device: &str, wanted: &[String], duration: u64) -> Result<()> {
    let node = find_node(device)?;
    connect(&node)?;

    let features: Vec<_> = if wanted.is_empty() {
        node.features()
            .into_iter()
            .filter(|f| f.is_enabled())
            .collect()
    } else {
        wanted
            .iter()
            .map(|name| {
                node.feature(name)
                    .with_context(|| format!("{} has no feature {}", node.name(), name))
            })
            .collect::<Result<_>>()?
    };

    let printer: Arc<dyn FeatureListener> = Arc::new(SamplePrinter);
    for feature in &features {
        feature.add_listener(printer.clone());
        if !node.enable_notifications(feature)? {
            println!("  {} {} cannot notify", "⚠".yellow(), feature.name());
        }
    }

    let deadline = Instant::now() + Duration::from_secs(duration);
    while Instant::now() < deadline && node.is_connected() {
        node.wait_for_notifications(PUMP_INTERVAL)?;
    }

    for feature in &features {
        feature.remove_listener(&printer);
        if node.is_connected() {
            node.disable_notifications(feature)?;
        }
    }
    node.disconnect()?;
    println!("{} Disconnected", "✓".green());
    Ok(())
}

enum UpgradeOutcome {
    Complete(u32),
    Failed(FirmwareUpgradeError),
}

struct ProgressPrinter(Mutex<mpsc::Sender<UpgradeOutcome>>);

impl FirmwareUpgradeListener for ProgressPrinter {
    fn on_progress(&self, _file: &FirmwareFile, bytes_sent: u32, total: u32) {
        print!("\r  {} / {} bytes", bytes_sent, total);
        let _ = std::io::stdout().flush();
    }

    fn on_complete(&self, _file: &FirmwareFile, bytes_sent: u32) {
        if let Ok(tx) = self.0.lock() {
            let _ = tx.send(UpgradeOutcome::Complete(bytes_sent));
        }
    }

    fn on_error(&self, _file: &FirmwareFile, error: FirmwareUpgradeError) {
        if let Ok(tx) = self.0.lock() {
            let _ = tx.send(UpgradeOutcome::Failed(error));
        }
    }
}

fn cmd_upgrade(device: &str, path: &Path) -> Result<()> {
    let file = FirmwareFile::open(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let node = find_node(device)?;
    connect(&node)?;

    let upgrade = FirmwareUpgrade::for_node(&node)
        .with_context(|| format!("{} does not support firmware upgrade", node.name()))?;
    let (tx, rx) = mpsc::channel();
    upgrade.add_listener(Arc::new(ProgressPrinter(Mutex::new(tx))));

    println!(
        "{} Uploading {} ({} bytes, CRC {:08X})",
        "→".bright_blue(),
        path.display(),
        file.size(),
        file.crc()
    );
    if !upgrade.upgrade_firmware(&file)? {
        anyhow::bail!("Another upload is already running on {}", node.name());
    }

    let deadline = Instant::now() + UPGRADE_TIMEOUT;
    let outcome = loop {
        if let Ok(outcome) = rx.try_recv() {
            break Some(outcome);
        }
        if Instant::now() >= deadline || !node.is_connected() {
            break None;
        }
        node.wait_for_notifications(PUMP_INTERVAL)?;
    };
    println!();

    let result = match outcome {
        Some(UpgradeOutcome::Complete(bytes)) => {
            println!("{} Firmware uploaded ({} bytes)", "✓".green(), bytes);
            Ok(())
        }
        Some(UpgradeOutcome::Failed(error)) => Err(anyhow::anyhow!("Upgrade failed: {}", error)),
        None => {
            upgrade.cancel();
            Err(anyhow::anyhow!("Upgrade did not finish"))
        }
    };

    if node.is_connected() {
        node.disconnect()?;
    }
    result
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<28} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
