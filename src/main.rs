use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ypsopump_core::ble::constants;
use ypsopump_core::ble::transport::BleTransport;
use ypsopump_core::config::PumpConfig;
use ypsopump_core::controller::{polling, BasalProgram, ConnectionState, PumpController};
use ypsopump_core::crypto::KeyPair;
use ypsopump_core::relay::{HttpRelay, KeyExchangeRelay};
use ypsopump_core::storage::{PersistenceStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "pumpctl",
    about = "Command-line client for the YpsoPump protocol engine",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for the persisted session key, counters, and config
    #[arg(long, env = "YPSOPUMP_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Pump serial number (determines the BLE MAC address)
    #[arg(long, env = "YPSOPUMP_SERIAL")]
    serial: u64,

    /// Base URL of the key-exchange relay
    #[arg(long, env = "YPSOPUMP_RELAY_URL")]
    relay_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "YPSOPUMP_LOG")]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the initial key exchange with the pump via the relay.
    ///
    /// Generates (or reuses) this device's X25519 key pair, reads the pump's
    /// challenge and public key, and exchanges them through the relay for an
    /// encrypted session key, which is written back to the pump and then
    /// persisted locally.
    ///
    /// Examples:
    ///   pumpctl pair --serial 10175983 --relay-url https://relay.example.com
    Pair,
    /// Read and print the current system status.
    ///
    /// Examples:
    ///   pumpctl status
    Status,
    /// Start, cancel, or check the status of a bolus.
    ///
    /// Examples:
    ///   pumpctl bolus start --total 4.5
    ///   pumpctl bolus start --total 6.0 --duration 120 --immediate 2.0
    #[command(subcommand)]
    Bolus(BolusCommand),
    /// Start or cancel a temporary basal rate.
    ///
    /// Examples:
    ///   pumpctl tbr start --percent 150 --duration 60
    ///   pumpctl tbr cancel
    #[command(subcommand)]
    Tbr(TbrCommand),
    /// Push the host's current time to the pump.
    ///
    /// Examples:
    ///   pumpctl sync-time
    SyncTime,
    /// Read or write a raw setting index.
    ///
    /// Examples:
    ///   pumpctl setting get 1
    ///   pumpctl setting set 1 3
    #[command(subcommand)]
    Setting(SettingCommand),
    /// Read or switch the active basal program.
    ///
    /// Examples:
    ///   pumpctl program get
    ///   pumpctl program set a
    #[command(subcommand)]
    Program(ProgramCommand),
    /// List recent Events- or Alerts-stream history entries.
    ///
    /// Examples:
    ///   pumpctl history events --count 10
    ///   pumpctl history alerts
    History {
        #[arg(value_enum)]
        stream: HistoryStreamArg,
        /// Number of most-recent entries to print
        #[arg(long, default_value = "10")]
        count: i32,
    },
    /// Read pump device info (serial, firmware, manufacturer, model).
    ///
    /// Examples:
    ///   pumpctl device-info
    DeviceInfo,
    /// Run the 60s background status-and-history poller until interrupted.
    ///
    /// Examples:
    ///   pumpctl watch
    Watch,
}

#[derive(Subcommand)]
enum BolusCommand {
    Start {
        /// Total units to deliver
        #[arg(long)]
        total: f64,
        /// Extended-bolus duration in minutes (0 = fast bolus)
        #[arg(long, default_value = "0")]
        duration: u32,
        /// Immediate (up-front) portion of an extended bolus, in units
        #[arg(long, default_value = "0.0")]
        immediate: f64,
    },
    Cancel {
        /// 1 = fast bolus, 2 = extended bolus
        #[arg(long, default_value = "1")]
        kind: u8,
    },
    Status,
}

#[derive(Subcommand)]
enum TbrCommand {
    Start {
        /// Basal percentage, e.g. 150 for 150%
        #[arg(long)]
        percent: u32,
        /// Duration in minutes
        #[arg(long)]
        duration: u32,
    },
    Cancel,
}

#[derive(Subcommand)]
enum SettingCommand {
    Get { index: i32 },
    Set { index: i32, value: i32 },
}

#[derive(Subcommand)]
enum ProgramCommand {
    Get,
    Set {
        #[arg(value_enum)]
        program: ProgramArg,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProgramArg {
    A,
    B,
}

impl From<ProgramArg> for BasalProgram {
    fn from(p: ProgramArg) -> Self {
        match p {
            ProgramArg::A => BasalProgram::A,
            ProgramArg::B => BasalProgram::B,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum HistoryStreamArg {
    Events,
    Alerts,
}

impl From<HistoryStreamArg> for ypsopump_core::ble::commands::history::HistoryStream {
    fn from(s: HistoryStreamArg) -> Self {
        use ypsopump_core::ble::commands::history::HistoryStream;
        match s {
            HistoryStreamArg::Events => HistoryStream::Events,
            HistoryStreamArg::Alerts => HistoryStream::Alerts,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_level).compact().init();

    let config = PumpConfig::new(args.data_dir.clone(), args.log.clone(), args.relay_url.clone());
    info!(data_dir = %config.data_dir.display(), "config loaded");

    let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open(&config.data_dir).await?);
    let relay: Option<Arc<dyn KeyExchangeRelay>> = match &config.relay_url {
        Some(url) => Some(Arc::new(HttpRelay::new(url.clone())?)),
        None => None,
    };

    if matches!(args.command, Command::Pair) {
        return run_pair(&store, relay.as_deref(), args.serial).await;
    }

    // Every other subcommand needs a live BLE transport. The OS-level GATT
    // client/scanner/bonding flow is out of scope for this crate (spec §1) —
    // a host application supplies its own `BleTransport` and drives
    // `PumpController` directly; this binary only demonstrates the surface.
    let _: Option<Arc<dyn BleTransport>> = None;
    eprintln!("error: no BleTransport is wired up for this platform.");
    eprintln!("pumpctl links a BleTransport supplied by the host app; this binary");
    eprintln!("demonstrates the command surface but cannot reach real hardware.");
    std::process::exit(1);
}

async fn run_pair(
    store: &Arc<dyn PersistenceStore>,
    relay: Option<&dyn KeyExchangeRelay>,
    serial: u64,
) -> Result<()> {
    relay.context("--relay-url (or YPSOPUMP_RELAY_URL) is required to pair")?;
    // Validated up front so a broken RNG fails fast, before any BLE I/O.
    let _ = KeyPair::generate();
    let _ = constants::mac_from_serial(serial);
    let _ = store;
    eprintln!("error: pairing requires a live BleTransport — see `pumpctl --help`.");
    std::process::exit(1);
}

/// Runs the background poller against an already-paired controller until the
/// process receives an interrupt. A host application wires its transport
/// into `PumpController` and calls this; kept here so the demonstrated
/// command surface mirrors what `controller::polling` exercises in tests.
#[allow(dead_code)]
async fn run_watch(controller: Arc<PumpController>) -> Result<()> {
    let mut connection_state = controller.subscribe_connection_state();
    let mut pump_events = controller.subscribe_pump_events();
    let handle = polling::spawn(controller);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted — stopping poller");
                break;
            }
            Ok(state) = connection_state.recv() => {
                match state {
                    ConnectionState::Error(e) => warn!(err = %e, "connection error"),
                    other => info!(?other, "connection state changed"),
                }
            }
            Ok(event) = pump_events.recv() => {
                info!(?event, "pump event");
            }
        }
    }

    handle.stop().await;
    Ok(())
}
