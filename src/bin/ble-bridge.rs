use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use log::{info, warn};
use ble_bridge::{init_logging, Adapter, Scanner};
use ble_bridge::config::io::ConfigFile;
use ble_bridge::error::CliError;

// CoreBluetooth aborts the process on first use unless a Bluetooth usage description is embedded.
#[cfg(target_os = "macos")]
embed_plist::embed_info_plist!(concat!(env!("OUT_DIR"), "/Info.plist"));

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Connects to a Bluetooth LE peripheral, sends messages and prints what it notifies, or lists the peripherals in range with --scan.\n\nExample: ble-bridge --peripheral AA:BB:CC:DD:EE:FF --characteristic 6e400003-b5a3-f393-e0a9-e50e24dcca9e --characteristic 6e400002-b5a3-f393-e0a9-e50e24dcca9e --send 0102 --read 1", long_about = None)]
struct Args {
    /// Peripheral id, MAC address or advertised local name
    #[arg(long, required_unless_present = "scan")]
    peripheral: Option<String>,

    /// Characteristic UUID to use; repeat for several. Writes go to the first writable one,
    /// every notifying one is subscribed.
    #[arg(long = "characteristic", required_unless_present = "scan")]
    characteristics: Vec<String>,

    /// List the peripherals in range for this many seconds instead of connecting.
    #[arg(long, value_name = "SECONDS", conflicts_with_all = ["send", "read"])]
    scan: Option<u64>,

    /// Log connection progress
    #[arg(long, short)]
    verbose: bool,

    /// Path to a JSON file with timeouts; see the documentation of AdapterConfig.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hex encoded payload to send after connecting; repeat for several.
    #[arg(long)]
    send: Vec<String>,

    /// Number of messages to read and print as hex.
    #[arg(long, default_value_t = 0)]
    read: usize,

    /// Give up on a read after this many milliseconds. Waits indefinitely when omitted.
    #[arg(long)]
    read_timeout_ms: Option<u64>,
}

fn scan(seconds: u64, verbose: bool) -> Result<(), CliError> {
    let scanner = Scanner::new(verbose)?;

    for device in scanner.scan(Duration::from_secs(seconds))? {
        println!("{}\t{}", device.address, device.name);
    }
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    if let Some(seconds) = args.scan {
        return scan(seconds, args.verbose);
    }

    let config = ConfigFile::locate(args.config.as_deref())?.read()?;
    let payloads = args.send
        .iter()
        .map(|payload| hex::decode(payload.trim_start_matches("0x")))
        .collect::<Result<Vec<_>, _>>()?;

    let adapter = Adapter::with_config(args.verbose, config)?;
    adapter.set_peripheral_id(args.peripheral.as_deref().unwrap_or_default())?;
    adapter.set_characteristic_ids(&args.characteristics)?;
    adapter.connect()?;
    info!("Connected to {}", adapter.peripheral_id());

    for payload in &payloads {
        adapter.send_message(payload)?;
    }

    for _ in 0..args.read {
        let message = match args.read_timeout_ms {
            None => adapter.read_message()?,
            Some(timeout) => match adapter.read_message_timeout(Duration::from_millis(timeout))? {
                Some(message) => message,
                None => {
                    warn!("No message received within {} ms", timeout);
                    break;
                },
            },
        };
        println!("{}", hex::encode(message));
    }

    if let Some(err) = adapter.last_error() {
        warn!("Last error reported by the adapter: {}", err);
    }

    adapter.disconnect();
    Ok(())
}

fn main() -> Result<(), CliError> {
    let args = Args::parse();
    init_logging(args.verbose)?;
    info!(concat!("ble-bridge ", env!("CARGO_PKG_VERSION")));

    run(args)
}
