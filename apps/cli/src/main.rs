use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rfkit_core::device::{RfStormDevice, RfStormMode};
use rfkit_core::protocol::ble::BdAddress;
use rfkit_core::protocol::mosart::{self, MosartPayload};
use rfkit_core::{DeviceRegistry, DriverConfig, RadioPacket, Subscriber, TracingSubscriber};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Short-range radio research toolkit", long_about = None)]
struct Args {
    /// Driver tuning file (TOML)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open an interface and list its capabilities
    Probe {
        /// Interface name (ubertooth0, butterfly0, rfstorm0, capture.pcap)
        interface: String,
    },
    /// Print frames received on an interface
    Sniff {
        interface: String,

        /// BLE sniffing mode
        #[arg(long, value_enum, default_value_t = BleMode::Advertisements)]
        mode: BleMode,

        /// Channel to listen on
        #[arg(long)]
        channel: Option<u8>,

        /// Only follow this BD address (BLE) or Mosart address (RFStorm, 8 hex digits)
        #[arg(long)]
        target: Option<String>,

        /// RFStorm: hop channels until a Mosart device is found
        #[arg(long)]
        scan: bool,

        /// Stop after this many frames
        #[arg(long)]
        count: Option<usize>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Decode an on-air Mosart frame given in hex
    DecodeMosart { hex: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BleMode {
    Advertisements,
    NewConnection,
    ExistingConnection,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => DriverConfig::load_from_file(path)
            .with_context(|| format!("loading driver config {}", path))?,
        None => DriverConfig::default(),
    };
    let registry = DeviceRegistry::with_default_drivers(config);

    match args.command {
        Commands::Probe { interface } => {
            let device = registry.get(&interface)?;
            println!("{}: up={}", device.interface(), device.is_up());
            for capability in device.capabilities() {
                println!("  {}", capability);
            }
            device.close();
        }
        Commands::Sniff {
            interface,
            mode,
            channel,
            target,
            scan,
            count,
            seconds,
        } => {
            let device = registry.get(&interface)?;
            let logger: Arc<dyn Subscriber> = Arc::new(TracingSubscriber);
            device.subscribe(&logger);

            if let Some(rfstorm) = device.as_any().downcast_ref::<RfStormDevice>() {
                configure_rfstorm(rfstorm, target.as_deref(), channel, scan)?;
            } else if let Some(sniffer) = device.as_ble_sniffer() {
                let target = target
                    .as_deref()
                    .map(str::parse::<BdAddress>)
                    .transpose()
                    .map_err(anyhow::Error::msg)?;
                let channel = channel.unwrap_or(37);
                match mode {
                    BleMode::Advertisements => sniffer.sniff_advertisements(target, channel)?,
                    BleMode::NewConnection => sniffer.sniff_new_connections(target, channel)?,
                    BleMode::ExistingConnection => {
                        sniffer.sniff_existing_connection(None, None, None)?
                    }
                }
            } else if channel.is_some() || target.is_some() {
                warn!(interface = %interface, "Interface ignores channel and target options");
            }

            let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
            let mut received = 0usize;
            while count.is_none_or(|c| received < c)
                && deadline.is_none_or(|d| Instant::now() < d)
            {
                if let Some(packet) = device.recv() {
                    received += 1;
                    print_packet(&packet);
                } else if interface.ends_with(".pcap") {
                    break;
                }
            }
            info!(frames = received, "Sniffing finished");
            device.close();
        }
        Commands::DecodeMosart { hex } => {
            let data = parse_hex(&hex)?;
            let Some((offset, frame)) = mosart::resync(&data) else {
                bail!("no valid Mosart frame in {} bytes", data.len());
            };
            if offset > 0 {
                println!("(skipped {} leading bytes)", offset);
            }
            println!(
                "address={} seq={} type={:?}",
                rfkit_core::dissector::hex(&frame.address),
                frame.sequence,
                frame.frame_type()
            );
            match frame.payload {
                MosartPayload::Action { .. } => println!("{:?}", frame.action()),
                payload => println!("{:?}", payload),
            }
        }
    }
    Ok(())
}

fn configure_rfstorm(
    device: &RfStormDevice,
    target: Option<&str>,
    channel: Option<u8>,
    scan: bool,
) -> Result<()> {
    if let Some(target) = target {
        let bytes = parse_hex(target)?;
        let address: [u8; mosart::ADDRESS_SIZE] = bytes
            .as_slice()
            .try_into()
            .context("Mosart addresses are 4 bytes")?;
        device.set_mode(RfStormMode::Sniffer { address })?;
    }
    if let Some(channel) = channel {
        use rfkit_core::device::ChannelControl;
        device.set_channel(channel)?;
    }
    if scan {
        device.start_scan()?;
    }
    Ok(())
}

fn print_packet(packet: &RadioPacket) {
    match packet {
        RadioPacket::Mosart(p) => match p.fields().action() {
            Some(action) => println!("{:?} {:?}", p.fields().address, action),
            None => println!("{:?}", p.fields()),
        },
        RadioPacket::Butterfly(p) => match p.fields().ble_packet() {
            Some(ble) => println!(
                "ch={:2} rssi={:4} aa=0x{:08X} {}",
                ble.channel,
                ble.rssi,
                ble.access_address,
                rfkit_core::dissector::hex(&ble.pdu)
            ),
            None => println!("{:?}", p.fields()),
        },
        other => println!("{:?}", other),
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits.trim_start_matches("0x");
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}
