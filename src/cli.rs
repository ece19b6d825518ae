//! Command-line front end: argument parsing, logging setup, and dispatch
//! onto the library. Mirrors the shape of `original_source/reinkpy/epson.py`'s
//! `__main__` block (the `--search-file` scanner) and `ui.py`'s subcommand
//! surface, reworked as a non-interactive `clap` CLI — no terminal UI is
//! implemented, matching spec.md §1's out-of-scope list.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use epson_waste_reset::device::{Device, ModelSelection};
use epson_waste_reset::discovery::{self, Candidate};
use epson_waste_reset::epson::control::D4Control;
use epson_waste_reset::pipe::{FilePipe, Pipe, UsbDeviceInfo, UsbPipe};

#[derive(Parser)]
#[command(name = "epson-waste-tool", about = "Read and reset Epson printer EEPROM state over USB")]
struct Cli {
    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Select a specific model name instead of relying on autodetection.
    #[arg(long, global = true, env = "EPSON_MODEL")]
    model: Option<String>,

    /// Open the given `/dev/usb/lp*`-style character device instead of a
    /// raw USB interface.
    #[arg(long, global = true, env = "EPSON_DEVICE_FILE")]
    device_file: Option<PathBuf>,

    /// Restrict USB discovery to this vendor id (hex, e.g. `04b8`).
    #[arg(long, global = true)]
    vendor: Option<String>,

    /// Restrict USB discovery to this product id (hex).
    #[arg(long, global = true)]
    product: Option<String>,

    /// Restrict USB discovery to this serial number.
    #[arg(long, global = true)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every printer-class USB interface and character device found.
    ListDevices,
    /// Select a discovered device by its `list-devices` index, or (if no
    /// index is given) by the `--vendor`/`--product`/`--serial` globals,
    /// and print its identification.
    Select { index: Option<usize> },
    /// List the reset operations the configured (or autodetected) model exposes.
    ListOperations,
    /// Run one named reset operation.
    Run { operation_id: String },
    /// Run the aggregate waste-counter reset.
    ResetWaste,
    /// Read one or more EEPROM addresses (hex, e.g. `0x14`).
    Read { addresses: Vec<String> },
    /// Write one EEPROM address/value pair (hex).
    Write { address: String, value: String },
    /// Brute-force the read key against a known address.
    FindRkey { known_addr: String },
    /// Brute-force the write key from a wordlist of 8-byte candidates.
    FindWkey {
        wordlist: PathBuf,
        #[arg(long)]
        addr: Option<String>,
    },
    /// Scan a binary blob (pcap dump, firmware image) for factory commands.
    SearchFile {
        path: PathBuf,
        #[arg(long)]
        yield_raw: bool,
    },
}

fn parse_hex_u16(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn parse_hex_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

type OpenDevice = Device<D4Control<Box<dyn Pipe>>>;

/// USB descriptor fields strong enough to stand in as device-level `info`,
/// taking priority over whatever `refresh_identification` later parses out
/// of the IEEE 1284 id string for the same keys.
fn usb_device_level_info(info: &UsbDeviceInfo) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(mfg) = &info.manufacturer {
        out.insert("MFG".to_string(), mfg.clone());
    }
    if let Some(product) = &info.product {
        out.insert("MDL".to_string(), product.clone());
    }
    if let Some(serial) = &info.serial_number {
        out.insert("SN".to_string(), serial.clone());
    }
    out
}

/// Enters 1284.4, opens the `EPSON-CTRL` channel, and autodetects (or
/// force-configures, via `--model`) the printer model over an already-opened
/// byte pipe. Shared by every way of picking a device: explicit
/// vendor/product/serial/device-file flags, or a `select` index.
/// `device_level` seeds the device-info layer before identification runs,
/// so it takes priority per [`Device::info`]'s `ChainMap`-style precedence.
fn build_device(
    pipe: Box<dyn Pipe>,
    cli: &Cli,
    device_level: BTreeMap<String, String>,
) -> anyhow::Result<OpenDevice> {
    let link = epson_waste_reset::d4::Link::new(
        pipe,
        epson_waste_reset::epson::PREAMBLE,
        epson_waste_reset::epson::REPLY_MARKER,
    );
    let ctrl = D4Control::open(link)?;
    let mut device = Device::new(ctrl);
    for (k, v) in device_level {
        device.set_info(k, v);
    }
    device.refresh_identification()?;
    let selection = match &cli.model {
        Some(name) => ModelSelection::Named(name),
        None => ModelSelection::Autodetect,
    };
    device.configure(selection)?;
    Ok(device)
}

fn open_device(cli: &Cli) -> anyhow::Result<OpenDevice> {
    if let Some(path) = &cli.device_file {
        let pipe: Box<dyn Pipe> = Box::new(FilePipe::new(path.clone()));
        build_device(pipe, cli, BTreeMap::new())
    } else {
        let vendor = cli.vendor.as_deref().map(parse_hex_u16).transpose()?;
        let product = cli.product.as_deref().map(parse_hex_u16).transpose()?;
        let usb = UsbPipe::open_matching(vendor, product, cli.serial.as_deref())?;
        let device_level = usb_device_level_info(usb.info());
        build_device(Box::new(usb), cli, device_level)
    }
}

/// Every candidate device found by discovery, in `list-devices`/`select`
/// index order.
fn enumerate_candidates() -> Vec<Candidate> {
    discovery::find(std::time::Duration::from_secs(0), None)
}

fn open_candidate(candidate: &Candidate) -> anyhow::Result<(Box<dyn Pipe>, BTreeMap<String, String>)> {
    match candidate {
        Candidate::Usb(info) => {
            let usb = UsbPipe::open_matching(
                Some(info.vendor_id),
                Some(info.product_id),
                info.serial_number.as_deref(),
            )?;
            let device_level = usb_device_level_info(usb.info());
            Ok((Box::new(usb), device_level))
        }
        Candidate::File(path) => Ok((Box::new(FilePipe::new(path.clone())), BTreeMap::new())),
        Candidate::Network(_) => {
            anyhow::bail!("network-discovered candidates cannot be opened directly yet")
        }
    }
}

fn open_device_by_index(cli: &Cli, index: usize) -> anyhow::Result<OpenDevice> {
    let candidates = enumerate_candidates();
    let candidate = candidates
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("no discovered device at index {index}"))?;
    let (pipe, device_level) = open_candidate(candidate)?;
    build_device(pipe, cli, device_level)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::ListDevices => {
            for (i, candidate) in enumerate_candidates().into_iter().enumerate() {
                println!("[{i}] {candidate:?}");
            }
        }
        Command::Select { index } => {
            let device = match index {
                Some(i) => open_device_by_index(&cli, *i)?,
                None => open_device(&cli)?,
            };
            println!(
                "brand={:?} model={:?} serial={:?}",
                device.brand(),
                device.model(),
                device.serial_number()
            );
        }
        Command::ListOperations => {
            let device = open_device(&cli)?;
            for op in device.list_operations() {
                println!("{}\t{}", op.id, op.description);
            }
        }
        Command::Run { operation_id } => {
            let mut device = open_device(&cli)?;
            let ok = device.run_operation(operation_id)?;
            println!("{}", if ok { "ok" } else { "failed" });
        }
        Command::ResetWaste => {
            let mut device = open_device(&cli)?;
            let ok = device.reset_waste()?;
            println!("{}", if ok { "ok" } else { "failed" });
        }
        Command::Read { addresses } => {
            let mut device = open_device(&cli)?;
            let addrs: Vec<u16> = addresses
                .iter()
                .map(|s| parse_hex_u16(s))
                .collect::<Result<_, _>>()?;
            for (addr, value) in device.read_eeprom(&addrs)? {
                match value {
                    Some(v) => println!("{addr:#06x} = {v:#04x}"),
                    None => println!("{addr:#06x} = <no reply>"),
                }
            }
        }
        Command::Write { address, value } => {
            let mut device = open_device(&cli)?;
            let addr = parse_hex_u16(address)?;
            let value = parse_hex_u8(value)?;
            let ok = device.write_eeprom(&[(addr, value)], true)?;
            println!("{}", if ok { "ok" } else { "failed" });
        }
        Command::FindRkey { known_addr } => {
            let mut device = open_device(&cli)?;
            let addr = parse_hex_u16(known_addr)?;
            match device.find_rkey(addr, 0u16..=0xFFFF)? {
                Some(key) => println!("found rkey {key:#06x}"),
                None => println!("no rkey found"),
            }
        }
        Command::FindWkey { wordlist, addr } => {
            let mut device = open_device(&cli)?;
            let addr = addr.as_deref().map(parse_hex_u16).transpose()?;
            let candidates = read_wkey_candidates(wordlist)?;
            match device.find_wkey(&candidates, addr)? {
                Some(key) => println!("found wkey {:?}", String::from_utf8_lossy(&key)),
                None => println!("no wkey found"),
            }
        }
        Command::SearchFile { path, yield_raw } => {
            let data = std::fs::read(path)?;
            for m in epson_waste_reset::device::search_bin(&data, *yield_raw) {
                println!("{m:?}");
            }
        }
    }
    Ok(())
}

fn read_wkey_candidates(path: &std::path::Path) -> anyhow::Result<Vec<[u8; 8]>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| line.len() == 8)
        .map(|line| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(line.as_bytes());
            buf
        })
        .collect())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
