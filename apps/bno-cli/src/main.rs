use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use bno_protocol as bno;
use bno_protocol::{BnoStick, ConfigRegistry, ImuSample, MetricsHub};
use serial_transport::{SerialTransport, Transport};

mod sim;

#[derive(Parser, Debug)]
#[command(
    name = "bno",
    version,
    about = "BNO055 USB stick CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Talk to an in-process simulated stick instead of a serial port
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// Stick config (JSON or YAML); the built-in BNO055 config when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port; autodetected from the config's udev keys when omitted
    #[arg(long, global = true)]
    port: Option<String>,

    /// Receive budget per reply, in milliseconds
    #[arg(long, default_value_t = 100u64, global = true)]
    timeout_ms: u64,

    /// Print prometheus metrics when the command finishes
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports and mark the ones matching the config's udev keys
    Ports,
    /// Query board information
    Info,
    /// Read one page-0 register
    ReadReg {
        /// Register name (e.g. OPR_MODE) or hex address (e.g. 0x3D)
        register: String,
    },
    /// Write one page-0 register and check the echo
    WriteReg {
        /// Register name or hex address
        register: String,
        /// Hex value, e.g. 0x0C
        value: String,
    },
    /// Read consecutive registers and decode them by name
    Burst {
        /// Start register name or hex address
        start: String,
        /// Number of bytes to read
        #[arg(long, default_value_t = 1u16)]
        count: u16,
    },
    /// Stream IMU samples
    Stream {
        /// Stop after this many samples (default: until an error)
        #[arg(long)]
        count: Option<usize>,
        /// Write samples as JSON lines to this file
        #[arg(long)]
        to: Option<PathBuf>,
        /// Print raw register counts instead of physical units
        #[arg(long, action = ArgAction::SetTrue)]
        raw: bool,
    },
    /// Check config, connectivity and chip id
    Doctor,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let hub = if cli.metrics {
        Some(MetricsHub::new().map_err(anyhow::Error::msg)?)
    } else {
        None
    };

    let outcome = match &cli.command {
        Commands::Ports => list_ports(&config),
        cmd if cli.mock => run_on(
            open_stick(&cli, &config, &hub, sim::simulated_stick())?,
            cmd,
        ),
        cmd => {
            let path = resolve_port(cli.port.as_deref(), &config)?;
            let transport = SerialTransport::new(&path, config.serial().clone());
            info!(port = %transport.path(), "using serial port");
            run_on(open_stick(&cli, &config, &hub, transport)?, cmd)
        }
    };

    if let Some(h) = &hub {
        print!("{}", h.encode_text());
    }
    outcome
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<ConfigRegistry> {
    match path {
        Some(p) => bno::load_config_file(p)
            .with_context(|| format!("loading stick config {}", p.display())),
        None => ConfigRegistry::builtin().context("loading built-in stick config"),
    }
}

fn resolve_port(port: Option<&str>, config: &ConfigRegistry) -> Result<String> {
    if let Some(p) = port {
        return Ok(p.to_string());
    }
    let rule = config.usb_match();
    if rule.is_empty() {
        anyhow::bail!("no --port given and the config has no udev keys to autodetect with");
    }
    SerialTransport::autodetect(&rule).context("autodetecting stick (pass --port to skip)")
}

fn open_stick<T: Transport>(
    cli: &Cli,
    config: &ConfigRegistry,
    hub: &Option<MetricsHub>,
    transport: T,
) -> Result<BnoStick<T>> {
    let mut stick = BnoStick::new(config.clone(), transport)
        .with_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(h) = hub {
        stick = stick.with_metrics(h.stick.clone());
    }
    stick.open().context("opening stick")?;
    Ok(stick)
}

// Runs the command, then closes the stick whether or not the command succeeded.
fn run_on<T: Transport>(mut stick: BnoStick<T>, cmd: &Commands) -> Result<()> {
    let result = match cmd {
        Commands::Ports => Ok(()),
        Commands::Info => info_cmd(&mut stick),
        Commands::ReadReg { register } => read_reg_cmd(&mut stick, register),
        Commands::WriteReg { register, value } => write_reg_cmd(&mut stick, register, value),
        Commands::Burst { start, count } => burst_cmd(&mut stick, start, *count),
        Commands::Stream { count, to, raw } => stream_cmd(&mut stick, *count, to.as_deref(), *raw),
        Commands::Doctor => doctor_cmd(&mut stick),
    };
    if let Err(e) = stick.close() {
        warn!(error = %e, "closing stick");
    }
    result
}

fn list_ports(config: &ConfigRegistry) -> Result<()> {
    let rule = config.usb_match();
    let ports = SerialTransport::list().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for p in ports {
        let mark = if !rule.is_empty() && rule.matches(&p) {
            "*"
        } else {
            " "
        };
        println!("{mark} {p}");
    }
    Ok(())
}

fn info_cmd<T: Transport>(stick: &mut BnoStick<T>) -> Result<()> {
    let info = stick.query_board_info().context("querying board info")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn read_reg_cmd<T: Transport>(stick: &mut BnoStick<T>, register: &str) -> Result<()> {
    let address = parse_register(stick.config(), register)?;
    let value = stick.read_register(address)?;
    println!(
        "{} (0x{address:02X}) = 0x{value:02X} ({value})",
        register_label(stick.config(), address)
    );
    Ok(())
}

fn write_reg_cmd<T: Transport>(stick: &mut BnoStick<T>, register: &str, value: &str) -> Result<()> {
    let address = parse_register(stick.config(), register)?;
    let value =
        bno::parse_hex_u8(value).ok_or_else(|| anyhow::anyhow!("invalid hex byte '{value}'"))?;
    match stick.write_register(address, value)? {
        bno::WriteOutcome::Confirmed => {
            println!(
                "{} (0x{address:02X}) <- 0x{value:02X}: confirmed",
                register_label(stick.config(), address)
            );
            Ok(())
        }
        bno::WriteOutcome::Mismatch {
            echoed_address,
            echoed_value,
        } => anyhow::bail!(
            "write not confirmed: device echoed 0x{echoed_value:02X} at 0x{echoed_address:02X}"
        ),
    }
}

fn burst_cmd<T: Transport>(stick: &mut BnoStick<T>, start: &str, count: u16) -> Result<()> {
    let address = parse_register(stick.config(), start)?;
    for v in stick.burst_read(address, count)? {
        println!("0x{:02X}\t{}\t{}", v.address, v.name, v.value);
    }
    Ok(())
}

fn stream_cmd<T: Transport>(
    stick: &mut BnoStick<T>,
    count: Option<usize>,
    to: Option<&Path>,
    raw: bool,
) -> Result<()> {
    let mut writer = match to {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    stick.activate_streaming().context("starting stream")?;
    let mut received = 0usize;
    let mut failure = None;
    for item in stick.stream(count)? {
        match item {
            Ok(sample) => {
                received += 1;
                print_sample(&sample, raw);
                if let Some(w) = writer.as_mut() {
                    serde_json::to_writer(&mut *w, &sample)?;
                    w.write_all(b"\n")?;
                }
            }
            Err(e) => failure = Some(e),
        }
    }
    if let Some(w) = writer.as_mut() {
        w.flush()?;
    }
    if let Err(e) = stick.deactivate_streaming() {
        warn!(error = %e, "stopping stream");
    }
    info!(received, "stream finished");

    match failure {
        // Running until the stick goes quiet is the normal end of an unbounded stream.
        Some(bno::Error::Transport(serial_transport::TransportError::Timeout { .. }))
            if count.is_none() && received > 0 =>
        {
            Ok(())
        }
        Some(e) => Err(e).context(format!("stream stopped after {received} samples")),
        None => Ok(()),
    }
}

fn doctor_cmd<T: Transport>(stick: &mut BnoStick<T>) -> Result<()> {
    let cfg = stick.config();
    println!(
        "doctor: page0={} page1={} start_frames={} stop_frames={} timeout={:?}",
        cfg.page0().len(),
        cfg.page1().len(),
        cfg.start_streaming().len(),
        cfg.stop_streaming().len(),
        stick.timeout(),
    );
    for (key, value) in cfg.udev() {
        println!("udev: {key}={value}");
    }
    println!("open: ok");

    // A stick left streaming by an earlier run answers commands with telemetry.
    if let Err(e) = stick.deactivate_streaming() {
        println!("stop stream: {e}");
    }

    match stick.query_board_info() {
        Ok(info) => println!(
            "board info: shuttle=0x{:04X} hw=0x{:04X} sw=0x{:04X} type={}",
            info.shuttle_id, info.hardware_id, info.software_id, info.board_type
        ),
        Err(e) => println!("board info: {e}"),
    }

    let ok = stick.check_chip_id().context("reading chip id")?;
    println!(
        "chip id: {}",
        if ok {
            "ok (BNO055)"
        } else {
            "unexpected"
        }
    );
    if let Some(mode) = stick.config().register_address("OPR_MODE_ADDR") {
        match stick.read_register(mode) {
            Ok(v) => println!("operation mode: 0x{v:02X}"),
            Err(e) => println!("operation mode: {e}"),
        }
    }
    println!("doctor: done");
    if !ok {
        anyhow::bail!("chip id check failed");
    }
    Ok(())
}

fn print_sample(s: &ImuSample, raw: bool) {
    let ts = s
        .received_at
        .map(|t| {
            t.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "".into())
        })
        .unwrap_or_else(|| "".into());
    let cal = s.status.calibration_status();
    let cal = format!("{}{}{}{}", cal.system, cal.gyro, cal.accel, cal.mag);
    if raw {
        let m = &s.raw;
        println!(
            "{ts}\tacc={},{},{}\tgyr={},{},{}\tmag={},{},{}\teul={},{},{}\tcal={cal}",
            m.accel.x, m.accel.y, m.accel.z,
            m.gyro.x, m.gyro.y, m.gyro.z,
            m.mag.x, m.mag.y, m.mag.z,
            m.euler.yaw, m.euler.roll, m.euler.pitch,
        );
    } else {
        let m = &s.scaled;
        println!(
            "{ts}\tacc={:.2},{:.2},{:.2}\tgyr={:.2},{:.2},{:.2}\tmag={:.2},{:.2},{:.2}\teul={:.2},{:.2},{:.2}\ttemp={}\tcal={cal}",
            m.accel.x, m.accel.y, m.accel.z,
            m.gyro.x, m.gyro.y, m.gyro.z,
            m.mag.x, m.mag.y, m.mag.z,
            m.euler.yaw, m.euler.roll, m.euler.pitch,
            s.status.temperature,
        );
    }
}

/// Accept a page-0 register name, with or without the `_ADDR` suffix, or a hex address.
fn parse_register(config: &ConfigRegistry, s: &str) -> Result<u8> {
    let t = s.trim();
    let upper = t.to_ascii_uppercase();
    if let Some(a) = config
        .register_address(&upper)
        .or_else(|| config.register_address(&format!("{upper}_ADDR")))
    {
        return Ok(a);
    }
    bno::parse_hex_u8(t).ok_or_else(|| anyhow::anyhow!("unknown register '{t}'"))
}

fn register_label(config: &ConfigRegistry, address: u8) -> &str {
    config
        .register_name(address)
        .map(bno::field_name)
        .unwrap_or("?")
}
