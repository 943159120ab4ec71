//! CAN Live Log CLI Application
//!
//! Receives frames from a gs_usb adapter (or a synthetic demo bus) and prints
//! them as they land in the per-identifier log channels. Channels can be added
//! and removed while receiving by typing commands on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

mod commands;
mod config;
mod controller;
mod output;

use can_live_core::device::scripted::demo_traffic;
use can_live_core::device::{GsUsbDriver, ScriptedDriver};
use can_live_core::{parse_selector, Driver, Monitor, Selector};
use commands::spawn_stdin_reader;
use config::{load_config, AppConfig};
use controller::{Controller, Flow};
use output::{OutputFormat, Printer};

/// How long the main loop waits for worker events per iteration
const PUMP_WAIT: Duration = Duration::from_millis(20);

/// CAN Live Log - Watch CAN traffic per identifier
#[derive(Parser, Debug)]
#[command(name = "can-live")]
#[command(about = "Live per-identifier log of CAN traffic from a gs_usb adapter", long_about = None)]
#[command(version)]
struct Args {
    /// Bus bitrate in bit/s (overrides the config file)
    #[arg(short, long, value_name = "BPS")]
    bitrate: Option<u32>,

    /// Dedicated channel for a hex CAN id (can be repeated)
    #[arg(long = "channel", value_name = "HEX")]
    channels: Vec<String>,

    /// Create a channel for every new identifier seen
    #[arg(long)]
    auto_add: bool,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Replay synthetic traffic instead of opening an adapter
    #[arg(long, value_name = "FRAMES", num_args = 0..=1, default_missing_value = "500")]
    demo: Option<usize>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("CAN Live Log CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using core library v{}", can_live_core::VERSION);

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    let config = apply_overrides(config, &args)?;

    match args.demo {
        Some(frames) => {
            log::info!("Demo mode: replaying {} synthetic frames", frames);
            let driver = ScriptedDriver::new(demo_traffic(frames)?);
            run(driver, &config, args.format)
        }
        None => run(GsUsbDriver::new(), &config, args.format),
    }
}

/// Fold command line flags into the loaded configuration
fn apply_overrides(mut config: AppConfig, args: &Args) -> Result<AppConfig> {
    if let Some(bitrate) = args.bitrate {
        anyhow::ensure!(bitrate > 0, "--bitrate must be positive");
        config.device.bitrate = bitrate;
    }
    for text in &args.channels {
        match parse_selector(text) {
            Some(Selector::Id(_)) => config.channels.ids.push(text.clone()),
            _ => anyhow::bail!("--channel expects a hex CAN id, got {:?}", text),
        }
    }
    if args.auto_add {
        config.channels.auto_add = true;
    }
    Ok(config)
}

fn run<D: Driver>(driver: D, config: &AppConfig, format: OutputFormat) -> Result<()> {
    let mut monitor = Monitor::new(driver, config.monitor.clone());
    for selector in config.channels.selectors() {
        monitor.ensure_channel(selector);
    }
    monitor.set_auto_add(config.channels.auto_add);

    let mut printer = Printer::new(std::io::stdout().lock(), format);
    let mut controller = Controller::new(config.device.bitrate);

    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    spawn_stdin_reader(command_tx).context("Failed to start command reader")?;

    printer.note("Type 'help' for commands");
    if config.device.autostart {
        controller.start(&mut monitor, &mut printer);
    }

    loop {
        monitor.pump(&mut printer, PUMP_WAIT);
        check_output(&mut monitor, &mut printer)?;

        let command = match command_rx.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => continue,
            Err(TryRecvError::Disconnected) => break,
        };
        log::debug!("Command: {:?}", command);
        let flow = controller.handle(command, &mut monitor, &mut printer);
        check_output(&mut monitor, &mut printer)?;
        if flow == Flow::Quit {
            break;
        }
    }

    monitor.stop();
    // Anything received before the worker stopped
    monitor.pump(&mut printer, Duration::ZERO);
    check_output(&mut monitor, &mut printer)?;
    log::info!("Exiting");
    Ok(())
}

/// Stop receiving once output can no longer be written
fn check_output<D: Driver, W: Write>(
    monitor: &mut Monitor<D>,
    printer: &mut Printer<W>,
) -> Result<()> {
    match printer.take_error() {
        Some(e) => {
            monitor.stop();
            Err(e).context("Failed to write output")
        }
        None => Ok(()),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
