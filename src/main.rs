//! I-7000 Bus Controller - Main Entry Point
//!
//! Command line front end for waveform generation, acquisition file
//! inspection, and scanning/recording on a simulated module chain.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use i7000_daq::{
    bus::{Bus, CommandExchange, DeviceScanner, ReceiveBuffer, ScanEvent, ScanRange, SimulatedTransport},
    config::{self, keys, AcquisitionSettings, Preferences},
    experiment::{BusSampleSource, ChannelLayout, Experiment, ExperimentController},
    protocol,
    signal::{SampleTiming, SignalForm, Waveform, DEFAULT_TAU},
    types::{Device, DeviceTable},
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "i7000-daq")]
#[command(about = "I-7000 serial bus scanner, command console and experiment recorder", long_about = None)]
struct Cli {
    /// Also write daily-rotated log files into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Preferences file (defaults to the platform data directory)
    #[arg(long, global = true)]
    preferences: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one period of a reference waveform
    Generate {
        #[arg(long, value_enum, default_value = "sine")]
        form: FormArg,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        min: f64,
        #[arg(long, default_value = "5", allow_hyphen_values = true)]
        max: f64,
        /// Period in milliseconds
        #[arg(long, default_value = "2000")]
        period: u32,
        /// Sampling interval in milliseconds
        #[arg(long, default_value = "200")]
        timeout: u32,
        /// Trapezoid rise time in milliseconds
        #[arg(long, default_value_t = DEFAULT_TAU)]
        tau: f64,
    },

    /// Summarize an acquisition file
    Inspect {
        /// Path to a .fim file
        file: PathBuf,
    },

    /// Scan a simulated bus for modules
    Scan {
        /// Simulated module, e.g. `01=7017` (repeatable)
        #[arg(long = "module", value_parser = parse_module)]
        modules: Vec<(u8, String)>,
        #[arg(long, default_value = "0")]
        start: u16,
        #[arg(long, default_value = "256")]
        end: u16,
        /// Pause between polls in milliseconds
        #[arg(long, default_value = "500")]
        pause: u64,
        /// Append checksums to frames
        #[arg(long)]
        checksum: bool,
        /// Print the device table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send commands read from stdin to a simulated bus, one per line
    Console {
        #[arg(long = "module", value_parser = parse_module)]
        modules: Vec<(u8, String)>,
        #[arg(long)]
        checksum: bool,
    },

    /// Record a new experiment from a simulated bus
    Record {
        /// Folder the untitled experiment is created in
        #[arg(long)]
        dir: PathBuf,
        #[arg(long = "module", value_parser = parse_module, required = true)]
        modules: Vec<(u8, String)>,
        /// Module driven with the reference waveform and looped back to the inputs
        #[arg(long, value_parser = parse_address)]
        output: Option<u8>,
        /// Recording length in seconds
        #[arg(long, default_value = "5")]
        duration: u64,
        /// Save the experiment under this name when done
        #[arg(long)]
        save_as: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormArg {
    Sine,
    Trapezoid,
    Triangle,
    Calibration,
}

impl From<FormArg> for SignalForm {
    fn from(form: FormArg) -> Self {
        match form {
            FormArg::Sine => SignalForm::Sine,
            FormArg::Trapezoid => SignalForm::Trapezoid,
            FormArg::Triangle => SignalForm::Triangle,
            FormArg::Calibration => SignalForm::Calibration,
        }
    }
}

fn parse_address(text: &str) -> std::result::Result<u8, String> {
    protocol::parse_address(&text.to_ascii_uppercase())
        .ok_or_else(|| format!("{:?} is not a two-digit hex address", text))
}

fn parse_module(text: &str) -> std::result::Result<(u8, String), String> {
    let (address, name) = text
        .split_once('=')
        .ok_or_else(|| format!("expected ADDRESS=NAME, got {:?}", text))?;
    Ok((parse_address(address)?, name.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    tracing::info!("Starting i7000-daq");

    match cli.command {
        Commands::Generate {
            form,
            min,
            max,
            period,
            timeout,
            tau,
        } => generate(form.into(), min, max, SampleTiming::new(period, timeout), tau),
        Commands::Inspect { file } => inspect(&file, cli.preferences.as_deref()),
        Commands::Scan {
            modules,
            start,
            end,
            pause,
            checksum,
            json,
        } => scan(
            &modules,
            ScanRange::new(start, end),
            Duration::from_millis(pause),
            checksum,
            json,
        ),
        Commands::Console { modules, checksum } => console(&modules, checksum),
        Commands::Record {
            dir,
            modules,
            output,
            duration,
            save_as,
        } => record(
            &dir,
            &modules,
            output,
            Duration::from_secs(duration),
            save_as.as_deref(),
            cli.preferences.as_deref(),
        ),
    }
}

fn init_logging(log_dir: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,i7000_daq=debug"))
    };
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "i7000-daq.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(filter()),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            Ok(None)
        }
    }
}

/// Bus over simulated modules; with `loopback`, every other module reads
/// back what was last written to it
fn simulated_bus(modules: &[(u8, String)], checksum: bool, loopback: Option<u8>) -> Bus {
    let buffer = ReceiveBuffer::new();
    let transport = modules
        .iter()
        .fold(SimulatedTransport::new(buffer.clone()), |t, (address, name)| {
            let t = t.with_module(*address, name.clone());
            match loopback {
                Some(output) if output != *address => t.with_loopback(*address, output),
                _ => t,
            }
        })
        .with_checksum(checksum);
    let bus = Bus::new(transport, buffer);
    bus.set_checksum_enabled(checksum);
    bus
}

/// Load preferences and clear the marks of a recording that never stopped
fn load_preferences(path: Option<&Path>) -> Result<(Preferences, Option<PathBuf>)> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => config::ensure_app_data_dir()
            .map(|dir| dir.join(config::PREFERENCES_FILE))
            .map_err(|e| tracing::warn!("Preferences will not be persisted: {}", e))
            .ok(),
    };
    let mut prefs = match &path {
        Some(path) if path.exists() => Preferences::load_from(path)?,
        _ => Preferences::default(),
    };

    if prefs.get_bool(keys::EXPERIMENT_RUNNING) {
        tracing::warn!(
            "Experiment {:?} did not stop cleanly, last file {:?}",
            prefs.get_or(keys::LAST_EXPERIMENT_RUNNING, ""),
            prefs.get_or(keys::LAST_EXPERIMENT_PATH, "")
        );
        prefs.set_bool(keys::EXPERIMENT_RUNNING, false);
    }
    Ok((prefs, path))
}

fn generate(form: SignalForm, min: f64, max: f64, timing: SampleTiming, tau: f64) -> Result<()> {
    if timing.response_timeout == 0 || timing.period == 0 {
        bail!("period and timeout must be positive");
    }
    let waveform = Waveform::from_settings(form, min, max, tau);
    for (i, sample) in waveform.generate(timing).iter().enumerate() {
        println!("{}\t{:.3}", i, sample);
    }
    Ok(())
}

fn inspect(file: &Path, preferences: Option<&Path>) -> Result<()> {
    let (prefs, _) = load_preferences(preferences)?;
    let shared = prefs.into_shared();
    let experiment = Experiment::open(file, shared.clone())?;
    let mut controller: ExperimentController = ExperimentController::new(shared);

    let summary = controller
        .open(&experiment)?
        .context("experiment has no acquisition data yet")?;

    println!("Experiment: {}", experiment.name());
    match &summary.header {
        Some(header) => {
            println!("Created:    {}", header.created);
            println!("Modules:    {}", header.module_count);
            println!("Interval:   {} ms", header.response_timeout);
            println!(
                "Signal:     {} {}..{} period {} ms",
                header.signal_form, header.min, header.max, header.period
            );
        }
        None => println!("No header"),
    }
    if let Some(axes) = &summary.axes {
        println!("Axes:       {}", axes);
    }
    println!("Rows:       {}", summary.decode.rows);
    for (i, channel) in controller.channels().iter().enumerate() {
        let min = channel.values().iter().min().copied().unwrap_or_default();
        let max = channel.values().iter().max().copied().unwrap_or_default();
        println!("Channel {}:  {} points, min {}, max {}", i, channel.len(), min, max);
    }
    for error in &summary.decode.errors {
        println!("Decode error: {}", error);
    }
    Ok(())
}

fn scan(
    modules: &[(u8, String)],
    range: ScanRange,
    pause: Duration,
    checksum: bool,
    json: bool,
) -> Result<()> {
    let bus = simulated_bus(modules, checksum, None);
    let scanner = DeviceScanner::new(bus).with_pause(pause);
    let handle = scanner.start(range)?;

    for event in handle.events().iter() {
        match event {
            ScanEvent::Progress(percent) => tracing::debug!("Scan {}%", percent),
            ScanEvent::Finished(devices) => {
                let table = DeviceTable::from(devices);
                if json {
                    println!("{}", serde_json::to_string_pretty(&table)?);
                } else {
                    for device in &table {
                        println!("{}", device);
                    }
                    println!("{} device(s) found", table.len());
                }
                break;
            }
            ScanEvent::Cancelled => bail!("scan cancelled"),
            ScanEvent::Failed(e) => bail!("scan failed: {}", e),
        }
    }
    Ok(())
}

fn console(modules: &[(u8, String)], checksum: bool) -> Result<()> {
    let bus = simulated_bus(modules, checksum, None);
    let mut exchange = CommandExchange::new(bus);

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match exchange.send(&line) {
            Ok(response) => println!("{}", response.trim_end()),
            Err(e) if e.is_recoverable() => println!("! {}", e),
            Err(e) => return Err(e.into()),
        }
    }
    tracing::debug!("{} command(s) in history", exchange.history().len());
    Ok(())
}

fn record(
    dir: &Path,
    modules: &[(u8, String)],
    output: Option<u8>,
    duration: Duration,
    save_as: Option<&str>,
    preferences: Option<&Path>,
) -> Result<()> {
    let bus = simulated_bus(modules, false, output);
    let devices: DeviceTable = modules
        .iter()
        .map(|(address, name)| Device::new(protocol::format_address(*address), name.clone()))
        .collect();

    let (mut prefs, prefs_path) = load_preferences(preferences)?;
    let mut settings = AcquisitionSettings::from_preferences(&prefs)?;
    let source = BusSampleSource::from_devices(bus, &devices, output, settings.sample_interval() / 2);
    settings.module_count = source.inputs().len() as u32;
    settings.apply_to(&mut prefs);
    let shared = prefs.into_shared();

    let mut experiment = Experiment::create_untitled(dir, shared.clone())?;
    if let Some(path) = prefs_path {
        experiment = experiment.with_preferences_file(path);
    }
    let mut controller: ExperimentController = ExperimentController::new(shared);
    controller.reset_channels(ChannelLayout::new(
        settings.module_count as usize,
        i64::from(settings.response_timeout),
    ));

    experiment.run(Box::new(source))?;
    let events = experiment
        .live_events()
        .context("recorder did not start")?;
    let started = Instant::now();
    while started.elapsed() < duration {
        std::thread::sleep(Duration::from_millis(100));
        controller.drain_live(&events);
    }
    let rows = experiment.stop()?;
    controller.drain_live(&events);
    println!("Recorded {} row(s) into {:?}", rows, experiment.file());

    if let Some(name) = save_as {
        let parent = experiment
            .folder()
            .parent()
            .map(Path::to_path_buf)
            .context("experiment folder has no parent")?;
        controller.save_as(&mut experiment, &parent, name)?;
        println!("Saved as {:?}", experiment.file());
    }
    Ok(())
}
