//! CAN Telemetry CLI Application
//!
//! Command-line front end of the can-telemetry library:
//! - Loads the signal tables and conversation settings from TOML
//! - Opens a SocketCAN interface, or a simulated car when none is available
//! - Prints every decoded event and a last-known-value report on exit

use anyhow::{Context, Result};
use can_telemetry::{CanBus, SimulatedCar, TelemetryConfig, TelemetryService, VirtualBus};
use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

mod config;
mod report;

use report::OutputFormat;

/// How often the simulated car steps
const SIMULATION_PERIOD: Duration = Duration::from_millis(20);

/// CAN Telemetry - Decode live vehicle telemetry
#[derive(Parser, Debug)]
#[command(name = "can-telemetry")]
#[command(about = "Decode CAN telemetry and poll the ECU for on-demand signals", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/can.toml")]
    config: PathBuf,

    /// CAN interface to open
    #[arg(short, long, default_value = "can0")]
    interface: String,

    /// Use the simulated car instead of a real interface
    #[arg(long)]
    simulate: bool,

    /// Share of queries the simulated car leaves unanswered (0.0-1.0)
    #[arg(long, default_value_t = 0.0, value_name = "RATIO", value_parser = parse_ratio)]
    silence: f64,

    /// Stop after this many seconds (default: run until the bus fails)
    #[arg(short, long, value_name = "SECONDS")]
    duration: Option<u64>,

    /// Output format for events and the final report
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors and the final report
    #[arg(short, long)]
    quiet: bool,
}

/// Simulated car running on the far end of a virtual bus
struct Simulation {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<std::result::Result<(), can_telemetry::BusError>>,
}

impl Simulation {
    fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        match self.handle.join() {
            Ok(Ok(())) => log::debug!("Simulated car stopped"),
            Ok(Err(e)) => log::debug!("Simulated car stopped: {}", e),
            Err(_) => log::error!("Simulated car thread panicked"),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("CAN Telemetry CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using telemetry library v{}", can_telemetry::VERSION);

    log::info!("Loading configuration from: {:?}", args.config);
    let config = config::load_config(&args.config)?;

    let (bus, simulation) = open_bus(&args, &config)?;
    let service = TelemetryService::new(&config, bus).context("Failed to build telemetry service")?;
    let running = service.start().context("Failed to start telemetry service")?;
    let events = running.store().subscribe();

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while running.is_running() && deadline.map_or(true, |d| Instant::now() < d) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                if !args.quiet {
                    println!("{}", report::format_event(&event, args.format)?);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let store = Arc::clone(running.store());
    let poller = Arc::clone(running.poller());
    let result = running.shutdown();
    if let Some(simulation) = simulation {
        simulation.stop();
    }

    println!(
        "{}",
        report::format_snapshot(&store.snapshot(), &poller.stats(), args.format)?
    );

    result.context("CAN bus failed")?;
    Ok(())
}

/// Open the configured interface, falling back to the simulated car
fn open_bus(args: &Args, config: &TelemetryConfig) -> Result<(Arc<dyn CanBus>, Option<Simulation>)> {
    if !args.simulate {
        match open_interface(&args.interface) {
            Ok(bus) => return Ok((bus, None)),
            Err(e) => log::warn!("{:#}; using the simulated car", e),
        }
    }

    let (core_end, car_end) = VirtualBus::pair(args.interface.clone());
    let car = SimulatedCar::new(car_end, config)
        .context("Failed to build simulated car")?
        .with_silence_probability(args.silence);
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = car
        .spawn(Arc::clone(&shutdown), SIMULATION_PERIOD)
        .context("Failed to start simulated car")?;

    Ok((Arc::new(core_end), Some(Simulation { shutdown, handle })))
}

#[cfg(feature = "socketcan")]
fn open_interface(interface: &str) -> Result<Arc<dyn CanBus>> {
    let bus = can_telemetry::SocketCanBus::open(interface)
        .with_context(|| format!("Failed to open CAN interface '{}'", interface))?;
    log::info!("Listening on {}", interface);
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "socketcan"))]
fn open_interface(interface: &str) -> Result<Arc<dyn CanBus>> {
    anyhow::bail!(
        "cannot open '{}': built without SocketCAN support (enable the `socketcan` feature)",
        interface
    )
}

/// Initialize logging based on verbosity level
/// Parse a probability in 0.0..=1.0
fn parse_ratio(s: &str) -> std::result::Result<f64, String> {
    let ratio: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{} is not between 0.0 and 1.0", s))
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["can-telemetry"]);
        assert_eq!(args.config, PathBuf::from("config/can.toml"));
        assert_eq!(args.interface, "can0");
        assert_eq!(args.format, OutputFormat::Text);
        assert!(!args.simulate);
        assert!(args.duration.is_none());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "can-telemetry",
            "--simulate",
            "--duration",
            "5",
            "--format",
            "json",
            "-vv",
            "--silence",
            "0.25",
        ]);
        assert!(args.simulate);
        assert_eq!(args.duration, Some(5));
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.silence, 0.25);
    }

    #[test]
    fn test_silence_ratio_is_range_checked() {
        for bad in ["NaN", "1.5", "-0.1", "inf", "half"] {
            assert!(
                Args::try_parse_from(["can-telemetry", "--silence", bad]).is_err(),
                "{bad} accepted"
            );
        }
        let args = Args::try_parse_from(["can-telemetry", "--silence", "1.0"]).unwrap();
        assert_eq!(args.silence, 1.0);
    }

    #[test]
    fn test_simulated_bus_runs() {
        let config = TelemetryConfig::new().with_broadcast("rpm", 0x141);
        let args = Args::parse_from(["can-telemetry", "--simulate"]);
        let (bus, simulation) = open_bus(&args, &config).unwrap();

        assert!(bus.recv(Duration::from_secs(1)).unwrap().is_some());
        simulation.unwrap().stop();
    }
}
