//! Standalone simulation run
//!
//! Runs the telemetry service against the simulated car for a few seconds and
//! prints every decoded event followed by the last known values.
//!
//! Usage:
//!   simulate [config.toml] [--seconds <n>] [--silence <ratio>]
//!
//! Example:
//!   cargo run --example simulate -- config/can.toml --seconds 5 --silence 0.2

use can_telemetry::{SimulatedCar, TelemetryConfig, TelemetryService, VirtualBus};
use std::env;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_CONFIG: &str = r#"
[can_ids]
rpm = 0x141
gear = 0x141
vehicle_speed = 0x0D1

[[current_data]]
name = "engine_load"
pid = 0x04
response_length = 1

[[current_data]]
name = "throttle_position"
pid = 0x11
response_length = 1

[derived]
estimate_gear = true
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut config_path = None;
    let mut seconds = 3;
    let mut silence = 0.0;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--seconds" if i + 1 < args.len() => {
                seconds = args[i + 1].parse()?;
                i += 2;
            }
            "--silence" if i + 1 < args.len() => {
                silence = args[i + 1].parse()?;
                i += 2;
            }
            path => {
                config_path = Some(path.to_string());
                i += 1;
            }
        }
    }

    let config = match &config_path {
        Some(path) => TelemetryConfig::from_toml_str(&fs::read_to_string(path)?)?,
        None => TelemetryConfig::from_toml_str(DEFAULT_CONFIG)?,
    };

    let (core_end, car_end) = VirtualBus::pair("vcan0");
    let car_shutdown = Arc::new(AtomicBool::new(false));
    let car = SimulatedCar::new(car_end, &config)?
        .with_silence_probability(silence)
        .spawn(Arc::clone(&car_shutdown), Duration::from_millis(20))?;

    let service = TelemetryService::new(&config, Arc::new(core_end))?;
    let events = service.store().subscribe();
    let running = service.start()?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        if let Ok(event) = events.recv_timeout(Duration::from_millis(100)) {
            println!("{:<34} {}", event.signal_name, event.value);
        }
    }

    let store = Arc::clone(running.store());
    let stats = running.poller().stats();
    running.shutdown()?;
    car_shutdown.store(true, Ordering::Release);
    match car.join() {
        Ok(Ok(())) => log::debug!("Simulated car stopped"),
        Ok(Err(e)) => log::warn!("Simulated car stopped with error: {}", e),
        Err(_) => log::error!("Simulated car thread panicked"),
    }

    println!("\n=== LAST KNOWN VALUES ===");
    for (name, stored) in store.snapshot() {
        println!("{:<34} {}", name, stored.value);
    }
    println!(
        "\nQueries: {} sent, {} answered, {} timed out",
        stats.queries_sent, stats.responses_matched, stats.timeouts
    );

    Ok(())
}
