//! End-to-end runs of the telemetry service against the simulated car

use can_telemetry::{
    CanBus, CurrentDataConfig, RawFrame, SignalValue, SimulatedCar, TelemetryConfig,
    TelemetryService, VirtualBus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
[conversation_ids]
send_id = 0x7E0
ecu_response_id = 0x7E8

[conversation]
tick_period_ms = 5
response_timeout_ms = 40

[can_ids]
rpm = 0x141
gear = 0x141
vehicle_speed = 0x0D1
coolant_temp = 0x144
oil_temp = 0x144

[[current_data]]
name = "engine_load"
pid = 0x04
response_length = 1

[[current_data]]
name = "mass_air_flow"
pid = 0x10
response_length = 2

[derived]
estimate_gear = true
"#;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_simulated_car_populates_store() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = TelemetryConfig::from_toml_str(CONFIG).unwrap();
    let (core, car_end) = VirtualBus::pair("sim");
    let car = SimulatedCar::new(car_end, &config).unwrap().with_seed(2024);
    let car_shutdown = Arc::new(AtomicBool::new(false));
    let car_handle = car
        .spawn(Arc::clone(&car_shutdown), Duration::from_millis(2))
        .unwrap();

    let service = TelemetryService::new(&config, Arc::new(core)).unwrap();
    let events = service.store().subscribe_with_capacity(1 << 16);
    let running = service.start().unwrap();
    let store = Arc::clone(running.store());

    let populated = wait_until(Duration::from_secs(5), || {
        ["rpm", "coolant_temp", "vehicle_speed", "engine_load", "mass_air_flow"]
            .iter()
            .all(|name| store.get(name).is_some())
    });
    assert!(populated, "store snapshot: {:?}", store.snapshot());

    let stats = running.poller().stats();
    assert!(stats.queries_sent > 0);
    assert!(stats.responses_matched > 0);
    assert_eq!(stats.malformed_responses, 0);

    assert!(running.shutdown().is_ok());
    car_shutdown.store(true, Ordering::Release);
    car_handle.join().unwrap().unwrap();

    // The store holds the last value published for each signal
    let mut last_rpm = None;
    for event in events.try_iter() {
        if event.signal_name == "rpm" {
            last_rpm = Some(event.value);
        }
    }
    assert_eq!(store.get("rpm"), last_rpm);
}

#[test]
fn test_silent_car_times_out_and_keeps_polling() {
    let config = TelemetryConfig::from_toml_str(CONFIG).unwrap();
    let (core, car_end) = VirtualBus::pair("silent");
    let car = SimulatedCar::new(car_end, &config)
        .unwrap()
        .with_seed(7)
        .with_silence_probability(1.0);
    let car_shutdown = Arc::new(AtomicBool::new(false));
    let car_handle = car
        .spawn(Arc::clone(&car_shutdown), Duration::from_millis(2))
        .unwrap();

    let running = TelemetryService::new(&config, Arc::new(core))
        .unwrap()
        .start()
        .unwrap();
    let poller = Arc::clone(running.poller());

    // Two timeouts means the cycle moved past the first signal
    assert!(wait_until(Duration::from_secs(5), || poller.stats().timeouts >= 2));
    assert!(running.store().get("engine_load").is_none());
    assert_eq!(poller.stats().responses_matched, 0);

    assert!(running.shutdown().is_ok());
    car_shutdown.store(true, Ordering::Release);
    car_handle.join().unwrap().unwrap();
}

#[test]
fn test_unsolicited_response_is_decoded() {
    let config = TelemetryConfig::new()
        .with_current_data(CurrentDataConfig::new("timing_advance", 0x0E, 1));
    let (core, car_end) = VirtualBus::pair("unsolicited");
    let running = TelemetryService::new(&config, Arc::new(core))
        .unwrap()
        .start()
        .unwrap();

    // A response for the configured PID counts even if another tool asked
    car_end
        .send(&RawFrame::new(0x7E8, &[0x01, 0x41, 0x0E, 0x90, 0x55, 0x55, 0x55, 0x55]).unwrap())
        .unwrap();

    let store = Arc::clone(running.store());
    assert!(wait_until(Duration::from_secs(2), || store.get("timing_advance").is_some()));
    assert_eq!(store.get("timing_advance"), Some(SignalValue::Float(8.0)));

    assert!(running.shutdown().is_ok());
}
