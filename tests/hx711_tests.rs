use std::sync::Arc;
use std::time::{Duration, Instant};

use pinctl::backend::MockGpioBackend;
use pinctl::config::{Hx711Timing, PinMode, RegistryConfig};
use pinctl::error::GpioError;
use pinctl::hx711::{Gain, Hx711, sign_extend_24};
use pinctl::registry::{PinRegistry, PinUsage};

const DATA: u32 = 5;
const CLOCK: u32 = 6;

/// Data line reads for one conversion: the ready low, then 24 bits MSB first.
fn conversion(raw: u32) -> Vec<u8> {
    let mut reads = vec![0];
    reads.extend((0..24).rev().map(|bit| ((raw >> bit) & 1) as u8));
    reads
}

fn open_sensor(backend: &MockGpioBackend) -> Hx711 {
    let sensor =
        Hx711::open(backend, DATA, CLOCK, Hx711Timing::default()).expect("open hx711");
    let _ = backend.take_writes(CLOCK);
    sensor
}

fn rising_clock_edges(backend: &MockGpioBackend) -> usize {
    backend
        .take_writes(CLOCK)
        .iter()
        .filter(|&&level| level == 1)
        .count()
}

#[test]
fn sign_extension_uses_bit_23() {
    assert_eq!(sign_extend_24(0x000000), 0);
    assert_eq!(sign_extend_24(0x7F_FFFF), 8_388_607);
    assert_eq!(sign_extend_24(0x80_0000), -8_388_608);
    assert_eq!(sign_extend_24(0xFF_FFFF), -1);
    assert_eq!(sign_extend_24(0xFF00_0001), 1);
}

#[test]
fn gain_codes() {
    assert_eq!(Gain::from_code(1).expect("gain"), Gain::A128);
    assert_eq!(Gain::from_code(2).expect("gain"), Gain::B32);
    assert_eq!(Gain::from_code(3).expect("gain"), Gain::A64);
    assert!(matches!(
        Gain::from_code(0),
        Err(GpioError::InvalidParameter(_))
    ));
    assert_eq!(Gain::B32.pulses(), 2);
    assert_eq!(Gain::default(), Gain::A128);
}

#[test]
fn open_configures_both_lines() {
    let backend = MockGpioBackend::default();
    let sensor = open_sensor(&backend);

    let data = backend.line_config(DATA).expect("data line requested");
    assert_eq!(data.mode, PinMode::InputPullUp);
    assert!(!data.active_low);
    let clock = backend.line_config(CLOCK).expect("clock line requested");
    assert_eq!(clock.mode, PinMode::Output);
    assert_eq!(sensor.data_pin(), DATA);
    assert_eq!(sensor.clock_pin(), CLOCK);
    assert_eq!(sensor.gain(), Gain::A128);
}

#[test]
fn reads_one_conversion() {
    let backend = MockGpioBackend::default();
    let mut sensor = open_sensor(&backend);

    backend.script_reads(DATA, conversion(0x00_1234));
    assert_eq!(sensor.read(Gain::A128, 1).expect("read"), 0x1234);
    assert_eq!(rising_clock_edges(&backend), 24 + 1);

    backend.script_reads(DATA, conversion(0x80_0000));
    assert_eq!(sensor.read(Gain::A128, 1).expect("read"), -8_388_608);
}

#[test]
fn averages_and_rounds() {
    let backend = MockGpioBackend::default();
    let mut sensor = open_sensor(&backend);

    backend.script_reads(DATA, conversion(10));
    backend.script_reads(DATA, conversion(13));
    assert_eq!(sensor.read(Gain::A128, 2).expect("read"), 12);

    backend.script_reads(DATA, conversion(0xFF_FFF6)); // -10
    backend.script_reads(DATA, conversion(0xFF_FFF3)); // -13
    assert_eq!(sensor.read(Gain::A128, 2).expect("read"), -12);
}

#[test]
fn zero_samples_uses_default_count() {
    let backend = MockGpioBackend::default();
    let mut sensor = open_sensor(&backend);

    for _ in 0..10 {
        backend.script_reads(DATA, conversion(100));
    }
    assert_eq!(sensor.read(Gain::A128, 0).expect("read"), 100);
    assert_eq!(rising_clock_edges(&backend), 10 * 25);
}

#[test]
fn gain_change_discards_one_conversion() {
    let backend = MockGpioBackend::default();
    let mut sensor = open_sensor(&backend);

    backend.script_reads(DATA, conversion(999));
    backend.script_reads(DATA, conversion(42));
    assert_eq!(sensor.read(Gain::A64, 1).expect("read"), 42);
    assert_eq!(sensor.gain(), Gain::A64);
    assert_eq!(rising_clock_edges(&backend), 2 * (24 + 3));

    // same gain again, no discarded conversion
    backend.script_reads(DATA, conversion(7));
    assert_eq!(sensor.read(Gain::A64, 1).expect("read"), 7);
    assert_eq!(rising_clock_edges(&backend), 24 + 3);
}

#[test]
fn missing_sensor_fails_open_in_bounded_time() {
    let backend = MockGpioBackend::default();
    backend.set_level(DATA, 1);

    let started = Instant::now();
    let result = Hx711::open(&backend, DATA, CLOCK, Hx711Timing::default());
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(GpioError::NoSensor(DATA))));
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_secs(2));
    assert!(!backend.is_requested(DATA));
    assert!(!backend.is_requested(CLOCK));
}

#[test]
fn read_times_out_when_sensor_stops_responding() {
    let backend = MockGpioBackend::default();
    let timing = Hx711Timing {
        ready_timeout_ms: 100,
        ..Hx711Timing::default()
    };
    let mut sensor = Hx711::open(&backend, DATA, CLOCK, timing).expect("open hx711");
    backend.set_level(DATA, 1);

    let started = Instant::now();
    assert!(matches!(
        sensor.read(Gain::A128, 3),
        Err(GpioError::Timeout(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn drop_powers_down_and_releases_lines() {
    let backend = MockGpioBackend::default();
    let sensor = open_sensor(&backend);

    drop(sensor);
    assert_eq!(backend.take_writes(CLOCK), vec![0, 1]);
    assert!(!backend.is_requested(DATA));
    assert!(!backend.is_requested(CLOCK));
}

#[test]
fn identical_pins_are_rejected() {
    let backend = MockGpioBackend::default();
    assert!(matches!(
        Hx711::open(&backend, DATA, DATA, Hx711Timing::default()),
        Err(GpioError::InvalidPin(DATA))
    ));
}

#[test]
fn registry_owns_both_hx711_pins() {
    let backend = MockGpioBackend::default();
    let registry = PinRegistry::new(Arc::new(backend.clone()), RegistryConfig::default());

    registry.init_hx711(DATA, CLOCK).expect("init hx711");
    assert_eq!(registry.status(DATA).expect("status").usage, PinUsage::Hx711Data);
    assert_eq!(registry.status(CLOCK).expect("status").usage, PinUsage::Hx711Clock);

    assert!(matches!(
        registry.read(DATA),
        Err(GpioError::AlreadyInitialized(DATA))
    ));
    assert!(matches!(
        registry.init(CLOCK, PinMode::Output, 0),
        Err(GpioError::AlreadyInitialized(CLOCK))
    ));
    assert!(matches!(
        registry.init_hx711(7, CLOCK),
        Err(GpioError::AlreadyInitialized(CLOCK))
    ));
    assert!(matches!(
        registry.read_hx711(CLOCK, Gain::A128, 1),
        Err(GpioError::InvalidParameter(_))
    ));

    backend.script_reads(DATA, conversion(321));
    assert_eq!(registry.read_hx711(DATA, Gain::A128, 1).expect("read"), 321);

    backend.script_reads(DATA, conversion(654));
    let task = registry
        .read_hx711_async(DATA, Gain::A128, 1)
        .expect("spawn read");
    assert_eq!(task.name(), "hx711-5");
    assert_eq!(task.join().expect("task").expect("read"), 654);

    // releasing the clock pin ends the whole session
    registry.deinit(CLOCK).expect("deinit");
    assert_eq!(registry.status(DATA).expect("status").usage, PinUsage::Free);
    assert!(!backend.is_requested(DATA));
    assert!(!backend.is_requested(CLOCK));
    assert!(matches!(
        registry.read_hx711(DATA, Gain::A128, 1),
        Err(GpioError::NotInitialized(DATA))
    ));
}

#[test]
fn registry_reports_missing_sensor() {
    let backend = MockGpioBackend::default();
    let registry = PinRegistry::new(Arc::new(backend.clone()), RegistryConfig::default());
    backend.set_level(DATA, 1);

    assert!(matches!(
        registry.init_hx711(DATA, CLOCK),
        Err(GpioError::NoSensor(DATA))
    ));
    assert_eq!(registry.status(DATA).expect("status").usage, PinUsage::Free);
    assert!(matches!(
        registry.init_hx711(DATA, DATA),
        Err(GpioError::InvalidPin(DATA))
    ));
}
