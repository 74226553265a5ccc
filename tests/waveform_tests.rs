use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pinctl::backend::MockGpioBackend;
use pinctl::config::{PinMode, PwmLimits};
use pinctl::line::{LineConfig, LineHandle};
use pinctl::waveform::{Blink, Pulse, Pwm, PwmSettings, PwmTiming};

const STOP_TIMEOUT: Duration = Duration::from_secs(1);

fn output_line(backend: &MockGpioBackend, pin: u32) -> Arc<LineHandle> {
    let line = LineHandle::request(backend, pin, LineConfig::output(PinMode::Output, 0))
        .expect("request output line");
    Arc::new(line)
}

fn timing(frequency: u32, duty_cycle: u32) -> PwmTiming {
    PwmTiming::from_settings(&PwmSettings::new(frequency, duty_cycle).clamped(&PwmLimits::EXTENDED))
}

#[test]
fn pwm_phases_add_up_to_period() {
    for frequency in [1, 3, 7, 50, 400, 999, 1000, 4444, 45000] {
        let period = (1_000_000.0 / frequency as f64).round() as u64;
        for duty in 1..100 {
            let t = timing(frequency, duty);
            assert_eq!(t.on_us + t.off_us, period, "{frequency} Hz at {duty}%");
        }
    }
}

#[test]
fn pwm_phase_rounding() {
    let t = timing(1000, 25);
    assert_eq!((t.on_us, t.off_us), (250, 750));

    // 1e6 / 3 rounds to 333333, a third of that rounds down
    let t = timing(3, 33);
    assert_eq!((t.on_us, t.off_us), (110000, 223333));
}

#[test]
fn pwm_constant_levels_idle_poll() {
    assert_eq!(timing(400, 0), PwmTiming { on_us: 0, off_us: 1000 });
    assert_eq!(timing(400, 100), PwmTiming { on_us: 1000, off_us: 0 });
    assert_eq!(timing(400, 250), PwmTiming { on_us: 1000, off_us: 0 });
}

#[test]
fn pwm_settings_are_clamped() {
    let clamped = PwmSettings::new(0, 150).clamped(&PwmLimits::STANDARD);
    assert_eq!(clamped.frequency, 1);
    assert_eq!(clamped.duty_cycle, 100);

    let clamped = PwmSettings::new(5000, 10).clamped(&PwmLimits::STANDARD);
    assert_eq!(clamped.frequency, 1000);

    let clamped = PwmSettings::new(5000, 10).clamped(&PwmLimits::EXTENDED);
    assert_eq!(clamped.frequency, 5000);
}

#[test]
fn blink_toggles_and_stops_low() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 5);

    let blink = Blink::start(line, Duration::from_millis(5), STOP_TIMEOUT).expect("start blink");
    thread::sleep(Duration::from_millis(60));
    assert!(blink.is_running());
    drop(blink);

    let writes = backend.take_writes(5);
    assert!(writes.len() >= 4, "too few toggles: {writes:?}");
    assert_eq!(&writes[..4], &[1, 0, 1, 0]);
    assert_eq!(writes.last(), Some(&0));
    assert_eq!(backend.level(5), 0);
}

#[test]
fn blink_period_updates_in_place() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 6);

    let blink = Blink::start(line, Duration::from_secs(10), STOP_TIMEOUT).expect("start blink");
    assert_eq!(blink.period(), Duration::from_secs(10));
    blink.set_period(Duration::from_millis(2));
    assert_eq!(blink.period(), Duration::from_millis(2));
    assert!(blink.is_running());
}

#[test]
fn running_blink_picks_up_shorter_period() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 9);

    let blink = Blink::start(line, Duration::from_millis(30), STOP_TIMEOUT).expect("start blink");
    let _ = backend.take_writes(9);
    blink.set_period(Duration::from_millis(2));
    thread::sleep(Duration::from_millis(100));

    let writes = backend.take_writes(9);
    assert!(writes.len() > 10, "period change not applied: {writes:?}");
    drop(blink);
}

#[test]
fn pulse_goes_high_then_low_once() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 7);

    let pulse = Pulse::start(line, Duration::from_millis(20), STOP_TIMEOUT).expect("start pulse");
    assert_eq!(pulse.duration(), Duration::from_millis(20));
    thread::sleep(Duration::from_millis(5));
    assert_eq!(backend.level(7), 1);

    thread::sleep(Duration::from_millis(60));
    assert!(pulse.is_finished());
    assert_eq!(backend.take_writes(7), vec![1, 0]);
}

#[test]
fn dropping_pulse_cuts_it_short() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 8);

    let pulse = Pulse::start(line, Duration::from_secs(10), STOP_TIMEOUT).expect("start pulse");
    thread::sleep(Duration::from_millis(10));
    drop(pulse);
    assert_eq!(backend.level(8), 0);
}

#[test]
fn pwm_drives_both_levels_and_updates_live() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 12);

    let pwm = Pwm::start(line, PwmSettings::new(200, 50), PwmLimits::STANDARD, STOP_TIMEOUT)
        .expect("start pwm");
    thread::sleep(Duration::from_millis(40));
    let writes = backend.take_writes(12);
    assert!(writes.contains(&1) && writes.contains(&0));

    pwm.update(PwmSettings::new(5000, 30));
    assert_eq!(pwm.settings(), PwmSettings::new(1000, 30));
    assert_eq!(pwm.timing(), PwmTiming { on_us: 300, off_us: 700 });
    assert!(pwm.is_running());

    drop(pwm);
    assert_eq!(backend.level(12), 0);
}

#[test]
fn running_pwm_follows_duty_change() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 15);

    let pwm = Pwm::start(line, PwmSettings::new(100, 0), PwmLimits::STANDARD, STOP_TIMEOUT)
        .expect("start pwm");
    thread::sleep(Duration::from_millis(20));
    let low = backend.take_writes(15);
    assert!(!low.is_empty() && low.iter().all(|&v| v == 0), "{low:?}");

    pwm.update(PwmSettings::new(100, 100));
    thread::sleep(Duration::from_millis(20));
    let _ = backend.take_writes(15);
    thread::sleep(Duration::from_millis(20));
    let high = backend.take_writes(15);
    assert!(!high.is_empty() && high.iter().all(|&v| v == 1), "{high:?}");
    assert_eq!(backend.level(15), 1);

    drop(pwm);
    assert_eq!(backend.level(15), 0);
}

#[test]
fn pwm_full_duty_holds_high() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 13);

    let pwm = Pwm::start(line, PwmSettings::new(100, 100), PwmLimits::STANDARD, STOP_TIMEOUT)
        .expect("start pwm");
    thread::sleep(Duration::from_millis(20));
    assert!(backend.take_writes(13).iter().all(|&v| v == 1));
    drop(pwm);
    assert_eq!(backend.level(13), 0);
}

#[test]
fn realtime_pwm_stops_promptly() {
    let backend = MockGpioBackend::default();
    let line = output_line(&backend, 14);

    let settings = PwmSettings::new(1000, 50).realtime(true);
    let pwm = Pwm::start(line, settings, PwmLimits::EXTENDED, STOP_TIMEOUT).expect("start pwm");
    assert!(pwm.settings().realtime);
    thread::sleep(Duration::from_millis(10));
    drop(pwm);
    assert_eq!(backend.level(14), 0);
}
