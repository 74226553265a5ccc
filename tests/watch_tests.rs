use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pinctl::backend::MockGpioBackend;
use pinctl::config::{EdgeDetect, PinMode, RegistryConfig};
use pinctl::error::GpioError;
use pinctl::events::EventHub;
use pinctl::line::{EdgeKind, LineConfig, LineHandle};
use pinctl::registry::PinRegistry;
use pinctl::watch::{EdgeCallback, EdgeEvent, EdgeWatch, WatchState};

const POLL: Duration = Duration::from_millis(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

type Recorded = Arc<Mutex<Vec<EdgeEvent>>>;

fn recorder() -> (Recorded, EdgeCallback) {
    let events: Recorded = Arc::default();
    let sink = events.clone();
    let callback: EdgeCallback = Arc::new(move |event| sink.lock().expect("recorder").push(event));
    (events, callback)
}

fn wait_for_events(events: &Recorded, count: usize) -> Vec<EdgeEvent> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = events.lock().expect("recorder").clone();
        if snapshot.len() >= count || Instant::now() >= deadline {
            return snapshot;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn watched_line(backend: &MockGpioBackend, pin: u32, edge: EdgeDetect) -> LineHandle {
    LineHandle::request(
        backend,
        pin,
        LineConfig::input(PinMode::InputPullDown, 0).with_edge(edge),
    )
    .expect("request watched line")
}

#[test]
fn edges_reach_the_callback() {
    let backend = MockGpioBackend::default();
    let (events, callback) = recorder();
    let line = watched_line(&backend, 6, EdgeDetect::Both);
    let watch = EdgeWatch::start(line, callback, POLL, STOP_TIMEOUT).expect("start watch");
    assert_eq!(watch.state(), WatchState::Running);

    backend.set_level(6, 1);
    let seen = wait_for_events(&events, 1);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].pin, 6);
    assert_eq!(seen[0].edge, EdgeKind::Rising);
    assert_eq!(seen[0].level, 1);
    assert!(seen[0].timestamp_ms > 0);

    backend.set_level(6, 0);
    let seen = wait_for_events(&events, 2);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].edge, EdgeKind::Falling);
}

#[test]
fn only_configured_edges_are_reported() {
    let backend = MockGpioBackend::default();
    let (events, callback) = recorder();
    let line = watched_line(&backend, 7, EdgeDetect::Rising);
    let _watch = EdgeWatch::start(line, callback, POLL, STOP_TIMEOUT).expect("start watch");

    for level in [1, 0, 1, 0] {
        backend.set_level(7, level);
    }
    let seen = wait_for_events(&events, 2);
    thread::sleep(Duration::from_millis(30));
    let seen_later = events.lock().expect("recorder").clone();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen_later.len(), 2);
    assert!(seen.iter().all(|e| e.edge == EdgeKind::Rising));
}

#[test]
fn stop_while_idle_is_prompt() {
    let backend = MockGpioBackend::default();
    let (events, callback) = recorder();
    let line = watched_line(&backend, 8, EdgeDetect::Both);
    let mut watch = EdgeWatch::start(line, callback, POLL, STOP_TIMEOUT).expect("start watch");
    thread::sleep(Duration::from_millis(30));

    let started = Instant::now();
    assert!(watch.stop());
    assert!(started.elapsed() < STOP_TIMEOUT);
    assert_eq!(watch.state(), WatchState::Stopped);
    assert!(events.lock().expect("recorder").is_empty());

    // stopping twice is harmless
    assert!(watch.stop());
}

#[test]
fn no_callback_after_stop_returns() {
    let backend = MockGpioBackend::default();
    let (events, callback) = recorder();
    let line = watched_line(&backend, 9, EdgeDetect::Both);
    let mut watch = EdgeWatch::start(line, callback.clone(), POLL, STOP_TIMEOUT)
        .expect("start watch");

    let toggler = {
        let backend = backend.clone();
        thread::spawn(move || {
            for i in 0..200u32 {
                backend.set_level(9, (i % 2) as u8);
                thread::sleep(Duration::from_micros(200));
            }
        })
    };
    thread::sleep(Duration::from_millis(10));
    assert!(watch.stop());
    let count_at_stop = events.lock().expect("recorder").len();

    toggler.join().expect("toggler");
    thread::sleep(Duration::from_millis(30));
    assert_eq!(events.lock().expect("recorder").len(), count_at_stop);

    // the session released its handle on the callback
    drop(watch);
    assert_eq!(Arc::strong_count(&callback), 1);
    assert!(!backend.is_requested(9));
}

#[test]
fn line_without_edge_detection_is_rejected() {
    let backend = MockGpioBackend::default();
    let (_events, callback) = recorder();
    let line = LineHandle::request(&backend, 10, LineConfig::input(PinMode::InputNoPull, 0))
        .expect("request line");

    assert!(matches!(
        EdgeWatch::start(line, callback, POLL, STOP_TIMEOUT),
        Err(GpioError::InvalidParameter(_))
    ));
}

#[test]
fn hub_keeps_bounded_history() {
    let hub = EventHub::new(16, 3);
    for ts in 1..=5 {
        hub.dispatch(EdgeEvent {
            pin: 2,
            level: (ts % 2) as u8,
            edge: EdgeKind::Rising,
            timestamp_ms: ts,
        });
    }

    let all: Vec<u64> = hub.events(2, None).iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(all, vec![3, 4, 5]);
    let newest: Vec<u64> = hub.events(2, Some(2)).iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(newest, vec![4, 5]);
    assert_eq!(hub.last_event(2).map(|e| e.timestamp_ms), Some(5));
    assert!(hub.events(3, None).is_empty());
    assert!(hub.last_event(3).is_none());

    hub.clear(2);
    assert!(hub.events(2, None).is_empty());
}

#[test]
fn registry_watch_feeds_hub_subscribers() {
    let backend = MockGpioBackend::default();
    let registry = PinRegistry::new(Arc::new(backend.clone()), RegistryConfig::default());
    let hub = EventHub::new(16, 8);
    let mut rx = hub.subscribe();

    registry
        .watch(11, PinMode::InputPullDown, 0, EdgeDetect::Both, hub.callback())
        .expect("watch");
    backend.set_level(11, 1);

    let deadline = Instant::now() + Duration::from_secs(2);
    let event = loop {
        match rx.try_recv() {
            Ok(event) => break event,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
            Err(e) => panic!("no event broadcast: {e}"),
        }
    };
    assert_eq!(event.pin, 11);
    assert_eq!(event.edge, EdgeKind::Rising);
    assert_eq!(hub.last_event(11).map(|e| e.pin), Some(11));

    registry.deinit(11).expect("deinit");
}
