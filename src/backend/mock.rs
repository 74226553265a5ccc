use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{LineBackend, LineIo};
use crate::config::EdgeDetect;
use crate::error::{GpioError, Result};
use crate::line::{EdgeKind, LineConfig};

const MOCK_WRITE_HISTORY_CAPACITY: usize = 4096;

/// Simulated chip. Levels are the logical values the kernel would report,
/// after any active-low inversion.
#[derive(Clone, Default)]
pub struct MockGpioBackend {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MockChipState>,
    edge_signal: Condvar,
}

#[derive(Default)]
struct MockChipState {
    unavailable: bool,
    lines: HashMap<u32, MockLineState>,
}

#[derive(Default)]
struct MockLineState {
    level: u8,
    config: Option<LineConfig>,
    script: VecDeque<u8>,
    writes: VecDeque<u8>,
    events: VecDeque<EdgeKind>,
}

impl MockLineState {
    fn push_edge(&mut self, old: u8, new: u8) -> bool {
        let Some(edge) = self.config.and_then(|c| c.edge) else {
            return false;
        };
        let observed = match (old, new) {
            (0, 1) => EdgeKind::Rising,
            (1, 0) => EdgeKind::Falling,
            _ => return false,
        };
        if edge_matches(edge, observed) {
            self.events.push_back(observed);
            return true;
        }
        false
    }
}

impl MockGpioBackend {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.state.lock().unavailable = unavailable;
    }

    pub fn set_level(&self, pin: u32, level: u8) {
        let mut state = self.shared.state.lock();
        let line = state.lines.entry(pin).or_default();
        let old = line.level;
        line.level = u8::from(level > 0);
        if line.push_edge(old, line.level) {
            self.shared.edge_signal.notify_all();
        }
    }

    pub fn level(&self, pin: u32) -> u8 {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .map(|l| l.level)
            .unwrap_or(0)
    }

    pub fn script_reads<I: IntoIterator<Item = u8>>(&self, pin: u32, values: I) {
        let mut state = self.shared.state.lock();
        let line = state.lines.entry(pin).or_default();
        line.script.extend(values.into_iter().map(|v| u8::from(v > 0)));
    }

    pub fn is_requested(&self, pin: u32) -> bool {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .is_some_and(|l| l.config.is_some())
    }

    pub fn line_config(&self, pin: u32) -> Option<LineConfig> {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .and_then(|l| l.config)
    }

    pub fn take_writes(&self, pin: u32) -> Vec<u8> {
        self.shared
            .state
            .lock()
            .lines
            .get_mut(&pin)
            .map(|l| l.writes.drain(..).collect())
            .unwrap_or_default()
    }
}

impl LineBackend for MockGpioBackend {
    fn request_line(&self, pin: u32, config: &LineConfig) -> Result<Box<dyn LineIo>> {
        let mut state = self.shared.state.lock();
        if state.unavailable {
            return Err(GpioError::ChipUnavailable);
        }

        let line = state.lines.entry(pin).or_default();
        if line.config.is_some() {
            return Err(GpioError::Os(format!("line {pin} busy")));
        }
        line.config = Some(*config);
        line.events.clear();
        if config.is_output() {
            line.level = config.initial;
        }

        Ok(Box::new(MockLine {
            pin,
            shared: self.shared.clone(),
        }))
    }
}

struct MockLine {
    pin: u32,
    shared: Arc<Shared>,
}

impl LineIo for MockLine {
    fn get_value(&mut self) -> Result<u8> {
        let mut state = self.shared.state.lock();
        let line = state
            .lines
            .get_mut(&self.pin)
            .ok_or_else(|| GpioError::Os(format!("line {} released", self.pin)))?;
        Ok(line.script.pop_front().unwrap_or(line.level))
    }

    fn set_value(&mut self, value: u8) -> Result<()> {
        let mut state = self.shared.state.lock();
        let line = state
            .lines
            .get_mut(&self.pin)
            .ok_or_else(|| GpioError::Os(format!("line {} released", self.pin)))?;
        if line.writes.len() >= MOCK_WRITE_HISTORY_CAPACITY {
            line.writes.pop_front();
        }
        line.writes.push_back(value);
        line.level = value;
        Ok(())
    }

    fn wait_edge_event(&mut self, timeout: Duration) -> Result<Option<EdgeKind>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(edge) = state
                .lines
                .get_mut(&self.pin)
                .and_then(|l| l.events.pop_front())
            {
                return Ok(Some(edge));
            }
            if self
                .shared
                .edge_signal
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(state
                    .lines
                    .get_mut(&self.pin)
                    .and_then(|l| l.events.pop_front()));
            }
        }
    }
}

impl Drop for MockLine {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(line) = state.lines.get_mut(&self.pin) {
            line.config = None;
            line.events.clear();
            line.script.clear();
        }
    }
}

fn edge_matches(configured: EdgeDetect, observed: EdgeKind) -> bool {
    match configured {
        EdgeDetect::Rising => observed == EdgeKind::Rising,
        EdgeDetect::Falling => observed == EdgeKind::Falling,
        EdgeDetect::Both => true,
    }
}
