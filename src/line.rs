use log::debug;
use std::time::Duration;

use parking_lot::FairMutex;
use serde::{Deserialize, Serialize};

use crate::backend::{LineBackend, LineIo};
use crate::config::{EdgeDetect, PinMode};
use crate::error::{GpioError, Result};

pub const PIN_COUNT: u32 = 28;

pub fn check_pin(pin: u32) -> Result<()> {
    if pin < PIN_COUNT {
        Ok(())
    } else {
        Err(GpioError::InvalidPin(pin))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineConfig {
    pub mode: PinMode,
    pub debounce_us: u32,
    pub initial: u8,
    pub edge: Option<EdgeDetect>,
    pub active_low: bool,
}

impl LineConfig {
    pub fn input(mode: PinMode, debounce_us: u32) -> Self {
        Self {
            mode,
            debounce_us,
            initial: 0,
            edge: None,
            active_low: mode == PinMode::InputPullUp,
        }
    }

    pub fn output(mode: PinMode, level: u8) -> Self {
        // open source lines always start released
        let initial = match mode {
            PinMode::OutputSource => 0,
            _ => u8::from(level > 0),
        };
        Self {
            mode,
            debounce_us: 0,
            initial,
            edge: None,
            active_low: mode == PinMode::OutputSink,
        }
    }

    pub fn from_param(mode: PinMode, param: u32) -> Self {
        if mode.is_output() {
            Self::output(mode, u8::from(param > 0))
        } else {
            Self::input(mode, param)
        }
    }

    pub fn with_edge(mut self, edge: EdgeDetect) -> Self {
        self.edge = Some(edge);
        self
    }

    pub fn is_output(&self) -> bool {
        self.mode.is_output()
    }

    pub fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }
}

pub struct LineHandle {
    pin: u32,
    config: LineConfig,
    io: FairMutex<Box<dyn LineIo>>,
}

impl LineHandle {
    pub fn request(backend: &dyn LineBackend, pin: u32, config: LineConfig) -> Result<Self> {
        check_pin(pin)?;
        if config.edge.is_some() && config.is_output() {
            return Err(GpioError::InvalidParameter(
                "edge detection requires an input mode".into(),
            ));
        }
        let io = backend.request_line(pin, &config)?;
        debug!("requested line {pin} as {:?}", config.mode);

        Ok(Self {
            pin,
            config,
            io: FairMutex::new(io),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    pub fn is_output(&self) -> bool {
        self.config.is_output()
    }

    pub fn read(&self) -> Result<u8> {
        self.io.lock().get_value()
    }

    pub fn write(&self, value: u8) -> Result<()> {
        self.io.lock().set_value(u8::from(value > 0))
    }

    pub fn toggle(&self) -> Result<u8> {
        let mut io = self.io.lock();
        let next = if io.get_value()? > 0 { 0 } else { 1 };
        io.set_value(next)?;
        Ok(next)
    }

    pub fn wait_edge(&self, timeout: Duration) -> Result<Option<EdgeKind>> {
        self.io.lock().wait_edge_event(timeout)
    }
}

impl std::fmt::Debug for LineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineHandle")
            .field("pin", &self.pin)
            .field("config", &self.config)
            .finish()
    }
}
