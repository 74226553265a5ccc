use log::{debug, warn};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use libgpiod::{chip::Chip, line, request};
use parking_lot::Mutex;

use crate::backend::{LineBackend, LineIo};
use crate::config::{EdgeDetect, PinMode};
use crate::error::{GpioError, Result};
use crate::line::{EdgeKind, LineConfig};

// newer kernels expose the header as gpiochip0, older Pi 5 kernels as gpiochip4
const LIBGPIOD_BACKEND_CHIP_PATHS: [&str; 2] = ["/dev/gpiochip4", "/dev/gpiochip0"];
const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 1;

static CHIP: OnceLock<Option<Mutex<Chip>>> = OnceLock::new();

fn shared_chip() -> Result<&'static Mutex<Chip>> {
    CHIP.get_or_init(|| {
        for path in LIBGPIOD_BACKEND_CHIP_PATHS {
            match Chip::open(&Path::new(path)) {
                Ok(chip) => {
                    debug!("opened gpio chip {path}");
                    return Some(Mutex::new(chip));
                }
                Err(e) => debug!("open chip {path}: {e}"),
            }
        }
        warn!("no gpio chip could be opened");
        None
    })
    .as_ref()
    .ok_or(GpioError::ChipUnavailable)
}

#[derive(Default)]
pub struct LibgpiodBackend;

impl LibgpiodBackend {
    pub fn new() -> Result<Self> {
        shared_chip()?;
        Ok(Self)
    }

    fn make_line_settings(config: &LineConfig) -> Result<line::Settings> {
        let mut ls =
            line::Settings::new().map_err(|e| GpioError::Os(format!("libgpiod settings: {e}")))?;

        match config.mode {
            PinMode::InputNoPull | PinMode::InputPullDown | PinMode::InputPullUp => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| GpioError::Os(format!("set direction: {e}")))?;
                let bias = match config.mode {
                    PinMode::InputPullDown => Some(line::Bias::PullDown),
                    PinMode::InputPullUp => Some(line::Bias::PullUp),
                    _ => Some(line::Bias::Disabled),
                };
                ls.set_bias(bias)
                    .map_err(|e| GpioError::Os(format!("set bias: {e}")))?;
                ls.set_debounce_period(Duration::from_micros(config.debounce_us as u64));
            }
            PinMode::Output | PinMode::OutputSource | PinMode::OutputSink => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| GpioError::Os(format!("set direction: {e}")))?;
                let drive = match config.mode {
                    PinMode::OutputSource => line::Drive::OpenSource,
                    PinMode::OutputSink => line::Drive::OpenDrain,
                    _ => line::Drive::PushPull,
                };
                ls.set_drive(drive)
                    .map_err(|e| GpioError::Os(format!("set drive: {e}")))?;
                ls.set_output_value(to_value(config.initial))
                    .map_err(|e| GpioError::Os(format!("set output value: {e}")))?;
            }
        }

        ls.set_active_low(config.active_low);

        if let Some(edge) = config.edge {
            let edge = match edge {
                EdgeDetect::Rising => line::Edge::Rising,
                EdgeDetect::Falling => line::Edge::Falling,
                EdgeDetect::Both => line::Edge::Both,
            };
            ls.set_edge_detection(Some(edge))
                .map_err(|e| GpioError::Os(format!("set edge detection: {e}")))?;
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config> {
        let mut cfg =
            line::Config::new().map_err(|e| GpioError::Os(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| GpioError::Os(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

impl LineBackend for LibgpiodBackend {
    fn request_line(&self, pin: u32, config: &LineConfig) -> Result<Box<dyn LineIo>> {
        let chip = shared_chip()?;
        let settings = Self::make_line_settings(config)?;
        let line_cfg = Self::make_line_config(pin, settings)?;

        let mut req_cfg =
            request::Config::new().map_err(|e| GpioError::Os(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| GpioError::Os(format!("request consumer: {e}")))?;

        let request = chip
            .lock()
            .request_lines(Some(&req_cfg), &line_cfg)
            .map_err(|e| GpioError::Os(format!("request line {pin}: {e}")))?;
        let buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| GpioError::Os(format!("event buffer: {e}")))?;

        Ok(Box::new(GpiodLine {
            offset: pin,
            request,
            buffer,
        }))
    }
}

struct GpiodLine {
    offset: u32,
    request: request::Request,
    buffer: request::Buffer,
}

fn to_value(level: u8) -> line::Value {
    if level > 0 {
        line::Value::Active
    } else {
        line::Value::InActive
    }
}

fn is_transient(e: &libgpiod::Error) -> bool {
    matches!(
        e,
        libgpiod::Error::OperationFailed(_, errno) if errno.0 == libc::EAGAIN || errno.0 == libc::EINTR
    )
}

impl LineIo for GpiodLine {
    fn get_value(&mut self) -> Result<u8> {
        let value = self
            .request
            .value(self.offset)
            .map_err(|e| GpioError::Os(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => 0,
            line::Value::Active => 1,
        })
    }

    fn set_value(&mut self, value: u8) -> Result<()> {
        self.request
            .set_value(self.offset, to_value(value))
            .map_err(|e| GpioError::Os(format!("set value: {e}")))?;
        Ok(())
    }

    fn wait_edge_event(&mut self, timeout: Duration) -> Result<Option<EdgeKind>> {
        let ready = match self.request.wait_edge_events(Some(timeout)) {
            Ok(ready) => ready,
            Err(e) if is_transient(&e) => return Ok(None),
            Err(e) => return Err(GpioError::Os(format!("wait edge events: {e}"))),
        };
        if !ready {
            return Ok(None);
        }

        let events = match self.request.read_edge_events(&mut self.buffer) {
            Ok(events) => events,
            Err(e) if is_transient(&e) => return Ok(None),
            Err(e) => return Err(GpioError::Os(format!("read edge events: {e}"))),
        };
        let Some(evt) = events.into_iter().next() else {
            return Ok(None);
        };
        let evt = evt.map_err(|e| GpioError::Os(format!("edge event: {e}")))?;
        match evt.event_type() {
            Ok(line::EdgeKind::Rising) => Ok(Some(EdgeKind::Rising)),
            Ok(line::EdgeKind::Falling) => Ok(Some(EdgeKind::Falling)),
            Err(e) => Err(GpioError::Os(format!("edge event type: {e}"))),
        }
    }
}
