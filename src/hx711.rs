use log::{debug, warn};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::backend::LineBackend;
use crate::config::{Hx711Timing, PinMode};
use crate::error::{GpioError, Result};
use crate::line::{LineConfig, LineHandle};
use crate::priority::RealtimePriority;
use crate::timer::CancelToken;

const HX711_DATA_BITS: u32 = 24;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gain {
    #[default]
    A128,
    B32,
    A64,
}

impl Gain {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Gain::A128),
            2 => Ok(Gain::B32),
            3 => Ok(Gain::A64),
            _ => Err(GpioError::InvalidParameter(format!("unknown gain {code}"))),
        }
    }

    pub fn code(&self) -> u32 {
        self.pulses()
    }

    pub fn pulses(&self) -> u32 {
        match self {
            Gain::A128 => 1,
            Gain::B32 => 2,
            Gain::A64 => 3,
        }
    }
}

pub struct Hx711 {
    data: LineHandle,
    clock: LineHandle,
    gain: Gain,
    timing: Hx711Timing,
    timer: CancelToken,
}

impl Hx711 {
    pub fn open(
        backend: &dyn LineBackend,
        data_pin: u32,
        clock_pin: u32,
        timing: Hx711Timing,
    ) -> Result<Self> {
        if data_pin == clock_pin {
            return Err(GpioError::InvalidPin(clock_pin));
        }

        let data = LineHandle::request(
            backend,
            data_pin,
            LineConfig::input(PinMode::InputPullUp, 0).with_active_low(false),
        )?;
        let clock = LineHandle::request(
            backend,
            clock_pin,
            LineConfig::output(PinMode::Output, 0),
        )?;

        let hx711 = Self {
            data,
            clock,
            gain: Gain::default(),
            timing,
            timer: CancelToken::new(),
        };
        hx711.clock.write(0)?;
        match hx711.wait_ready() {
            Ok(()) => {}
            Err(GpioError::Timeout(_)) => return Err(GpioError::NoSensor(data_pin)),
            Err(e) => return Err(e),
        }
        debug!("hx711 ready on data {data_pin} clock {clock_pin}");

        Ok(hx711)
    }

    pub fn data_pin(&self) -> u32 {
        self.data.pin()
    }

    pub fn clock_pin(&self) -> u32 {
        self.clock.pin()
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn wait_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.timing.ready_timeout();
        loop {
            if self.data.read()? == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(GpioError::Timeout(format!(
                    "hx711 on pin {} not ready within {:?}",
                    self.data.pin(),
                    self.timing.ready_timeout()
                )));
            }
            let _ = self.timer.sleep(self.timing.poll_interval());
        }
    }

    pub fn read_raw(&self, gain: Gain) -> Result<i32> {
        let _priority = RealtimePriority::elevate();
        let delay = self.timing.clock_delay();

        let mut value: u32 = 0;
        for _ in 0..HX711_DATA_BITS {
            self.clock.write(1)?;
            let _ = self.timer.delay_busy(delay);
            value = (value << 1) | u32::from(self.data.read()?);
            self.clock.write(0)?;
        }

        for _ in 0..gain.pulses() {
            self.clock.write(1)?;
            let _ = self.timer.delay_busy(delay);
            self.clock.write(0)?;
        }

        Ok(sign_extend_24(value))
    }

    /// Averages `samples` conversions (the configured default when 0).
    ///
    /// A gain change costs one discarded conversion, since the selection only
    /// applies to the conversion after the one being read.
    pub fn read(&mut self, gain: Gain, samples: u32) -> Result<i32> {
        if gain != self.gain {
            self.wait_ready()?;
            self.read_raw(gain)?;
            self.gain = gain;
        }

        let samples = if samples == 0 {
            self.timing.default_samples.max(1)
        } else {
            samples
        };

        let mut sum = 0.0;
        for _ in 0..samples {
            self.wait_ready()?;
            sum += self.read_raw(gain)? as f64;
        }

        Ok((sum / samples as f64).round() as i32)
    }
}

impl Drop for Hx711 {
    fn drop(&mut self) {
        // a low-to-high clock transition held high powers the chip down
        for level in [0, 1] {
            if let Err(e) = self.clock.write(level) {
                warn!("hx711 power down on pin {}: {e}", self.clock.pin());
                break;
            }
        }
    }
}

pub fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}
