use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::GpioError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PinMode {
    InputNoPull,
    InputPullDown,
    InputPullUp,
    Output,
    OutputSource,
    OutputSink,
}

impl PinMode {
    pub fn from_code(code: u32) -> Result<Self, GpioError> {
        match code {
            0 => Ok(PinMode::InputNoPull),
            1 => Ok(PinMode::InputPullDown),
            2 => Ok(PinMode::InputPullUp),
            3 => Ok(PinMode::Output),
            4 => Ok(PinMode::OutputSource),
            5 => Ok(PinMode::OutputSink),
            _ => Err(GpioError::InvalidParameter(format!("unknown mode {code}"))),
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(
            self,
            PinMode::Output | PinMode::OutputSource | PinMode::OutputSink
        )
    }

    pub fn is_input(&self) -> bool {
        !self.is_output()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    pub fn from_code(code: u32) -> Result<Self, GpioError> {
        match code {
            0 => Ok(EdgeDetect::Rising),
            1 => Ok(EdgeDetect::Falling),
            2 => Ok(EdgeDetect::Both),
            _ => Err(GpioError::InvalidParameter(format!("unknown edge {code}"))),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct PwmLimits {
    pub min_frequency: u32,
    pub max_frequency: u32,
}

impl PwmLimits {
    pub const STANDARD: PwmLimits = PwmLimits {
        min_frequency: 1,
        max_frequency: 1000,
    };
    pub const EXTENDED: PwmLimits = PwmLimits {
        min_frequency: 1,
        max_frequency: 45000,
    };

    pub fn clamp(&self, frequency: u32) -> u32 {
        frequency.clamp(self.min_frequency, self.max_frequency)
    }
}

impl Default for PwmLimits {
    fn default() -> Self {
        PwmLimits::STANDARD
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Hx711Timing {
    pub ready_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub clock_delay_us: u64,
    pub default_samples: u32,
}

impl Hx711Timing {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn clock_delay(&self) -> Duration {
        Duration::from_micros(self.clock_delay_us)
    }
}

impl Default for Hx711Timing {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 600,
            poll_interval_ms: 10,
            clock_delay_us: 1,
            default_samples: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    pub pwm: PwmLimits,
    pub stop_timeout_ms: u64,
    pub watch_poll_ms: u64,
    pub hx711: Hx711Timing,
}

impl RegistryConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn watch_poll(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms.max(1))
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pwm: PwmLimits::default(),
            stop_timeout_ms: 1000,
            watch_poll_ms: 10,
            hx711: Hx711Timing::default(),
        }
    }
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_event_history_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
    }
}
