use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Worker;
use crate::config::PwmLimits;
use crate::error::Result;
use crate::line::LineHandle;
use crate::timer::{CancelToken, Wake};

pub const DUTY_MIN: u32 = 0;
pub const DUTY_MAX: u32 = 100;

const DEFAULT_FREQUENCY: u32 = 400;
const DEFAULT_DUTY_CYCLE: u32 = 50;
/// Phase length used while the output is held constant at 0% or 100%.
const PWM_IDLE_US: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmSettings {
    pub frequency: u32,
    pub duty_cycle: u32,
    #[serde(default)]
    pub realtime: bool,
}

impl Default for PwmSettings {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            duty_cycle: DEFAULT_DUTY_CYCLE,
            realtime: false,
        }
    }
}

impl PwmSettings {
    pub fn new(frequency: u32, duty_cycle: u32) -> Self {
        Self {
            frequency,
            duty_cycle,
            realtime: false,
        }
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn clamped(&self, limits: &PwmLimits) -> Self {
        Self {
            frequency: limits.clamp(self.frequency),
            duty_cycle: self.duty_cycle.min(DUTY_MAX),
            realtime: self.realtime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PwmTiming {
    pub on_us: u64,
    pub off_us: u64,
}

impl PwmTiming {
    pub fn from_settings(settings: &PwmSettings) -> Self {
        match settings.duty_cycle {
            duty if duty >= DUTY_MAX => Self {
                on_us: PWM_IDLE_US,
                off_us: 0,
            },
            DUTY_MIN => Self {
                on_us: 0,
                off_us: PWM_IDLE_US,
            },
            duty => {
                let period = (1_000_000.0 / settings.frequency.max(1) as f64).round();
                let on = (period * duty as f64 / 100.0).round();
                Self {
                    on_us: on as u64,
                    off_us: (period - on) as u64,
                }
            }
        }
    }
}

struct PwmParams {
    settings: PwmSettings,
    timing: PwmTiming,
}

struct PwmShared {
    params: Mutex<PwmParams>,
    new_data: AtomicBool,
}

impl PwmShared {
    fn take(&self) -> (PwmTiming, bool) {
        let params = self.params.lock();
        self.new_data.store(false, Ordering::Release);
        (params.timing, params.settings.realtime)
    }
}

pub struct Pwm {
    shared: Arc<PwmShared>,
    limits: PwmLimits,
    worker: Worker,
}

impl Pwm {
    pub fn start(
        line: Arc<LineHandle>,
        settings: PwmSettings,
        limits: PwmLimits,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let settings = settings.clamped(&limits);
        let shared = Arc::new(PwmShared {
            params: Mutex::new(PwmParams {
                settings,
                timing: PwmTiming::from_settings(&settings),
            }),
            new_data: AtomicBool::new(true),
        });
        let pin = line.pin();

        let worker = {
            let shared = shared.clone();
            Worker::spawn(format!("pwm-{pin}"), line, stop_timeout, move |line, token| {
                if let Err(e) = run(&shared, line, token) {
                    warn!("pwm on pin {pin}: {e}");
                }
            })?
        };

        Ok(Self {
            shared,
            limits,
            worker,
        })
    }

    pub fn update(&self, settings: PwmSettings) {
        let settings = settings.clamped(&self.limits);
        let mut params = self.shared.params.lock();
        params.settings = settings;
        params.timing = PwmTiming::from_settings(&settings);
        self.shared.new_data.store(true, Ordering::Release);
    }

    pub fn settings(&self) -> PwmSettings {
        self.shared.params.lock().settings
    }

    pub fn timing(&self) -> PwmTiming {
        self.shared.params.lock().timing
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}

fn run(shared: &PwmShared, line: &LineHandle, token: &CancelToken) -> Result<()> {
    let (mut timing, mut realtime) = shared.take();
    let wait = |us: u64, realtime: bool| {
        let duration = Duration::from_micros(us);
        if realtime {
            token.delay_busy(duration)
        } else {
            token.sleep(duration)
        }
    };

    loop {
        if shared.new_data.load(Ordering::Acquire) {
            (timing, realtime) = shared.take();
        }

        let wake = if timing.on_us > 0 && timing.off_us > 0 {
            line.write(1)?;
            if wait(timing.on_us, realtime).is_canceled() {
                break;
            }
            line.write(0)?;
            wait(timing.off_us, realtime)
        } else if timing.on_us == 0 {
            line.write(0)?;
            token.sleep(Duration::from_micros(PWM_IDLE_US))
        } else {
            line.write(1)?;
            token.sleep(Duration::from_micros(PWM_IDLE_US))
        };

        if wake == Wake::Canceled {
            break;
        }
    }

    Ok(())
}
