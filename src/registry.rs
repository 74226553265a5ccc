use log::debug;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::backend::LineBackend;
use crate::config::{EdgeDetect, PinMode, RegistryConfig};
use crate::error::{GpioError, Result};
use crate::hx711::{Gain, Hx711};
use crate::line::{LineConfig, LineHandle, PIN_COUNT, check_pin};
use crate::task::Task;
use crate::watch::{EdgeCallback, EdgeWatch, WatchState};
use crate::waveform::{Blink, Pulse, Pwm, PwmSettings, Waveform, WaveformKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinUsage {
    Free,
    Gpio,
    Watch,
    Hx711Data,
    Hx711Clock,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinStatus {
    pub pin: u32,
    pub usage: PinUsage,
    pub mode: Option<PinMode>,
    pub waveform: Option<WaveformKind>,
    pub pwm: PwmSettings,
    pub watch: Option<WatchState>,
}

struct PinItem {
    line: Arc<LineHandle>,
    waveform: Option<Waveform>,
}

impl PinItem {
    fn active_kind(&self) -> Option<WaveformKind> {
        match &self.waveform {
            Some(Waveform::Pulse(p)) if p.is_finished() => None,
            Some(w) => Some(w.kind()),
            None => None,
        }
    }

    fn stop_except(&mut self, keep: Option<WaveformKind>) {
        if self.waveform.as_ref().map(Waveform::kind) != keep {
            self.waveform = None;
        }
    }

    fn stop(&mut self, kind: WaveformKind) {
        if self.waveform.as_ref().map(Waveform::kind) == Some(kind) {
            self.waveform = None;
        }
    }
}

enum PinSlot {
    Free,
    Gpio(PinItem),
    Watch(EdgeWatch),
    Hx711 {
        sensor: Arc<Mutex<Hx711>>,
        clock_pin: u32,
    },
    Hx711Clock {
        data_pin: u32,
    },
}

impl PinSlot {
    fn output(&mut self, pin: u32) -> Result<&mut PinItem> {
        match self {
            PinSlot::Gpio(item) if item.line.is_output() => Ok(item),
            PinSlot::Gpio(_) | PinSlot::Watch(_) => Err(GpioError::NotOutput(pin)),
            PinSlot::Free => Err(GpioError::NotInitialized(pin)),
            PinSlot::Hx711 { .. } | PinSlot::Hx711Clock { .. } => {
                Err(GpioError::AlreadyInitialized(pin))
            }
        }
    }
}

pub struct PinRegistry {
    backend: Arc<dyn LineBackend>,
    config: RegistryConfig,
    pins: Vec<Mutex<PinSlot>>,
}

impl PinRegistry {
    pub fn new(backend: Arc<dyn LineBackend>, config: RegistryConfig) -> Self {
        let pins = (0..PIN_COUNT).map(|_| Mutex::new(PinSlot::Free)).collect();
        Self {
            backend,
            config,
            pins,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn slot(&self, pin: u32) -> Result<MutexGuard<'_, PinSlot>> {
        check_pin(pin)?;
        Ok(self.pins[pin as usize].lock())
    }

    pub fn init(&self, pin: u32, mode: PinMode, param: u32) -> Result<()> {
        let mut slot = self.slot(pin)?;
        if !matches!(*slot, PinSlot::Free) {
            return Err(GpioError::AlreadyInitialized(pin));
        }

        let line = LineHandle::request(&*self.backend, pin, LineConfig::from_param(mode, param))?;
        *slot = PinSlot::Gpio(PinItem {
            line: Arc::new(line),
            waveform: None,
        });
        Ok(())
    }

    pub fn deinit(&self, pin: u32) -> Result<()> {
        // the released slot is dropped under its lock, so generators and
        // watches are stopped before another caller can reuse the pin
        let partner = {
            let mut slot = self.slot(pin)?;
            match mem::replace(&mut *slot, PinSlot::Free) {
                PinSlot::Hx711 { clock_pin, .. } => Some(clock_pin),
                PinSlot::Hx711Clock { data_pin } => Some(data_pin),
                _ => None,
            }
        };

        if let Some(partner) = partner {
            let mut other = self.pins[partner as usize].lock();
            let paired = match &*other {
                PinSlot::Hx711 { clock_pin, .. } => *clock_pin == pin,
                PinSlot::Hx711Clock { data_pin } => *data_pin == pin,
                _ => false,
            };
            if paired {
                *other = PinSlot::Free;
            }
        }
        debug!("pin {pin} released");
        Ok(())
    }

    pub fn deinit_all(&self) {
        for pin in 0..PIN_COUNT {
            let _ = self.deinit(pin);
        }
    }

    pub fn read(&self, pin: u32) -> Result<u8> {
        let mut slot = self.slot(pin)?;
        match &mut *slot {
            PinSlot::Gpio(item) => {
                item.waveform = None;
                item.line.read()
            }
            PinSlot::Watch(watch) => watch.read(),
            PinSlot::Free => Err(GpioError::NotInitialized(pin)),
            PinSlot::Hx711 { .. } | PinSlot::Hx711Clock { .. } => {
                Err(GpioError::AlreadyInitialized(pin))
            }
        }
    }

    pub fn write(&self, pin: u32, value: u8) -> Result<()> {
        if value > 1 {
            return Err(GpioError::InvalidParameter(
                "value must be 0 or 1".into(),
            ));
        }
        let mut slot = self.slot(pin)?;
        let item = slot.output(pin)?;
        item.waveform = None;
        item.line.write(value)
    }

    pub fn toggle(&self, pin: u32) -> Result<u8> {
        let mut slot = self.slot(pin)?;
        let item = slot.output(pin)?;
        item.waveform = None;
        item.line.toggle()
    }

    pub fn blink(&self, pin: u32, period_ms: u32) -> Result<()> {
        let mut slot = self.slot(pin)?;
        let item = slot.output(pin)?;
        item.stop_except(Some(WaveformKind::Blink));

        if period_ms == 0 {
            item.waveform = None;
            return Ok(());
        }

        let period = Duration::from_millis(period_ms as u64);
        if let Some(Waveform::Blink(blink)) = &item.waveform {
            blink.set_period(period);
        } else {
            let blink = Blink::start(item.line.clone(), period, self.config.stop_timeout())?;
            item.waveform = Some(Waveform::Blink(blink));
        }
        Ok(())
    }

    pub fn stop_blink(&self, pin: u32) -> Result<()> {
        if let PinSlot::Gpio(item) = &mut *self.slot(pin)? {
            item.stop(WaveformKind::Blink);
        }
        Ok(())
    }

    pub fn pulse(&self, pin: u32, duration_ms: u32) -> Result<()> {
        let mut slot = self.slot(pin)?;
        let item = slot.output(pin)?;
        item.waveform = None;

        if duration_ms > 0 {
            let pulse = Pulse::start(
                item.line.clone(),
                Duration::from_millis(duration_ms as u64),
                self.config.stop_timeout(),
            )?;
            item.waveform = Some(Waveform::Pulse(pulse));
        }
        Ok(())
    }

    pub fn stop_pulse(&self, pin: u32) -> Result<()> {
        if let PinSlot::Gpio(item) = &mut *self.slot(pin)? {
            item.stop(WaveformKind::Pulse);
        }
        Ok(())
    }

    pub fn pwm(&self, pin: u32, settings: PwmSettings) -> Result<()> {
        let mut slot = self.slot(pin)?;
        let item = slot.output(pin)?;
        item.stop_except(Some(WaveformKind::Pwm));

        if settings.frequency == 0 {
            item.waveform = None;
            return Ok(());
        }

        if let Some(Waveform::Pwm(pwm)) = &item.waveform {
            pwm.update(settings);
        } else {
            let pwm = Pwm::start(
                item.line.clone(),
                settings,
                self.config.pwm,
                self.config.stop_timeout(),
            )?;
            item.waveform = Some(Waveform::Pwm(pwm));
        }
        Ok(())
    }

    pub fn stop_pwm(&self, pin: u32) -> Result<()> {
        if let PinSlot::Gpio(item) = &mut *self.slot(pin)? {
            item.stop(WaveformKind::Pwm);
        }
        Ok(())
    }

    pub fn pwm_settings(&self, pin: u32) -> Result<PwmSettings> {
        match &*self.slot(pin)? {
            PinSlot::Gpio(PinItem {
                waveform: Some(Waveform::Pwm(pwm)),
                ..
            }) => Ok(pwm.settings()),
            _ => Ok(PwmSettings::default()),
        }
    }

    pub fn watch(
        &self,
        pin: u32,
        mode: PinMode,
        debounce_us: u32,
        edge: EdgeDetect,
        callback: EdgeCallback,
    ) -> Result<()> {
        if !mode.is_input() {
            return Err(GpioError::InvalidParameter(format!(
                "{mode:?} cannot detect edges"
            )));
        }
        let config = LineConfig::input(mode, debounce_us).with_edge(edge);

        let mut slot = self.slot(pin)?;
        let refresh = match &*slot {
            PinSlot::Free => false,
            PinSlot::Watch(watch) if *watch.config() != config => true,
            _ => return Err(GpioError::AlreadyInitialized(pin)),
        };
        if refresh {
            // the old session must release the line before it is requested again
            *slot = PinSlot::Free;
        }

        let line = LineHandle::request(&*self.backend, pin, config)?;
        let watch = EdgeWatch::start(
            line,
            callback,
            self.config.watch_poll(),
            self.config.stop_timeout(),
        )?;
        *slot = PinSlot::Watch(watch);
        Ok(())
    }

    pub fn init_hx711(&self, data_pin: u32, clock_pin: u32) -> Result<()> {
        check_pin(data_pin)?;
        check_pin(clock_pin)?;
        if data_pin == clock_pin {
            return Err(GpioError::InvalidPin(clock_pin));
        }

        // fixed order so two concurrent inits cannot deadlock
        let (low, high) = (data_pin.min(clock_pin), data_pin.max(clock_pin));
        let mut low_slot = self.pins[low as usize].lock();
        let mut high_slot = self.pins[high as usize].lock();
        for (pin, slot) in [(low, &*low_slot), (high, &*high_slot)] {
            if !matches!(slot, PinSlot::Free) {
                return Err(GpioError::AlreadyInitialized(pin));
            }
        }

        let sensor = Hx711::open(&*self.backend, data_pin, clock_pin, self.config.hx711)?;
        let data_slot = PinSlot::Hx711 {
            sensor: Arc::new(Mutex::new(sensor)),
            clock_pin,
        };
        let clock_slot = PinSlot::Hx711Clock { data_pin };
        if data_pin == low {
            *low_slot = data_slot;
            *high_slot = clock_slot;
        } else {
            *low_slot = clock_slot;
            *high_slot = data_slot;
        }
        Ok(())
    }

    fn hx711(&self, data_pin: u32) -> Result<Arc<Mutex<Hx711>>> {
        match &*self.slot(data_pin)? {
            PinSlot::Hx711 { sensor, .. } => Ok(sensor.clone()),
            PinSlot::Hx711Clock { data_pin: data } => Err(GpioError::InvalidParameter(format!(
                "pin {data_pin} is the clock pin of the hx711 on pin {data}"
            ))),
            PinSlot::Free => Err(GpioError::NotInitialized(data_pin)),
            _ => Err(GpioError::AlreadyInitialized(data_pin)),
        }
    }

    pub fn read_hx711(&self, data_pin: u32, gain: Gain, samples: u32) -> Result<i32> {
        let sensor = self.hx711(data_pin)?;
        let mut sensor = sensor.lock();
        sensor.read(gain, samples)
    }

    pub fn read_hx711_async(
        &self,
        data_pin: u32,
        gain: Gain,
        samples: u32,
    ) -> Result<Task<Result<i32>>> {
        let sensor = self.hx711(data_pin)?;
        Task::spawn(format!("hx711-{data_pin}"), move || {
            sensor.lock().read(gain, samples)
        })
    }

    pub fn status(&self, pin: u32) -> Result<PinStatus> {
        let slot = self.slot(pin)?;
        let mut status = PinStatus {
            pin,
            usage: PinUsage::Free,
            mode: None,
            waveform: None,
            pwm: PwmSettings::default(),
            watch: None,
        };

        match &*slot {
            PinSlot::Free => {}
            PinSlot::Gpio(item) => {
                status.usage = PinUsage::Gpio;
                status.mode = Some(item.line.config().mode);
                status.waveform = item.active_kind();
                if let Some(Waveform::Pwm(pwm)) = &item.waveform {
                    status.pwm = pwm.settings();
                }
            }
            PinSlot::Watch(watch) => {
                status.usage = PinUsage::Watch;
                status.mode = Some(watch.config().mode);
                status.watch = Some(watch.state());
            }
            PinSlot::Hx711 { .. } => {
                status.usage = PinUsage::Hx711Data;
                status.mode = Some(PinMode::InputPullUp);
            }
            PinSlot::Hx711Clock { .. } => {
                status.usage = PinUsage::Hx711Clock;
                status.mode = Some(PinMode::Output);
            }
        }
        Ok(status)
    }

    pub fn list(&self) -> Vec<PinStatus> {
        (0..PIN_COUNT)
            .filter_map(|pin| self.status(pin).ok())
            .collect()
    }
}
