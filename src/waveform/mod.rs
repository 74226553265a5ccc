use log::{debug, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::line::LineHandle;
use crate::task::spawn_named;
use crate::timer::CancelToken;

mod blink;
mod pulse;
mod pwm;

pub use blink::Blink;
pub use pulse::Pulse;
pub use pwm::{Pwm, PwmSettings, PwmTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaveformKind {
    Blink,
    Pulse,
    Pwm,
}

pub enum Waveform {
    Blink(Blink),
    Pulse(Pulse),
    Pwm(Pwm),
}

impl Waveform {
    pub fn kind(&self) -> WaveformKind {
        match self {
            Waveform::Blink(_) => WaveformKind::Blink,
            Waveform::Pulse(_) => WaveformKind::Pulse,
            Waveform::Pwm(_) => WaveformKind::Pwm,
        }
    }
}

pub(crate) struct Worker {
    name: String,
    line: Arc<LineHandle>,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl Worker {
    pub(crate) fn spawn<F>(
        name: String,
        line: Arc<LineHandle>,
        stop_timeout: Duration,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce(&LineHandle, &CancelToken) + Send + 'static,
    {
        let token = CancelToken::new();
        let handle = {
            let line = line.clone();
            let token = token.clone();
            spawn_named(name.clone(), move || {
                body(&line, &token);
                token.acknowledge_stop();
            })?
        };
        debug!("{name} started");

        Ok(Self {
            name,
            line,
            token,
            handle: Some(handle),
            stop_timeout,
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    fn stop(&mut self) {
        if self.token.request_stop(self.stop_timeout) {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            debug!("{} stopped", self.name);
        } else {
            // dropping the handle detaches the thread
            self.handle.take();
            warn!(
                "{} did not acknowledge stop within {:?}",
                self.name, self.stop_timeout
            );
        }

        if let Err(e) = self.line.write(0) {
            warn!("{}: failed to turn output off: {e}", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
