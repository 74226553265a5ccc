use log::warn;
use std::sync::Arc;
use std::time::Duration;

use super::Worker;
use crate::error::Result;
use crate::line::LineHandle;

pub struct Pulse {
    duration: Duration,
    worker: Worker,
}

impl Pulse {
    pub fn start(
        line: Arc<LineHandle>,
        duration: Duration,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let pin = line.pin();
        let worker = Worker::spawn(format!("pulse-{pin}"), line, stop_timeout, move |line, token| {
            if let Err(e) = line.write(1) {
                warn!("pulse on pin {pin}: {e}");
                return;
            }
            // canceled or elapsed, the pulse ends low either way
            let _ = token.sleep(duration);
            if let Err(e) = line.write(0) {
                warn!("pulse on pin {pin}: {e}");
            }
        })?;

        Ok(Self { duration, worker })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}
