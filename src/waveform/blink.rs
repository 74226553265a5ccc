use log::warn;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Worker;
use crate::error::Result;
use crate::line::LineHandle;

pub struct Blink {
    period: Arc<Mutex<Duration>>,
    worker: Worker,
}

impl Blink {
    pub fn start(line: Arc<LineHandle>, period: Duration, stop_timeout: Duration) -> Result<Self> {
        let shared = Arc::new(Mutex::new(period));
        let pin = line.pin();

        let worker = {
            let period = shared.clone();
            Worker::spawn(format!("blink-{pin}"), line, stop_timeout, move |line, token| {
                let mut level = 1;
                loop {
                    if let Err(e) = line.write(level) {
                        warn!("blink on pin {pin}: {e}");
                        break;
                    }
                    level ^= 1;

                    let current = *period.lock();
                    if token.sleep(current).is_canceled() {
                        break;
                    }
                }
            })?
        };

        Ok(Self {
            period: shared,
            worker,
        })
    }

    pub fn period(&self) -> Duration {
        *self.period.lock()
    }

    pub fn set_period(&self, period: Duration) {
        *self.period.lock() = period;
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}
