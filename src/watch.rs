//! On stop the producer pushes an end marker. The dispatcher drains up to it,
//! drops the callback and only then acknowledges, so once
//! [`EdgeWatch::stop`] returns the callback is never invoked again.

use log::{debug, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{GpioError, Result};
use crate::line::{EdgeKind, LineConfig, LineHandle};
use crate::task::spawn_named;
use crate::timer::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EdgeEvent {
    pub pin: u32,
    pub level: u8,
    pub edge: EdgeKind,
    pub timestamp_ms: u64,
}

pub type EdgeCallback = Arc<dyn Fn(EdgeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

enum QueueItem {
    Event(EdgeEvent),
    End,
}

pub struct EdgeWatch {
    line: Arc<LineHandle>,
    token: CancelToken,
    state: Arc<Mutex<WatchState>>,
    producer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl EdgeWatch {
    pub fn start(
        line: LineHandle,
        callback: EdgeCallback,
        poll_interval: Duration,
        stop_timeout: Duration,
    ) -> Result<Self> {
        if line.config().edge.is_none() {
            return Err(GpioError::InvalidParameter(format!(
                "pin {} has no edge detection configured",
                line.pin()
            )));
        }

        let pin = line.pin();
        let line = Arc::new(line);
        let token = CancelToken::new();
        let state = Arc::new(Mutex::new(WatchState::Idle));
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = {
            let token = token.clone();
            let state = state.clone();
            spawn_named(format!("dispatch-{pin}"), move || {
                dispatch(rx, callback, &state);
                token.acknowledge_stop();
            })?
        };

        let producer = {
            let line = line.clone();
            let token = token.clone();
            let state = state.clone();
            spawn_named(format!("watch-{pin}"), move || {
                produce(&line, &token, &tx, poll_interval);
                *state.lock() = WatchState::Stopping;
                let _ = tx.send(QueueItem::End);
            })
        };
        let producer = match producer {
            Ok(handle) => handle,
            Err(e) => {
                // the dispatcher's sender is gone with the closure, so it ends by itself
                let _ = dispatcher.join();
                return Err(e);
            }
        };

        {
            let mut state = state.lock();
            if *state == WatchState::Idle {
                *state = WatchState::Running;
            }
        }
        debug!("watch on pin {pin} started");

        Ok(Self {
            line,
            token,
            state,
            producer: Some(producer),
            dispatcher: Some(dispatcher),
            stop_timeout,
        })
    }

    pub fn pin(&self) -> u32 {
        self.line.pin()
    }

    pub fn config(&self) -> &LineConfig {
        self.line.config()
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock()
    }

    pub fn read(&self) -> Result<u8> {
        self.line.read()
    }

    pub fn stop(&mut self) -> bool {
        if self.producer.is_none() && self.dispatcher.is_none() {
            return true;
        }

        let acknowledged = self.token.request_stop(self.stop_timeout);
        if acknowledged {
            for handle in [self.producer.take(), self.dispatcher.take()]
                .into_iter()
                .flatten()
            {
                let _ = handle.join();
            }
            debug!("watch on pin {} stopped", self.pin());
        } else {
            self.producer.take();
            self.dispatcher.take();
            warn!(
                "watch on pin {} did not acknowledge stop within {:?}",
                self.pin(),
                self.stop_timeout
            );
        }
        acknowledged
    }
}

impl Drop for EdgeWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

fn produce(
    line: &LineHandle,
    token: &CancelToken,
    tx: &mpsc::UnboundedSender<QueueItem>,
    poll_interval: Duration,
) {
    let pin = line.pin();
    while !token.is_stop_requested() {
        let edge = match line.wait_edge(poll_interval) {
            Ok(Some(edge)) => edge,
            Ok(None) => continue,
            Err(e) => {
                warn!("watch on pin {pin}: {e}");
                break;
            }
        };
        let level = match line.read() {
            Ok(level) => level,
            Err(e) => {
                warn!("watch on pin {pin}: {e}");
                break;
            }
        };

        let event = EdgeEvent {
            pin,
            level,
            edge,
            timestamp_ms: epoch_millis(),
        };
        if tx.send(QueueItem::Event(event)).is_err() {
            break;
        }
    }
}

fn dispatch(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    callback: EdgeCallback,
    state: &Mutex<WatchState>,
) {
    while let Some(item) = rx.blocking_recv() {
        match item {
            QueueItem::Event(event) => callback(event),
            QueueItem::End => break,
        }
    }
    drop(callback);
    *state.lock() = WatchState::Stopped;
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
