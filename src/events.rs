use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::line::PIN_COUNT;
use crate::watch::{EdgeCallback, EdgeEvent};

pub struct EventHub {
    event_tx: broadcast::Sender<EdgeEvent>,
    event_history: FxHashMap<u32, RwLock<VecDeque<EdgeEvent>>>,
    event_history_capacity: usize,
}

impl EventHub {
    pub fn new(broadcast_capacity: usize, event_history_capacity: usize) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));

        let mut event_history = FxHashMap::default();
        for pin in 0..PIN_COUNT {
            event_history.insert(pin, RwLock::new(VecDeque::new()));
        }

        Arc::new(Self {
            event_tx,
            event_history,
            event_history_capacity,
        })
    }

    pub fn dispatch(&self, event: EdgeEvent) {
        if let Some(history_lock) = self.event_history.get(&event.pin) {
            let mut history = history_lock.write();
            while !history.is_empty() && history.len() >= self.event_history_capacity {
                history.pop_front();
            }
            if self.event_history_capacity > 0 {
                history.push_back(event);
            }
        }
        let _ = self.event_tx.send(event);
    }

    pub fn callback(self: &Arc<Self>) -> EdgeCallback {
        let hub = Arc::clone(self);
        Arc::new(move |event| hub.dispatch(event))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EdgeEvent> {
        self.event_tx.subscribe()
    }

    pub fn events(&self, pin: u32, limit: Option<usize>) -> Vec<EdgeEvent> {
        self.event_history
            .get(&pin)
            .map(|d| {
                let d = d.read();
                let skip = limit.map_or(0, |lim| d.len().saturating_sub(lim));
                d.iter().skip(skip).copied().collect()
            })
            .unwrap_or_default()
    }

    pub fn last_event(&self, pin: u32) -> Option<EdgeEvent> {
        self.event_history
            .get(&pin)
            .and_then(|d| d.read().back().copied())
    }

    pub fn clear(&self, pin: u32) {
        if let Some(d) = self.event_history.get(&pin) {
            d.write().clear();
        }
    }
}
