use std::hint::spin_loop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Canceled,
}

impl Wake {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Wake::Canceled)
    }
}

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    // mirrors `state.stop_requested` for the spin path
    requested: AtomicBool,
    state: Mutex<State>,
    signal: Condvar,
}

#[derive(Default)]
struct State {
    stop_requested: bool,
    acknowledged: bool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.inner.state.lock().acknowledged
    }

    /// Blocks for `duration` unless a stop is requested first.
    ///
    /// Does not acknowledge the stop; the loop does that when it actually exits.
    pub fn sleep(&self, duration: Duration) -> Wake {
        let deadline = Instant::now() + duration;
        let mut state = self.inner.state.lock();
        while !state.stop_requested {
            if self
                .inner
                .signal
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        if state.stop_requested {
            Wake::Canceled
        } else {
            Wake::Elapsed
        }
    }

    pub fn delay_busy(&self, duration: Duration) -> Wake {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stop_requested() {
                return Wake::Canceled;
            }
            if Instant::now() >= deadline {
                return Wake::Elapsed;
            }
            spin_loop();
        }
    }

    pub fn request_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        state.stop_requested = true;
        self.inner.requested.store(true, Ordering::Release);
        self.inner.signal.notify_all();

        while !state.acknowledged {
            if self
                .inner
                .signal
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.acknowledged
    }

    /// Called by the worker as the last thing before its loop returns.
    pub fn acknowledge_stop(&self) {
        let mut state = self.inner.state.lock();
        state.acknowledged = true;
        self.inner.signal.notify_all();
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CancelToken")
            .field("stop_requested", &state.stop_requested)
            .field("acknowledged", &state.acknowledged)
            .finish()
    }
}
