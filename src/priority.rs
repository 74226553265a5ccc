use log::debug;

pub struct RealtimePriority {
    previous: Option<libc::sched_param>,
}

impl RealtimePriority {
    pub fn elevate() -> Self {
        // SAFETY: sched_param is plain data; the calls only touch the calling thread.
        unsafe {
            let mut previous: libc::sched_param = std::mem::zeroed();
            if libc::sched_getparam(0, &mut previous) != 0 {
                debug!(
                    "sched_getparam failed: {}",
                    std::io::Error::last_os_error()
                );
                return Self { previous: None };
            }

            let mut fifo: libc::sched_param = std::mem::zeroed();
            fifo.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &fifo) != 0 {
                debug!(
                    "realtime priority unavailable: {}",
                    std::io::Error::last_os_error()
                );
                return Self { previous: None };
            }

            Self {
                previous: Some(previous),
            }
        }
    }
}

impl Drop for RealtimePriority {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // SAFETY: restores the parameters read in `elevate` on the same thread.
            unsafe {
                libc::sched_setscheduler(0, libc::SCHED_OTHER, &previous);
            }
        }
    }
}
