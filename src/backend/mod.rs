use std::time::Duration;

use crate::error::Result;
use crate::line::{EdgeKind, LineConfig};

#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::MockGpioBackend;

pub trait LineBackend: Send + Sync {
    fn request_line(&self, pin: u32, config: &LineConfig) -> Result<Box<dyn LineIo>>;
}

pub trait LineIo: Send {
    fn get_value(&mut self) -> Result<u8>;
    fn set_value(&mut self, value: u8) -> Result<()>;
    /// Returns `Ok(None)` when no edge record arrived within `timeout`.
    fn wait_edge_event(&mut self, timeout: Duration) -> Result<Option<EdgeKind>>;
}
