pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod hx711;
pub mod line;
pub mod priority;
pub mod registry;
pub mod routes;
pub mod task;
pub mod timer;
pub mod waveform;
pub mod watch;

pub use config::{AppConfig, EdgeDetect, HttpConfig, PinMode, PwmLimits, RegistryConfig};
pub use error::{GpioError, Result};
pub use events::EventHub;
pub use hx711::{Gain, Hx711};
pub use line::{EdgeKind, LineConfig, LineHandle, PIN_COUNT};
pub use registry::{PinRegistry, PinStatus, PinUsage};
pub use routes::AppState;
pub use task::Task;
pub use timer::{CancelToken, Wake};
pub use waveform::{PwmSettings, PwmTiming, WaveformKind};
pub use watch::{EdgeCallback, EdgeEvent, EdgeWatch, WatchState};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{LineBackend, MockGpioBackend};
