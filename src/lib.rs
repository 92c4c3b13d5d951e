// Backlight monitor - shared library
// Fade controller, event routing, configuration, and daemon startup

pub mod config;
pub mod daemon;
pub mod dimmer;
pub mod fade;
pub mod router;
pub mod signals;

pub use config::{ConfigError, ControllerConfig, Settings};
pub use daemon::{Daemon, DaemonError, RunOptions};
pub use dimmer::{Dimmer, DimmerError};
pub use fade::{Command, Direction, FadeController, FadeError, FadeState};
pub use router::{is_backlight_on, ControlSignal, EventRouter, InputEvent};
