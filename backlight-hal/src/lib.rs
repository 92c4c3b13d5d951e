//! Hardware abstraction for the backlight monitor
//!
//! The daemon only needs two things from the board: one PWM output that drives
//! the backlight and a few digital inputs it can watch for edges. Backends:
//!
//! - `sim` - in-memory board, records every write (tests, `--simulate`)
//! - `rpi` - Raspberry Pi hardware PWM and GPIO interrupts (feature `rpi`)

pub mod constants;
pub mod error;
pub mod sim;

#[cfg(all(feature = "rpi", target_os = "linux"))]
pub mod rpi;

pub use constants::{
    DEFAULT_BACKLIGHT_GPIO, DEFAULT_FADE_SECS, DEFAULT_FREQUENCY, DEFAULT_MONITORED_GPIO,
    MAX_FADE_SECS, MAX_FREQUENCY, MAX_PWM, MIN_FREQUENCY,
};
pub use error::HalError;
pub use sim::{SimBoard, SimChannel, SimLine};

#[cfg(all(feature = "rpi", target_os = "linux"))]
pub use rpi::RpiBoard;

use std::sync::Arc;

/// Duty-cycle value, `0..=range` of the channel
pub type Level = u16;

/// Which transitions of an input line fire a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Does a transition to `level` match this edge selection?
    pub fn matches(&self, level: u8) -> bool {
        match self {
            Edge::Rising => level != 0,
            Edge::Falling => level == 0,
            Edge::Both => true,
        }
    }
}

/// A transition observed on an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEdge {
    pub pin: u8,
    /// Level after the transition (0 or 1)
    pub level: u8,
}

/// Callback run from the driver's interrupt context on every matching edge
pub type EdgeCallback = Box<dyn FnMut(LineEdge) + Send + 'static>;

/// One PWM output
///
/// Implementations serialize access internally; every method takes `&self` so
/// the channel can be shared between the fade worker and shutdown paths.
pub trait PwmChannel: Send + Sync {
    /// GPIO this channel drives
    fn gpio(&self) -> u8;

    /// Write a duty cycle (clamped to the configured range)
    fn set_duty_cycle(&self, level: Level) -> Result<(), HalError>;

    /// Read back the duty cycle
    ///
    /// Fails with [`HalError::NotInitialized`] when nothing was written yet.
    fn duty_cycle(&self) -> Result<Level, HalError>;

    /// Set the full-scale value used by `set_duty_cycle`
    fn set_range(&self, max: Level) -> Result<(), HalError>;

    /// Current full-scale value
    fn range(&self) -> Level;

    /// Request a PWM frequency
    ///
    /// # Returns
    /// The frequency the hardware actually runs at. Callers compare it with the
    /// request; hardware that cannot hit the exact value reports the closest one.
    fn set_frequency(&self, hz: u32) -> Result<u32, HalError>;
}

/// One digital input
pub trait InputLine: Send + Sync {
    /// GPIO number
    fn pin(&self) -> u8;

    /// Current level (0 or 1)
    fn read(&self) -> Result<u8, HalError>;

    /// Register `callback` for `edge` transitions, replacing any previous one
    fn on_edge(&self, edge: Edge, callback: EdgeCallback) -> Result<(), HalError>;

    /// Remove the edge callback
    fn clear_edge(&self) -> Result<(), HalError>;
}

/// Factory for the channel and lines of one board
pub trait Board {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn pwm_channel(&self, gpio: u8) -> Result<Arc<dyn PwmChannel>, HalError>;

    fn input_line(&self, gpio: u8) -> Result<Arc<dyn InputLine>, HalError>;
}
