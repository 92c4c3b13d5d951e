//! HAL error types

use thiserror::Error;

/// Errors that can occur while talking to the PWM channel or GPIO lines
#[derive(Error, Debug)]
pub enum HalError {
    /// Duty cycle was never written, so there is nothing to report
    #[error("PWM on GPIO {0} not initialized")]
    NotInitialized(u8),

    #[error("GPIO {pin} cannot be used for {purpose}")]
    UnsupportedPin { pin: u8, purpose: &'static str },

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("PWM error: {0}")]
    Pwm(String),

    /// Fault injected by the simulated backend
    #[error("Injected fault: {0}")]
    Injected(&'static str),
}

#[cfg(all(feature = "rpi", target_os = "linux"))]
impl From<rppal::gpio::Error> for HalError {
    fn from(e: rppal::gpio::Error) -> Self {
        HalError::Gpio(e.to_string())
    }
}

#[cfg(all(feature = "rpi", target_os = "linux"))]
impl From<rppal::pwm::Error> for HalError {
    fn from(e: rppal::pwm::Error) -> Self {
        HalError::Pwm(e.to_string())
    }
}
