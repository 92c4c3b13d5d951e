// PWM / GPIO constants - single source of truth for default wiring and limits
//
// Defaults match the usual Raspberry Pi display hat wiring. Other modules import
// from here instead of repeating numbers.

use crate::Level;

/// Full-scale duty-cycle value (PWM range)
pub const MAX_PWM: Level = 1023;

/// GPIO driving the backlight PWM
pub const DEFAULT_BACKLIGHT_GPIO: u8 = 18;

/// GPIO carrying the display on/off detect signal
pub const DEFAULT_MONITORED_GPIO: u8 = 20;

/// Default PWM frequency (Hz)
pub const DEFAULT_FREQUENCY: u32 = 200;

/// Lowest PWM frequency accepted (Hz)
pub const MIN_FREQUENCY: u32 = 100;

/// Highest PWM frequency accepted (Hz)
pub const MAX_FREQUENCY: u32 = 1000;

/// Default fade duration between the two set-points (seconds)
pub const DEFAULT_FADE_SECS: f64 = 5.0;

/// Longest fade accepted (seconds)
pub const MAX_FADE_SECS: f64 = 60.0;

/// GPIOs that can be routed to a hardware PWM channel, with the channel index
pub const HARDWARE_PWM_PINS: &[(u8, u8)] = &[(12, 0), (18, 0), (13, 1), (19, 1)];

/// Look up the hardware PWM channel for a GPIO
#[inline]
pub fn hardware_pwm_channel(gpio: u8) -> Option<u8> {
    HARDWARE_PWM_PINS
        .iter()
        .find(|(pin, _)| *pin == gpio)
        .map(|&(_, channel)| channel)
}

/// Convert a level within `range` to a duty fraction in `0.0..=1.0`
#[inline]
pub fn level_to_fraction(level: Level, range: Level) -> f64 {
    if range == 0 {
        return 0.0;
    }
    f64::from(level.min(range)) / f64::from(range)
}

/// Convert a duty fraction back to the nearest level within `range`
#[inline]
pub fn fraction_to_level(fraction: f64, range: Level) -> Level {
    (fraction.clamp(0.0, 1.0) * f64::from(range)).round() as Level
}
