//! Controller configuration
//!
//! Values come from the command line and, optionally, a TOML file. The file
//! only fills in what the command line left out:
//!
//! ```toml
//! level_on = 800
//! level_off = 0
//! fade = 2.0
//! monitored_gpio = 20
//! invert = true
//! ```
//!
//! [`ControllerConfig`] is the validated, immutable result handed to the fade
//! controller and the event router.

use std::path::{Path, PathBuf};
use std::time::Duration;

use backlight_hal::{
    Level, DEFAULT_BACKLIGHT_GPIO, DEFAULT_FADE_SECS, DEFAULT_FREQUENCY, DEFAULT_MONITORED_GPIO,
    MAX_FADE_SECS, MAX_FREQUENCY, MAX_PWM, MIN_FREQUENCY,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required (command line or config file)")]
    MissingLevel(&'static str),

    /// Fading between identical levels has no step rate
    #[error("level_on and level_off are both {0}; fading needs two different levels")]
    EqualLevels(Level),

    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Unvalidated settings, every field optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub level_on: Option<i64>,
    pub level_off: Option<i64>,
    pub gpio: Option<u8>,
    pub monitored_gpio: Option<u8>,
    pub button_gpio: Option<u8>,
    pub invert: Option<bool>,
    /// Fade duration in seconds
    pub fade: Option<f64>,
    pub frequency: Option<i64>,
    pub disable_user_signals: Option<bool>,
}

impl Settings {
    /// Default config file location (`~/.config/backlight-monitor/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("backlight-monitor").join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill every unset field of `self` from `fallback`
    pub fn or(self, fallback: Settings) -> Settings {
        Settings {
            level_on: self.level_on.or(fallback.level_on),
            level_off: self.level_off.or(fallback.level_off),
            gpio: self.gpio.or(fallback.gpio),
            monitored_gpio: self.monitored_gpio.or(fallback.monitored_gpio),
            button_gpio: self.button_gpio.or(fallback.button_gpio),
            invert: self.invert.or(fallback.invert),
            fade: self.fade.or(fallback.fade),
            frequency: self.frequency.or(fallback.frequency),
            disable_user_signals: self.disable_user_signals.or(fallback.disable_user_signals),
        }
    }
}

/// Validated controller parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub level_on: Level,
    pub level_off: Level,
    pub backlight_gpio: u8,
    pub monitored_gpio: u8,
    /// Optional toggle push-button
    pub button_gpio: Option<u8>,
    /// Monitored line is active low
    pub invert: bool,
    pub fade_duration: Duration,
    pub frequency: u32,
    pub disable_user_signals: bool,
}

fn clamp_level(name: &str, value: i64) -> Level {
    let clamped = value.clamp(0, i64::from(MAX_PWM)) as Level;
    if i64::from(clamped) != value {
        debug!("{} {} clamped to {}", name, value, clamped);
    }
    clamped
}

impl ControllerConfig {
    /// Clamp and validate
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let level_on = clamp_level(
            "level_on",
            settings
                .level_on
                .ok_or(ConfigError::MissingLevel("level_on"))?,
        );
        let level_off = clamp_level(
            "level_off",
            settings
                .level_off
                .ok_or(ConfigError::MissingLevel("level_off"))?,
        );

        let fade_secs = settings.fade.unwrap_or(DEFAULT_FADE_SECS);
        let fade_secs = if fade_secs.is_nan() {
            0.0
        } else {
            fade_secs.clamp(0.0, MAX_FADE_SECS)
        };
        let fade_duration = Duration::from_secs_f64(fade_secs);

        let requested = settings.frequency.unwrap_or(i64::from(DEFAULT_FREQUENCY));
        let frequency =
            requested.clamp(i64::from(MIN_FREQUENCY), i64::from(MAX_FREQUENCY)) as u32;
        if i64::from(frequency) != requested {
            debug!("frequency {} clamped to {}", requested, frequency);
        }

        if level_on == level_off && !fade_duration.is_zero() {
            return Err(ConfigError::EqualLevels(level_on));
        }

        Ok(Self {
            level_on,
            level_off,
            backlight_gpio: settings.gpio.unwrap_or(DEFAULT_BACKLIGHT_GPIO),
            monitored_gpio: settings.monitored_gpio.unwrap_or(DEFAULT_MONITORED_GPIO),
            button_gpio: settings.button_gpio,
            invert: settings.invert.unwrap_or(false),
            fade_duration,
            frequency,
            disable_user_signals: settings.disable_user_signals.unwrap_or(false),
        })
    }

    /// Number of single-level steps between the two set-points
    pub fn span(&self) -> u32 {
        u32::from(self.level_on.abs_diff(self.level_off))
    }

    /// Delay between two fade steps, `None` when fading is off
    ///
    /// A full on/off fade takes exactly `fade_duration`.
    pub fn fade_delay(&self) -> Option<Duration> {
        if self.fade_duration.is_zero() || self.span() == 0 {
            return None;
        }
        Some(self.fade_duration / self.span())
    }

    pub fn fading(&self) -> bool {
        !self.fade_duration.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(on: i64, off: i64) -> Settings {
        Settings {
            level_on: Some(on),
            level_off: Some(off),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = ControllerConfig::from_settings(levels(800, 0)).unwrap();
        assert_eq!(cfg.backlight_gpio, 18);
        assert_eq!(cfg.monitored_gpio, 20);
        assert_eq!(cfg.button_gpio, None);
        assert_eq!(cfg.frequency, 200);
        assert_eq!(cfg.fade_duration, Duration::from_secs(5));
        assert!(!cfg.invert);
        assert!(!cfg.disable_user_signals);
    }

    #[test]
    fn test_clamping() {
        let mut s = levels(5000, -3);
        s.fade = Some(120.0);
        s.frequency = Some(20);
        let cfg = ControllerConfig::from_settings(s).unwrap();
        assert_eq!(cfg.level_on, MAX_PWM);
        assert_eq!(cfg.level_off, 0);
        assert_eq!(cfg.fade_duration, Duration::from_secs(60));
        assert_eq!(cfg.frequency, 100);

        let mut s = levels(1, 0);
        s.fade = Some(-1.0);
        s.frequency = Some(50_000);
        let cfg = ControllerConfig::from_settings(s).unwrap();
        assert!(cfg.fade_duration.is_zero());
        assert_eq!(cfg.frequency, 1000);
    }

    #[test]
    fn test_missing_level() {
        let s = Settings {
            level_on: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            ControllerConfig::from_settings(s),
            Err(ConfigError::MissingLevel("level_off"))
        ));
    }

    #[test]
    fn test_equal_levels_rejected_when_fading() {
        let err = ControllerConfig::from_settings(levels(500, 500)).unwrap_err();
        assert!(matches!(err, ConfigError::EqualLevels(500)));

        // Clamping can make them equal too
        let err = ControllerConfig::from_settings(levels(2000, 1500)).unwrap_err();
        assert!(matches!(err, ConfigError::EqualLevels(MAX_PWM)));
    }

    #[test]
    fn test_equal_levels_allowed_without_fade() {
        let mut s = levels(500, 500);
        s.fade = Some(0.0);
        let cfg = ControllerConfig::from_settings(s).unwrap();
        assert_eq!(cfg.fade_delay(), None);
        assert!(!cfg.fading());
    }

    #[test]
    fn test_fade_delay_exact() {
        let mut s = levels(800, 0);
        s.fade = Some(2.0);
        let cfg = ControllerConfig::from_settings(s).unwrap();
        assert_eq!(cfg.span(), 800);
        assert_eq!(cfg.fade_delay(), Some(Duration::from_micros(2500)));
        assert_eq!(cfg.fade_delay().unwrap() * cfg.span(), Duration::from_secs(2));
    }

    #[test]
    fn test_file_fills_gaps() {
        let file = Settings::from_toml(
            r#"
            level_on = 600
            level_off = 100
            fade = 1.5
            monitored_gpio = 21
            button_gpio = 26
            invert = true
            "#,
        )
        .unwrap();
        let cli = Settings {
            level_on: Some(700),
            ..Default::default()
        };
        let cfg = ControllerConfig::from_settings(cli.or(file)).unwrap();
        assert_eq!(cfg.level_on, 700);
        assert_eq!(cfg.level_off, 100);
        assert_eq!(cfg.monitored_gpio, 21);
        assert_eq!(cfg.button_gpio, Some(26));
        assert!(cfg.invert);
        assert_eq!(cfg.fade_duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::from_toml("brightness = 3").is_err());
    }
}
