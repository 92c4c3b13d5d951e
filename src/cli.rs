// CLI definitions using clap

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use backlight_monitor::{ConfigError, Settings};

#[derive(Parser, Debug)]
#[command(name = "backlight-monitor")]
#[command(author, version, about = "Backlight monitoring daemon")]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// Backlight level while the display is on (0-1023)
    pub level_on: Option<i64>,

    /// Backlight level while the display is off (0-1023)
    pub level_off: Option<i64>,

    /// GPIO driving the backlight PWM
    #[arg(short = 'P', long)]
    pub gpio: Option<u8>,

    /// GPIO to monitor
    #[arg(short = 'M', long)]
    pub monitored_gpio: Option<u8>,

    /// GPIO of a push-button that toggles the backlight
    #[arg(short = 'B', long)]
    pub button_gpio: Option<u8>,

    /// Monitored GPIO is active low
    #[arg(long, visible_alias = "active-low")]
    pub invert: bool,

    /// Fade time in seconds (0-60, 0 disables fading)
    #[arg(short, long, value_name = "SECONDS")]
    pub fade: Option<f64>,

    /// Backlight PWM frequency (100-1000 Hz)
    #[arg(short = 'F', long, value_name = "HZ")]
    pub frequency: Option<i64>,

    /// Ignore SIGUSR1/SIGUSR2 (backlight on/off), `-DU` also accepted
    #[arg(long, visible_alias = "du")]
    pub disable_user_signals: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Display settings and exit
    #[arg(short, long)]
    pub info: bool,

    /// Config file (default: ~/.config/backlight-monitor/config.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run against a simulated board; stdin lines on/off/press drive the inputs
    #[arg(long)]
    pub simulate: bool,
}

impl Cli {
    /// Parse `args`, accepting the single-dash `-DU` spelling
    pub fn parse_legacy<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::parse_from(expand_legacy_flags(args))
    }

    /// Command-line settings, with the config file filling the gaps
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let cli = Settings {
            level_on: self.level_on,
            level_off: self.level_off,
            gpio: self.gpio,
            monitored_gpio: self.monitored_gpio,
            button_gpio: self.button_gpio,
            invert: self.invert.then_some(true),
            fade: self.fade,
            frequency: self.frequency,
            disable_user_signals: self.disable_user_signals.then_some(true),
        };

        let file = match &self.config {
            Some(path) => Settings::load(path)?,
            None => match Settings::default_path().filter(|path| path.exists()) {
                Some(path) => Settings::load(&path)?,
                None => Settings::default(),
            },
        };
        Ok(cli.or(file))
    }

    /// Info mode implies verbose output
    pub fn verbose(&self) -> bool {
        self.verbose || self.info
    }
}

/// Rewrite `-DU` to `--disable-user-signals`, up to a `--` separator
///
/// Clap shorts are a single character, so `-DU` would parse as `-D -U`.
pub fn expand_legacy_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut positional_only = false;
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if arg == "--" {
                positional_only = true;
            }
            if !positional_only && arg == "-DU" {
                OsString::from("--disable-user-signals")
            } else {
                arg
            }
        })
        .collect()
}
