//! Backlight monitoring daemon
//!
//! Mirrors a display on/off GPIO as one of two PWM backlight levels, fading
//! between them.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use backlight_hal::{Board, SimBoard};
use backlight_monitor::daemon::{self, DaemonError, RunOptions, REPORT_INTERVAL};
use backlight_monitor::ControllerConfig;

mod cli;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_legacy(std::env::args_os());

    // Initialize logging
    let default_filter = if cli.verbose() {
        "backlight_monitor=debug,backlight_hal=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ControllerConfig::from_settings(cli.settings()?)?;
    let options = RunOptions {
        verbose: cli.verbose(),
        info_only: cli.info,
        report_interval: REPORT_INTERVAL,
    };

    let result = if cli.simulate {
        let board = Arc::new(SimBoard::new());
        tokio::spawn(drive_simulation(Arc::clone(&board), config.clone()));
        daemon::run(&*board, config, options).await
    } else {
        let board = open_hardware()?;
        daemon::run(&*board, config, options).await
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(DaemonError::FrequencyMismatch {
            requested,
            suggested,
        }) => {
            eprintln!("Failed to set PWM frequency to {requested}");
            eprintln!("Suggested frequency: {suggested}");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(all(feature = "rpi", target_os = "linux"))]
fn open_hardware() -> Result<Box<dyn Board>> {
    Ok(Box::new(backlight_hal::RpiBoard::new()?))
}

#[cfg(not(all(feature = "rpi", target_os = "linux")))]
fn open_hardware() -> Result<Box<dyn Board>> {
    anyhow::bail!("built without the `rpi` feature, use --simulate")
}

/// Drive the simulated inputs from stdin: `on`, `off`, `press`
async fn drive_simulation(board: Arc<SimBoard>, config: ControllerConfig) {
    let monitored = board.line(config.monitored_gpio);
    let button = config.button_gpio.map(|pin| board.line(pin));
    let channel = board.channel(config.backlight_gpio);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "on" => monitored.set_level(1),
            "off" => monitored.set_level(0),
            "press" => match &button {
                Some(button) => button.pulse(),
                None => warn!("no toggle button configured (-B)"),
            },
            "level" => info!("duty cycle {:?}", channel.level()),
            "" => {}
            other => warn!("unknown input {:?} (on, off, press, level)", other),
        }
    }
}
