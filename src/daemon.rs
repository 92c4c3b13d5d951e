//! Daemon startup and run loop
//!
//! Startup order matters: the PWM frequency is negotiated before anything
//! else, so a mismatch exits before a callback, signal handler or worker
//! exists. Then:
//! - the initial backlight level is applied from the monitored line
//! - edge callbacks and signal listeners feed the router queue
//! - with `verbose`, a task logs the backlight state every few seconds

use std::sync::Arc;
use std::time::Duration;

use backlight_hal::{Board, Edge, EdgeCallback, HalError, InputLine, LineEdge, PwmChannel, MAX_PWM};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::dimmer::{Dimmer, DimmerError};
use crate::fade::FadeError;
use crate::router::{is_backlight_on, EventRouter, InputEvent};
use crate::signals;

/// How often `verbose` mode logs the backlight state
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DaemonError {
    /// Hardware settled on a different frequency than requested
    #[error("failed to set PWM frequency to {requested} Hz (suggested frequency: {suggested} Hz)")]
    FrequencyMismatch { requested: u32, suggested: u32 },

    #[error(transparent)]
    Hal(#[from] HalError),

    #[error(transparent)]
    Fade(#[from] FadeError),

    #[error(transparent)]
    Dimmer(#[from] DimmerError),

    #[error("signal setup: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Log the backlight state periodically
    pub verbose: bool,
    /// Print the settings and stop
    pub info_only: bool,
    pub report_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            info_only: false,
            report_interval: REPORT_INTERVAL,
        }
    }
}

/// Hardware acquired and configured, nothing running yet
pub struct Daemon {
    config: Arc<ControllerConfig>,
    channel: Arc<dyn PwmChannel>,
    monitored: Arc<dyn InputLine>,
    button: Option<Arc<dyn InputLine>>,
}

impl Daemon {
    /// Acquire the channel and lines, set the PWM range and frequency
    pub fn open(board: &dyn Board, config: ControllerConfig) -> Result<Self, DaemonError> {
        debug!("opening {} board", board.name());
        let channel = board.pwm_channel(config.backlight_gpio)?;
        channel.set_range(MAX_PWM)?;
        let negotiated = channel.set_frequency(config.frequency)?;
        if negotiated != config.frequency {
            return Err(DaemonError::FrequencyMismatch {
                requested: config.frequency,
                suggested: negotiated,
            });
        }

        let monitored = board.input_line(config.monitored_gpio)?;
        let button = config
            .button_gpio
            .map(|pin| board.input_line(pin))
            .transpose()?;

        Ok(Self {
            config: Arc::new(config),
            channel,
            monitored,
            button,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// "on" or "off", from the monitored line
    pub fn backlight_state(&self) -> Result<&'static str, HalError> {
        backlight_state(self.monitored.as_ref(), self.config.invert)
    }

    /// Settings summary
    pub fn log_settings(&self) {
        let cfg = &self.config;
        info!("on level={}", cfg.level_on);
        info!("off level={}", cfg.level_off);
        if cfg.fading() {
            info!("fading {:.1}s", cfg.fade_duration.as_secs_f64());
        } else {
            info!("fading is off");
        }
        info!("backlight gpio#{}", cfg.backlight_gpio);
        info!(
            "monitored gpio#{}{}",
            cfg.monitored_gpio,
            if cfg.invert { " (inverted)" } else { "" }
        );
        if let Some(pin) = cfg.button_gpio {
            info!("toggle button gpio#{}", pin);
        }
        match self.backlight_state() {
            Ok(state) => info!("backlight is {}", state),
            Err(e) => warn!("backlight state unknown: {}", e),
        }
        info!("PWM frequency {}", cfg.frequency);
        info!("PWM range {}", self.channel.range());
        info!(
            "Signal USR1/USR2 {}",
            if cfg.disable_user_signals {
                "disabled"
            } else {
                "enabled"
            }
        );
    }

    /// Run until a termination signal; returns the exit status
    pub async fn serve(self, options: RunOptions) -> Result<i32, DaemonError> {
        let dimmer = Arc::new(Dimmer::new(Arc::clone(&self.channel), &self.config)?);
        let router = EventRouter::new(Arc::clone(&self.config), Arc::clone(&dimmer));

        // Initial state during startup
        let initial = self.monitored.read()?;
        if self.channel.duty_cycle().is_ok() {
            router.on_monitored_edge(initial).await?;
        } else {
            let level = router.desired_level(initial);
            debug!("PWM not set, writing initial level {} directly", level);
            dimmer.force_level(level)?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let signal_tasks =
            signals::listen(events_tx.clone(), !self.config.disable_user_signals)?;

        if let Err(e) = self.watch_inputs(&events_tx) {
            self.stop_inputs(signal_tasks);
            return Err(e.into());
        }

        drop(events_tx);
        let reporter = options
            .verbose
            .then(|| self.spawn_reporter(options.report_interval));

        let code = router.run(events_rx).await;

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        self.stop_inputs(signal_tasks);
        Ok(code)
    }

    /// Forward monitored edges and button presses to the router queue
    fn watch_inputs(&self, events: &mpsc::UnboundedSender<InputEvent>) -> Result<(), HalError> {
        debug!("monitoring gpio#{}", self.monitored.pin());
        self.monitored.on_edge(
            Edge::Both,
            forward_edges(events.clone(), |edge| InputEvent::Monitored {
                level: edge.level,
            }),
        )?;
        if let Some(button) = &self.button {
            debug!("toggle button on gpio#{}", button.pin());
            button.on_edge(
                Edge::Rising,
                forward_edges(events.clone(), |_| InputEvent::ButtonPressed),
            )?;
        }
        Ok(())
    }

    /// Stop the signal listeners and remove every edge callback
    fn stop_inputs(&self, signal_tasks: Vec<JoinHandle<()>>) {
        for task in signal_tasks {
            task.abort();
        }
        for line in std::iter::once(&self.monitored).chain(self.button.as_ref()) {
            if let Err(e) = line.clear_edge() {
                warn!("gpio#{} callback not removed: {}", line.pin(), e);
            }
        }
    }

    fn spawn_reporter(&self, every: Duration) -> JoinHandle<()> {
        let line = Arc::clone(&self.monitored);
        let invert = self.config.invert;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match backlight_state(line.as_ref(), invert) {
                    Ok(state) => info!("backlight is {}", state),
                    Err(e) => warn!("backlight state unknown: {}", e),
                }
            }
        })
    }
}

fn backlight_state(line: &dyn InputLine, invert: bool) -> Result<&'static str, HalError> {
    let level = line.read()?;
    debug!("monitored gpio#{} state={}", line.pin(), level);
    Ok(if is_backlight_on(level, invert) {
        "on"
    } else {
        "off"
    })
}

/// Edge callback that queues `to_event(edge)` for the router
fn forward_edges<F>(events: mpsc::UnboundedSender<InputEvent>, to_event: F) -> EdgeCallback
where
    F: Fn(LineEdge) -> InputEvent + Send + 'static,
{
    Box::new(move |edge: LineEdge| {
        if events.send(to_event(edge)).is_err() {
            debug!("gpio#{} edge dropped, router stopped", edge.pin);
        }
    })
}

/// Open the board, log the settings, and serve unless `info_only`
pub async fn run(
    board: &dyn Board,
    config: ControllerConfig,
    options: RunOptions,
) -> Result<i32, DaemonError> {
    let daemon = Daemon::open(board, config)?;
    daemon.log_settings();
    if options.info_only {
        info!("exiting...");
        return Ok(0);
    }
    daemon.serve(options).await
}
