//! Event router: maps line edges, button presses and signals to levels.
//!
//! Every input ends up as an [`InputEvent`] on one queue. A single loop
//! drains it, so at most one level change is being handled at any time no
//! matter how many GPIO callbacks or signals fire at once.

use std::sync::Arc;

use backlight_hal::Level;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::dimmer::{Dimmer, DimmerError};

/// Is the display on, given the monitored line level?
///
/// A high line means "on" unless the line is inverted (active low).
pub fn is_backlight_on(level: u8, invert: bool) -> bool {
    (level != 0) != invert
}

/// OS signals the daemon reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGUSR1
    ForceOn,
    /// SIGUSR2
    ForceOff,
}

impl ControlSignal {
    pub fn signo(self) -> i32 {
        match self {
            ControlSignal::Interrupt => libc::SIGINT,
            ControlSignal::Terminate => libc::SIGTERM,
            ControlSignal::ForceOn => libc::SIGUSR1,
            ControlSignal::ForceOff => libc::SIGUSR2,
        }
    }

    /// Ends the daemon
    pub fn is_termination(self) -> bool {
        matches!(self, ControlSignal::Interrupt | ControlSignal::Terminate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Either edge on the monitored line, with the new level
    Monitored { level: u8 },
    /// Rising edge on the toggle button
    ButtonPressed,
    Signal(ControlSignal),
}

pub struct EventRouter {
    config: Arc<ControllerConfig>,
    dimmer: Arc<Dimmer>,
}

impl EventRouter {
    pub fn new(config: Arc<ControllerConfig>, dimmer: Arc<Dimmer>) -> Self {
        Self { config, dimmer }
    }

    /// Set-point matching a monitored line level
    pub fn desired_level(&self, line_level: u8) -> Level {
        if is_backlight_on(line_level, self.config.invert) {
            self.config.level_on
        } else {
            self.config.level_off
        }
    }

    /// Where a button press goes from `current`
    ///
    /// Only exactly `level_on` counts as on; a level mid-fade or an unreadable
    /// channel counts as off, so the press turns the backlight on.
    pub fn toggle_target(&self, current: Option<Level>) -> Level {
        if current == Some(self.config.level_on) {
            self.config.level_off
        } else {
            self.config.level_on
        }
    }

    pub async fn on_monitored_edge(&self, level: u8) -> Result<(), DimmerError> {
        let target = self.desired_level(level);
        debug!(
            "gpio#{} level={}, set backlight={}",
            self.config.monitored_gpio, level, target
        );
        self.dimmer.set_level(target).await
    }

    pub async fn on_button_press(&self) -> Result<(), DimmerError> {
        let current = self.dimmer.current_level().ok();
        let target = self.toggle_target(current);
        if let Some(level) = current {
            if level != self.config.level_on && level != self.config.level_off {
                debug!("toggle pressed mid-fade at {}", level);
            }
        }
        debug!("toggle button, set backlight={}", target);
        self.dimmer.set_level(target).await
    }

    /// Handle a signal; returns the exit status when it ends the daemon
    pub async fn on_signal(&self, signal: ControlSignal) -> Result<Option<i32>, DimmerError> {
        match signal {
            ControlSignal::Interrupt | ControlSignal::Terminate => {
                info!("signal {}, exiting...", signal.signo());
                debug!("turning backlight on");
                // A failed final write still exits.
                if let Err(e) = self.dimmer.shutdown(self.config.level_on).await {
                    error!("final backlight write failed: {}", e);
                }
                Ok(Some(signal.signo()))
            }
            ControlSignal::ForceOn | ControlSignal::ForceOff if self.config.disable_user_signals => {
                debug!("signal {} ignored, user signals disabled", signal.signo());
                Ok(None)
            }
            ControlSignal::ForceOn => {
                debug!("signal USR1, turning display on");
                self.dimmer.set_level(self.config.level_on).await?;
                Ok(None)
            }
            ControlSignal::ForceOff => {
                debug!("signal USR2, turning display off");
                self.dimmer.set_level(self.config.level_off).await?;
                Ok(None)
            }
        }
    }

    pub async fn dispatch(&self, event: InputEvent) -> Result<Option<i32>, DimmerError> {
        match event {
            InputEvent::Monitored { level } => self.on_monitored_edge(level).await.map(|_| None),
            InputEvent::ButtonPressed => self.on_button_press().await.map(|_| None),
            InputEvent::Signal(signal) => self.on_signal(signal).await,
        }
    }

    /// Drain `events` until a termination signal; returns the exit status
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<InputEvent>) -> i32 {
        while let Some(event) = events.recv().await {
            match self.dispatch(event).await {
                Ok(Some(code)) => return code,
                Ok(None) => {}
                Err(e) => warn!("{:?} not handled: {}", event, e),
            }
        }
        debug!("event queue closed");
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use backlight_hal::SimChannel;

    fn router(invert: bool, disable_user_signals: bool) -> (EventRouter, Arc<SimChannel>) {
        let config = ControllerConfig::from_settings(Settings {
            level_on: Some(800),
            level_off: Some(100),
            fade: Some(0.0),
            invert: Some(invert),
            disable_user_signals: Some(disable_user_signals),
            ..Default::default()
        })
        .unwrap();
        let sim = Arc::new(SimChannel::new(18));
        let dimmer = Dimmer::new(sim.clone(), &config).unwrap();
        (EventRouter::new(Arc::new(config), Arc::new(dimmer)), sim)
    }

    #[test]
    fn test_is_backlight_on_truth_table() {
        assert!(!is_backlight_on(0, false));
        assert!(is_backlight_on(0, true));
        assert!(is_backlight_on(1, false));
        assert!(!is_backlight_on(1, true));
        assert!(is_backlight_on(7, false));
        assert!(!is_backlight_on(7, true));
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(ControlSignal::Interrupt.signo(), 2);
        assert_eq!(ControlSignal::Terminate.signo(), 15);
        assert!(ControlSignal::Terminate.is_termination());
        assert!(!ControlSignal::ForceOn.is_termination());
    }

    #[tokio::test]
    async fn test_desired_level_follows_invert() {
        let (r, _) = router(false, false);
        assert_eq!(r.desired_level(1), 800);
        assert_eq!(r.desired_level(0), 100);

        let (r, _) = router(true, false);
        assert_eq!(r.desired_level(1), 100);
        assert_eq!(r.desired_level(0), 800);
    }

    #[tokio::test]
    async fn test_toggle_policy() {
        let (r, _) = router(false, false);
        assert_eq!(r.toggle_target(Some(800)), 100);
        assert_eq!(r.toggle_target(Some(100)), 800);
        // Mid-fade counts as off
        assert_eq!(r.toggle_target(Some(450)), 800);
        assert_eq!(r.toggle_target(None), 800);
    }

    #[tokio::test]
    async fn test_button_toggles() {
        let (r, sim) = router(false, false);
        r.dispatch(InputEvent::ButtonPressed).await.unwrap();
        r.dispatch(InputEvent::ButtonPressed).await.unwrap();
        r.dispatch(InputEvent::ButtonPressed).await.unwrap();
        assert_eq!(sim.writes(), vec![800, 100, 800]);
    }

    #[tokio::test]
    async fn test_user_signals() {
        let (r, sim) = router(false, false);
        assert_eq!(
            r.dispatch(InputEvent::Signal(ControlSignal::ForceOff))
                .await
                .unwrap(),
            None
        );
        r.dispatch(InputEvent::Signal(ControlSignal::ForceOn))
            .await
            .unwrap();
        assert_eq!(sim.writes(), vec![100, 800]);

        let (r, sim) = router(false, true);
        r.dispatch(InputEvent::Signal(ControlSignal::ForceOff))
            .await
            .unwrap();
        assert_eq!(sim.write_count(), 0);
    }

    #[tokio::test]
    async fn test_termination_forces_on_and_exits() {
        let (r, sim) = router(false, false);
        r.dispatch(InputEvent::Monitored { level: 0 }).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(InputEvent::Signal(ControlSignal::Terminate)).unwrap();
        tx.send(InputEvent::Monitored { level: 0 }).unwrap();
        assert_eq!(r.run(rx).await, libc::SIGTERM);
        assert_eq!(sim.writes(), vec![100, 800]);
    }

    #[tokio::test]
    async fn test_failed_final_write_still_exits() {
        let (r, sim) = router(false, false);
        sim.fail_writes(true);
        let code = r
            .on_signal(ControlSignal::Terminate)
            .await
            .unwrap();
        assert_eq!(code, Some(libc::SIGTERM));
        assert_eq!(sim.write_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_the_loop() {
        let (r, sim) = router(false, false);
        sim.fail_writes(true);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(InputEvent::Monitored { level: 1 }).unwrap();
        tx.send(InputEvent::Signal(ControlSignal::Interrupt)).unwrap();
        assert_eq!(r.run(rx).await, libc::SIGINT);
    }
}
