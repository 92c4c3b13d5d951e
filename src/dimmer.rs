//! Backlight output: faded or direct
//!
//! With a non-zero fade duration every level change goes through the
//! [`FadeController`]; with fading off there is no worker at all and a level
//! change is one synchronous write.

use std::sync::Arc;

use backlight_hal::{HalError, Level, PwmChannel};
use thiserror::Error;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::fade::{FadeController, FadeError};

#[derive(Error, Debug)]
pub enum DimmerError {
    #[error(transparent)]
    Fade(#[from] FadeError),

    #[error(transparent)]
    Hal(#[from] HalError),
}

pub struct Dimmer {
    channel: Arc<dyn PwmChannel>,
    fader: Option<FadeController>,
}

impl Dimmer {
    /// Must run inside a tokio runtime when `config` enables fading.
    pub fn new(channel: Arc<dyn PwmChannel>, config: &ControllerConfig) -> Result<Self, FadeError> {
        let fader = if config.fading() {
            Some(FadeController::spawn(Arc::clone(&channel), config)?)
        } else {
            debug!("fading is off");
            None
        };
        Ok(Self { channel, fader })
    }

    pub fn channel(&self) -> &Arc<dyn PwmChannel> {
        &self.channel
    }

    /// The fade worker, absent when fading is off
    pub fn fader(&self) -> Option<&FadeController> {
        self.fader.as_ref()
    }

    /// Move the backlight to `level`
    pub async fn set_level(&self, level: Level) -> Result<(), DimmerError> {
        match &self.fader {
            Some(fader) => fader.retarget(level).await?,
            None => self.channel.set_duty_cycle(level)?,
        }
        Ok(())
    }

    /// Write `level` right now, bypassing any fade
    pub fn force_level(&self, level: Level) -> Result<(), HalError> {
        self.channel.set_duty_cycle(level)
    }

    pub fn current_level(&self) -> Result<Level, HalError> {
        self.channel.duty_cycle()
    }

    /// Stop the fade worker, then write `final_level` directly
    pub async fn shutdown(&self, final_level: Level) -> Result<(), HalError> {
        if let Some(fader) = &self.fader {
            fader.terminate().await;
        }
        self.force_level(final_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use backlight_hal::SimChannel;

    fn config(fade: f64) -> ControllerConfig {
        ControllerConfig::from_settings(Settings {
            level_on: Some(800),
            level_off: Some(0),
            fade: Some(fade),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_zero_fade_is_one_direct_write() {
        let sim = Arc::new(SimChannel::new(18));
        let dimmer = Dimmer::new(sim.clone(), &config(0.0)).unwrap();
        assert!(dimmer.fader().is_none());

        dimmer.set_level(800).await.unwrap();
        assert_eq!(sim.writes(), vec![800]);
        assert_eq!(dimmer.current_level().unwrap(), 800);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_fade_and_forces_level() {
        let sim = Arc::new(SimChannel::new(18));
        sim.preset(0);
        let dimmer = Dimmer::new(sim.clone(), &config(2.0)).unwrap();

        dimmer.set_level(800).await.unwrap();
        let fader = dimmer.fader().unwrap();
        fader
            .subscribe()
            .wait_for(|s| s.current_level == Some(10))
            .await
            .unwrap();

        dimmer.shutdown(800).await.unwrap();
        let writes = sim.writes();
        assert_eq!(writes.last(), Some(&800));
        assert!(fader.state().killed);

        // Nothing else lands once the worker is gone
        let count = sim.write_count();
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert_eq!(sim.write_count(), count);
    }
}
