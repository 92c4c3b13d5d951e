//! Raspberry Pi backend (rppal)
//!
//! The backlight runs on a hardware PWM channel (GPIO 12/18 -> PWM0,
//! GPIO 13/19 -> PWM1, needs the `pwm-2chan` overlay). Input lines use the
//! GPIO interrupt thread rppal spawns per pin.

use std::sync::Arc;

use parking_lot::Mutex;
use rppal::gpio::{Event, Gpio, InputPin, Trigger};
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::debug;

use crate::constants::{
    fraction_to_level, hardware_pwm_channel, level_to_fraction, DEFAULT_FREQUENCY, MAX_PWM,
};
use crate::{Board, Edge, EdgeCallback, HalError, InputLine, Level, LineEdge, PwmChannel};

// ── PWM ───────────────────────────────────────────────────────

struct PwmState {
    /// Opened lazily, on the first frequency or duty-cycle request
    pwm: Option<Pwm>,
    range: Level,
    written: bool,
}

/// Hardware PWM channel
pub struct RpiChannel {
    gpio: u8,
    channel: Channel,
    state: Mutex<PwmState>,
}

impl RpiChannel {
    fn open(channel: Channel, hz: f64) -> Result<Pwm, HalError> {
        Ok(Pwm::with_frequency(
            channel,
            hz,
            0.0,
            Polarity::Normal,
            false,
        )?)
    }
}

impl PwmChannel for RpiChannel {
    fn gpio(&self) -> u8 {
        self.gpio
    }

    fn set_duty_cycle(&self, level: Level) -> Result<(), HalError> {
        let mut state = self.state.lock();
        let fraction = level_to_fraction(level, state.range);
        if state.pwm.is_none() {
            state.pwm = Some(Self::open(self.channel, f64::from(DEFAULT_FREQUENCY))?);
        }
        if let Some(pwm) = state.pwm.as_ref() {
            pwm.set_duty_cycle(fraction)?;
            if !state.written {
                pwm.enable()?;
            }
        }
        state.written = true;
        Ok(())
    }

    fn duty_cycle(&self) -> Result<Level, HalError> {
        let state = self.state.lock();
        match state.pwm.as_ref() {
            Some(pwm) if state.written => Ok(fraction_to_level(pwm.duty_cycle()?, state.range)),
            _ => Err(HalError::NotInitialized(self.gpio)),
        }
    }

    fn set_range(&self, max: Level) -> Result<(), HalError> {
        self.state.lock().range = max;
        Ok(())
    }

    fn range(&self) -> Level {
        self.state.lock().range
    }

    fn set_frequency(&self, hz: u32) -> Result<u32, HalError> {
        let mut state = self.state.lock();
        match state.pwm.as_ref() {
            Some(pwm) => {
                let duty = pwm.duty_cycle()?;
                pwm.set_frequency(f64::from(hz), duty)?;
            }
            None => state.pwm = Some(Self::open(self.channel, f64::from(hz))?),
        }
        let actual = match state.pwm.as_ref() {
            Some(pwm) => pwm.frequency()?.round() as u32,
            None => hz,
        };
        debug!("gpio#{} PWM frequency {} Hz (requested {})", self.gpio, actual, hz);
        Ok(actual)
    }
}

// ── Input lines ───────────────────────────────────────────────

/// GPIO input with optional async interrupt
pub struct RpiLine {
    pin: u8,
    input: Mutex<InputPin>,
}

impl InputLine for RpiLine {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read(&self) -> Result<u8, HalError> {
        Ok(self.input.lock().read() as u8)
    }

    fn on_edge(&self, edge: Edge, mut callback: EdgeCallback) -> Result<(), HalError> {
        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
            Edge::Both => Trigger::Both,
        };
        let pin = self.pin;
        self.input
            .lock()
            .set_async_interrupt(trigger, None, move |event: Event| {
                let level = u8::from(event.trigger == Trigger::RisingEdge);
                callback(LineEdge { pin, level });
            })?;
        Ok(())
    }

    fn clear_edge(&self) -> Result<(), HalError> {
        self.input.lock().clear_async_interrupt()?;
        Ok(())
    }
}

// ── Board ─────────────────────────────────────────────────────

/// The Raspberry Pi GPIO header
pub struct RpiBoard {
    gpio: Gpio,
}

impl RpiBoard {
    pub fn new() -> Result<Self, HalError> {
        Ok(Self { gpio: Gpio::new()? })
    }
}

impl Board for RpiBoard {
    fn name(&self) -> &'static str {
        "rpi"
    }

    fn pwm_channel(&self, gpio: u8) -> Result<Arc<dyn PwmChannel>, HalError> {
        let channel = match hardware_pwm_channel(gpio) {
            Some(0) => Channel::Pwm0,
            Some(1) => Channel::Pwm1,
            _ => {
                return Err(HalError::UnsupportedPin {
                    pin: gpio,
                    purpose: "hardware PWM",
                })
            }
        };
        Ok(Arc::new(RpiChannel {
            gpio,
            channel,
            state: Mutex::new(PwmState {
                pwm: None,
                range: MAX_PWM,
                written: false,
            }),
        }))
    }

    fn input_line(&self, gpio: u8) -> Result<Arc<dyn InputLine>, HalError> {
        let input = self.gpio.get(gpio)?.into_input();
        Ok(Arc::new(RpiLine {
            pin: gpio,
            input: Mutex::new(input),
        }))
    }
}
