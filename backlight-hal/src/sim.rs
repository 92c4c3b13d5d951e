//! In-memory board
//!
//! `SimChannel` records every duty-cycle write so callers can assert on the
//! full history, and `SimLine` lets the caller drive edges by hand. Faults can
//! be injected to exercise the error paths of the daemon.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::constants::MAX_PWM;
use crate::{Board, Edge, EdgeCallback, HalError, InputLine, Level, LineEdge, PwmChannel};

// ── SimChannel ────────────────────────────────────────────────

/// Writes kept by a channel; older ones are dropped
pub const WRITE_HISTORY: usize = 65_536;

struct ChannelState {
    level: Option<Level>,
    range: Level,
    frequency: u32,
    /// Frequency reported back instead of the requested one
    negotiated: Option<u32>,
    writes: VecDeque<Level>,
    fail_reads: bool,
    fail_writes: bool,
}

/// Simulated PWM output
pub struct SimChannel {
    gpio: u8,
    state: Mutex<ChannelState>,
}

impl SimChannel {
    pub fn new(gpio: u8) -> Self {
        Self {
            gpio,
            state: Mutex::new(ChannelState {
                level: None,
                range: MAX_PWM,
                frequency: 0,
                negotiated: None,
                writes: VecDeque::new(),
                fail_reads: false,
                fail_writes: false,
            }),
        }
    }

    /// The last [`WRITE_HISTORY`] levels written, oldest first
    pub fn writes(&self) -> Vec<Level> {
        self.state.lock().writes.iter().copied().collect()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Last level written (or preset), `None` while uninitialized
    pub fn level(&self) -> Option<Level> {
        self.state.lock().level
    }

    /// Put the channel at `level` without recording a write
    pub fn preset(&self, level: Level) {
        self.state.lock().level = Some(level);
    }

    /// Frequency the channel currently runs at
    pub fn frequency(&self) -> u32 {
        self.state.lock().frequency
    }

    /// Make `set_frequency` settle on `hz` regardless of the request
    pub fn negotiate_frequency(&self, hz: Option<u32>) {
        self.state.lock().negotiated = hz;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

impl PwmChannel for SimChannel {
    fn gpio(&self) -> u8 {
        self.gpio
    }

    fn set_duty_cycle(&self, level: Level) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(HalError::Injected("duty cycle write"));
        }
        let level = level.min(state.range);
        trace!("sim gpio#{} duty={}", self.gpio, level);
        state.level = Some(level);
        if state.writes.len() == WRITE_HISTORY {
            state.writes.pop_front();
        }
        state.writes.push_back(level);
        Ok(())
    }

    fn duty_cycle(&self) -> Result<Level, HalError> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(HalError::Injected("duty cycle read"));
        }
        state.level.ok_or(HalError::NotInitialized(self.gpio))
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
        state.frequency = state.negotiated.unwrap_or(hz);
        Ok(state.frequency)
    }
}

// ── SimLine ───────────────────────────────────────────────────

type SharedCallback = Arc<Mutex<EdgeCallback>>;

struct LineState {
    level: u8,
    watcher: Option<(Edge, SharedCallback)>,
    fail_watch: bool,
}

/// Simulated digital input
pub struct SimLine {
    pin: u8,
    state: Mutex<LineState>,
}

impl SimLine {
    pub fn new(pin: u8, level: u8) -> Self {
        Self {
            pin,
            state: Mutex::new(LineState {
                level: u8::from(level != 0),
                watcher: None,
                fail_watch: false,
            }),
        }
    }

    /// Drive the line to `level`, firing the callback on a matching transition
    pub fn set_level(&self, level: u8) {
        let level = u8::from(level != 0);
        let watcher = {
            let mut state = self.state.lock();
            if state.level == level {
                return;
            }
            state.level = level;
            state.watcher.clone()
        };

        // Callback runs without the line lock held, it may read the line.
        if let Some((edge, callback)) = watcher {
            if edge.matches(level) {
                let mut callback = callback.lock();
                (*callback)(LineEdge {
                    pin: self.pin,
                    level,
                });
            }
        }
    }

    /// High then low, like a momentary push-button
    pub fn pulse(&self) {
        self.set_level(1);
        self.set_level(0);
    }

    pub fn has_watcher(&self) -> bool {
        self.state.lock().watcher.is_some()
    }

    /// Make `on_edge` fail
    pub fn fail_watch(&self, fail: bool) {
        self.state.lock().fail_watch = fail;
    }
}

impl InputLine for SimLine {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read(&self) -> Result<u8, HalError> {
        Ok(self.state.lock().level)
    }

    fn on_edge(&self, edge: Edge, callback: EdgeCallback) -> Result<(), HalError> {
        let mut state = self.state.lock();
        if state.fail_watch {
            return Err(HalError::Injected("edge callback"));
        }
        state.watcher = Some((edge, Arc::new(Mutex::new(callback))));
        Ok(())
    }

    fn clear_edge(&self) -> Result<(), HalError> {
        self.state.lock().watcher = None;
        Ok(())
    }
}

// ── SimBoard ──────────────────────────────────────────────────

/// Board handing out shared simulated channels and lines
///
/// Asking twice for the same GPIO returns the same object, so a test can grab
/// the line the daemon watches and drive it.
#[derive(Default)]
pub struct SimBoard {
    channels: Mutex<HashMap<u8, Arc<SimChannel>>>,
    lines: Mutex<HashMap<u8, Arc<SimLine>>>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated channel on `gpio`, created on first use
    pub fn channel(&self, gpio: u8) -> Arc<SimChannel> {
        Arc::clone(
            self.channels
                .lock()
                .entry(gpio)
                .or_insert_with(|| Arc::new(SimChannel::new(gpio))),
        )
    }

    /// Simulated line on `pin`, created low on first use
    pub fn line(&self, pin: u8) -> Arc<SimLine> {
        Arc::clone(
            self.lines
                .lock()
                .entry(pin)
                .or_insert_with(|| Arc::new(SimLine::new(pin, 0))),
        )
    }
}

impl Board for SimBoard {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn pwm_channel(&self, gpio: u8) -> Result<Arc<dyn PwmChannel>, HalError> {
        if self.lines.lock().contains_key(&gpio) {
            return Err(HalError::UnsupportedPin {
                pin: gpio,
                purpose: "PWM output (already an input)",
            });
        }
        Ok(self.channel(gpio))
    }

    fn input_line(&self, gpio: u8) -> Result<Arc<dyn InputLine>, HalError> {
        if self.channels.lock().contains_key(&gpio) {
            return Err(HalError::UnsupportedPin {
                pin: gpio,
                purpose: "input (already a PWM output)",
            });
        }
        Ok(self.line(gpio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_write_fails() {
        let ch = SimChannel::new(18);
        assert!(matches!(ch.duty_cycle(), Err(HalError::NotInitialized(18))));
        ch.set_duty_cycle(42).unwrap();
        assert_eq!(ch.duty_cycle().unwrap(), 42);
        assert_eq!(ch.writes(), vec![42]);
    }

    #[test]
    fn test_write_clamped_to_range() {
        let ch = SimChannel::new(18);
        ch.set_range(255).unwrap();
        ch.set_duty_cycle(1000).unwrap();
        assert_eq!(ch.level(), Some(255));
    }

    #[test]
    fn test_preset_not_recorded() {
        let ch = SimChannel::new(18);
        ch.preset(300);
        assert_eq!(ch.duty_cycle().unwrap(), 300);
        assert_eq!(ch.write_count(), 0);
    }

    #[test]
    fn test_frequency_negotiation() {
        let ch = SimChannel::new(18);
        assert_eq!(ch.set_frequency(200).unwrap(), 200);
        ch.negotiate_frequency(Some(250));
        assert_eq!(ch.set_frequency(200).unwrap(), 250);
        assert_eq!(ch.frequency(), 250);
    }

    #[test]
    fn test_injected_faults() {
        let ch = SimChannel::new(18);
        ch.fail_writes(true);
        assert!(ch.set_duty_cycle(1).is_err());
        assert_eq!(ch.write_count(), 0);
        ch.fail_writes(false);
        ch.set_duty_cycle(1).unwrap();
        ch.fail_reads(true);
        assert!(ch.duty_cycle().is_err());
    }

    #[test]
    fn test_write_history_is_bounded() {
        let ch = SimChannel::new(18);
        for i in 0..WRITE_HISTORY + 10 {
            ch.set_duty_cycle((i % 1000) as Level).unwrap();
        }
        let writes = ch.writes();
        assert_eq!(writes.len(), WRITE_HISTORY);
        assert_eq!(ch.write_count(), WRITE_HISTORY);
        assert_eq!(writes[0], 10);
        assert_eq!(ch.level(), Some(((WRITE_HISTORY + 9) % 1000) as Level));
    }

    #[test]
    fn test_line_edges() {
        let line = SimLine::new(20, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        line.on_edge(Edge::Both, Box::new(move |e: LineEdge| sink.lock().push(e.level)))
            .unwrap();

        line.set_level(1);
        line.set_level(1); // no transition
        line.set_level(0);
        assert_eq!(*seen.lock(), vec![1, 0]);
        assert_eq!(line.read().unwrap(), 0);
    }

    #[test]
    fn test_rising_edge_only() {
        let line = SimLine::new(21, 0);
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        line.on_edge(Edge::Rising, Box::new(move |_: LineEdge| *sink.lock() += 1))
            .unwrap();
        line.pulse();
        line.pulse();
        assert_eq!(*count.lock(), 2);

        line.clear_edge().unwrap();
        line.pulse();
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_callback_may_read_line() {
        let line = Arc::new(SimLine::new(20, 0));
        let reader = Arc::clone(&line);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        line.on_edge(
            Edge::Both,
            Box::new(move |_: LineEdge| *sink.lock() = Some(reader.read().unwrap())),
        )
        .unwrap();
        line.set_level(1);
        assert_eq!(*seen.lock(), Some(1));
    }

    #[test]
    fn test_board_shares_objects() {
        let board = SimBoard::new();
        let a = board.pwm_channel(18).unwrap();
        a.set_duty_cycle(7).unwrap();
        assert_eq!(board.channel(18).writes(), vec![7]);

        let line = board.input_line(20).unwrap();
        board.line(20).set_level(1);
        assert_eq!(line.read().unwrap(), 1);

        assert!(board.input_line(18).is_err());
        assert!(board.pwm_channel(20).is_err());
    }
}
