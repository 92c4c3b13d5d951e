//! Fade controller
//!
//! One long-lived worker task owns the animation. Callers never touch the
//! fade state directly; they submit a [`Command`] through a single-slot
//! request channel and wait for the worker's acknowledgement:
//!
//! ```text
//!   retarget()/terminate() ──▶ mpsc(1) ──▶ FadeWorker ──▶ PwmChannel
//!            ▲                                 │
//!            └──────── oneshot ack ◀───────────┤
//!   state()/wait_idle() ◀──── watch<FadeState> ┘
//! ```
//!
//! A request that arrives while a fade is stepping preempts it: the worker
//! drops back to idle, reads the level the hardware is at, and starts over
//! from there towards the new target. Only one stepping sequence ever runs.

use std::sync::Arc;
use std::time::Duration;

use backlight_hal::{Level, PwmChannel};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::ControllerConfig;

#[derive(Error, Debug)]
pub enum FadeError {
    /// Zero fade duration: write the level directly instead
    #[error("fade duration is zero")]
    NoFade,

    #[error("on and off levels are equal, no fade rate")]
    ZeroSpan,

    #[error("fade controller terminated")]
    Terminated,
}

/// Step direction of the running fade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Hold,
    Up,
}

impl Direction {
    /// Direction that takes `from` to `to`
    pub fn between(from: Level, to: Level) -> Self {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Direction::Up,
            std::cmp::Ordering::Less => Direction::Down,
            std::cmp::Ordering::Equal => Direction::Hold,
        }
    }

    /// -1, 0 or +1
    pub fn signum(self) -> i8 {
        match self {
            Direction::Down => -1,
            Direction::Hold => 0,
            Direction::Up => 1,
        }
    }

    fn advance(self, level: Level) -> Level {
        match self {
            Direction::Down => level.saturating_sub(1),
            Direction::Hold => level,
            Direction::Up => level.saturating_add(1),
        }
    }
}

/// Snapshot of the animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeState {
    /// Last level written, `None` before the first retarget
    pub current_level: Option<Level>,
    pub target_level: Option<Level>,
    pub direction: Direction,
    /// No step running or pending
    pub idle: bool,
    /// Set once by `terminate`, never cleared
    pub killed: bool,
}

impl Default for FadeState {
    fn default() -> Self {
        Self {
            current_level: None,
            target_level: None,
            direction: Direction::Hold,
            idle: true,
            killed: false,
        }
    }
}

/// Request understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Retarget(Level),
    Terminate,
}

struct FadeRequest {
    command: Command,
    ack: oneshot::Sender<()>,
}

/// Handle to the fade worker
pub struct FadeController {
    request_tx: mpsc::Sender<FadeRequest>,
    state_rx: watch::Receiver<FadeState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    fade_delay: Duration,
    max_level: Level,
}

impl FadeController {
    /// Start the worker on the current tokio runtime
    ///
    /// The step delay is fixed here: `fade_duration / |level_on - level_off|`.
    pub fn spawn(
        channel: Arc<dyn PwmChannel>,
        config: &ControllerConfig,
    ) -> Result<Self, FadeError> {
        if !config.fading() {
            return Err(FadeError::NoFade);
        }
        let fade_delay = config.fade_delay().ok_or(FadeError::ZeroSpan)?;
        debug!("fade delay {}ms", fade_delay.as_millis());

        let (request_tx, requests) = mpsc::channel(1);
        let (state, state_rx) = watch::channel(FadeState::default());
        let max_level = channel.range();

        let worker = FadeWorker {
            channel,
            fade_delay,
            requests,
            state,
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            request_tx,
            state_rx,
            worker: Mutex::new(Some(handle)),
            fade_delay,
            max_level,
        })
    }

    pub fn fade_delay(&self) -> Duration {
        self.fade_delay
    }

    /// Latest published state
    pub fn state(&self) -> FadeState {
        *self.state_rx.borrow()
    }

    /// Watch every state change the worker publishes
    pub fn subscribe(&self) -> watch::Receiver<FadeState> {
        self.state_rx.clone()
    }

    /// Wait until no fade is running
    pub async fn wait_idle(&self) -> FadeState {
        let mut rx = self.state_rx.clone();
        let idle = rx.wait_for(|s| s.idle).await.map(|s| *s);
        idle.unwrap_or_else(|_| *rx.borrow())
    }

    /// Fade towards `level`, preempting any running fade
    ///
    /// Returns once the worker has aborted the previous fade (if any) and
    /// scheduled the new one. Does not wait for the fade to finish.
    pub async fn retarget(&self, level: Level) -> Result<(), FadeError> {
        if self.state_rx.borrow().killed {
            return Err(FadeError::Terminated);
        }
        let level = if level > self.max_level {
            debug!("target {} clamped to {}", level, self.max_level);
            self.max_level
        } else {
            level
        };
        self.submit(Command::Retarget(level)).await
    }

    /// Stop the worker for good
    ///
    /// Returns after the worker task has exited; no hardware write happens
    /// after that. Does not write a final level itself.
    pub async fn terminate(&self) {
        if !self.state_rx.borrow().killed {
            // A closed channel means the worker is already gone.
            let _ = self.submit(Command::Terminate).await;
        }
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("fade worker ended abnormally: {}", e);
            }
        }
    }

    async fn submit(&self, command: Command) -> Result<(), FadeError> {
        let (ack, ack_rx) = oneshot::channel();
        self.request_tx
            .send(FadeRequest { command, ack })
            .await
            .map_err(|_| FadeError::Terminated)?;
        ack_rx.await.map_err(|_| FadeError::Terminated)
    }
}

struct FadeWorker {
    channel: Arc<dyn PwmChannel>,
    fade_delay: Duration,
    requests: mpsc::Receiver<FadeRequest>,
    state: watch::Sender<FadeState>,
}

impl FadeWorker {
    async fn run(mut self) {
        debug!("fade worker started");
        let mut pending: Option<FadeRequest> = None;

        loop {
            let request = match pending.take() {
                Some(request) => request,
                None => match self.requests.recv().await {
                    Some(request) => request,
                    None => break,
                },
            };

            match request.command {
                Command::Terminate => {
                    self.state.send_modify(|s| {
                        s.killed = true;
                        s.direction = Direction::Hold;
                        s.idle = true;
                    });
                    let _ = request.ack.send(());
                    debug!("fade worker terminated");
                    return;
                }
                Command::Retarget(target) => {
                    let direction = self.begin(target);
                    let _ = request.ack.send(());
                    if direction != Direction::Hold {
                        pending = self.step_towards(target, direction).await;
                    }
                }
            }
        }

        debug!("fade worker stopped, controller dropped");
    }

    /// Pick up from the hardware level and publish the new target
    fn begin(&mut self, target: Level) -> Direction {
        let initial = match self.channel.duty_cycle() {
            Ok(level) => level,
            Err(e) => {
                debug!("{}, setting target level directly", e);
                target
            }
        };
        let direction = Direction::between(initial, target);
        debug!(
            "fade from {} to {} ({})",
            initial,
            target,
            direction.signum()
        );

        self.state.send_modify(|s| {
            s.current_level = Some(initial);
            s.target_level = Some(target);
            s.direction = direction;
            s.idle = direction == Direction::Hold;
        });
        direction
    }

    /// Step one level per `fade_delay` until `target`
    ///
    /// The state turns idle together with the write that reaches `target`.
    /// Returns the request that cut the fade short, if one arrived.
    async fn step_towards(&mut self, target: Level, direction: Direction) -> Option<FadeRequest> {
        let start = Instant::now();
        let mut current = self.state.borrow().current_level.unwrap_or(target);
        let mut steps: u32 = 0;

        while current != target {
            current = direction.advance(current);
            if let Err(e) = self.channel.set_duty_cycle(current) {
                warn!(
                    "gpio#{} duty cycle {} not written: {}",
                    self.channel.gpio(),
                    current,
                    e
                );
            }
            steps += 1;
            let reached = current == target;
            self.state.send_modify(|s| {
                s.current_level = Some(current);
                if reached {
                    s.direction = Direction::Hold;
                    s.idle = true;
                }
            });
            if reached {
                break;
            }

            // Deadlines are absolute so timer rounding does not add up.
            let deadline = start + self.fade_delay * steps;
            tokio::select! {
                _ = sleep_until(deadline) => {}
                next = self.requests.recv() => {
                    debug!("fade to {} stopped at {}", target, current);
                    self.go_idle();
                    return next;
                }
            }
        }

        None
    }

    fn go_idle(&self) {
        self.state.send_modify(|s| {
            s.direction = Direction::Hold;
            s.idle = true;
        });
    }
}
