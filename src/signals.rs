//! OS signal handling
//!
//! SIGINT/SIGTERM shut the daemon down with the backlight forced on.
//! SIGUSR1/SIGUSR2 force the backlight on/off, unless user signals are
//! disabled. Signals never touch the hardware themselves: each one is turned
//! into an [`InputEvent`] on the router queue.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::router::{ControlSignal, InputEvent};

/// Signals listened for, given whether user signals are enabled
pub fn handled_signals(user_signals: bool) -> Vec<(SignalKind, ControlSignal)> {
    let mut handled = vec![
        (SignalKind::interrupt(), ControlSignal::Interrupt),
        (SignalKind::terminate(), ControlSignal::Terminate),
    ];
    if user_signals {
        handled.push((SignalKind::user_defined1(), ControlSignal::ForceOn));
        handled.push((SignalKind::user_defined2(), ControlSignal::ForceOff));
    }
    handled
}

/// Install the handlers and forward each delivery to `events`
///
/// Must be called from inside a tokio runtime. The listener tasks stop once
/// the router side of `events` is gone.
pub fn listen(
    events: mpsc::UnboundedSender<InputEvent>,
    user_signals: bool,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();
    for (kind, control) in handled_signals(user_signals) {
        let mut stream = signal(kind)?;
        let events = events.clone();
        tasks.push(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                debug!("received signal {}", control.signo());
                if events.send(InputEvent::Signal(control)).is_err() {
                    break;
                }
            }
        }));
    }
    debug!(
        "signal USR1/USR2 {}",
        if user_signals { "enabled" } else { "disabled" }
    );
    Ok(tasks)
}
