//! Signal handling against a running daemon.
//!
//! Raises real signals at this process, so it lives in its own test binary
//! and runs on the real clock.

use std::time::Duration;

use backlight_hal::{SimBoard, SimChannel};
use backlight_monitor::{ControllerConfig, Daemon, RunOptions, Settings};
use tokio::time::timeout;

async fn wait_until(channel: &SimChannel, f: impl Fn(u16) -> bool) {
    timeout(Duration::from_secs(10), async {
        while !channel.level().is_some_and(&f) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

fn raise(signo: i32) {
    // SAFETY: handlers for these signals are installed by the daemon
    unsafe {
        libc::raise(signo);
    }
}

#[tokio::test]
async fn signals_drive_and_stop_the_daemon() {
    let board = SimBoard::new();
    let line = board.line(20);
    let channel = board.channel(18);
    channel.preset(0);
    line.set_level(1);

    let config = ControllerConfig::from_settings(Settings {
        level_on: Some(800),
        level_off: Some(0),
        fade: Some(4.0),
        ..Default::default()
    })
    .unwrap();
    let daemon = Daemon::open(&board, config).unwrap();
    let serve = tokio::spawn(daemon.serve(RunOptions::default()));
    while !line.has_watcher() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Startup fades up towards the on level
    wait_until(&channel, |level| level >= 50).await;

    // SIGUSR2 reverses the fade
    raise(libc::SIGUSR2);
    let turned = channel.level().unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(300)).await;
    wait_until(&channel, |level| level < turned).await;

    raise(libc::SIGTERM);
    let code = timeout(Duration::from_secs(10), serve)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(code, libc::SIGTERM);
    assert_eq!(channel.level(), Some(800));
    assert_eq!(channel.writes().last(), Some(&800));

    // No fade step lands after shutdown
    let count = channel.write_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.write_count(), count);
}
