//! Shutdown plumbing shared by both loops.
//!
//! [`wait_for_shutdown_signal`] resolves on SIGINT, SIGTERM or SIGQUIT (ctrl-c
//! elsewhere). The caller turns that into a [`CancellationToken`] cancel, and
//! every wait inside the loops goes through [`sleep_or_cancel`] so it can be
//! interrupted.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Sleeps for `duration`. Returns `false` if the token was cancelled first.
pub async fn sleep_or_cancel(shutdown: &CancellationToken, duration: Duration) -> bool {
    if shutdown.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
