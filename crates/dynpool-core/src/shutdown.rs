//! Shutdown signalling for the background tasks.
//!
//! Tasks receive a `watch::Receiver<bool>`; the owner flips it to `true`
//! (or drops the sender) to ask them to stop after their current step.

use tokio::sync::watch;

/// Create a shutdown channel in the "running" state.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown is requested or the sender is gone.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
