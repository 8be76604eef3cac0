//! Shutdown signalling shared by the background tasks.
//!
//! A `watch` channel carries a single flag. Tasks hold a receiver and stop
//! once the flag turns `true` or the sender is dropped.

use tokio::sync::watch;

/// Create a shutdown channel in the running state.
#[must_use]
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    // a dropped sender counts as a request
    let _ = shutdown.wait_for(|stop| *stop).await;
}
