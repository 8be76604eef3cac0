//! Periodic and on-demand filter list refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::manager::BlocklistManager;
use super::remote::ListFetcher;
use crate::shutdown;
use crate::store::{AllowStore, SourceStore};

/// Longest accepted refresh interval. Longer ones are clamped to it.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Shortest accepted refresh interval. Shorter ones are raised to it.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Handle requesting an immediate refresh.
///
/// Requests made while one is already pending are merged into it.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Ask for a refresh. Returns `false` if one was already pending or the
    /// task has stopped.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Spawn the task refreshing filter lists every `interval` and on demand.
///
/// The first scheduled refresh happens one `interval` after spawning; use
/// the returned trigger for an earlier one. A refresh in progress when
/// shutdown is requested is abandoned.
pub fn spawn_refresh_task<S, A, F>(
    manager: Arc<BlocklistManager<S, A, F>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (RefreshTrigger, JoinHandle<()>)
where
    S: SourceStore,
    A: AllowStore,
    F: ListFetcher,
{
    let (tx, mut rx) = mpsc::channel(1);

    let interval = interval.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => tracing::debug!("scheduled filter list refresh"),
                Some(()) = rx.recv() => tracing::debug!("requested filter list refresh"),
            }

            tokio::select! {
                () = shutdown::requested(&mut shutdown) => break,
                result = manager.refresh() => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "filter list refresh failed");
                    }
                }
            }
        }

        tracing::info!("refresh task stopped");
    });

    (RefreshTrigger { tx }, handle)
}
