//! Query statistics.
//!
//! The packet loop hands every decision to a [`QueryLogger`], which queues it
//! without blocking. A background task drains the queue into a bounded
//! [`QueryHistory`] and periodically logs a summary.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::shutdown;
use crate::store::{QueryEvent, QueryEventSink};

/// Events older than this are pruned at each summary.
pub const HISTORY_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Domains listed in the periodic summary.
const SUMMARY_TOP: usize = 5;

/// Bounded, time-ordered log of query events.
#[derive(Debug)]
pub struct QueryHistory {
    events: VecDeque<QueryEvent>,
    capacity: usize,
}

impl QueryHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest one when full.
    pub fn push(&mut self, event: QueryEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn since(&self, since: SystemTime) -> impl Iterator<Item = &QueryEvent> {
        self.events.iter().filter(move |e| e.timestamp >= since)
    }

    /// Queries recorded at or after `since`.
    #[must_use]
    pub fn total_since(&self, since: SystemTime) -> usize {
        self.since(since).count()
    }

    /// Blocked queries recorded at or after `since`.
    #[must_use]
    pub fn blocked_since(&self, since: SystemTime) -> usize {
        self.since(since).filter(|e| e.blocked).count()
    }

    /// Most blocked domains since `since`, by descending count then name.
    #[must_use]
    pub fn top_blocked_since(&self, since: SystemTime, limit: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for event in self.since(since).filter(|e| e.blocked) {
            *counts.entry(event.domain.as_str()).or_default() += 1;
        }

        let mut top: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(domain, count)| (domain.to_string(), count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(limit);
        top
    }

    /// Drop events recorded before `cutoff`. Returns how many were removed.
    pub fn delete_older_than(&mut self, cutoff: SystemTime) -> usize {
        let before = self.events.len();
        self.events.retain(|e| e.timestamp >= cutoff);
        before - self.events.len()
    }
}

/// Non-blocking [`QueryEventSink`] feeding a background history task.
#[derive(Debug)]
pub struct QueryLogger {
    tx: mpsc::Sender<QueryEvent>,
    dropped: AtomicU64,
}

impl QueryLogger {
    /// Events dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl QueryEventSink for QueryLogger {
    fn record(&self, event: QueryEvent) {
        // Never stall the packet path; drop the event instead
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Spawn the task draining query events into `history`.
///
/// A summary of the last `summary_interval` is logged at that interval.
pub fn spawn_query_logger(
    history: Arc<Mutex<QueryHistory>>,
    queue_capacity: usize,
    summary_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (Arc<QueryLogger>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(queue_capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(summary_interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown::requested(&mut shutdown) => break,
                event = rx.recv() => match event {
                    Some(event) => history.lock().push(event),
                    None => break,
                },
                _ = ticker.tick() => log_summary(&history, summary_interval),
            }
        }

        tracing::debug!("query logger stopped");
    });

    let logger = Arc::new(QueryLogger {
        tx,
        dropped: AtomicU64::new(0),
    });
    (logger, handle)
}

fn log_summary(history: &Mutex<QueryHistory>, window: Duration) {
    let now = SystemTime::now();
    let since = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);

    let mut history = history.lock();
    let pruned = history.delete_older_than(
        now.checked_sub(HISTORY_RETENTION)
            .unwrap_or(SystemTime::UNIX_EPOCH),
    );
    let total = history.total_since(since);
    if total == 0 {
        return;
    }

    let blocked = history.blocked_since(since);
    let top: Vec<String> = history
        .top_blocked_since(since, SUMMARY_TOP)
        .into_iter()
        .map(|(domain, count)| format!("{domain}={count}"))
        .collect();

    info!(
        total,
        blocked,
        pruned,
        top_blocked = %top.join(","),
        "query summary"
    );
}
