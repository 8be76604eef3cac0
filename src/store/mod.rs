//! Collaborator interfaces for persisted state.
//!
//! Sources, the allowlist and query events live in whatever storage the host
//! application provides. The gateway only talks to these traits; the
//! in-memory implementations in [`memory`] back the standalone binary and the
//! tests.

pub mod memory;

use std::future::Future;
use std::time::SystemTime;

use crate::blocklist::sources::BlocklistSource;

pub use memory::{MemoryAllowStore, MemorySourceStore};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No source with the given URL exists.
    #[error("unknown blocklist source: {0:?}")]
    UnknownSource(String),

    /// The storage backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Storage of filter list sources, keyed by URL.
pub trait SourceStore: Send + Sync + 'static {
    /// All sources, sorted by name.
    fn all(&self) -> impl Future<Output = Result<Vec<BlocklistSource>, StoreError>> + Send;

    /// Enabled sources, sorted by name.
    fn enabled(&self) -> impl Future<Output = Result<Vec<BlocklistSource>, StoreError>> + Send;

    /// Insert a source unless one with the same URL exists.
    /// Returns whether it was inserted.
    fn insert_if_absent(
        &self,
        source: BlocklistSource,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Record a successful download.
    fn update_metadata(
        &self,
        url: &str,
        domain_count: usize,
        last_updated: SystemTime,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_enabled(
        &self,
        url: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a source. Returns whether it existed.
    fn delete(&self, url: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Storage of allowlisted domains.
pub trait AllowStore: Send + Sync + 'static {
    fn all(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Returns whether the domain was newly added.
    fn insert(&self, domain: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns whether the domain was present.
    fn delete(&self, domain: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// One filtered query, as recorded for statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub domain: String,
    pub blocked: bool,
    pub timestamp: SystemTime,
}

impl QueryEvent {
    pub fn now(domain: impl Into<String>, blocked: bool) -> Self {
        Self {
            domain: domain.into(),
            blocked,
            timestamp: SystemTime::now(),
        }
    }
}

/// Receiver of query events.
///
/// Called on the packet path, so implementations must not block; dropping
/// events under pressure is acceptable.
pub trait QueryEventSink: Send + Sync + 'static {
    fn record(&self, event: QueryEvent);
}
