//! In-memory store implementations.

use std::collections::BTreeSet;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::{AllowStore, SourceStore, StoreError};
use crate::blocklist::sources::BlocklistSource;
use crate::dns::matcher::normalize;

/// Source store held in memory.
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    sources: RwLock<Vec<BlocklistSource>>,
}

impl MemorySourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `sources`; later duplicates of a URL are dropped.
    pub fn with_sources(sources: impl IntoIterator<Item = BlocklistSource>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.sources.write();
            for source in sources {
                if !guard.iter().any(|s| s.url == source.url) {
                    guard.push(source);
                }
            }
        }
        store
    }

    fn sorted(&self, filter: impl Fn(&BlocklistSource) -> bool) -> Vec<BlocklistSource> {
        let mut sources: Vec<_> = self
            .sources
            .read()
            .iter()
            .filter(|s| filter(s))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        sources
    }

    fn modify(
        &self,
        url: &str,
        f: impl FnOnce(&mut BlocklistSource),
    ) -> Result<(), StoreError> {
        let mut sources = self.sources.write();
        let source = sources
            .iter_mut()
            .find(|s| s.url == url)
            .ok_or_else(|| StoreError::UnknownSource(url.to_string()))?;
        f(source);
        Ok(())
    }
}

impl SourceStore for MemorySourceStore {
    async fn all(&self) -> Result<Vec<BlocklistSource>, StoreError> {
        Ok(self.sorted(|_| true))
    }

    async fn enabled(&self) -> Result<Vec<BlocklistSource>, StoreError> {
        Ok(self.sorted(|s| s.enabled))
    }

    async fn insert_if_absent(&self, source: BlocklistSource) -> Result<bool, StoreError> {
        let mut sources = self.sources.write();
        if sources.iter().any(|s| s.url == source.url) {
            return Ok(false);
        }
        sources.push(source);
        Ok(true)
    }

    async fn update_metadata(
        &self,
        url: &str,
        domain_count: usize,
        last_updated: SystemTime,
    ) -> Result<(), StoreError> {
        self.modify(url, |source| {
            source.domain_count = domain_count;
            source.last_updated = Some(last_updated);
        })
    }

    async fn set_enabled(&self, url: &str, enabled: bool) -> Result<(), StoreError> {
        self.modify(url, |source| source.enabled = enabled)
    }

    async fn delete(&self, url: &str) -> Result<bool, StoreError> {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|s| s.url != url);
        Ok(sources.len() != before)
    }
}

/// Allowlist held in memory, normalized and sorted.
#[derive(Debug, Default)]
pub struct MemoryAllowStore {
    domains: RwLock<BTreeSet<String>>,
}

impl MemoryAllowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: RwLock::new(domains.into_iter().map(|d| normalize(d.as_ref())).collect()),
        }
    }
}

impl AllowStore for MemoryAllowStore {
    async fn all(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.domains.read().iter().cloned().collect())
    }

    async fn insert(&self, domain: &str) -> Result<bool, StoreError> {
        Ok(self.domains.write().insert(normalize(domain)))
    }

    async fn delete(&self, domain: &str) -> Result<bool, StoreError> {
        Ok(self.domains.write().remove(&normalize(domain)))
    }
}
