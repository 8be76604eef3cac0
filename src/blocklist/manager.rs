//! Filter list synchronization.
//!
//! The manager owns the list pipeline: it seeds sources, downloads and parses
//! lists, keeps the per-source cache files current, and republishes the union
//! of all enabled sources into the shared [`DomainMatcher`]. Query handling
//! keeps running on the previous blocked set while a refresh is in progress.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use super::HostsFileParser;
use super::cache::{CacheError, ListCache};
use super::remote::{FetchError, ListFetcher};
use super::sources::{BlocklistSource, default_sources};
use crate::dns::DomainMatcher;
use crate::metrics::{BLOCKED_DOMAINS, REFRESH_FAILURES_TOTAL};
use crate::store::{AllowStore, SourceStore, StoreError};

/// Default number of lists downloaded at the same time.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 4;

/// Error type for blocklist manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to download filter list: {0}")]
    Fetch(#[from] FetchError),

    #[error("filter list cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("parse task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Sources downloaded, parsed and cached successfully.
    pub updated: usize,
    /// Sources that kept their previous cache.
    pub failed: usize,
    /// Size of the blocked set published at the end of the cycle.
    pub published: usize,
}

/// Coordinates filter list sources, their cache and the shared matcher.
pub struct BlocklistManager<S, A, F>
where
    S: SourceStore,
    A: AllowStore,
    F: ListFetcher,
{
    matcher: Arc<DomainMatcher>,
    sources: S,
    allowlist: A,
    fetcher: F,
    cache: ListCache,
    concurrent_downloads: usize,
    /// Serializes refresh cycles and every publish of the blocked set.
    refresh_lock: Mutex<()>,
}

impl<S, A, F> BlocklistManager<S, A, F>
where
    S: SourceStore,
    A: AllowStore,
    F: ListFetcher,
{
    pub fn new(
        matcher: Arc<DomainMatcher>,
        sources: S,
        allowlist: A,
        fetcher: F,
        cache: ListCache,
    ) -> Self {
        Self {
            matcher,
            sources,
            allowlist,
            fetcher,
            cache,
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            refresh_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_concurrent_downloads(mut self, concurrent_downloads: usize) -> Self {
        self.concurrent_downloads = concurrent_downloads.max(1);
        self
    }

    /// Shared matcher fed by this manager.
    #[must_use]
    pub fn matcher(&self) -> Arc<DomainMatcher> {
        Arc::clone(&self.matcher)
    }

    /// All known sources, sorted by name.
    pub async fn sources(&self) -> Result<Vec<BlocklistSource>, ManagerError> {
        Ok(self.sources.all().await?)
    }

    /// Bring the matcher up from persisted state.
    ///
    /// 1. Seeds the default sources when the store has none.
    /// 2. Loads the allowlist into the matcher.
    /// 3. Publishes the union of the enabled sources' cache files.
    /// 4. Runs a full [`refresh`](Self::refresh) when nothing is cached yet.
    pub async fn initialize(&self) -> Result<(), ManagerError> {
        if self.sources.all().await?.is_empty() {
            let mut seeded = 0;
            for source in default_sources() {
                if self.sources.insert_if_absent(source).await? {
                    seeded += 1;
                }
            }
            tracing::info!(count = seeded, "seeded default blocklist sources");
        }

        let allowed = self.allowlist.all().await?;
        self.matcher.replace_allowed(&allowed);
        tracing::info!(count = allowed.len(), "loaded allowlist");

        if self.republish().await? == 0 {
            tracing::info!("no cached filter lists, downloading");
            self.refresh().await?;
        }

        Ok(())
    }

    /// Download every enabled source and republish the blocked set.
    ///
    /// Sources are fetched concurrently. A source that fails to download,
    /// parse or cache keeps its previous cache file and metadata. The blocked
    /// set is republished once all attempts are done, whatever their outcome.
    /// Concurrent calls run one after the other.
    pub async fn refresh(&self) -> Result<RefreshSummary, ManagerError> {
        let _guard = self.refresh_lock.lock().await;

        let sources = self.sources.enabled().await?;
        tracing::info!(sources = sources.len(), "refreshing filter lists");

        let outcomes: Vec<bool> = stream::iter(sources)
            .map(|source| async move { self.refresh_source(&source).await })
            .buffer_unordered(self.concurrent_downloads)
            .collect()
            .await;

        let updated = outcomes.iter().filter(|ok| **ok).count();
        let failed = outcomes.len() - updated;
        let published = self.publish_from_cache().await?;

        tracing::info!(updated, failed, published, "refreshed filter lists");
        Ok(RefreshSummary {
            updated,
            failed,
            published,
        })
    }

    async fn refresh_source(&self, source: &BlocklistSource) -> bool {
        match self.update_source(source).await {
            Ok(count) => {
                tracing::info!(name = ?source.name, count, "updated filter list");
                true
            }
            Err(err) => {
                metrics::counter!(REFRESH_FAILURES_TOTAL).increment(1);
                tracing::warn!(
                    name = ?source.name,
                    url = %source.url,
                    error = %err,
                    "failed to update filter list, keeping cached copy"
                );
                false
            }
        }
    }

    async fn update_source(&self, source: &BlocklistSource) -> Result<usize, ManagerError> {
        let content = self.fetcher.fetch(&source.url).await?;

        // Lists run to hundreds of thousands of lines
        let domains =
            tokio::task::spawn_blocking(move || HostsFileParser.parse_str(&content)).await?;

        self.cache.store(&source.url, &domains).await?;
        self.sources
            .update_metadata(&source.url, domains.len(), SystemTime::now())
            .await?;

        Ok(domains.len())
    }

    /// Publish the union of all enabled sources' cache files.
    ///
    /// Waits for any running refresh. Returns the size of the published set.
    pub async fn republish(&self) -> Result<usize, ManagerError> {
        let _guard = self.refresh_lock.lock().await;
        self.publish_from_cache().await
    }

    /// Caller holds `refresh_lock`.
    async fn publish_from_cache(&self) -> Result<usize, ManagerError> {
        let sources = self.sources.enabled().await?;

        let mut domains = HashSet::new();
        for source in &sources {
            match self.cache.load(&source.url).await {
                Ok(list) => domains.extend(list),
                Err(err) => tracing::warn!(
                    name = ?source.name,
                    error = %err,
                    "failed to read cached filter list"
                ),
            }
        }

        self.matcher.publish_blocked_set(&domains);
        let published = self.matcher.blocked_len();
        metrics::gauge!(BLOCKED_DOMAINS).set(published as f64);

        tracing::info!(sources = sources.len(), domains = published, "published blocked set");
        Ok(published)
    }

    /// Add a source. Its list is picked up by the next refresh.
    ///
    /// Returns `false` when a source with the same URL already exists.
    pub async fn add_source(&self, source: BlocklistSource) -> Result<bool, ManagerError> {
        let url = source.url.clone();
        let inserted = self.sources.insert_if_absent(source).await?;
        if inserted {
            tracing::info!(url = %url, "added blocklist source");
        }
        Ok(inserted)
    }

    /// Remove a source and republish without its domains.
    pub async fn remove_source(&self, url: &str) -> Result<bool, ManagerError> {
        let _guard = self.refresh_lock.lock().await;
        let removed = self.sources.delete(url).await?;
        if removed {
            tracing::info!(url = %url, "removed blocklist source");
            self.publish_from_cache().await?;
        }
        Ok(removed)
    }

    /// Enable or disable a source and republish from cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownSource`] (wrapped) if no source has this URL.
    pub async fn set_source_enabled(&self, url: &str, enabled: bool) -> Result<(), ManagerError> {
        let _guard = self.refresh_lock.lock().await;
        self.sources.set_enabled(url, enabled).await?;
        tracing::info!(url = %url, enabled, "changed blocklist source state");
        self.publish_from_cache().await?;
        Ok(())
    }

    /// Never block `domain` or its subdomains.
    pub async fn allow_domain(&self, domain: &str) -> Result<bool, ManagerError> {
        let inserted = self.allowlist.insert(domain).await?;
        self.matcher.add_allowed(domain);
        tracing::info!(domain = %domain, "allowlisted domain");
        Ok(inserted)
    }

    /// Remove `domain` from the allowlist.
    pub async fn disallow_domain(&self, domain: &str) -> Result<bool, ManagerError> {
        let removed = self.allowlist.delete(domain).await?;
        self.matcher.remove_allowed(domain);
        tracing::info!(domain = %domain, "removed domain from allowlist");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::remote::tests::MockFetcher;
    use crate::dns::Verdict;
    use crate::store::{MemoryAllowStore, MemorySourceStore};
    use tempfile::TempDir;

    const LIST_A: &str = "https://lists.test/a";
    const LIST_B: &str = "https://lists.test/b";

    type TestManager = BlocklistManager<MemorySourceStore, MemoryAllowStore, MockFetcher>;

    fn create_manager(
        sources: Vec<BlocklistSource>,
        allowed: &[&str],
    ) -> (TestManager, MockFetcher, TempDir) {
        let temp = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        let manager = BlocklistManager::new(
            Arc::new(DomainMatcher::new()),
            MemorySourceStore::with_sources(sources),
            MemoryAllowStore::with_domains(allowed),
            fetcher.clone(),
            ListCache::new(temp.path()),
        );
        (manager, fetcher, temp)
    }

    fn two_sources() -> Vec<BlocklistSource> {
        vec![
            BlocklistSource::new(LIST_A, "A"),
            BlocklistSource::new(LIST_B, "B"),
        ]
    }

    #[tokio::test]
    async fn should_seed_defaults_into_empty_store() {
        let (manager, fetcher, _temp) = create_manager(vec![], &[]);

        manager.initialize().await.unwrap();

        let sources = manager.sources().await.unwrap();
        assert_eq!(sources.len(), default_sources().len());
        // nothing cached, so every default was attempted once
        assert_eq!(fetcher.request_count(), default_sources().len());
    }

    #[tokio::test]
    async fn should_not_seed_when_sources_exist() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_A, "0.0.0.0 ads.example.com");

        manager.initialize().await.unwrap();

        let urls: Vec<_> = manager.sources().await.unwrap().into_iter().map(|s| s.url).collect();
        assert_eq!(urls, vec![LIST_A, LIST_B]);
    }

    #[tokio::test]
    async fn should_load_allowlist_on_initialize() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &["good.example.com"]);
        fetcher.serve(LIST_A, "0.0.0.0 example.com");

        manager.initialize().await.unwrap();

        let matcher = manager.matcher();
        assert_eq!(matcher.decide("bad.example.com"), Verdict::Block);
        assert_eq!(matcher.decide("good.example.com"), Verdict::Allow);
    }

    #[tokio::test]
    async fn should_publish_from_cache_without_downloading() {
        let (manager, fetcher, temp) = create_manager(two_sources(), &[]);
        ListCache::new(temp.path())
            .store(LIST_A, &["cached.example.com".to_string()])
            .await
            .unwrap();

        manager.initialize().await.unwrap();

        assert_eq!(fetcher.request_count(), 0);
        assert_eq!(manager.matcher().decide("cached.example.com"), Verdict::Block);
    }

    #[tokio::test]
    async fn should_keep_cache_of_failed_source() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_A, "0.0.0.0 a-old.com");
        fetcher.serve(LIST_B, "0.0.0.0 b-old.com");
        manager.refresh().await.unwrap();

        fetcher.remove(LIST_A);
        fetcher.serve(LIST_B, "0.0.0.0 b-new.com");
        let summary = manager.refresh().await.unwrap();

        assert_eq!(
            summary,
            RefreshSummary {
                updated: 1,
                failed: 1,
                published: 2
            }
        );
        let matcher = manager.matcher();
        assert_eq!(matcher.decide("a-old.com"), Verdict::Block);
        assert_eq!(matcher.decide("b-new.com"), Verdict::Block);
        assert_eq!(matcher.decide("b-old.com"), Verdict::Allow);
    }

    #[tokio::test]
    async fn should_update_metadata_only_on_success() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_B, "0.0.0.0 one.com two.com\nthree.com");

        manager.refresh().await.unwrap();

        let sources = manager.sources().await.unwrap();
        let a = sources.iter().find(|s| s.url == LIST_A).unwrap();
        let b = sources.iter().find(|s| s.url == LIST_B).unwrap();
        assert_eq!(a.domain_count, 0);
        assert!(a.last_updated.is_none());
        assert_eq!(b.domain_count, 3);
        assert!(b.last_updated.is_some());
    }

    #[tokio::test]
    async fn should_skip_disabled_sources() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_A, "a.com");
        fetcher.serve(LIST_B, "b.com");
        manager.refresh().await.unwrap();

        manager.set_source_enabled(LIST_B, false).await.unwrap();
        assert_eq!(manager.matcher().decide("b.com"), Verdict::Allow);
        assert_eq!(manager.matcher().decide("a.com"), Verdict::Block);

        let before = fetcher.request_count();
        manager.refresh().await.unwrap();
        assert_eq!(fetcher.request_count(), before + 1);
    }

    #[tokio::test]
    async fn should_keep_source_disabled_during_running_refresh() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_A, "a.com");
        fetcher.serve(LIST_B, "b.com");
        manager.refresh().await.unwrap();
        let manager = Arc::new(manager);

        // Park the next refresh after it has listed both sources.
        let gate = fetcher.hold();
        let refresh = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.refresh().await.unwrap() }
        });
        while fetcher.request_count() < 4 {
            tokio::task::yield_now().await;
        }

        let disable = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.set_source_enabled(LIST_B, false).await }
        });
        tokio::task::yield_now().await;
        gate.close();

        refresh.await.unwrap();
        disable.await.unwrap().unwrap();

        let matcher = manager.matcher();
        assert_eq!(matcher.decide("a.com"), Verdict::Block);
        assert_eq!(matcher.decide("b.com"), Verdict::Allow);
        assert_eq!(matcher.blocked_len(), 1);
    }

    #[tokio::test]
    async fn should_reject_unknown_source_toggle() {
        let (manager, _fetcher, _temp) = create_manager(two_sources(), &[]);
        let result = manager.set_source_enabled("https://nope", true).await;
        assert!(matches!(
            result,
            Err(ManagerError::Store(StoreError::UnknownSource(_)))
        ));
    }

    #[tokio::test]
    async fn should_add_and_remove_sources() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        let extra = "https://lists.test/extra";
        fetcher.serve(extra, "extra.com");

        assert!(manager.add_source(BlocklistSource::new(extra, "Extra")).await.unwrap());
        assert!(!manager.add_source(BlocklistSource::new(extra, "Again")).await.unwrap());
        manager.refresh().await.unwrap();
        assert_eq!(manager.matcher().decide("extra.com"), Verdict::Block);

        assert!(manager.remove_source(extra).await.unwrap());
        assert_eq!(manager.matcher().decide("extra.com"), Verdict::Allow);
    }

    #[tokio::test]
    async fn should_update_allowlist_incrementally() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_A, "example.com");
        manager.refresh().await.unwrap();

        assert!(manager.allow_domain("www.example.com").await.unwrap());
        assert_eq!(manager.matcher().decide("www.example.com"), Verdict::Allow);
        assert_eq!(manager.matcher().decide("example.com"), Verdict::Block);

        assert!(manager.disallow_domain("www.example.com").await.unwrap());
        assert_eq!(manager.matcher().decide("www.example.com"), Verdict::Block);
    }

    #[tokio::test]
    async fn should_serialize_concurrent_refreshes() {
        let (manager, fetcher, _temp) = create_manager(two_sources(), &[]);
        fetcher.serve(LIST_A, "a.com");
        fetcher.serve(LIST_B, "b.com");
        let manager = Arc::new(manager.with_concurrent_downloads(1));

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.refresh().await.unwrap() }
        });
        let second = manager.refresh().await.unwrap();
        let first = first.await.unwrap();

        assert_eq!(first.published, 2);
        assert_eq!(second.published, 2);
        assert_eq!(fetcher.request_count(), 4);
    }
}
