//! On-disk cache of parsed filter lists.
//!
//! Each source gets one file holding its normalized domains, one per line,
//! named after a hash of the source URL. Files are replaced atomically so a
//! crash mid-write never leaves a truncated list behind.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;

/// Hex characters of the URL hash used in file names.
const NAME_HASH_LEN: usize = 16;

/// Error type for cache file operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory of cached filter lists.
#[derive(Debug, Clone)]
pub struct ListCache {
    dir: PathBuf,
}

impl ListCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache file path for a source URL. Stable across runs.
    #[must_use]
    pub fn path_for(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let hex = format!("{digest:x}");
        self.dir.join(format!("{}.txt", &hex[..NAME_HASH_LEN]))
    }

    /// Load the cached domains of a source. A missing file is an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file exists but cannot be read.
    pub async fn load(&self, url: &str) -> Result<Vec<String>, CacheError> {
        let path = self.path_for(url);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CacheError::io(&path, err)),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Replace the cached domains of a source.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory or file cannot be written.
    pub async fn store(&self, url: &str, domains: &[String]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| CacheError::io(&self.dir, err))?;

        let path = self.path_for(url);
        let tmp_path = path.with_extension("txt.tmp");

        let mut content = domains.join("\n");
        content.push('\n');

        fs::write(&tmp_path, content)
            .await
            .map_err(|err| CacheError::io(&tmp_path, err))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|err| CacheError::io(&path, err))?;

        tracing::debug!(path = ?path, count = domains.len(), "saved filter list to cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn should_derive_stable_file_names() {
        let cache = ListCache::new("/tmp/lists");
        let a = cache.path_for("https://example.com/hosts");
        let b = cache.path_for("https://example.com/hosts");
        let c = cache.path_for("https://example.com/other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.parent(), Some(Path::new("/tmp/lists")));

        let file_name = a.file_name().unwrap().to_str().unwrap();
        assert_eq!(file_name.len(), NAME_HASH_LEN + ".txt".len());
        assert!(file_name.trim_end_matches(".txt").chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn should_return_empty_list_when_missing() {
        let temp = TempDir::new().unwrap();
        let cache = ListCache::new(temp.path());

        assert!(cache.load("https://example.com/hosts").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_store_and_load_domains() {
        let temp = TempDir::new().unwrap();
        let cache = ListCache::new(temp.path().join("nested").join("dir"));
        let domains = vec!["ads.example.com".to_string(), "tracker.net".to_string()];

        cache.store("https://example.com/hosts", &domains).await.unwrap();

        let content = std::fs::read_to_string(cache.path_for("https://example.com/hosts")).unwrap();
        assert_eq!(content, "ads.example.com\ntracker.net\n");
        assert_eq!(cache.load("https://example.com/hosts").await.unwrap(), domains);
    }

    #[tokio::test]
    async fn should_replace_previous_content_without_leftovers() {
        let temp = TempDir::new().unwrap();
        let cache = ListCache::new(temp.path());
        let url = "https://example.com/hosts";

        cache.store(url, &["old.com".to_string()]).await.unwrap();
        cache.store(url, &["new.com".to_string()]).await.unwrap();

        assert_eq!(cache.load(url).await.unwrap(), vec!["new.com"]);
        let files: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn should_fail_when_directory_is_not_writable() {
        let temp = TempDir::new().unwrap();
        // a regular file where the cache directory should be
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let cache = ListCache::new(&blocker);

        let result = cache.store("https://example.com/hosts", &[]).await;
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }
}
