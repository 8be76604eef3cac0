//! Remote filter list download.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

/// User-Agent header value for HTTP requests.
const USER_AGENT: &str = concat!("nxgate/", env!("CARGO_PKG_VERSION"));

/// Error type for filter list downloads.
///
/// Every variant is a soft failure: the source keeps its last good cache.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed with a non-success status code.
    #[error("HTTP request failed for {url}: status {status}")]
    HttpStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// Network error during HTTP request.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Timeout fetching the remote URL.
    #[error("timeout fetching {url}")]
    Timeout {
        /// URL that timed out.
        url: String,
    },

    /// Failed to create HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Downloads the raw content of a filter list.
pub trait ListFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Fetches filter lists over HTTP(S).
#[derive(Debug, Clone)]
pub struct RemoteLoader {
    client: Client,
}

impl RemoteLoader {
    /// Create a new remote loader with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self { client })
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: err,
        }
    }
}

impl ListFetcher for RemoteLoader {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error(url, err))?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|err| transport_error(url, err))
    }
}

/// Returns the default cache directory for filter lists.
///
/// - Linux: `~/.cache/nxgate/blocklists/`
/// - macOS: `~/Library/Caches/nxgate/blocklists/`
/// - Windows: `{FOLDERID_LocalAppData}\nxgate\blocklists\`
///
/// Falls back to `./cache/blocklists` if the cache directory cannot be determined.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().map_or_else(
        || PathBuf::from("./cache/blocklists"),
        |p| p.join("nxgate").join("blocklists"),
    )
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Semaphore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fetcher serving canned bodies by URL; unknown URLs fail with a 404.
    #[derive(Clone, Default)]
    pub struct MockFetcher {
        pub bodies: Arc<Mutex<HashMap<String, String>>>,
        pub requests: Arc<Mutex<Vec<String>>>,
        gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(&self, url: &str, body: &str) {
            self.bodies.lock().insert(url.to_string(), body.to_string());
        }

        pub fn remove(&self, url: &str) {
            self.bodies.lock().remove(url);
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        /// Park every later fetch, after it is recorded, until the
        /// returned gate is closed.
        pub fn hold(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.gate.lock() = Some(Arc::clone(&gate));
            gate
        }
    }

    impl ListFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requests.lock().push(url.to_string());
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                let _ = gate.acquire().await;
            }
            self.bodies
                .lock()
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn create_loader() -> RemoteLoader {
        RemoteLoader::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn should_fetch_list_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/hosts"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("0.0.0.0 ads.example.com\n"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/hosts", mock_server.uri());
        let content = create_loader().fetch(&url).await.unwrap();

        assert_eq!(content, "0.0.0.0 ads.example.com\n");
    }

    #[tokio::test]
    async fn should_fail_on_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/missing", mock_server.uri());
        let result = create_loader().fetch(&url).await;

        match result {
            Err(FetchError::HttpStatus { status, url: failed }) => {
                assert_eq!(status, 404);
                assert_eq!(failed, url);
            }
            other => panic!("expected HttpStatus error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_fail_on_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow.com")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let loader = RemoteLoader::new(Duration::from_millis(100)).unwrap();
        let result = loader.fetch(&mock_server.uri()).await;

        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn should_fail_on_connection_refused() {
        let result = create_loader().fetch("http://127.0.0.1:9/hosts").await;
        assert!(matches!(
            result,
            Err(FetchError::Network { .. } | FetchError::Timeout { .. })
        ));
    }

    #[test]
    fn default_cache_dir_ends_with_blocklists() {
        assert!(default_cache_dir().ends_with("blocklists"));
    }
}
