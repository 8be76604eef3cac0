//! Upstream DNS resolution.
//!
//! Forwarded queries are sent as raw DNS messages, so the resolver never
//! re-encodes what the client sent. The production implementation speaks
//! DNS-over-HTTPS (RFC 8484, POST form).

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use super::codec::DNS_HEADER_LEN;

/// Media type of wire-format DNS messages.
pub const DNS_MESSAGE: &str = "application/dns-message";

/// Default DNS-over-HTTPS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://1.1.1.1/dns-query";

const USER_AGENT: &str = concat!("nxgate/", env!("CARGO_PKG_VERSION"));

/// Error type for upstream resolution.
///
/// Callers treat every variant as "no answer": the query is dropped, never
/// blocked.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("network error contacting {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout contacting {endpoint}")]
    Timeout { endpoint: String },

    #[error("{endpoint} returned status {status}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("upstream answer of {len} bytes is shorter than a DNS header")]
    Truncated { len: usize },

    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Trait for DNS resolution.
///
/// Takes the complete DNS query message and returns the complete answer
/// message.
pub trait DnsResolver: Send + Sync + Clone + 'static {
    fn resolve(&self, query: &[u8]) -> impl Future<Output = Result<Vec<u8>, ResolveError>> + Send;
}

/// DNS-over-HTTPS resolver.
#[derive(Clone, Debug)]
pub struct DohResolver {
    client: Client,
    endpoint: String,
}

impl DohResolver {
    /// Create a resolver posting to `endpoint` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ResolveError::ClientBuild)?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ResolveError {
        if err.is_timeout() {
            ResolveError::Timeout {
                endpoint: self.endpoint.clone(),
            }
        } else {
            ResolveError::Network {
                endpoint: self.endpoint.clone(),
                source: err,
            }
        }
    }
}

impl DnsResolver for DohResolver {
    async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>, ResolveError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(query.to_vec())
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        if !response.status().is_success() {
            return Err(ResolveError::HttpStatus {
                endpoint: self.endpoint.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;

        if body.len() < DNS_HEADER_LEN {
            return Err(ResolveError::Truncated { len: body.len() });
        }

        Ok(body.to_vec())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dns::codec::tests::{dns_answer, dns_query};
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mock resolver for testing.
    ///
    /// Echoes the query back as an empty NOERROR answer unless an answer or
    /// an error is configured.
    #[derive(Clone, Default)]
    pub struct MockResolver {
        /// Answer returned for every query, with the query's id patched in.
        pub answer: Arc<Mutex<Option<Vec<u8>>>>,
        /// If set, resolve fails with a timeout.
        pub fail: Arc<Mutex<bool>>,
        /// Delay before answering.
        pub delay: Arc<Mutex<Duration>>,
        /// Count of resolve calls.
        pub resolve_count: Arc<AtomicU64>,
    }

    impl MockResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_answer(&self, answer: Vec<u8>) {
            *self.answer.lock() = Some(answer);
        }

        pub fn set_error(&self) {
            *self.fail.lock() = true;
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        pub fn resolve_count(&self) -> u64 {
            self.resolve_count.load(Ordering::SeqCst)
        }
    }

    impl DnsResolver for MockResolver {
        async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>, ResolveError> {
            self.resolve_count.fetch_add(1, Ordering::SeqCst);

            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if *self.fail.lock() {
                return Err(ResolveError::Timeout {
                    endpoint: "mock".to_string(),
                });
            }

            let mut answer = self
                .answer
                .lock()
                .clone()
                .unwrap_or_else(|| query.to_vec());
            answer[..2].copy_from_slice(&query[..2]);
            // QR bit
            answer[2] |= 0x80;
            Ok(answer)
        }
    }

    #[tokio::test]
    async fn should_echo_query_as_answer_by_default() {
        let resolver = MockResolver::new();
        let query = dns_query("example.com", 4321);

        let answer = resolver.resolve(&query).await.unwrap();

        assert_eq!(&answer[..2], &query[..2]);
        assert_eq!(answer[2] & 0x80, 0x80);
        assert_eq!(resolver.resolve_count(), 1);
    }

    #[tokio::test]
    async fn should_return_error_when_mock_configured_to_fail() {
        let resolver = MockResolver::new();
        resolver.set_error();

        let result = resolver.resolve(&dns_query("example.com", 1)).await;
        assert!(matches!(result, Err(ResolveError::Timeout { .. })));
    }

    #[tokio::test]
    async fn should_post_wire_format_query() {
        let server = MockServer::start().await;
        let query = dns_query("example.com", 99);
        let answer = dns_answer("example.com", 99, Ipv4Addr::new(93, 184, 216, 34));

        Mock::given(method("POST"))
            .and(path("/dns-query"))
            .and(header("content-type", DNS_MESSAGE))
            .and(header("accept", DNS_MESSAGE))
            .and(body_bytes(query.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(answer.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = DohResolver::new(
            format!("{}/dns-query", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(resolver.resolve(&query).await.unwrap(), answer);
    }

    #[tokio::test]
    async fn should_fail_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let resolver = DohResolver::new(server.uri(), Duration::from_secs(5)).unwrap();
        let result = resolver.resolve(&dns_query("example.com", 1)).await;

        assert!(matches!(
            result,
            Err(ResolveError::HttpStatus { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn should_fail_on_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 12])
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let resolver = DohResolver::new(server.uri(), Duration::from_millis(100)).unwrap();
        let result = resolver.resolve(&dns_query("example.com", 1)).await;

        assert!(matches!(result, Err(ResolveError::Timeout { .. })));
    }

    #[tokio::test]
    async fn should_reject_truncated_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4]))
            .mount(&server)
            .await;

        let resolver = DohResolver::new(server.uri(), Duration::from_secs(5)).unwrap();
        let result = resolver.resolve(&dns_query("example.com", 1)).await;

        assert!(matches!(result, Err(ResolveError::Truncated { len: 4 })));
    }

    #[tokio::test]
    async fn should_fail_when_upstream_unreachable() {
        // nothing listens on the discard port
        let resolver =
            DohResolver::new("http://127.0.0.1:9/dns-query", Duration::from_secs(2)).unwrap();
        let result = resolver.resolve(&dns_query("example.com", 1)).await;

        assert!(matches!(
            result,
            Err(ResolveError::Network { .. } | ResolveError::Timeout { .. })
        ));
    }
}
