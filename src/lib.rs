//! nxgate - A local DNS filtering gateway.
//!
//! nxgate reads raw IPv4 datagrams from a tunnel interface, answers queries
//! for blocked domains with NXDOMAIN and forwards everything else to a
//! DNS-over-HTTPS resolver. Filter lists are downloaded from hosts-format
//! sources, cached on disk and refreshed in the background.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`dns`]: Packet codec, domain matching and upstream resolution
//! - [`blocklist`]: Filter list download, caching and refresh
//! - [`network`]: Tunnel I/O
//! - [`server`]: The packet loop
//! - [`store`]: Storage interfaces for sources, allowlist and query events
//! - [`stats`]: Query history and statistics
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Tunnels, resolvers, list fetchers and stores are all trait-based so every
//! component can be exercised without network access:
//!
//! ```rust
//! use nxgate::dns::{DomainMatcher, Verdict};
//!
//! let matcher = DomainMatcher::new();
//! matcher.publish_blocked_set(["doubleclick.net"]);
//! matcher.add_allowed("ok.doubleclick.net");
//!
//! assert_eq!(matcher.decide("ads.doubleclick.net"), Verdict::Block);
//! assert_eq!(matcher.decide("ok.doubleclick.net"), Verdict::Allow);
//! ```

pub mod blocklist;
pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod network;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
