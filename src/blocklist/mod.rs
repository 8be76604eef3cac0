//! Filter list pipeline.
//!
//! Sources are downloaded by [`remote`], parsed from hosts format by
//! [`HostsFileParser`], stored per source by [`cache`], and merged into the
//! shared matcher by [`manager`]. [`scheduler`] drives periodic refreshes.
//!
//! # Example
//!
//! ```
//! use nxgate::blocklist::HostsFileParser;
//!
//! let content = "# Comment\n0.0.0.0 Ads.Example.com\ntracker.net";
//! let domains = HostsFileParser.parse_str(content);
//! assert_eq!(domains, vec!["ads.example.com", "tracker.net"]);
//! ```

pub mod cache;
mod hosts;
pub mod manager;
pub mod remote;
pub mod scheduler;
pub mod sources;

pub use cache::ListCache;
pub use hosts::HostsFileParser;
pub use manager::{BlocklistManager, RefreshSummary};
pub use remote::{ListFetcher, RemoteLoader};
pub use scheduler::{RefreshTrigger, spawn_refresh_task};
pub use sources::{BlocklistSource, default_sources};

