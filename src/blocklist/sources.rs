//! Filter list source records and the built-in defaults.

use std::time::SystemTime;

/// A downloadable filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistSource {
    /// Download location, unique per source.
    pub url: String,
    /// Display name.
    pub name: String,
    pub enabled: bool,
    /// Number of domains in the last successful download.
    pub domain_count: usize,
    /// Time of the last successful download.
    pub last_updated: Option<SystemTime>,
}

impl BlocklistSource {
    /// A new enabled source that has never been downloaded.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            enabled: true,
            domain_count: 0,
            last_updated: None,
        }
    }
}

/// Sources seeded into an empty source store.
#[must_use]
pub fn default_sources() -> Vec<BlocklistSource> {
    vec![
        BlocklistSource::new(
            "https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts",
            "Steven Black Unified",
        ),
        BlocklistSource::new("https://adaway.org/hosts.txt", "AdAway Default"),
        BlocklistSource::new(
            "https://pgl.yoyo.org/adservers/serverlist.php?hostformat=hosts&showintro=0&mimetype=plaintext",
            "Peter Lowe's Ad Servers",
        ),
    ]
}
