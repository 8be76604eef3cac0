//! Hosts file format parser.
//!
//! Filter lists such as Steven Black's or AdAway's are published in
//! `/etc/hosts` format, sometimes mixed with bare domain lines.

use std::collections::HashSet;

use crate::dns::matcher::normalize;

/// Parser for hosts file format.
///
/// # Format
///
/// - `<ip> <domain1> [domain2]...` where `<ip>` is `0.0.0.0` or `127.0.0.1`
/// - a bare `<domain>` on its own line
/// - comments start with `#`, blank lines are ignored
///
/// # Extraction Rules
///
/// - Domains are lowercased and a trailing root dot is removed
/// - Only names containing a dot are kept, and never `localhost`
/// - Results are de-duplicated, keeping the first occurrence
///
/// # Example
///
/// ```text
/// # Comment line
/// 127.0.0.1 localhost
/// 0.0.0.0 ads.example.com tracker.example.com
/// bad-site.org
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HostsFileParser;

/// IP addresses that indicate a blocked domain.
const BLOCK_IPS: &[&str] = &["0.0.0.0", "127.0.0.1"];

impl HostsFileParser {
    /// Parse hosts content held in memory.
    #[must_use]
    pub fn parse_str(&self, content: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        content
            .lines()
            .flat_map(parse_line)
            .filter(|domain| seen.insert(domain.clone()))
            .collect()
    }
}

/// Extract the blocked domains of a single line.
fn parse_line(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Vec::new();
    }

    let without_comment = trimmed.split('#').next().unwrap_or(trimmed);
    let parts: Vec<&str> = without_comment.split_whitespace().collect();

    match parts.as_slice() {
        [domain] => accept(domain).into_iter().collect(),
        [ip, domains @ ..] if BLOCK_IPS.contains(ip) => {
            domains.iter().filter_map(|d| accept(d)).collect()
        }
        _ => Vec::new(),
    }
}

fn accept(token: &str) -> Option<String> {
    let domain = normalize(token);
    (domain != "localhost" && domain.contains('.')).then_some(domain)
}
