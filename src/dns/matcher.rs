//! Block/allow decisions with hierarchical domain matching.
//!
//! A domain matches a set when the set contains the domain itself or any of
//! its ancestors, so `example.com` in a set covers `ads.example.com`. The
//! allowed set always wins over the blocked set.
//!
//! The blocked set is replaced wholesale after each list refresh and is read
//! on every query, so it lives behind an [`ArcSwap`]: readers take a snapshot
//! without locking and never observe a half-built set. The allowed set is
//! small and edited one entry at a time.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

/// Outcome of a filtering decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Block,
    Allow,
}

impl Verdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Allow => "allow",
        }
    }
}

/// Normalize a domain for set membership: ASCII lowercase, one trailing
/// root dot removed.
#[must_use]
pub fn normalize(domain: &str) -> String {
    let lower = domain.to_ascii_lowercase();
    match lower.strip_suffix('.') {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// Whether `domain` or one of its ancestors, down to the last label, is in `set`.
fn contains_self_or_ancestor(set: &HashSet<String>, domain: &str) -> bool {
    let mut candidate = domain;
    loop {
        if set.contains(candidate) {
            return true;
        }
        match candidate.split_once('.') {
            Some((_, parent)) if !parent.is_empty() => candidate = parent,
            _ => return false,
        }
    }
}

/// Thread-safe domain matcher shared by the packet loop and the list pipeline.
#[derive(Debug, Default)]
pub struct DomainMatcher {
    blocked: ArcSwap<HashSet<String>>,
    allowed: RwLock<HashSet<String>>,
}

impl DomainMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a query for `domain` is blocked.
    #[must_use]
    pub fn decide(&self, domain: &str) -> Verdict {
        let domain = normalize(domain);

        if contains_self_or_ancestor(&self.allowed.read(), &domain) {
            return Verdict::Allow;
        }
        if contains_self_or_ancestor(&self.blocked.load(), &domain) {
            return Verdict::Block;
        }
        Verdict::Allow
    }

    /// Replace the blocked set.
    ///
    /// The new set is built before the swap; concurrent [`decide`](Self::decide)
    /// calls see either the previous set or the new one.
    pub fn publish_blocked_set<I, S>(&self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = domains
            .into_iter()
            .map(|d| normalize(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        let count = set.len();
        self.blocked.store(Arc::new(set));
        tracing::debug!(count, "published blocked set");
    }

    /// Replace the allowed set.
    pub fn replace_allowed<I, S>(&self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = domains
            .into_iter()
            .map(|d| normalize(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        *self.allowed.write() = set;
    }

    /// Add a single allowed domain. Returns `false` if it was already present.
    pub fn add_allowed(&self, domain: &str) -> bool {
        self.allowed.write().insert(normalize(domain))
    }

    /// Remove a single allowed domain. Returns `false` if it was not present.
    pub fn remove_allowed(&self, domain: &str) -> bool {
        self.allowed.write().remove(&normalize(domain))
    }

    /// Number of domains in the published blocked set.
    #[must_use]
    pub fn blocked_len(&self) -> usize {
        self.blocked.load().len()
    }

    #[must_use]
    pub fn allowed_len(&self) -> usize {
        self.allowed.read().len()
    }
}
