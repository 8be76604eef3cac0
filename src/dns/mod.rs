//! DNS-related modules.

pub mod codec;
pub mod matcher;
pub mod resolver;

pub use codec::DnsQuery;
pub use matcher::{DomainMatcher, Verdict};
pub use resolver::{DnsResolver, DohResolver};
