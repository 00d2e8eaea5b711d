//! Prefixed ULID identifiers for ephemeral objects.
//!
//! Durable rows (messages, notifications) get snowflake ids from the
//! persistence layer instead; see [`crate::snowflake`].

use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = linklet_common::id::prefixed_ulid("ses");
/// assert!(id.starts_with("ses_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A live WebSocket session.
    pub const SESSION: &str = "ses";
}
