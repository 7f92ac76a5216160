//! Error taxonomy for the master core (spec §7).
//!
//! Only [`CoreError::Config`] is allowed to propagate out of `main()` and
//! abort startup. Every other variant is caught at the channel boundary and
//! converted into an opaque reply string; never into a leaked internal
//! detail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed envelope or inner load: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("replay rejected: {0}")]
    Replay(String),

    #[error("identity mismatch: {0}")]
    IdentityMismatch(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("invalid worker pool configuration:\n  - {}", .0.join("\n  - "))]
    Config(Vec<String>),

    #[error("minion capacity exceeded")]
    Capacity,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The opaque string returned to a minion on the wire. Never leaks
    /// `self`'s `Display` text for anything but `Config`, which never
    /// reaches a minion.
    pub fn wire_message(&self) -> &'static str {
        match self {
            CoreError::Decode(_)
            | CoreError::Authentication(_)
            | CoreError::Replay(_)
            | CoreError::IdentityMismatch(_)
            | CoreError::Key(_) => "bad load",
            CoreError::Capacity => "full",
            CoreError::Internal(_) => "Server-side exception handling payload",
            CoreError::Config(_) => "bad load",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
