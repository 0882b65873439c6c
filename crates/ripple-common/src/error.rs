//! Error types for Ripple
//!
//! Errors on the local mutation path are returned to the caller. Errors on the
//! replication path are logged by the component that hits them and never
//! reach a caller.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum RippleError {
    #[error("replicated map '{map}' can't be created on lite member {member}")]
    LiteMemberRestriction { map: String, member: String },

    #[error("event type {0} not supported")]
    UnsupportedEventKind(i32),

    #[error("malformed replication message: {0}")]
    MalformedReplicationMessage(String),

    #[error("in-memory format {0} is not supported for replicated map")]
    UnsupportedInMemoryFormat(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("replicated map '{0}' has been destroyed")]
    StoreDestroyed(String),

    #[error("replicated map service is not running")]
    ServiceNotRunning,

    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("vector clock overflow: {0}")]
    ClockOverflow(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl RippleError {
    /// Whether the error belongs to the inbound replication path
    pub fn is_replication_error(&self) -> bool {
        matches!(
            self,
            RippleError::MalformedReplicationMessage(_) | RippleError::Transport(_)
        )
    }
}

impl From<serde_json::Error> for RippleError {
    fn from(value: serde_json::Error) -> Self {
        RippleError::Serialization(value.to_string())
    }
}

impl From<config::ConfigError> for RippleError {
    fn from(value: config::ConfigError) -> Self {
        RippleError::ConfigError(value.to_string())
    }
}

/// Result type used across Ripple crates
pub type Result<T, E = RippleError> = std::result::Result<T, E>;
