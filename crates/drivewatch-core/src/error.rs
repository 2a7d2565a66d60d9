//! Error types for the drivewatch pipeline
//!
//! This module defines all error types used throughout the crate:
//!
//! - [`Error`]: the crate-wide error returned by engine, store and check code
//! - [`RemoteError`]: categorized failure of a document-store call
//! - [`DeliveryError`]: machine-readable failure of a message delivery

use thiserror::Error;

/// Result type alias for drivewatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the drivewatch pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// A document-store call failed (recoverable for the current check)
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Failure that cannot be recovered within a check (revoked or invalid credentials)
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),

    /// Subscription store errors
    #[error("Subscription store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an unrecoverable error
    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        Self::Unrecoverable(msg.into())
    }

    /// Create a subscription store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this failure must be treated as fatal for the current check
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Categorized failure of a remote document-store or credential call
///
/// The categories mirror what the remote API reports (HTTP status or
/// embedded error code) plus the two transport-level outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The access credential was rejected (HTTP 401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The refresh credential itself is no longer valid (`invalid_grant`)
    #[error("Invalid refresh credential: {0}")]
    InvalidGrant(String),

    /// Remote server error (HTTP 5xx)
    #[error("Server error: {0}")]
    Server(String),

    /// Any other API-reported error
    #[error("Api error: {0}")]
    Api(String),

    /// Timeout, DNS or TCP failure
    #[error("Connection problem: {0}")]
    Connectivity(String),

    /// The response body could not be deserialized
    #[error("Cannot deserialize response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Whether a credential refresh may fix this failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Whether the refresh credential is unusable
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::InvalidGrant(_))
    }
}

/// Failure reported by the messaging API when delivering a message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("channel_not_found")]
    ChannelNotFound,
    #[error("is_archived")]
    IsArchived,
    #[error("msg_too_long")]
    MsgTooLong,
    #[error("no_text")]
    NoText,
    #[error("rate_limited")]
    RateLimited,
    #[error("not_authed")]
    NotAuthed,
    #[error("invalid_auth")]
    InvalidAuth,
    #[error("token_revoked")]
    TokenRevoked,
    #[error("account_inactive")]
    AccountInactive,
    #[error("user_is_bot")]
    UserIsBot,
    /// Transport failure before a response was received
    #[error("cannot_connect: {0}")]
    CannotConnect(String),
    /// Response was received but could not be decoded
    #[error("cannot_deserialize: {0}")]
    CannotDeserialize(String),
    /// Error label not known to this client
    #[error("unknown_error: {0}")]
    Unknown(String),
}

impl DeliveryError {
    /// Map a messaging API error label to a delivery error
    pub fn from_code(code: &str) -> Self {
        match code {
            "channel_not_found" => Self::ChannelNotFound,
            "is_archived" => Self::IsArchived,
            "msg_too_long" => Self::MsgTooLong,
            "no_text" => Self::NoText,
            "rate_limited" => Self::RateLimited,
            "not_authed" => Self::NotAuthed,
            "invalid_auth" => Self::InvalidAuth,
            "token_revoked" => Self::TokenRevoked,
            "account_inactive" => Self::AccountInactive,
            "user_is_bot" => Self::UserIsBot,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the messaging credential can no longer be used
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::NotAuthed | Self::InvalidAuth | Self::TokenRevoked | Self::AccountInactive
        )
    }
}
