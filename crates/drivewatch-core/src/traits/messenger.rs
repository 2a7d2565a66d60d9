// # Messenger Trait
//
// Defines the interface for delivering notification messages.
//
// ## Implementations
//
// - Slack: `drivewatch-slack` crate

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DeliveryError;

/// One labelled value inside an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// A colored block of fields describing one change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Plain-text summary for clients that cannot render fields
    pub fallback: String,
    pub color: String,
    pub fields: Vec<Field>,
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination: a channel name, or `@user` for a direct message
    pub channel: String,
    /// Display name the message is posted under
    pub username: String,
    pub text: String,
    pub icon_url: String,
    pub attachments: Vec<Attachment>,
}

/// Trait for messaging API implementations
///
/// # Trust Level: Untrusted
///
/// Messengers post exactly one message per call and report the API's
/// machine-readable outcome. They never retry and never choose a fallback
/// destination; the notifier decides what to do with each [`DeliveryError`].
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post a message with the subscriber's own messaging credential
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The API acknowledged the message
    /// - `Err(DeliveryError)`: Error label reported by the API, or a transport failure
    async fn post_message(&self, access_token: &str, message: &Message) -> Result<(), DeliveryError>;

    /// Get the messenger name (for logging/debugging)
    fn messenger_name(&self) -> &'static str;
}
