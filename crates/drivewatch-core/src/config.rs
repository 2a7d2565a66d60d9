//! Configuration types for the drivewatch pipeline
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main drivewatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Google OAuth client and Drive API settings
    pub google: GoogleOauthConfig,

    /// Messaging API settings
    #[serde(default)]
    pub slack: SlackConfig,

    /// Mailing list settings (enrollment hook disabled when absent)
    #[serde(default)]
    pub mailchimp: Option<MailchimpConfig>,

    /// Subscription store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl WatchConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.google.validate()?;
        self.engine.validate()?;

        if let Some(mailchimp) = &self.mailchimp {
            mailchimp.validate()?;
        }

        if let StoreConfig::File { path } = &self.store {
            if path.is_empty() {
                return Err(crate::Error::config("Subscription store path cannot be empty"));
            }
        }

        Ok(())
    }
}

/// Google OAuth client configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct GoogleOauthConfig {
    pub client_id: String,

    /// ⚠️ NEVER log this value
    pub client_secret: String,

    /// Token endpoint used for the refresh-token grant
    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    /// Public URL of the enrollment page, linked from fallback messages
    #[serde(default)]
    pub redirect_uri: String,

    /// Drive API base URL
    #[serde(default = "default_drive_api_base")]
    pub api_base: String,
}

impl GoogleOauthConfig {
    /// Validate the OAuth configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.client_id.is_empty() {
            return Err(crate::Error::config("Google client id cannot be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(crate::Error::config("Google client secret cannot be empty"));
        }
        if !self.token_uri.starts_with("https://") && !self.token_uri.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "Google token uri must be an HTTP(S) URL. Got: {}",
                self.token_uri
            )));
        }
        Ok(())
    }
}

impl Default for GoogleOauthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_uri: default_token_uri(),
            redirect_uri: String::new(),
            api_base: default_drive_api_base(),
        }
    }
}

// Custom Debug implementation that hides the client secret
impl fmt::Debug for GoogleOauthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleOauthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("token_uri", &self.token_uri)
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Messaging API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Web API base URL
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,

    /// Name messages are posted under
    #[serde(default = "default_bot_username")]
    pub username: String,

    /// Icon shown next to messages
    #[serde(default = "default_icon_url")]
    pub icon_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_slack_api_base(),
            username: default_bot_username(),
            icon_url: default_icon_url(),
        }
    }
}

/// Mailing list configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct MailchimpConfig {
    /// ⚠️ NEVER log this value
    pub api_key: String,
    /// Data center prefix, e.g. "us4"
    pub data_center: String,
    pub list_id: String,
    #[serde(default)]
    pub group_title: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl MailchimpConfig {
    /// Whether enough is configured to call the API
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.data_center.is_empty() && !self.list_id.is_empty()
    }

    /// Validate the mailing list configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self
            .data_center
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(crate::Error::config(format!(
                "Mailchimp data center must be alphanumeric. Got: '{}'",
                self.data_center
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for MailchimpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailchimpConfig")
            .field("api_key", &"<REDACTED>")
            .field("data_center", &self.data_center)
            .field("list_id", &self.list_id)
            .field("group_title", &self.group_title)
            .field("group_name", &self.group_name)
            .finish()
    }
}

/// Subscription store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-based subscription store
    File {
        /// Path to the subscriptions file
        path: String,
    },

    /// In-memory store (not persistent)
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: "subscriptions.json".to_string(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target time between the starts of two polling cycles (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Lower bound on the wait between cycles (in milliseconds)
    ///
    /// A cycle that overruns the poll interval is followed by this pause
    /// instead of an immediate restart.
    #[serde(default = "default_min_wait_millis")]
    pub min_wait_millis: u64,

    /// Number of concurrent subscriber checks
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Window during which a repeated (title, editor) notification is suppressed (in seconds)
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Look-back used when classifying a change as created/modified/shared (in seconds)
    #[serde(default = "default_recency_threshold_secs")]
    pub recency_threshold_secs: u64,

    /// Continuous failure duration after which a subscriber is removed (in seconds)
    #[serde(default = "default_failure_threshold_secs")]
    pub failure_threshold_secs: u64,

    /// Timeout applied to every outbound call (in seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Capacity of the registration and discard channels
    #[serde(default = "default_inbound_channel_capacity")]
    pub inbound_channel_capacity: usize,

    /// Version string appended to the message icon url as a cache key
    #[serde(default)]
    pub version: String,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.workers == 0 {
            return Err(crate::Error::config("Worker count must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 || self.inbound_channel_capacity == 0 {
            return Err(crate::Error::config("Channel capacities must be > 0"));
        }
        if self.failure_threshold_secs == 0 {
            return Err(crate::Error::config("Failure threshold must be > 0"));
        }
        for (name, secs) in [
            ("Dedup window", self.dedup_window_secs),
            ("Recency threshold", self.recency_threshold_secs),
            ("Failure threshold", self.failure_threshold_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(crate::Error::config(format!(
                    "{} must be at most {} seconds. Got: {}",
                    name, MAX_WINDOW_SECS, secs
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn min_wait(&self) -> Duration {
        Duration::from_millis(self.min_wait_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        window(self.dedup_window_secs)
    }

    pub fn recency_threshold(&self) -> chrono::Duration {
        window(self.recency_threshold_secs)
    }

    pub fn failure_threshold(&self) -> chrono::Duration {
        window(self.failure_threshold_secs)
    }
}

/// Upper bound for the dedup window and the recency and failure thresholds (ten years)
///
/// Timestamps are shifted by these windows, so they must stay well inside
/// the range `DateTime<Utc>` can represent.
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Convert a window in seconds, clamped to `MAX_WINDOW_SECS`
fn window(secs: u64) -> chrono::Duration {
    i64::try_from(secs.min(MAX_WINDOW_SECS))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            min_wait_millis: default_min_wait_millis(),
            workers: default_workers(),
            dedup_window_secs: default_dedup_window_secs(),
            recency_threshold_secs: default_recency_threshold_secs(),
            failure_threshold_secs: default_failure_threshold_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            inbound_channel_capacity: default_inbound_channel_capacity(),
            version: String::new(),
        }
    }
}

fn default_token_uri() -> String {
    "https://accounts.google.com/o/oauth2/token".to_string()
}

fn default_drive_api_base() -> String {
    "https://www.googleapis.com/drive/v2".to_string()
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_bot_username() -> String {
    "Google Drive".to_string()
}

fn default_icon_url() -> String {
    "http://gdrive2slack.optionfactory.net/gdrive2slack.png".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_min_wait_millis() -> u64 {
    1000
}

fn default_workers() -> usize {
    16
}

fn default_dedup_window_secs() -> u64 {
    60 * 60
}

fn default_recency_threshold_secs() -> u64 {
    10 * 60
}

fn default_failure_threshold_secs() -> u64 {
    24 * 60 * 60
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_inbound_channel_capacity() -> usize {
    50
}
