// # Mailchimp Enrollment Hook
//
// Adds newly enrolled subscribers to a Mailchimp list and unsubscribes
// removed ones, through the Mailchimp 2.0 API.
//
// ## Trust Level: Untrusted (Enrollment Hook)
//
// - ✅ Perform HTTPS calls to the configured data center only
// - ✅ Report failures; the engine logs them and moves on
// - ❌ Block or fail the pipeline
// - ❌ Retry failed calls
//
// ## Security Requirements
//
// - The API key is sent in the request body and NEVER logged
//
// ## API Reference
//
// - `POST https://<dc>.api.mailchimp.com/2.0/lists/subscribe`
// - `POST https://<dc>.api.mailchimp.com/2.0/lists/unsubscribe`

use async_trait::async_trait;
use drivewatch_core::config::MailchimpConfig;
use drivewatch_core::model::Subscription;
use drivewatch_core::traits::EnrollmentHook;
use drivewatch_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default HTTP timeout for API requests (15 seconds)
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Mailing list enrollment hook
pub struct MailchimpHook {
    client: reqwest::Client,
    config: MailchimpConfig,

    /// API base, e.g. `https://us4.api.mailchimp.com/2.0`
    endpoint: String,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for MailchimpHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailchimpHook")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl MailchimpHook {
    /// Create a hook for the configured list
    ///
    /// A hook built from an incomplete configuration is valid and does
    /// nothing.
    pub fn new(config: &MailchimpConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("https://{}.api.mailchimp.com/2.0", config.data_center),
            config: config.clone(),
        })
    }

    /// Override the API base (used against a local server in tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, payload: &T) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/lists/{}", self.endpoint, method))
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Other(format!("mailchimp {}: {}", method, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Other(match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => format!("mailchimp {}: {}: {}", method, err.name, err.error),
            Err(_) => format!("mailchimp {}: HTTP {}", method, status),
        }))
    }
}

#[async_trait]
impl EnrollmentHook for MailchimpHook {
    async fn on_enroll(&self, subscription: &Subscription) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }
        self.call("subscribe", &subscribe_request(&self.config, subscription))
            .await?;
        tracing::info!(
            "[{}] added to mailing list {}",
            subscription.label(),
            self.config.list_id
        );
        Ok(())
    }

    async fn on_remove(&self, subscription: &Subscription) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }
        self.call("unsubscribe", &unsubscribe_request(&self.config, subscription))
            .await?;
        tracing::info!(
            "[{}] removed from mailing list {}",
            subscription.label(),
            self.config.list_id
        );
        Ok(())
    }

    fn hook_name(&self) -> &'static str {
        "mailchimp"
    }
}

#[derive(Debug, Serialize)]
struct EmailRef<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Grouping<'a> {
    name: &'a str,
    groups: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct MergeVars<'a> {
    #[serde(rename = "FNAME")]
    first_name: &'a str,
    #[serde(rename = "LNAME")]
    last_name: &'a str,
    groupings: Vec<Grouping<'a>>,
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    apikey: &'a str,
    id: &'a str,
    email: EmailRef<'a>,
    merge_vars: MergeVars<'a>,
    send_welcome: bool,
    double_optin: bool,
    update_existing: bool,
}

#[derive(Serialize)]
struct UnsubscribeRequest<'a> {
    apikey: &'a str,
    id: &'a str,
    email: EmailRef<'a>,
    send_goodbye: bool,
    delete_member: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    error: String,
}

fn subscribe_request<'a>(
    config: &'a MailchimpConfig,
    subscription: &'a Subscription,
) -> SubscribeRequest<'a> {
    let groupings = match (config.group_title.as_deref(), config.group_name.as_deref()) {
        (Some(title), Some(name)) if !title.is_empty() && !name.is_empty() => vec![Grouping {
            name: title,
            groups: vec![name],
        }],
        _ => Vec::new(),
    };

    SubscribeRequest {
        apikey: &config.api_key,
        id: &config.list_id,
        email: EmailRef {
            email: &subscription.owner.email,
        },
        merge_vars: MergeVars {
            first_name: &subscription.owner.given_name,
            last_name: &subscription.owner.family_name,
            groupings,
        },
        send_welcome: false,
        double_optin: false,
        update_existing: true,
    }
}

fn unsubscribe_request<'a>(
    config: &'a MailchimpConfig,
    subscription: &'a Subscription,
) -> UnsubscribeRequest<'a> {
    UnsubscribeRequest {
        apikey: &config.api_key,
        id: &config.list_id,
        email: EmailRef {
            email: &subscription.owner.email,
        },
        send_goodbye: false,
        delete_member: false,
    }
}
