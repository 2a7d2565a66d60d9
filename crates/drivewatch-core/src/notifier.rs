// # Notifier
//
// Builds one outbound message from a subscriber's surviving changes and
// delivers it with the subscriber's messaging credential.
//
// ## Delivery outcomes
//
// - Auth-style failures (`not_authed`, `invalid_auth`, `token_revoked`,
//   `account_inactive`) are fatal for the check.
// - `channel_not_found` is retried once as a direct message to the
//   subscriber, with a note explaining what went wrong. A failing fallback
//   is only logged.
// - Every other failure is logged and the check still succeeds.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{DeliveryError, Error, Result};
use crate::folders::FolderIndex;
use crate::model::{ActionCategory, ChangeItem, Editor, Subscription};
use crate::traits::{Attachment, Field, Message, Messenger};

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Settings for message construction
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Display name messages are posted under
    pub username: String,
    /// Icon url without cache key
    pub icon_url: String,
    /// Enrollment page linked from the channel-not-found note
    pub redirect_uri: String,
    /// Appended to the icon url as `?ck=<version>`
    pub version: String,
}

impl NotifierConfig {
    fn icon_url(&self) -> String {
        format!("{}?ck={}", self.icon_url, self.version)
    }
}

/// How a notification attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Nothing survived filtering; no message was sent
    Skipped,
    /// Delivered to the subscriber's channel
    Delivered { attachments: usize },
    /// Channel missing; delivered as a direct message instead
    DeliveredToOwner { attachments: usize },
    /// Delivery failed with a non-fatal error
    Undelivered(DeliveryError),
}

/// Resolved display of a document's last editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorDisplay {
    Known { email: String, name: String },
    NameOnly(String),
    Unknown,
}

impl EditorDisplay {
    pub fn resolve(editor: &Editor) -> Self {
        match (editor.email.is_empty(), editor.display_name.is_empty()) {
            (false, false) => Self::Known {
                email: editor.email.clone(),
                name: editor.display_name.clone(),
            },
            (_, false) => Self::NameOnly(editor.display_name.clone()),
            _ => Self::Unknown,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Known { email, name } => {
                format!("<mailto:{}|{}>", email, prevent_notification(name))
            }
            Self::NameOnly(name) => prevent_notification(name),
            Self::Unknown => "Unknown".to_string(),
        }
    }
}

pub struct Notifier {
    messenger: Arc<dyn Messenger>,
    config: NotifierConfig,
    timeout: Duration,
}

impl Notifier {
    pub fn new(messenger: Arc<dyn Messenger>, config: NotifierConfig, timeout: Duration) -> Self {
        Self {
            messenger,
            config,
            timeout,
        }
    }

    /// Keep changes whose parents are, or lie below, a folder of interest
    ///
    /// An empty interest set keeps everything. Without an index only direct
    /// children of a folder of interest survive.
    pub fn filter(
        items: Vec<ChangeItem>,
        folders_of_interest: &BTreeSet<String>,
        index: Option<&FolderIndex>,
    ) -> Vec<ChangeItem> {
        if folders_of_interest.is_empty() {
            return items;
        }
        let empty = FolderIndex::default();
        let index = index.unwrap_or(&empty);
        items
            .into_iter()
            .filter(|item| {
                index.any_is_or_is_contained_in(&item.change.parent_ids, folders_of_interest)
            })
            .collect()
    }

    pub fn build_message(&self, subscription: &Subscription, items: &[ChangeItem]) -> Message {
        Message {
            channel: subscription.channel.clone(),
            username: self.config.username.clone(),
            text: format!(
                "Activity on gdrive (configured by @{})",
                prevent_notification(&subscription.account.user)
            ),
            icon_url: self.config.icon_url(),
            attachments: items.iter().map(build_attachment).collect(),
        }
    }

    /// Same content redirected to the subscriber, prefixed with an explanation
    pub fn build_owner_message(&self, subscription: &Subscription, source: &Message) -> Message {
        let account = &subscription.account;
        Message {
            channel: format!("@{}", account.user),
            username: self.config.username.clone(),
            text: format!(
                "Hey <@{}|{}>, something is wrong: we can't find the slack channel {}: \
                 you should either create or <{}|change it>. Here is what happened in the meantime:",
                account.user, account.user_id, source.channel, self.config.redirect_uri
            ),
            icon_url: source.icon_url.clone(),
            attachments: source.attachments.clone(),
        }
    }

    /// Filter, build and deliver
    pub async fn notify(
        &self,
        subscription: &Subscription,
        items: Vec<ChangeItem>,
        index: Option<&FolderIndex>,
    ) -> Result<NotifyOutcome> {
        let label = subscription.label();
        let items = Self::filter(items, &subscription.folders_of_interest, index);
        if items.is_empty() {
            debug!("[{}] Nothing to notify", label);
            return Ok(NotifyOutcome::Skipped);
        }

        let message = self.build_message(subscription, &items);
        let attachments = message.attachments.len();

        match self.post(subscription, &message).await {
            Ok(()) => {
                info!("[{}] Notified {} change(s) to {}", label, attachments, message.channel);
                Ok(NotifyOutcome::Delivered { attachments })
            }
            Err(e) if e.is_auth_failure() => Err(Error::unrecoverable(format!(
                "{} rejected the messaging credential: {}",
                self.messenger.messenger_name(),
                e
            ))),
            Err(DeliveryError::ChannelNotFound) => {
                warn!(
                    "[{}] Channel {} not found, notifying @{} directly",
                    label, message.channel, subscription.account.user
                );
                let fallback = self.build_owner_message(subscription, &message);
                match self.post(subscription, &fallback).await {
                    Ok(()) => Ok(NotifyOutcome::DeliveredToOwner { attachments }),
                    Err(e) => {
                        warn!("[{}] Direct message failed: {}", label, e);
                        Ok(NotifyOutcome::Undelivered(e))
                    }
                }
            }
            Err(e) => {
                warn!("[{}] Delivery to {} failed: {}", label, message.channel, e);
                Ok(NotifyOutcome::Undelivered(e))
            }
        }
    }

    async fn post(
        &self,
        subscription: &Subscription,
        message: &Message,
    ) -> std::result::Result<(), DeliveryError> {
        let delivery = self
            .messenger
            .post_message(&subscription.messaging_token, message);
        match tokio::time::timeout(self.timeout, delivery).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::CannotConnect(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

fn build_attachment(item: &ChangeItem) -> Attachment {
    let raw = &item.change;
    let link = format!("<{}|{}>", raw.link, raw.title);
    Attachment {
        fallback: format!("Changes Detected to {} {}", item.kind(), link),
        color: action_color(item.action).to_string(),
        fields: vec![
            Field {
                title: format!("{} {}", item.action, item.kind()),
                value: link,
                short: true,
            },
            Field {
                title: "Editor".to_string(),
                value: EditorDisplay::resolve(&raw.last_editor).render(),
                short: true,
            },
        ],
    }
}

fn action_color(action: ActionCategory) -> &'static str {
    match action {
        ActionCategory::Deleted => "#ffcccc",
        ActionCategory::Created => "#ccffcc",
        ActionCategory::Modified | ActionCategory::Shared | ActionCategory::Viewed => "#ccccff",
    }
}

/// Insert a zero-width space after the first character of every
/// space-separated word of two or more characters, so that names do not
/// trigger mention notifications
pub fn prevent_notification(source: &str) -> String {
    source
        .split(' ')
        .map(infix_zero_width_space)
        .collect::<Vec<_>>()
        .join(" ")
}

fn infix_zero_width_space(word: &str) -> String {
    let mut chars = word.chars();
    match (chars.next(), chars.clone().next()) {
        (Some(first), Some(_)) => {
            let mut out = String::with_capacity(word.len() + ZERO_WIDTH_SPACE.len_utf8());
            out.push(first);
            out.push(ZERO_WIDTH_SPACE);
            out.push_str(chars.as_str());
            out
        }
        _ => word.to_string(),
    }
}
