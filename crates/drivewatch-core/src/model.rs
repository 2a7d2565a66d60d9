// # Data Model
//
// Types shared by every stage of the pipeline.
//
// ## Ownership
//
// - `Subscription` is persisted by the subscription store and only changes
//   through an explicit registration.
// - `RuntimeState` lives in memory, is owned by the engine, and is handed to a
//   worker task by value for the duration of one check.
// - `RawChange` is what a document store reports; `ChangeItem` is a raw change
//   after the change detector resolved its `ActionCategory`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Identity of the document-store account that owns a subscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    /// Owner email, the subscriber identity
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

/// Identity of the messaging account that receives notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingAccount {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub user_id: String,
    /// Messaging user name, also used as direct-message destination
    #[serde(default)]
    pub user: String,
}

/// A subscriber: what to watch and where to relay it
///
/// Field names on disk are kept stable across versions; `folders_of_interest`
/// was added later and defaults to empty for older store files.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Destination channel name
    pub channel: String,

    /// Messaging API credential
    /// ⚠️ NEVER log this value
    #[serde(rename = "slack_access_token")]
    pub messaging_token: String,

    /// Document-store refresh credential
    /// ⚠️ NEVER log this value
    #[serde(rename = "google_refresh_token")]
    pub refresh_token: String,

    #[serde(rename = "guser")]
    pub owner: OwnerInfo,

    #[serde(rename = "suser")]
    pub account: MessagingAccount,

    /// Folder ids of interest; empty means no filtering
    #[serde(rename = "google_interesting_folder_ids", default)]
    pub folders_of_interest: BTreeSet<String>,
}

impl Subscription {
    /// Subscriber identity (owner email)
    pub fn id(&self) -> &str {
        &self.owner.email
    }

    /// Short `owner/user` label used as a log prefix
    pub fn label(&self) -> String {
        format!("{}/{}", self.owner.email, self.account.user)
    }
}

// Custom Debug implementation that hides both credentials
impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("messaging_token", &"<REDACTED>")
            .field("refresh_token", &"<REDACTED>")
            .field("owner", &self.owner)
            .field("account", &self.account)
            .field("folders_of_interest", &self.folders_of_interest)
            .finish()
    }
}

/// A subscription delivered by the enrollment collaborator, together with
/// the access credential obtained during its authorization handshake
#[derive(Clone)]
pub struct Registration {
    pub subscription: Subscription,
    pub access_token: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("subscription", &self.subscription)
            .field("access_token", &"<REDACTED>")
            .finish()
    }
}

/// Deduplication key: (document title, last editor identity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub title: String,
    pub editor: String,
}

/// Mutable per-subscriber state, kept in memory only
#[derive(Clone, Default)]
pub struct RuntimeState {
    /// Change-feed cursor; `None` until the first successful bootstrap
    pub cursor: Option<u64>,

    /// Last time each (title, editor) pair was notified
    pub notified: HashMap<DedupKey, DateTime<Utc>>,

    /// Cached access credential (may be stale; refreshed on demand)
    /// ⚠️ NEVER log this value
    pub access_token: String,

    /// Start of the current failure streak; `None` while healthy
    pub failing_since: Option<DateTime<Utc>>,
}

impl RuntimeState {
    /// Fresh state seeded with the access credential obtained at enrollment
    pub fn with_access_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    /// Whether the most recent check succeeded
    pub fn is_healthy(&self) -> bool {
        self.failing_since.is_none()
    }
}

impl fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeState")
            .field("cursor", &self.cursor)
            .field("notified", &self.notified.len())
            .field("access_token", &"<REDACTED>")
            .field("failing_since", &self.failing_since)
            .finish()
    }
}

/// Action a change represents, derived from its timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionCategory {
    Deleted,
    Created,
    Modified,
    Shared,
    Viewed,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "Deleted",
            Self::Created => "Created",
            Self::Modified => "Modified",
            Self::Shared => "Shared",
            Self::Viewed => "Viewed",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last editor of a document as reported by the document store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Editor {
    pub email: String,
    pub display_name: String,
}

/// One raw entry of the remote change feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawChange {
    pub file_id: String,
    pub title: String,
    /// Browser link to the document
    pub link: String,
    pub mime_type: String,
    /// Removed from the feed entirely
    pub deleted: bool,
    /// Moved to trash by a user
    pub trashed: bool,
    pub last_editor: Editor,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub shared: Option<DateTime<Utc>>,
    pub parent_ids: Vec<String>,
}

/// A raw change with its resolved action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeItem {
    pub change: RawChange,
    pub action: ActionCategory,
}

impl ChangeItem {
    /// Kind of document, used in message text ("file" or "folder")
    pub fn kind(&self) -> &'static str {
        if self.change.mime_type == FOLDER_MIME_TYPE {
            "folder"
        } else {
            "file"
        }
    }
}

/// Mime type the document store uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// One page of the remote change feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    /// High-water mark of the feed at query time
    pub largest_change_id: u64,
    pub items: Vec<RawChange>,
}

/// Flat folder record as returned by the folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    pub parent_ids: Vec<String>,
}

impl FolderRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_ids: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_ids: parent_ids.iter().map(|p| p.to_string()).collect(),
        }
    }
}
