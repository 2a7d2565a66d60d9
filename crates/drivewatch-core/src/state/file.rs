// # File Subscription Store
//
// File-based implementation of SubscriptionStore.
//
// ## Durability
//
// - Atomic writes: the new content goes to a temporary file which is then
//   renamed over the primary file
// - Snapshots: every save also writes `<path>.<YYYY-MM-DDTHH-MM-SS>` with the
//   same content, so any earlier subscriber set can be restored by hand
// - A missing file loads as an empty set; an unreadable one is an error
//
// ## File Format
//
// A JSON object keyed by owner email:
//
// ```json
// {
//   "ada@example.com": {
//     "channel": "#drive",
//     "slack_access_token": "...",
//     "google_refresh_token": "...",
//     "guser": { "email": "ada@example.com", "given_name": "Ada", "family_name": "Lovelace" },
//     "suser": { "url": "...", "team_id": "T1", "team": "acme", "user_id": "U1", "user": "ada" },
//     "google_interesting_folder_ids": []
//   }
// }
// ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::model::Subscription;
use crate::traits::SubscriptionStore;

/// Timestamp format appended to snapshot file names
const SNAPSHOT_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// File-based subscription store
///
/// # Example
///
/// ```rust,no_run
/// use drivewatch_core::state::FileSubscriptionStore;
/// use drivewatch_core::traits::SubscriptionStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileSubscriptionStore::new("/var/lib/drivewatch/subscriptions.json").await?;
///
///     let mut subscriptions = store.load().await?;
///     subscriptions.clear();
///     store.save(&subscriptions).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileSubscriptionStore {
    path: PathBuf,
}

impl FileSubscriptionStore {
    /// Create a file store, creating parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Path of the snapshot written at `stamp`
    pub fn snapshot_path(&self, stamp: &str) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".");
        name.push(stamp);
        PathBuf::from(name)
    }

    async fn write_file(path: &Path, content: &[u8]) -> Result<(), Error> {
        let mut file = fs::File::create(path).await.map_err(|e| {
            Error::store(format!("Failed to create {}: {}", path.display(), e))
        })?;
        file.write_all(content).await.map_err(|e| {
            Error::store(format!("Failed to write {}: {}", path.display(), e))
        })?;
        file.flush().await.map_err(|e| {
            Error::store(format!("Failed to flush {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for FileSubscriptionStore {
    async fn load(&self) -> Result<HashMap<String, Subscription>, Error> {
        if !self.path.exists() {
            tracing::debug!("Subscription file does not exist: {}", self.path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to read subscription file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let subscriptions: HashMap<String, Subscription> = serde_json::from_str(&content)
            .map_err(|e| {
                Error::store(format!(
                    "Failed to parse subscription file {}: {}. \
                    Restore it from one of its timestamped snapshots.",
                    self.path.display(),
                    e
                ))
            })?;

        tracing::debug!("Loaded {} subscription(s)", subscriptions.len());
        Ok(subscriptions)
    }

    async fn save(&self, subscriptions: &HashMap<String, Subscription>) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(subscriptions)
            .map_err(|e| Error::store(format!("Failed to serialize subscriptions: {}", e)))?;

        let temp_path = self.temp_path();
        Self::write_file(&temp_path, json.as_bytes()).await?;

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        let snapshot = self.snapshot_path(&Utc::now().format(SNAPSHOT_FORMAT).to_string());
        if let Err(e) = Self::write_file(&snapshot, json.as_bytes()).await {
            tracing::warn!("Failed to write snapshot {}: {}", snapshot.display(), e);
        }

        tracing::trace!(
            "Saved {} subscription(s) to {}",
            subscriptions.len(),
            self.path.display()
        );
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "file"
    }
}
