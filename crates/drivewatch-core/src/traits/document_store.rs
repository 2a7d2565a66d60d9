// # Document Store Traits
//
// Defines the interface to the remote document store being watched and to
// its credential refresh endpoint.
//
// ## Implementations
//
// - Google Drive: `drivewatch-gdrive` crate
//
// ## Usage
//
// ```rust,ignore
// use drivewatch_core::traits::DocumentStore;
//
// let page = store.query_changes(&access_token, Some(cursor)).await?;
// for raw in page.items {
//     // classified by the change detector
// }
// ```

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::model::{ChangePage, FolderRecord};

/// Trait for remote document stores
///
/// Every method takes the bearer credential explicitly and reports failures
/// as a categorized [`RemoteError`].
///
/// # Trust Level: Untrusted
///
/// Document stores are **untrusted** components with strict limitations:
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Follow pagination within a single query
/// - ✅ Parse provider-specific responses into core types
///
/// ## Forbidden Capabilities
/// - ❌ Refresh credentials on their own (owned by the credential manager)
/// - ❌ Retry failed calls (the next cycle is the retry)
/// - ❌ Keep per-subscriber state between calls (owned by the engine)
/// - ❌ Classify or deduplicate changes (owned by the change detector)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Query the change feed
    ///
    /// # Parameters
    ///
    /// - `access_token`: Bearer credential
    /// - `after`: Cursor; `None` asks only for the current high-water mark
    ///
    /// # Returns
    ///
    /// - `Ok(ChangePage)`: High-water mark plus every change strictly after `after`
    /// - `Err(RemoteError)`: Categorized failure
    async fn query_changes(
        &self,
        access_token: &str,
        after: Option<u64>,
    ) -> Result<ChangePage, RemoteError>;

    /// List every folder visible to the credential
    async fn list_folders(&self, access_token: &str) -> Result<Vec<FolderRecord>, RemoteError>;

    /// Get the store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}

/// Trait for exchanging a refresh credential for a new access credential
///
/// # Errors
///
/// - `RemoteError::InvalidGrant` or `RemoteError::Unauthorized` when the
///   refresh credential is no longer usable; callers treat this as fatal.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, RemoteError>;
}
