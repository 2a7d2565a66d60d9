// # Subscription Store Trait
//
// Defines the interface for durable subscription storage.
//
// ## Purpose
//
// The store keeps the subscriber set across restarts:
// - Subscription metadata and credentials, keyed by owner email
// - Nothing else: runtime state (cursor, dedup cache, health) is rebuilt in
//   memory after a restart
//
// ## Implementations
//
// - File-based: JSON file with whole-file replace and timestamped snapshots
// - In-memory: for tests and ephemeral deployments
//
// ## Usage
//
// ```rust,ignore
// use drivewatch_core::SubscriptionStore;
//
// let mut subscriptions = store.load().await?;
// subscriptions.insert(sub.id().to_string(), sub);
// store.save(&subscriptions).await?;
// ```

use async_trait::async_trait;
use std::collections::HashMap;

use crate::model::Subscription;

/// Trait for subscription store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Write recovery snapshots next to the primary copy
///
/// ## Forbidden Capabilities
/// - ❌ Decide which subscribers exist (owned by the engine)
/// - ❌ Spawn background tasks
///
/// ## Implementation Guidelines
///
/// - **Whole-state writes**: `save()` replaces the stored set entirely
/// - **Atomic**: a crash during `save()` must leave the previous or the new
///   content readable, never a torn file
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load every stored subscription
    ///
    /// # Returns
    ///
    /// - `Ok(HashMap)`: Subscriptions keyed by owner email (empty if nothing stored yet)
    /// - `Err(Error)`: Stored data exists but cannot be read
    async fn load(&self) -> Result<HashMap<String, Subscription>, crate::Error>;

    /// Replace the stored set with `subscriptions`
    async fn save(&self, subscriptions: &HashMap<String, Subscription>)
    -> Result<(), crate::Error>;

    /// Get the store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}
