// # Memory Subscription Store
//
// In-memory implementation of SubscriptionStore.
//
// Nothing survives a restart. Useful for tests and for deployments where
// subscribers re-enroll after every start.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::model::Subscription;
use crate::traits::SubscriptionStore;

/// In-memory subscription store
///
/// Clones share the same contents, so a test can keep a handle and inspect
/// what the engine persisted.
#[derive(Debug, Clone, Default)]
pub struct MemorySubscriptionStore {
    inner: Arc<RwLock<HashMap<String, Subscription>>>,
    saves: Arc<AtomicUsize>,
}

impl MemorySubscriptionStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `subscriptions`
    pub fn with_subscriptions(subscriptions: HashMap<String, Subscription>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(subscriptions)),
            ..Self::default()
        }
    }

    /// Number of stored subscriptions
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn load(&self) -> Result<HashMap<String, Subscription>, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, subscriptions: &HashMap<String, Subscription>) -> Result<(), Error> {
        *self.inner.write().await = subscriptions.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
