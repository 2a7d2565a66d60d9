// # Subscriber Registry
//
// The engine-owned map of subscribers and their runtime state, backed by a
// SubscriptionStore. Only subscriptions are persisted; runtime state starts
// fresh after a restart (unset cursor, empty dedup cache, no cached access
// credential, healthy).

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{Registration, RuntimeState, Subscription};
use crate::traits::SubscriptionStore;

/// What an upsert did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
}

/// Everything a single check needs, owned by the task running it
#[derive(Debug, Clone)]
pub struct CheckJob {
    pub subscription: Subscription,
    pub state: RuntimeState,
}

pub struct SubscriberRegistry {
    subscriptions: HashMap<String, Subscription>,
    states: HashMap<String, RuntimeState>,
    store: Box<dyn SubscriptionStore>,
}

impl SubscriberRegistry {
    /// Load every stored subscription
    ///
    /// # Errors
    ///
    /// Fails when the store holds data that cannot be read.
    pub async fn open(store: Box<dyn SubscriptionStore>) -> Result<Self> {
        let subscriptions = store.load().await?;
        let states = subscriptions
            .keys()
            .map(|id| (id.clone(), RuntimeState::default()))
            .collect();
        Ok(Self {
            subscriptions,
            states,
            store,
        })
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn state(&self, id: &str) -> Option<&RuntimeState> {
        self.states.get(id)
    }

    /// Insert or replace a subscriber, resetting its runtime state
    pub fn upsert(&mut self, registration: Registration) -> Upsert {
        let Registration {
            subscription,
            access_token,
        } = registration;
        let id = subscription.id().to_string();
        self.states
            .insert(id.clone(), RuntimeState::with_access_token(access_token));
        match self.subscriptions.insert(id, subscription) {
            Some(_) => Upsert::Updated,
            None => Upsert::Added,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.states.remove(id);
        self.subscriptions.remove(id)
    }

    /// One job per subscriber, carrying a copy of its current state
    pub fn jobs(&self) -> Vec<CheckJob> {
        self.subscriptions
            .iter()
            .map(|(id, subscription)| CheckJob {
                subscription: subscription.clone(),
                state: self.states.get(id).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Replace a subscriber's state with the one returned by its check
    ///
    /// Ignored when the subscriber is no longer registered.
    pub fn restore_state(&mut self, id: &str, state: RuntimeState) -> bool {
        if !self.subscriptions.contains_key(id) {
            return false;
        }
        self.states.insert(id.to_string(), state);
        true
    }

    pub fn state_mut(&mut self, id: &str) -> Option<&mut RuntimeState> {
        self.states.get_mut(id)
    }

    /// Write the whole subscriber set to the store
    pub async fn persist(&self) -> Result<()> {
        self.store.save(&self.subscriptions).await
    }

    pub fn store_name(&self) -> &'static str {
        self.store.store_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OwnerInfo;
    use crate::state::MemorySubscriptionStore;

    fn registration(email: &str, channel: &str, token: &str) -> Registration {
        Registration {
            subscription: Subscription {
                channel: channel.to_string(),
                messaging_token: "xoxp".to_string(),
                refresh_token: "refresh".to_string(),
                owner: OwnerInfo {
                    email: email.to_string(),
                    ..OwnerInfo::default()
                },
                account: Default::default(),
                folders_of_interest: Default::default(),
            },
            access_token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_loads_subscriptions_with_fresh_state() {
        let mut stored = HashMap::new();
        let reg = registration("a@example.com", "#a", "ignored");
        stored.insert("a@example.com".to_string(), reg.subscription);

        let registry = SubscriberRegistry::open(Box::new(
            MemorySubscriptionStore::with_subscriptions(stored),
        ))
        .await
        .unwrap();

        assert_eq!(registry.len(), 1);
        let state = registry.state("a@example.com").unwrap();
        assert_eq!(state.cursor, None);
        assert!(state.access_token.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_add_then_update() {
        let store = MemorySubscriptionStore::new();
        let mut registry = SubscriberRegistry::open(Box::new(store.clone())).await.unwrap();

        assert_eq!(
            registry.upsert(registration("a@example.com", "#a", "t1")),
            Upsert::Added
        );
        registry.state_mut("a@example.com").unwrap().cursor = Some(9);

        assert_eq!(
            registry.upsert(registration("a@example.com", "#b", "t2")),
            Upsert::Updated
        );
        assert_eq!(registry.get("a@example.com").unwrap().channel, "#b");
        let state = registry.state("a@example.com").unwrap();
        assert_eq!(state.cursor, None);
        assert_eq!(state.access_token, "t2");

        registry.persist().await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_restore_state_ignores_removed_subscriber() {
        let mut registry = SubscriberRegistry::open(Box::new(MemorySubscriptionStore::new()))
            .await
            .unwrap();
        registry.upsert(registration("a@example.com", "#a", "t"));

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state.access_token, "t");

        assert!(registry.remove("a@example.com").is_some());
        assert!(!registry.restore_state("a@example.com", RuntimeState::default()));
        assert!(registry.state("a@example.com").is_none());
    }
}
