//! One subscriber check
//!
//! A check runs on a worker task with an owned copy of the subscriber's
//! state and hands the updated state back inside its [`CheckReport`]:
//!
//! 1. Query the change feed through the credential manager
//! 2. Classify and deduplicate with the change detector
//! 3. List folders, only when there are changes and the subscriber has
//!    folders of interest
//! 4. Filter, build and deliver through the notifier

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::credentials::CredentialManager;
use crate::detector::ChangeDetector;
use crate::error::Result;
use crate::folders::FolderIndex;
use crate::model::{RuntimeState, Subscription};
use crate::notifier::{NotifyOutcome, Notifier};
use crate::subscriptions::CheckJob;
use crate::traits::DocumentStore;

/// How a check ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Success {
        /// Changes left after classification and deduplication
        changes: usize,
        notify: NotifyOutcome,
    },
    Failed {
        reason: String,
        /// Credentials are unusable; retrying next cycle will not help
        fatal: bool,
    },
}

impl CheckOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Result value a worker returns to the engine
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub id: String,
    pub label: String,
    /// Updated state; `None` when the check died before producing one, in
    /// which case the engine keeps the state it dispatched
    pub state: Option<RuntimeState>,
    pub outcome: CheckOutcome,
}

impl CheckReport {
    /// Report for a check whose task never returned
    pub fn lost(id: String, label: String, reason: impl Into<String>) -> Self {
        Self {
            id,
            label,
            state: None,
            outcome: CheckOutcome::Failed {
                reason: reason.into(),
                fatal: false,
            },
        }
    }
}

pub struct SubscriberCheck {
    documents: Arc<dyn DocumentStore>,
    credentials: CredentialManager,
    detector: ChangeDetector,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl SubscriberCheck {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        credentials: CredentialManager,
        detector: ChangeDetector,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            credentials,
            detector,
            notifier,
            clock,
        }
    }

    /// Run one check; never fails, failures are carried in the report
    pub async fn run(&self, job: CheckJob) -> CheckReport {
        let CheckJob {
            subscription,
            mut state,
        } = job;
        let label = subscription.label();

        let outcome = match self.check(&subscription, &mut state).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("[{}] Check failed: {}", label, e);
                CheckOutcome::Failed {
                    reason: e.to_string(),
                    fatal: e.is_fatal(),
                }
            }
        };

        CheckReport {
            id: subscription.id().to_string(),
            label,
            state: Some(state),
            outcome,
        }
    }

    async fn check(
        &self,
        subscription: &Subscription,
        state: &mut RuntimeState,
    ) -> Result<CheckOutcome> {
        let now = self.clock.now();
        let cursor = state.cursor;

        let documents = Arc::clone(&self.documents);
        let page = self
            .credentials
            .acquire_and_call(&mut state.access_token, &subscription.refresh_token, |token| {
                let documents = Arc::clone(&documents);
                async move { documents.query_changes(&token, cursor).await }
            })
            .await?;

        let bootstrapping = cursor.is_none();
        let items = self.detector.process(state, page, now);
        if bootstrapping {
            debug!(
                "[{}] Change feed cursor initialized at {:?}",
                subscription.label(),
                state.cursor
            );
        }
        if items.is_empty() {
            return Ok(CheckOutcome::Success {
                changes: 0,
                notify: NotifyOutcome::Skipped,
            });
        }

        let index = if subscription.folders_of_interest.is_empty() {
            None
        } else {
            let records = self
                .credentials
                .acquire_and_call(&mut state.access_token, &subscription.refresh_token, |token| {
                    let documents = Arc::clone(&documents);
                    async move { documents.list_folders(&token).await }
                })
                .await?;
            Some(FolderIndex::from_records(records))
        };

        let changes = items.len();
        let notify = self.notifier.notify(subscription, items, index.as_ref()).await?;
        Ok(CheckOutcome::Success { changes, notify })
    }
}
