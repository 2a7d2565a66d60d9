// # Change Detector
//
// Turns one page of the remote change feed into the list of changes worth
// notifying, and advances the subscriber's cursor and dedup cache.
//
// ## Modes
//
// - **Bootstrap** (`cursor == None`): the page only carries the current
//   high-water mark. It becomes the cursor and nothing is emitted.
// - **Incremental**: every raw change is classified, noise is dropped, and
//   repeats of the same (title, editor) pair inside the dedup window are
//   suppressed unless the document was deleted.

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::model::{ActionCategory, ChangeItem, ChangePage, DedupKey, RawChange, RuntimeState};

/// Title prefix of office lock and temporary files
const TEMPORARY_FILE_PREFIX: &str = "~$";

/// Stateless classifier and deduplicator; the state it advances is passed in
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    recency_threshold: Duration,
    dedup_window: Duration,
}

impl ChangeDetector {
    pub fn new(recency_threshold: Duration, dedup_window: Duration) -> Self {
        Self {
            recency_threshold,
            dedup_window,
        }
    }

    /// Apply a feed page to `state` and return the surviving changes
    ///
    /// `now` is the reference time of the query.
    pub fn process(
        &self,
        state: &mut RuntimeState,
        page: ChangePage,
        now: DateTime<Utc>,
    ) -> Vec<ChangeItem> {
        let Some(cursor) = state.cursor else {
            state.cursor = Some(page.largest_change_id);
            return Vec::new();
        };

        state.cursor = Some(cursor.max(page.largest_change_id));

        let mut emitted = Vec::new();
        for raw in page.items {
            let action = self.classify(&raw, now);
            if is_noise(&raw, action) {
                trace!("Skipping '{}' ({})", raw.title, action);
                continue;
            }

            let key = DedupKey {
                title: raw.title.clone(),
                editor: raw.last_editor.email.clone(),
            };
            if action != ActionCategory::Deleted {
                if let Some(&notified_at) = state.notified.get(&key) {
                    if now - notified_at < self.dedup_window {
                        trace!("Suppressing repeated '{}' ({})", raw.title, action);
                        continue;
                    }
                }
            }
            state.notified.insert(key, now);
            emitted.push(ChangeItem { change: raw, action });
        }

        self.purge(state, now);
        emitted
    }

    /// Resolve the action a raw change represents
    ///
    /// A missing timestamp compares lower than any present one, so it never
    /// satisfies the recency threshold.
    pub fn classify(&self, raw: &RawChange, now: DateTime<Utc>) -> ActionCategory {
        if raw.deleted || raw.trashed {
            return ActionCategory::Deleted;
        }

        let threshold = Some(now - self.recency_threshold);
        if raw.created >= raw.modified && raw.created >= raw.shared && raw.created >= threshold {
            ActionCategory::Created
        } else if raw.modified >= raw.shared && raw.modified >= threshold {
            ActionCategory::Modified
        } else if raw.shared.is_some() && raw.shared >= threshold {
            ActionCategory::Shared
        } else {
            ActionCategory::Viewed
        }
    }

    /// Drop dedup entries older than the window
    pub fn purge(&self, state: &mut RuntimeState, now: DateTime<Utc>) {
        let horizon = now - self.dedup_window;
        state.notified.retain(|_, at| *at >= horizon);
    }
}

fn is_noise(raw: &RawChange, action: ActionCategory) -> bool {
    action == ActionCategory::Viewed
        || raw.title.is_empty()
        || raw.title.starts_with(TEMPORARY_FILE_PREFIX)
}
