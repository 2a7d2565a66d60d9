//! Test doubles and common utilities for engine contract tests
//!
//! Every double is shared through an `Arc`, so a test keeps its own handle
//! and inspects what the engine did after the fact.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use drivewatch_core::config::{GoogleOauthConfig, StoreConfig, WatchConfig};
use drivewatch_core::engine::EngineEvent;
use drivewatch_core::error::{DeliveryError, RemoteError, Result};
use drivewatch_core::model::{
    ChangePage, Editor, FolderRecord, MessagingAccount, OwnerInfo, RawChange, Registration,
    Subscription,
};
use drivewatch_core::traits::{DocumentStore, EnrollmentHook, Message, Messenger, TokenRefresher};
use drivewatch_core::Clock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Document store replaying scripted change pages
///
/// When the script runs out, every query returns an empty page at the last
/// high-water mark.
pub struct ScriptedDocumentStore {
    pages: Mutex<VecDeque<std::result::Result<ChangePage, RemoteError>>>,
    folders: Mutex<Vec<FolderRecord>>,
    high_water: Mutex<u64>,
    /// Tokens rejected with `Unauthorized`
    rejected_tokens: Mutex<Vec<String>>,
    panic_on_query: Mutex<bool>,
    query_calls: AtomicUsize,
    list_calls: AtomicUsize,
    seen_cursors: Mutex<Vec<Option<u64>>>,
}

impl ScriptedDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(VecDeque::new()),
            folders: Mutex::new(Vec::new()),
            high_water: Mutex::new(0),
            rejected_tokens: Mutex::new(Vec::new()),
            panic_on_query: Mutex::new(false),
            query_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            seen_cursors: Mutex::new(Vec::new()),
        })
    }

    pub fn push_page(&self, largest_change_id: u64, items: Vec<RawChange>) {
        self.pages.lock().unwrap().push_back(Ok(ChangePage {
            largest_change_id,
            items,
        }));
    }

    pub fn push_error(&self, error: RemoteError) {
        self.pages.lock().unwrap().push_back(Err(error));
    }

    pub fn set_folders(&self, folders: Vec<FolderRecord>) {
        *self.folders.lock().unwrap() = folders;
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().unwrap().push(token.to_string());
    }

    pub fn panic_on_query(&self) {
        *self.panic_on_query.lock().unwrap() = true;
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn seen_cursors(&self) -> Vec<Option<u64>> {
        self.seen_cursors.lock().unwrap().clone()
    }

    fn check_token(&self, token: &str) -> std::result::Result<(), RemoteError> {
        if self.rejected_tokens.lock().unwrap().iter().any(|t| t == token) {
            return Err(RemoteError::Unauthorized(format!("token {token} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for ScriptedDocumentStore {
    async fn query_changes(
        &self,
        access_token: &str,
        after: Option<u64>,
    ) -> std::result::Result<ChangePage, RemoteError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if *self.panic_on_query.lock().unwrap() {
            panic!("document store blew up");
        }
        self.check_token(access_token)?;
        self.seen_cursors.lock().unwrap().push(after);

        let next = self.pages.lock().unwrap().pop_front();
        let mut high_water = self.high_water.lock().unwrap();
        match next {
            Some(Ok(page)) => {
                *high_water = page.largest_change_id;
                Ok(page)
            }
            Some(Err(e)) => Err(e),
            None => Ok(ChangePage {
                largest_change_id: *high_water,
                items: Vec::new(),
            }),
        }
    }

    async fn list_folders(
        &self,
        access_token: &str,
    ) -> std::result::Result<Vec<FolderRecord>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(access_token)?;
        Ok(self.folders.lock().unwrap().clone())
    }

    fn store_name(&self) -> &'static str {
        "scripted"
    }
}

/// Refresher handing out a fixed token
pub struct StaticRefresher {
    token: String,
    calls: AtomicUsize,
}

impl StaticRefresher {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh_access_token(
        &self,
        _refresh_token: &str,
    ) -> std::result::Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }
}

/// Messenger recording every posted message
pub struct RecordingMessenger {
    sent: Mutex<Vec<Message>>,
    responses: Mutex<VecDeque<std::result::Result<(), DeliveryError>>>,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_response(&self, response: std::result::Result<(), DeliveryError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn post_message(
        &self,
        _access_token: &str,
        message: &Message,
    ) -> std::result::Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(message.clone());
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn messenger_name(&self) -> &'static str {
        "recording"
    }
}

/// Enrollment hook recording which subscribers it saw
#[derive(Default)]
pub struct RecordingHook {
    enrolled: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enrolled(&self) -> Vec<String> {
        self.enrolled.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrollmentHook for RecordingHook {
    async fn on_enroll(&self, subscription: &Subscription) -> Result<()> {
        self.enrolled
            .lock()
            .unwrap()
            .push(subscription.id().to_string());
        Ok(())
    }

    async fn on_remove(&self, subscription: &Subscription) -> Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push(subscription.id().to_string());
        Ok(())
    }

    fn hook_name(&self) -> &'static str {
        "recording"
    }
}

/// Clock moved by hand
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Fixed reference time used across tests
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Minimal valid configuration backed by the memory store
pub fn test_config() -> WatchConfig {
    let mut config = WatchConfig {
        google: GoogleOauthConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "https://drivewatch.example.com/".to_string(),
            ..GoogleOauthConfig::default()
        },
        store: StoreConfig::Memory,
        ..WatchConfig::default()
    };
    config.engine.workers = 4;
    config.engine.request_timeout_secs = 2;
    config.engine.version = "test".to_string();
    config
}

pub fn subscription(email: &str, folders: &[&str]) -> Subscription {
    let user = email.split('@').next().unwrap_or(email).to_string();
    Subscription {
        channel: "#drive".to_string(),
        messaging_token: format!("xoxp-{user}"),
        refresh_token: format!("refresh-{user}"),
        owner: OwnerInfo {
            email: email.to_string(),
            given_name: "Test".to_string(),
            family_name: "User".to_string(),
        },
        account: MessagingAccount {
            url: "https://acme.slack.com/".to_string(),
            team_id: "T1".to_string(),
            team: "acme".to_string(),
            user_id: format!("U-{user}"),
            user,
        },
        folders_of_interest: folders.iter().map(|f| f.to_string()).collect(),
    }
}

pub fn registration(email: &str, folders: &[&str]) -> Registration {
    Registration {
        subscription: subscription(email, folders),
        access_token: "initial-token".to_string(),
    }
}

/// A change modified at `at` by a known editor
pub fn modified_change(title: &str, at: DateTime<Utc>, parents: &[&str]) -> RawChange {
    RawChange {
        file_id: format!("file-{title}"),
        title: title.to_string(),
        link: format!("https://docs.example.com/{title}"),
        mime_type: "application/vnd.google-apps.document".to_string(),
        last_editor: Editor {
            email: "grace@example.com".to_string(),
            display_name: "Grace Hopper".to_string(),
        },
        created: Some(at - Duration::days(7)),
        modified: Some(at),
        parent_ids: parents.iter().map(|p| p.to_string()).collect(),
        ..RawChange::default()
    }
}

/// Wait for the first event matching `pred`, skipping the others
pub async fn wait_for_event<F>(
    rx: &mut mpsc::Receiver<EngineEvent>,
    pred: F,
) -> Option<EngineEvent>
where
    F: Fn(&EngineEvent) -> bool,
{
    let deadline = tokio::time::Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Drain every event currently queued
pub fn drain_events(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
