//! Core watch engine
//!
//! The WatchEngine is responsible for:
//! - Ticking on a fixed cadence and fanning out one check per subscriber
//! - Applying registrations and discards between cycles
//! - Feeding check results to the failure tracker and removing subscribers
//!   that kept failing past the threshold
//! - Persisting the subscriber set after every mutation
//!
//! ## Architecture
//!
//! ```text
//!  registrations ──┐      discards ──┐      shutdown ──┐
//!                  ▼                 ▼                 ▼
//!              ┌───────────────────────────────────────────┐
//!              │               WatchEngine                 │
//!              │  (owns SubscriberRegistry + RuntimeState) │
//!              └───────────────────────────────────────────┘
//!                      │ tick                    ▲ CheckReport
//!                      ▼                         │
//!              ┌──────────────┐   per job  ┌──────────────────┐
//!              │  WorkerPool  │ ─────────▶ │ SubscriberCheck  │
//!              └──────────────┘            └──────────────────┘
//!                                            │ feed │ folders │ deliver
//!                                            ▼      ▼         ▼
//!                                      DocumentStore      Messenger
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Timer expires (the very first tick fires immediately)
//! 2. Every subscriber is dispatched with a copy of its state
//! 3. All reports are collected; states are written back
//! 4. Failure tracker verdicts are applied; expired subscribers removed
//! 5. Cycle summary is logged and emitted as an event

pub mod check;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::WatchConfig;
use crate::credentials::CredentialManager;
use crate::detector::ChangeDetector;
use crate::error::{Error, Result};
use crate::health::{FailureTracker, FailureVerdict};
use crate::model::{Registration, Subscription};
use crate::notifier::{Notifier, NotifierConfig};
use crate::pool::WorkerPool;
use crate::subscriptions::{SubscriberRegistry, Upsert};
use crate::traits::{
    DocumentStore, EnrollmentHook, Messenger, NoopEnrollmentHook, SubscriptionStore,
    TokenRefresher,
};

use check::{CheckOutcome, CheckReport, SubscriberCheck};

/// Why a subscriber left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Explicit discard request
    Discarded,
    /// Failing continuously for at least the failure threshold
    FailureThreshold,
}

/// Events emitted by the WatchEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { subscribers: usize },

    /// A new subscriber was enrolled
    SubscriberAdded { id: String },

    /// An existing subscriber re-registered
    SubscriberUpdated { id: String },

    /// A subscriber was removed
    SubscriberRemoved { id: String, reason: RemovalReason },

    /// A check failed; emitted every cycle while failing
    CheckFailed {
        id: String,
        reason: String,
        fatal: bool,
        failing_since: DateTime<Utc>,
    },

    /// A polling cycle finished
    CycleCompleted {
        served: usize,
        failures: usize,
        removals: usize,
    },

    /// Engine stopped
    Stopped { reason: String },
}

/// Counters for one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub served: usize,
    pub failures: usize,
    pub removals: usize,
}

/// Collaborators the engine is built from
pub struct EngineComponents {
    pub documents: Arc<dyn DocumentStore>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub messenger: Arc<dyn Messenger>,
    pub store: Box<dyn SubscriptionStore>,
    pub hook: Arc<dyn EnrollmentHook>,
    pub clock: Arc<dyn Clock>,
}

impl EngineComponents {
    /// Components with no enrollment side effects and the system clock
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        refresher: Arc<dyn TokenRefresher>,
        messenger: Arc<dyn Messenger>,
        store: Box<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            documents,
            refresher,
            messenger,
            store,
            hook: Arc::new(NoopEnrollmentHook),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn EnrollmentHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Sending side of the engine's inbound channels
///
/// Held by the enrollment endpoint (or any embedder). Cloning is cheap.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    registrations: mpsc::Sender<Registration>,
    discards: mpsc::Sender<String>,
}

impl EngineHandle {
    /// Queue a new or updated subscription
    pub async fn register(&self, registration: Registration) -> Result<()> {
        self.registrations
            .send(registration)
            .await
            .map_err(|_| Error::Other("engine is not running".to_string()))
    }

    /// Queue the removal of a subscriber by owner email
    pub async fn discard(&self, id: impl Into<String>) -> Result<()> {
        self.discards
            .send(id.into())
            .await
            .map_err(|_| Error::Other("engine is not running".to_string()))
    }
}

/// Core watch engine
///
/// ## Lifecycle
///
/// 1. Create with [`WatchEngine::new()`], keeping the returned handle and
///    event receiver
/// 2. Start with [`WatchEngine::run()`]
/// 3. Engine runs until a shutdown signal is received
/// 4. The subscriber set is flushed before `run()` returns
///
/// ## Ownership
///
/// The engine is the only owner of the subscriber map and every runtime
/// state. Worker tasks get copies and hand back results; nothing is shared
/// mutably across tasks.
pub struct WatchEngine {
    registry: SubscriberRegistry,
    check: Arc<SubscriberCheck>,
    pool: WorkerPool,
    tracker: FailureTracker,
    hook: Arc<dyn EnrollmentHook>,
    clock: Arc<dyn Clock>,

    /// Target time between cycle starts
    poll_interval: Duration,

    /// Lower bound on the pause between cycles
    min_wait: Duration,

    /// Bound on outstanding hook calls at shutdown
    hook_timeout: Duration,

    /// Detached enrollment/removal side effects
    hooks: JoinSet<()>,

    registration_rx: mpsc::Receiver<Registration>,
    discard_rx: mpsc::Receiver<String>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl fmt::Debug for WatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEngine")
            .field("subscribers", &self.registry.len())
            .field("hook", &self.hook.hook_name())
            .field("poll_interval", &self.poll_interval)
            .field("min_wait", &self.min_wait)
            .field("pending_hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

/// Pause before the next cycle
///
/// The first cycle starts immediately. Later cycles start `interval` after the
/// previous start, but never sooner than `min_wait` after the previous cycle
/// finished.
fn next_wait(
    since_last_tick: Option<Duration>,
    interval: Duration,
    min_wait: Duration,
) -> Duration {
    match since_last_tick {
        None => Duration::ZERO,
        Some(elapsed) => interval.saturating_sub(elapsed).max(min_wait),
    }
}

impl WatchEngine {
    /// Create a new watch engine
    ///
    /// Loads the stored subscriber set; an unreadable store is an error.
    ///
    /// # Returns
    ///
    /// A tuple of (engine, handle, event_receiver)
    pub async fn new(
        components: EngineComponents,
        config: &WatchConfig,
    ) -> Result<(Self, EngineHandle, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;
        let engine_config = &config.engine;

        let registry = SubscriberRegistry::open(components.store).await?;
        info!(
            "Loaded {} subscriber(s) from {} store",
            registry.len(),
            registry.store_name()
        );

        let credentials =
            CredentialManager::new(components.refresher, engine_config.request_timeout());
        let detector = ChangeDetector::new(
            engine_config.recency_threshold(),
            engine_config.dedup_window(),
        );
        let notifier = Notifier::new(
            components.messenger,
            NotifierConfig {
                username: config.slack.username.clone(),
                icon_url: config.slack.icon_url.clone(),
                redirect_uri: config.google.redirect_uri.clone(),
                version: engine_config.version.clone(),
            },
            engine_config.request_timeout(),
        );
        let check = SubscriberCheck::new(
            components.documents,
            credentials,
            detector,
            notifier,
            Arc::clone(&components.clock),
        );

        let (event_tx, event_rx) = mpsc::channel(engine_config.event_channel_capacity);
        let (registration_tx, registration_rx) =
            mpsc::channel(engine_config.inbound_channel_capacity);
        let (discard_tx, discard_rx) = mpsc::channel(engine_config.inbound_channel_capacity);

        let engine = Self {
            registry,
            check: Arc::new(check),
            pool: WorkerPool::new(engine_config.workers),
            tracker: FailureTracker::new(engine_config.failure_threshold()),
            hook: components.hook,
            clock: components.clock,
            poll_interval: engine_config.poll_interval(),
            min_wait: engine_config.min_wait(),
            hook_timeout: engine_config.request_timeout(),
            hooks: JoinSet::new(),
            registration_rx,
            discard_rx,
            event_tx,
        };
        let handle = EngineHandle {
            registrations: registration_tx,
            discards: discard_tx,
        };

        Ok((engine, handle, event_rx))
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Read access to the subscriber registry
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Run the engine until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: The subscriber set could not be flushed
    pub async fn run(&mut self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until `shutdown_rx` fires (or is dropped)
    ///
    /// Embedders that handle process signals themselves use this instead of
    /// [`WatchEngine::run()`]. `None` falls back to SIGINT.
    pub async fn run_with_shutdown(
        &mut self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            subscribers: self.registry.len(),
        });
        info!(
            "Watch engine started: {} subscriber(s), {} worker(s), every {:?}",
            self.registry.len(),
            self.pool.workers(),
            self.poll_interval
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for SIGINT: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut last_tick: Option<Instant> = None;
        loop {
            let wait = next_wait(
                last_tick.map(|tick| tick.elapsed()),
                self.poll_interval,
                self.min_wait,
            );

            tokio::select! {
                Some(registration) = self.registration_rx.recv() => {
                    self.handle_registration(registration).await;
                }

                Some(id) = self.discard_rx.recv() => {
                    self.handle_discard(&id).await;
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = tokio::time::sleep(wait) => {
                    last_tick = Some(Instant::now());
                    self.run_cycle().await;
                }
            }
        }

        self.emit_event(EngineEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });

        // Flush state before exiting
        self.registry.persist().await?;
        self.drain_hooks().await;
        info!("Subscribers flushed, engine stopped");

        Ok(())
    }

    /// Apply a registration: upsert, persist, and enroll if new
    pub async fn handle_registration(&mut self, registration: Registration) {
        let subscription = registration.subscription.clone();
        let id = subscription.id().to_string();
        let label = subscription.label();

        match self.registry.upsert(registration) {
            Upsert::Added => {
                info!("[{}] Subscriber added ({} total)", label, self.registry.len());
                self.emit_event(EngineEvent::SubscriberAdded { id });
                self.spawn_enroll(subscription);
            }
            Upsert::Updated => {
                info!("[{}] Subscriber updated", label);
                self.emit_event(EngineEvent::SubscriberUpdated { id });
            }
        }

        self.persist().await;
    }

    /// Apply a discard request
    pub async fn handle_discard(&mut self, id: &str) {
        if !self.registry.contains(id) {
            warn!("Discard requested for unknown subscriber {}", id);
            return;
        }
        self.remove_subscriber(id, RemovalReason::Discarded);
        self.persist().await;
    }

    /// Run one polling cycle over every subscriber
    pub async fn run_cycle(&mut self) -> CycleSummary {
        while self.hooks.try_join_next().is_some() {}

        let jobs = self.registry.jobs();
        let served = jobs.len();
        let check = Arc::clone(&self.check);
        let reports = self
            .pool
            .run_cycle(jobs, move |job| {
                let check = Arc::clone(&check);
                async move { check.run(job).await }
            })
            .await;

        let now = self.clock.now();
        let mut failures = 0;
        let mut expired = Vec::new();
        for report in reports {
            if let Some(event) = self.apply_report(report, now, &mut expired) {
                failures += 1;
                self.emit_event(event);
            }
        }

        for id in &expired {
            self.remove_subscriber(id, RemovalReason::FailureThreshold);
        }
        if !expired.is_empty() {
            self.persist().await;
        }

        let summary = CycleSummary {
            served,
            failures,
            removals: expired.len(),
        };
        info!(
            "Served {} subscriber(s): {} failure(s), {} removal(s)",
            summary.served, summary.failures, summary.removals
        );
        self.emit_event(EngineEvent::CycleCompleted {
            served: summary.served,
            failures: summary.failures,
            removals: summary.removals,
        });
        summary
    }

    /// Write a report back and return the failure event, if it failed
    fn apply_report(
        &mut self,
        report: CheckReport,
        now: DateTime<Utc>,
        expired: &mut Vec<String>,
    ) -> Option<EngineEvent> {
        let CheckReport {
            id,
            label,
            state,
            outcome,
        } = report;

        if let Some(state) = state {
            self.registry.restore_state(&id, state);
        }
        let state = self.registry.state_mut(&id)?;

        match outcome {
            CheckOutcome::Success { changes, notify } => {
                if let Some(since) = self.tracker.record_success(state) {
                    info!("[{}] Recovered, failing since {}", label, since);
                }
                debug!("[{}] Check ok: {} change(s), {:?}", label, changes, notify);
                None
            }
            CheckOutcome::Failed { reason, fatal } => {
                let verdict = self.tracker.record_failure(state, now);
                let failing_since = state.failing_since.unwrap_or(now);
                match verdict {
                    FailureVerdict::NewFailure => {
                        warn!("[{}] New failure: {}", label, reason);
                    }
                    FailureVerdict::StillFailing { since } => {
                        warn!("[{}] Still failing since {}: {}", label, since, reason);
                    }
                    FailureVerdict::OverThreshold { since } => {
                        error!(
                            "[{}] Failing since {}, over the {}h threshold: removing",
                            label,
                            since,
                            self.tracker.threshold().num_hours()
                        );
                        expired.push(id.clone());
                    }
                }
                Some(EngineEvent::CheckFailed {
                    id,
                    reason,
                    fatal,
                    failing_since,
                })
            }
        }
    }

    fn remove_subscriber(&mut self, id: &str, reason: RemovalReason) {
        let Some(subscription) = self.registry.remove(id) else {
            return;
        };
        info!(
            "[{}] Subscriber removed ({:?}, {} left)",
            subscription.label(),
            reason,
            self.registry.len()
        );
        self.emit_event(EngineEvent::SubscriberRemoved {
            id: id.to_string(),
            reason,
        });
        self.spawn_remove(subscription);
    }

    fn spawn_enroll(&mut self, subscription: Subscription) {
        let hook = Arc::clone(&self.hook);
        self.hooks.spawn(async move {
            if let Err(e) = hook.on_enroll(&subscription).await {
                warn!(
                    "[{}] {} enrollment failed: {}",
                    subscription.label(),
                    hook.hook_name(),
                    e
                );
            }
        });
    }

    fn spawn_remove(&mut self, subscription: Subscription) {
        let hook = Arc::clone(&self.hook);
        self.hooks.spawn(async move {
            if let Err(e) = hook.on_remove(&subscription).await {
                warn!(
                    "[{}] {} removal failed: {}",
                    subscription.label(),
                    hook.hook_name(),
                    e
                );
            }
        });
    }

    /// Wait for outstanding hook calls, bounded by the request timeout
    async fn drain_hooks(&mut self) {
        let hooks = &mut self.hooks;
        let drained = tokio::time::timeout(self.hook_timeout, async {
            while hooks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Abandoning {} pending hook call(s)", self.hooks.len());
            self.hooks.abort_all();
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.registry.persist().await {
            error!("Failed to persist subscribers: {}", e);
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Send event, logging warning if channel is full (backpressure)
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}
