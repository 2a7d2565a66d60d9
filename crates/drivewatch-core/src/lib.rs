// # drivewatch-core
//
// Core library for the drive-to-chat change notification pipeline.
//
// ## Architecture Overview
//
// This library provides everything except the concrete remote APIs:
// - **DocumentStore / TokenRefresher**: Traits for the watched change feed
//   and its credential refresh endpoint
// - **Messenger**: Trait for delivering notification messages
// - **EnrollmentHook**: Trait for enroll/remove side effects
// - **SubscriptionStore**: Trait for durable subscriber storage
// - **WatchEngine**: Scheduler that polls every subscriber on a fixed
//   cadence through a bounded worker pool
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from API clients
// 2. **Single Owner**: The engine owns all subscriber state; workers get
//    copies and return results
// 3. **Failure Isolation**: One subscriber's failure (or panic) never
//    affects another's check
// 4. **Library-First**: All core functionality can be used as a library

pub mod clock;
pub mod config;
pub mod credentials;
pub mod detector;
pub mod engine;
pub mod error;
pub mod folders;
pub mod health;
pub mod model;
pub mod notifier;
pub mod pool;
pub mod state;
pub mod subscriptions;
pub mod traits;

// Re-export core types for convenience
pub use clock::{Clock, SystemClock};
pub use config::{EngineConfig, GoogleOauthConfig, MailchimpConfig, SlackConfig, StoreConfig, WatchConfig};
pub use engine::{EngineComponents, EngineEvent, EngineHandle, RemovalReason, WatchEngine};
pub use error::{DeliveryError, Error, RemoteError, Result};
pub use model::{
    ActionCategory, ChangeItem, ChangePage, Editor, FolderRecord, MessagingAccount, OwnerInfo,
    RawChange, Registration, RuntimeState, Subscription,
};
pub use state::{FileSubscriptionStore, MemorySubscriptionStore};
pub use traits::{DocumentStore, EnrollmentHook, Messenger, SubscriptionStore, TokenRefresher};
