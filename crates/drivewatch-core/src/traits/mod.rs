//! Core traits for the drivewatch pipeline
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DocumentStore`]: Query the remote change feed and folder listing
//! - [`TokenRefresher`]: Exchange a refresh credential for an access credential
//! - [`Messenger`]: Deliver notification messages
//! - [`EnrollmentHook`]: Side effects on enroll/remove
//! - [`SubscriptionStore`]: Durable subscription storage

pub mod document_store;
pub mod enrollment;
pub mod messenger;
pub mod subscription_store;

pub use document_store::{DocumentStore, TokenRefresher};
pub use enrollment::{EnrollmentHook, NoopEnrollmentHook};
pub use messenger::{Attachment, Field, Message, Messenger};
pub use subscription_store::SubscriptionStore;
