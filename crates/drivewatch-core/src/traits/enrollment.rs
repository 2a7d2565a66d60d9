// # Enrollment Hook Trait
//
// Side effects fired when a subscriber is first enrolled or removed, such as
// adding the owner to a mailing list.
//
// The engine invokes hooks on a detached task; a failing hook is logged and
// never blocks or fails the pipeline.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Subscription;

/// Trait for enrollment side effects
#[async_trait]
pub trait EnrollmentHook: Send + Sync {
    /// Called once for a newly added subscriber
    async fn on_enroll(&self, subscription: &Subscription) -> Result<()>;

    /// Called once for a removed subscriber
    async fn on_remove(&self, subscription: &Subscription) -> Result<()>;

    /// Get the hook name (for logging/debugging)
    fn hook_name(&self) -> &'static str;
}

/// Hook that does nothing, used when no mailing list is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnrollmentHook;

#[async_trait]
impl EnrollmentHook for NoopEnrollmentHook {
    async fn on_enroll(&self, _subscription: &Subscription) -> Result<()> {
        Ok(())
    }

    async fn on_remove(&self, _subscription: &Subscription) -> Result<()> {
        Ok(())
    }

    fn hook_name(&self) -> &'static str {
        "noop"
    }
}
