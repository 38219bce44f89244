use async_trait::async_trait;
use tracing::info;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError(pub String);

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}

/// Outbound notifications. Failures are reported to the caller, which logs
/// and counts them; they never undo the change that triggered them.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn reservation_created(&self, reservation_id: Ulid, email: &str) -> Result<(), DispatchError>;
}

/// Writes each notification to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn reservation_created(&self, reservation_id: Ulid, email: &str) -> Result<(), DispatchError> {
        if email.is_empty() {
            return Err(DispatchError("no recipient address".into()));
        }
        info!("notify {email}: reservation {reservation_id} confirmed");
        Ok(())
    }
}
