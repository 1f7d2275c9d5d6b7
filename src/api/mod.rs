//! REST collaborator for notification history and read state.

mod client;
mod error;

pub use client::ApiClient;
pub use error::ApiError;

use async_trait::async_trait;

use crate::notifications::NotificationRecord;

/// Notification endpoints the reconciliation store depends on.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Full notification history, newest first.
    async fn list_notifications(&self) -> Result<Vec<NotificationRecord>, ApiError>;

    /// Server-side count of unread notifications.
    async fn unread_count(&self) -> Result<u64, ApiError>;

    /// Persist the read flag of one notification. Idempotent.
    async fn mark_read(&self, id: &str) -> Result<(), ApiError>;

    /// Persist the read flag of every notification of the current user.
    async fn mark_all_read(&self) -> Result<(), ApiError>;
}
