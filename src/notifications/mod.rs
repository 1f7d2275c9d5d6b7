//! Medicine expiry notifications: models, reconciliation store and rendering.

pub mod display;
mod models;
mod store;

pub use models::{NotificationRecord, NotificationType, PayloadError, UnreadCount};
pub use store::{NotificationSink, NotificationStore, ReconcilePolicy, StoreError};

#[cfg(test)]
pub(crate) use models::test_record;
#[cfg(test)]
pub(crate) use store::fake::FakeApi;
