//! MedTracker Alerts Library
//!
//! Client side of the medicine tracker's live notifications: a STOMP stream
//! per logged-in user, reconciled with the REST notification history.

pub mod api;
pub mod app;
pub mod config;
pub mod notifications;
pub mod session;
pub mod stream;

// Re-export commonly used types for convenience
pub use api::{ApiClient, ApiError, NotificationApi};
pub use app::App;
pub use config::{AppConfig, CliConfig, FileConfig};
pub use notifications::{NotificationRecord, NotificationStore, NotificationType, ReconcilePolicy};
pub use session::{Identity, Session, SessionSource, UserId};
pub use stream::{ConnectionState, StreamSettings, StreamSupervisor};
