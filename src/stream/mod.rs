//! Publish/subscribe channel delivering new notifications as they happen.

mod connection;
pub mod frame;
mod supervisor;

pub use connection::{topic_for, ConnectionState, NotificationStream, StreamSettings};
pub use supervisor::{StreamStatus, StreamSupervisor};
