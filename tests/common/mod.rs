//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{start_app, TestBackend, USER_1_ID, USER_1_TOKEN};
//!
//! #[tokio::test]
//! async fn test_stream_subscribes() {
//!     let backend = TestBackend::spawn().await;
//!     let app = start_app(&backend, Some((USER_1_TOKEN, USER_1_ID))).await;
//!     common::wait_for_subscribers(&backend, 1).await;
//!     app.shutdown().await;
//! }
//! ```

mod backend;
mod constants;

pub use backend::TestBackend;
pub use constants::*;

use chrono::NaiveDate;
use medtracker_alerts::{App, AppConfig, CliConfig, NotificationRecord, NotificationType};
use medtracker_alerts::ReconcilePolicy;
use std::time::Duration;

/// Builds a record for medicine `id`, created at a fixed instant.
#[allow(dead_code)]
pub fn record(id: &str, read: bool) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        medicine_id: format!("med-{}", id),
        medicine_name: "Amoxicillin".to_string(),
        notification_type: NotificationType::Expired,
        message: format!("Medicine {} has expired", id),
        read,
        created_at: NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .expect("valid timestamp"),
    }
}

/// Client configuration pointing at `backend`.
#[allow(dead_code)]
pub fn config_for(
    backend: &TestBackend,
    credentials: Option<(&str, &str)>,
    policy: ReconcilePolicy,
) -> AppConfig {
    let cli = CliConfig {
        api_url: backend.api_url.clone(),
        ws_url: backend.ws_url.clone(),
        token: credentials.map(|(token, _)| token.to_string()),
        user_id: credentials.map(|(_, user_id)| user_id.to_string()),
        request_timeout_sec: 5,
        reconcile: policy,
        reconnect_delay_ms: TEST_RECONNECT_DELAY_MS,
        heartbeat_ms: 0,
    };
    AppConfig::resolve(&cli, None).expect("Failed to resolve test config")
}

/// Starts a client app against `backend` with the additive policy.
#[allow(dead_code)]
pub async fn start_app(backend: &TestBackend, credentials: Option<(&str, &str)>) -> App {
    start_app_with(backend, credentials, ReconcilePolicy::Additive).await
}

#[allow(dead_code)]
pub async fn start_app_with(
    backend: &TestBackend,
    credentials: Option<(&str, &str)>,
    policy: ReconcilePolicy,
) -> App {
    App::start(&config_for(backend, credentials, policy)).expect("Failed to start app")
}

/// Polls `condition` until it holds, panicking after WAIT_TIMEOUT_MS.
#[allow(dead_code)]
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_millis(WAIT_TIMEOUT_MS), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if waited.is_err() {
        panic!("Timed out waiting for {}", what);
    }
}

/// Waits until exactly `count` subscriptions are live on the broker.
#[allow(dead_code)]
pub async fn wait_for_subscribers(backend: &TestBackend, count: usize) {
    wait_until(&format!("{} broker subscriptions", count), || {
        backend.subscribed_topics().len() == count
    })
    .await;
}
