//! Wiring of the session, REST client, store and stream supervisor.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::ApiClient;
use crate::config::AppConfig;
use crate::notifications::NotificationStore;
use crate::session::{Session, SessionSource};
use crate::stream::{StreamStatus, StreamSupervisor};

/// A running alerts client.
pub struct App {
    pub session: SessionSource,
    pub api: ApiClient,
    pub store: Arc<NotificationStore>,
    supervisor: StreamSupervisor,
}

impl App {
    /// Build every component and resolve the configured credentials.
    /// Must be called within a tokio runtime.
    pub fn start(config: &AppConfig) -> Result<Self> {
        let session = SessionSource::new();
        let api = ApiClient::new(
            config.api_url.clone(),
            config.request_timeout,
            session.clone(),
        )
        .context("Failed to create HTTP client")?;
        let store = Arc::new(NotificationStore::new(
            Arc::new(api.clone()),
            config.reconcile,
        ));
        let supervisor = StreamSupervisor::spawn(
            session.clone(),
            config.stream.clone(),
            store.clone(),
            config.load_baseline_on_login,
        );

        session.resolve(config.session.clone());

        Ok(Self {
            session,
            api,
            store,
            supervisor,
        })
    }

    /// Log in with email and password and make the result the active session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let session = self
            .api
            .login(email, password)
            .await
            .with_context(|| format!("Login failed for {}", email))?;
        self.session.login(session.clone());
        Ok(session)
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.supervisor.status()
    }

    pub fn watch_stream(&self) -> watch::Receiver<StreamStatus> {
        self.supervisor.watch_status()
    }

    /// Deactivate the stream. The app is inert afterwards.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
