//! Keeps exactly one notification stream alive for the logged-in user.
//!
//! Watches the session source. Whenever the identity changes the current
//! stream is fully deactivated before the store is reset and, if a user is
//! present, a new stream is started for that user.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ConnectionState, NotificationStream, StreamSettings};
use crate::notifications::{NotificationStore, StoreError};
use crate::session::{Identity, SessionSource, UserId};

/// Which user the stream is serving and how far along it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub user_id: Option<UserId>,
    pub state: ConnectionState,
}

impl StreamStatus {
    fn idle() -> Self {
        Self {
            user_id: None,
            state: ConnectionState::Disconnected,
        }
    }
}

pub struct StreamSupervisor {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    status_rx: watch::Receiver<StreamStatus>,
}

impl StreamSupervisor {
    /// Start following `session`. Must be called within a tokio runtime.
    ///
    /// When `load_baseline` is set, the store's history is fetched every time
    /// a user becomes present.
    pub fn spawn(
        session: SessionSource,
        settings: StreamSettings,
        store: Arc<NotificationStore>,
        load_baseline: bool,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(StreamStatus::idle());
        let cancel = CancellationToken::new();
        let worker = Worker {
            settings,
            store,
            load_baseline,
            status_tx,
            active: None,
            state_rx: None,
        };
        let task = tokio::spawn(worker.run(session, cancel.clone()));

        Self {
            cancel,
            task: Mutex::new(Some(task)),
            status_rx,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.status_rx.clone()
    }

    /// Tear down the active stream and stop following the session.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Stream supervisor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    settings: StreamSettings,
    store: Arc<NotificationStore>,
    load_baseline: bool,
    status_tx: watch::Sender<StreamStatus>,
    active: Option<NotificationStream>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
}

impl Worker {
    async fn run(mut self, session: SessionSource, cancel: CancellationToken) {
        let mut session_rx = session.subscribe();
        let identity = session_rx.borrow_and_update().identity();
        self.switch(identity).await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let identity = session_rx.borrow_and_update().identity();
                    self.switch(identity).await;
                }
                state = next_state(&mut self.state_rx) => {
                    let user_id = self.active.as_ref().map(|s| s.user_id().clone());
                    self.status_tx.send_replace(StreamStatus { user_id, state });
                }
            }
        }

        self.deactivate_current().await;
        debug!("Stream supervisor stopped");
    }

    async fn switch(&mut self, identity: Identity) {
        let current = self.active.as_ref().map(|s| s.user_id().clone());
        if current.as_ref() == identity.user_id() {
            return;
        }

        self.deactivate_current().await;
        self.store.reset(identity.user_id().cloned());

        let user_id = match identity {
            Identity::Present(user_id) => user_id,
            other => {
                debug!("No user present ({:?}), stream stays down", other);
                return;
            }
        };

        info!("Starting notification stream for user {}", user_id);
        let stream = NotificationStream::activate(
            self.settings.clone(),
            user_id.clone(),
            self.store.clone(),
        );
        let state_rx = stream.watch_state();
        let state = *state_rx.borrow();
        self.state_rx = Some(state_rx);
        self.active = Some(stream);
        self.status_tx.send_replace(StreamStatus {
            user_id: Some(user_id),
            state,
        });

        if self.load_baseline {
            let store = self.store.clone();
            tokio::spawn(async move {
                match store.load_baseline().await {
                    Ok(()) => {}
                    Err(StoreError::SessionChanged) => {
                        debug!("Baseline load superseded by a session change")
                    }
                    Err(e) => warn!("Failed to load notification history: {}", e),
                }
            });
        }
    }

    async fn deactivate_current(&mut self) {
        self.state_rx = None;
        if let Some(mut stream) = self.active.take() {
            info!("Stopping notification stream for user {}", stream.user_id());
            stream.deactivate().await;
        }
        self.status_tx.send_replace(StreamStatus::idle());
    }
}

async fn next_state(state_rx: &mut Option<watch::Receiver<ConnectionState>>) -> ConnectionState {
    match state_rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => *rx.borrow_and_update(),
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
