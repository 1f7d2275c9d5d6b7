//! Reconciliation store.
//!
//! Merges the notification history fetched over REST with records pushed on
//! the live stream, and owns the unread counter shown by the badge.
//!
//! Record set and counter live behind a single lock so every mutation updates
//! both together. The lock is never held across an await point.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::models::NotificationRecord;
use crate::api::{ApiError, NotificationApi};
use crate::session::UserId;

/// How a baseline load is combined with records already pushed by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilePolicy {
    /// Pushed records are kept next to the snapshot and their unread
    /// contribution is added to the server count, even if the snapshot
    /// already contains them.
    #[default]
    Additive,
    /// Pushed records already present in the snapshot are dropped, and a push
    /// for an id that is already held is ignored.
    DedupById,
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "additive" => Ok(ReconcilePolicy::Additive),
            "dedup" | "dedup-by-id" | "dedup_by_id" => Ok(ReconcilePolicy::DedupById),
            other => Err(format!(
                "Unknown reconcile policy '{}', expected 'additive' or 'dedup'",
                other
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The user changed while the request was in flight, the result was discarded.
    #[error("Session changed while the request was in flight")]
    SessionChanged,
}

/// Something that accepts records decoded from a user's stream.
pub trait NotificationSink: Send + Sync {
    /// Deliver a record received on `user_id`'s topic.
    fn deliver(&self, user_id: &UserId, record: NotificationRecord);
}

#[derive(Default)]
struct StoreState {
    owner: Option<UserId>,
    /// Records received from the stream, newest first.
    pushed: Vec<NotificationRecord>,
    /// Last snapshot fetched over REST, in server order.
    baseline: Vec<NotificationRecord>,
    baseline_loaded: bool,
    unread: u64,
}

impl StoreState {
    fn holds(&self, id: &str) -> bool {
        self.records().any(|r| r.id == id)
    }

    fn records(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.pushed.iter().chain(self.baseline.iter())
    }

    fn records_mut(&mut self) -> impl Iterator<Item = &mut NotificationRecord> {
        self.pushed.iter_mut().chain(self.baseline.iter_mut())
    }

    fn pushed_unread(&self) -> u64 {
        self.pushed.iter().filter(|r| !r.read).count() as u64
    }
}

/// Single source of truth for the notifications known to this client.
pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    policy: ReconcilePolicy,
    state: Mutex<StoreState>,
    unread_tx: watch::Sender<u64>,
    pushes_tx: broadcast::Sender<NotificationRecord>,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>, policy: ReconcilePolicy) -> Self {
        let (unread_tx, _) = watch::channel(0);
        let (pushes_tx, _) = broadcast::channel(256);
        Self {
            api,
            policy,
            state: Mutex::new(StoreState::default()),
            unread_tx,
            pushes_tx,
        }
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Current unread counter.
    pub fn unread_count(&self) -> u64 {
        self.lock().unread
    }

    /// All held records: pushed ones (newest first) followed by the baseline.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.lock().records().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.lock().records().find(|r| r.id == id).cloned()
    }

    pub fn owner(&self) -> Option<UserId> {
        self.lock().owner.clone()
    }

    /// Whether a history snapshot was loaded since the last reset.
    pub fn has_baseline(&self) -> bool {
        self.lock().baseline_loaded
    }

    /// Watch the unread counter (badge).
    pub fn subscribe_unread(&self) -> watch::Receiver<u64> {
        self.unread_tx.subscribe()
    }

    /// Receive every record accepted from the stream.
    pub fn subscribe_pushes(&self) -> broadcast::Receiver<NotificationRecord> {
        self.pushes_tx.subscribe()
    }

    /// Forget everything and start over for `owner`.
    pub fn reset(&self, owner: Option<UserId>) {
        let mut state = self.lock();
        debug!("Resetting notification store for {:?}", owner);
        *state = StoreState {
            owner,
            ..StoreState::default()
        };
        self.publish_unread(&state);
    }

    /// Fetch history and unread count, and replace the baseline snapshot.
    pub async fn load_baseline(&self) -> Result<(), StoreError> {
        let owner = self.owner();
        let (records, server_unread) =
            tokio::try_join!(self.api.list_notifications(), self.api.unread_count())?;

        let mut state = self.lock();
        if state.owner != owner {
            warn!("Discarding notification history fetched for a previous session");
            return Err(StoreError::SessionChanged);
        }

        if self.policy == ReconcilePolicy::DedupById {
            let snapshot_ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            state
                .pushed
                .retain(|r| !snapshot_ids.contains(r.id.as_str()));
        }
        state.baseline = records;
        state.baseline_loaded = true;
        state.unread = server_unread + state.pushed_unread();
        info!(
            "Loaded {} notifications ({} unread)",
            state.baseline.len(),
            state.unread
        );
        self.publish_unread(&state);
        Ok(())
    }

    /// Add a record pushed by the stream. Returns false if it was discarded.
    pub fn ingest(&self, user_id: &UserId, record: NotificationRecord) -> bool {
        let mut state = self.lock();
        if state.owner.as_ref() != Some(user_id) {
            debug!(
                "Dropping notification {} addressed to {}, store belongs to {:?}",
                record.id, user_id, state.owner
            );
            return false;
        }
        if self.policy == ReconcilePolicy::DedupById && state.holds(&record.id) {
            debug!("Ignoring already known notification {}", record.id);
            return false;
        }

        if !record.read {
            state.unread += 1;
        }
        state.pushed.insert(0, record.clone());
        self.publish_unread(&state);
        drop(state);

        // No subscribers is fine.
        let _ = self.pushes_tx.send(record);
        true
    }

    /// Mark one notification read. Returns Ok(false) when there was nothing to do.
    pub async fn mark_read(&self, id: &str) -> Result<bool, StoreError> {
        let owner = {
            let state = self.lock();
            let owner = match state.records().find(|r| r.id == id) {
                None => {
                    debug!("mark_read: notification {} is not held", id);
                    return Ok(false);
                }
                Some(record) if record.read => return Ok(false),
                Some(_) => state.owner.clone(),
            };
            owner
        };

        self.api.mark_read(id).await?;

        let mut state = self.lock();
        if state.owner != owner {
            return Err(StoreError::SessionChanged);
        }
        let mut flipped = false;
        for record in state.records_mut().filter(|r| r.id == id && !r.read) {
            record.read = true;
            flipped = true;
        }
        if flipped {
            state.unread = state.unread.saturating_sub(1);
            self.publish_unread(&state);
        }
        Ok(flipped)
    }

    /// Mark every notification read. Returns Ok(false) when the counter was already zero.
    pub async fn mark_all_read(&self) -> Result<bool, StoreError> {
        let owner = {
            let state = self.lock();
            if state.unread == 0 {
                return Ok(false);
            }
            state.owner.clone()
        };

        self.api.mark_all_read().await?;

        let mut state = self.lock();
        if state.owner != owner {
            return Err(StoreError::SessionChanged);
        }
        for record in state.records_mut() {
            record.read = true;
        }
        state.unread = 0;
        self.publish_unread(&state);
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_unread(&self, state: &StoreState) {
        self.unread_tx.send_replace(state.unread);
    }
}

impl NotificationSink for NotificationStore {
    fn deliver(&self, user_id: &UserId, record: NotificationRecord) {
        self.ingest(user_id, record);
    }
}
