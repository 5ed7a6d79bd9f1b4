//! Durable FIFO of pending pushes and the background loop that drains it.
//!
//! Items are persisted before they become visible in memory, so a crash never
//! loses an accepted change. The drain loop wakes on a fixed interval and
//! pushes at most one head item per wake. A failing head stays at the front
//! until it succeeds or exhausts its retries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{SyncError, SyncResult, DEFAULT_APP_FOLDER};
use crate::auth::{SessionManager, SessionState};
use crate::models::{remote_file_name, Note, NoteId, SyncOperation, SyncQueueItem};
use crate::remote::RemoteStore;
use crate::services::{LocalRecordStore, QueueStore, SyncStateStore};
use crate::util::unix_timestamp_now;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueConfig {
    pub drain_interval: Duration,
    /// Failed attempts after which an item is dropped.
    pub retry_ceiling: u32,
    pub app_folder: String,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(5),
            retry_ceiling: 3,
            app_folder: DEFAULT_APP_FOLDER.to_string(),
        }
    }
}

/// Result of one drain step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing queued.
    Idle,
    /// No usable session; the head was left untouched.
    Unauthenticated,
    Synced {
        note_id: NoteId,
        operation: SyncOperation,
    },
    /// The head failed and stays queued.
    Retrying { retries: u32 },
    /// The head failed for the last time and was discarded.
    Dropped { retries: u32 },
}

/// The most recent item discarded after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub id: String,
    pub note_id: NoteId,
    pub operation: SyncOperation,
    pub retries: u32,
    pub error: String,
    pub dropped_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub len: usize,
    pub running: bool,
    pub in_flight: bool,
    pub session_state: SessionState,
    pub dropped_total: u64,
    pub last_dropped: Option<DroppedItem>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the in-flight flag however the push ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncQueue {
    items: tokio::sync::Mutex<VecDeque<SyncQueueItem>>,
    drain_gate: tokio::sync::Mutex<()>,
    queue_store: Arc<dyn QueueStore>,
    records: Arc<dyn LocalRecordStore>,
    sync_state: Arc<dyn SyncStateStore>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<SessionManager>,
    config: SyncQueueConfig,
    len: AtomicUsize,
    in_flight: AtomicBool,
    running: AtomicBool,
    dropped_total: AtomicU64,
    last_dropped: Mutex<Option<DroppedItem>>,
    worker: Mutex<Option<Worker>>,
}

impl SyncQueue {
    /// Build the queue over `store` and reload every item it still holds, in
    /// enqueue order.
    pub async fn restore<S>(
        store: Arc<S>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<SessionManager>,
        config: SyncQueueConfig,
    ) -> SyncResult<Arc<Self>>
    where
        S: LocalRecordStore + QueueStore + SyncStateStore + 'static,
    {
        let items: VecDeque<SyncQueueItem> = QueueStore::load_all(store.as_ref()).await?.into();
        if !items.is_empty() {
            tracing::info!(pending = items.len(), "Restored pending sync items");
        }

        Ok(Arc::new(Self {
            len: AtomicUsize::new(items.len()),
            items: tokio::sync::Mutex::new(items),
            drain_gate: tokio::sync::Mutex::new(()),
            queue_store: store.clone(),
            records: store.clone(),
            sync_state: store,
            remote,
            session,
            config,
            in_flight: AtomicBool::new(false),
            running: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
            last_dropped: Mutex::new(None),
            worker: Mutex::new(None),
        }))
    }

    pub const fn config(&self) -> &SyncQueueConfig {
        &self.config
    }

    /// Durably append an operation. Never touches the network.
    pub async fn enqueue<T: Serialize + ?Sized>(
        &self,
        note_id: NoteId,
        operation: SyncOperation,
        payload: &T,
    ) -> SyncResult<SyncQueueItem> {
        let item = SyncQueueItem::new(note_id, operation, payload)?;

        // Held across the append so memory order matches the stored order.
        let mut items = self.items.lock().await;
        self.queue_store.append(&item).await?;
        items.push_back(item.clone());
        self.len.store(items.len(), Ordering::SeqCst);
        drop(items);

        tracing::debug!(
            item_id = %item.id,
            note_id = %note_id,
            operation = %operation,
            "Sync item queued"
        );
        Ok(item)
    }

    /// Queue `note` itself as the payload.
    pub async fn enqueue_note(
        &self,
        note: &Note,
        operation: SyncOperation,
    ) -> SyncResult<SyncQueueItem> {
        self.enqueue(note.id, operation, note).await
    }

    /// Pending items in drain order.
    pub async fn pending(&self) -> Vec<SyncQueueItem> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Whether an item for `note_id` is still waiting to be pushed.
    pub async fn has_pending(&self, note_id: &NoteId) -> bool {
        self.items
            .lock()
            .await
            .iter()
            .any(|item| item.note_id == *note_id)
    }

    /// Attempt the head item once.
    pub async fn process_next(&self) -> SyncResult<DrainOutcome> {
        let _gate = self.drain_gate.lock().await;

        let Some(item) = self.items.lock().await.front().cloned() else {
            return Ok(DrainOutcome::Idle);
        };

        let token = match self.session.valid_token().await {
            Ok(token) => token,
            Err(error) => {
                tracing::debug!(%error, "No usable session; sync drain skipped");
                return Ok(DrainOutcome::Unauthenticated);
            }
        };

        let result = {
            let _in_flight = InFlight::enter(&self.in_flight);
            self.push(&item, &token.access_token).await
        };

        match result {
            Ok(()) => {
                self.queue_store.remove(&item.id).await?;
                self.pop_head(&item.id).await;
                tracing::info!(
                    note_id = %item.note_id,
                    operation = %item.operation,
                    "Sync item pushed"
                );
                Ok(DrainOutcome::Synced {
                    note_id: item.note_id,
                    operation: item.operation,
                })
            }
            Err(error) => self.record_failure(&item, &error).await,
        }
    }

    /// Process items until the queue is empty, the session is missing or the
    /// head needs a later retry.
    pub async fn drain(&self) -> SyncResult<Vec<DrainOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.process_next().await?;
            let stop = matches!(
                outcome,
                DrainOutcome::Idle | DrainOutcome::Unauthenticated | DrainOutcome::Retrying { .. }
            );
            outcomes.push(outcome);
            if stop {
                return Ok(outcomes);
            }
        }
    }

    /// Spawn the interval drain loop on a child of `shutdown`. No-op while a
    /// loop is already running.
    pub fn start(self: &Arc<Self>, shutdown: &CancellationToken) {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let cancel = shutdown.child_token();
        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        tracing::info!(
            interval_ms = self.config.drain_interval.as_millis(),
            "Sync queue drain loop started"
        );
    }

    /// Stop the drain loop and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(error) = worker.handle.await {
                tracing::warn!(%error, "Sync drain task ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Snapshot that never waits on an in-flight push.
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            len: self.len.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            session_state: self.session.state(),
            dropped_total: self.dropped_total.load(Ordering::SeqCst),
            last_dropped: self.lock_last_dropped().clone(),
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.process_next() => outcome,
            };
            if let Err(error) = outcome {
                tracing::warn!(%error, "Sync drain step failed");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::debug!("Sync queue drain loop stopped");
    }

    async fn push(&self, item: &SyncQueueItem, access_token: &str) -> SyncResult<()> {
        let folder_id = self
            .remote
            .create_folder(access_token, &self.config.app_folder)
            .await?;
        let name = remote_file_name(&item.note_id);

        match item.operation {
            SyncOperation::Create | SyncOperation::Update => {
                let note = match self.records.get_by_id(&item.note_id).await? {
                    Some(note) => note,
                    None => item
                        .decode_payload::<Note>()
                        .map_err(|_| SyncError::MissingRecord(item.note_id.to_string()))?,
                };
                let body = serde_json::to_vec(&note)?;
                self.remote
                    .upload(access_token, &folder_id, &name, &body)
                    .await?;
                self.sync_state.save_base(&note).await?;
            }
            SyncOperation::Delete => {
                let removed = self.remote.remove(access_token, &folder_id, &name).await?;
                if !removed {
                    tracing::debug!(note_id = %item.note_id, "Remote copy already absent");
                }
                self.sync_state.clear_base(&item.note_id).await?;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &SyncQueueItem,
        error: &SyncError,
    ) -> SyncResult<DrainOutcome> {
        let retries = item.retries.saturating_add(1);

        if retries >= self.config.retry_ceiling {
            self.queue_store.remove(&item.id).await?;
            self.pop_head(&item.id).await;
            self.dropped_total.fetch_add(1, Ordering::SeqCst);
            *self.lock_last_dropped() = Some(DroppedItem {
                id: item.id.clone(),
                note_id: item.note_id,
                operation: item.operation,
                retries,
                error: error.to_string(),
                dropped_at: unix_timestamp_now(),
            });
            tracing::warn!(
                note_id = %item.note_id,
                operation = %item.operation,
                retries,
                %error,
                "Dropping sync item after repeated failures"
            );
            return Ok(DrainOutcome::Dropped { retries });
        }

        self.queue_store.set_retries(&item.id, retries).await?;
        if let Some(head) = self.items.lock().await.front_mut() {
            if head.id == item.id {
                head.retries = retries;
            }
        }
        tracing::warn!(
            note_id = %item.note_id,
            operation = %item.operation,
            retries,
            %error,
            "Sync push failed; will retry"
        );
        Ok(DrainOutcome::Retrying { retries })
    }

    async fn pop_head(&self, id: &str) {
        let mut items = self.items.lock().await;
        if items.front().is_some_and(|head| head.id == id) {
            items.pop_front();
        }
        self.len.store(items.len(), Ordering::SeqCst);
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_dropped(&self) -> MutexGuard<'_, Option<DroppedItem>> {
        self.last_dropped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{harness, Harness};
    use crate::auth::token_expiring_in;
    use crate::remote::MemoryRemoteStore;
    use crate::services::DatabaseService;
    use pretty_assertions::assert_eq;

    struct Fixture {
        queue: Arc<SyncQueue>,
        db: DatabaseService,
        remote: Arc<MemoryRemoteStore>,
        auth: Harness,
    }

    async fn fixture(db: DatabaseService, signed_in: bool) -> Fixture {
        let auth = harness(0, Duration::ZERO);
        if signed_in {
            auth.session.start(token_expiring_in(3600)).await.unwrap();
        }
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = SyncQueue::restore(
            Arc::new(db.clone()),
            remote.clone(),
            auth.session.clone(),
            SyncQueueConfig::default(),
        )
        .await
        .unwrap();
        Fixture {
            queue,
            db,
            remote,
            auth,
        }
    }

    async fn queued_note(f: &Fixture, title: &str) -> Note {
        let note = f.db.create_note("ws", title, "body").await.unwrap();
        f.queue
            .enqueue_note(&note, SyncOperation::Create)
            .await
            .unwrap();
        note
    }

    fn remote_note(f: &Fixture, id: &NoteId) -> Option<Note> {
        f.remote
            .file(DEFAULT_APP_FOLDER, &remote_file_name(id))
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn enqueue_persists_without_network() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        let note = queued_note(&f, "A").await;

        assert_eq!(f.queue.status().len, 1);
        assert_eq!(f.remote.upload_count(), 0);
        let stored = QueueStore::load_all(&f.db).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].note_id, note.id);
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        assert_eq!(f.queue.process_next().await.unwrap(), DrainOutcome::Idle);
    }

    #[tokio::test]
    async fn unauthenticated_drain_is_a_no_op() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), false).await;
        queued_note(&f, "A").await;

        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Unauthenticated
        );
        assert_eq!(f.remote.upload_count(), 0);
        let pending = f.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retries, 0);
    }

    #[tokio::test]
    async fn successful_push_uploads_and_records_base() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        let note = queued_note(&f, "A").await;

        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Synced {
                note_id: note.id,
                operation: SyncOperation::Create,
            }
        );
        assert_eq!(remote_note(&f, &note.id), Some(note.clone()));
        assert_eq!(f.db.get_base(&note.id).await.unwrap(), Some(note));
        assert_eq!(f.queue.status().len, 0);
        assert!(QueueStore::load_all(&f.db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_uses_current_note_not_enqueued_snapshot() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        let note = queued_note(&f, "A").await;
        let edited = f
            .db
            .update_note(&note.id, None, Some("edited"))
            .await
            .unwrap();

        f.queue.process_next().await.unwrap();
        assert_eq!(remote_note(&f, &note.id).unwrap().content, edited.content);
    }

    #[tokio::test]
    async fn failing_head_keeps_order_and_counts_retries() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        let first = queued_note(&f, "A").await;
        let second = queued_note(&f, "B").await;
        let third = queued_note(&f, "C").await;

        f.remote.fail_next(2);
        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Retrying { retries: 1 }
        );
        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Retrying { retries: 2 }
        );

        let pending = f.queue.pending().await;
        let order: Vec<NoteId> = pending.iter().map(|item| item.note_id).collect();
        assert_eq!(order, vec![first.id, second.id, third.id]);
        assert_eq!(pending[0].retries, 2);
        assert_eq!(QueueStore::load_all(&f.db).await.unwrap()[0].retries, 2);

        let outcomes = f.queue.drain().await.unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.last(), Some(&DrainOutcome::Idle));
        assert_eq!(f.remote.upload_count(), 3);
        assert_eq!(f.queue.status().dropped_total, 0);
    }

    #[tokio::test]
    async fn exhausted_item_is_dropped_and_later_items_proceed() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        let doomed = queued_note(&f, "A").await;
        let survivor = queued_note(&f, "B").await;

        f.remote.fail_next(3);
        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Retrying { retries: 1 }
        );
        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Retrying { retries: 2 }
        );
        assert_eq!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Dropped { retries: 3 }
        );

        let status = f.queue.status();
        assert_eq!(status.len, 1);
        assert_eq!(status.dropped_total, 1);
        let dropped = status.last_dropped.unwrap();
        assert_eq!(dropped.note_id, doomed.id);
        assert_eq!(dropped.retries, 3);

        assert!(matches!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Synced { note_id, .. } if note_id == survivor.id
        ));
        assert!(remote_note(&f, &doomed.id).is_none());
    }

    #[tokio::test]
    async fn delete_removes_remote_file_and_base() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        let note = queued_note(&f, "A").await;
        f.queue.process_next().await.unwrap();
        assert!(remote_note(&f, &note.id).is_some());

        let tombstone = f.db.delete_note(&note.id).await.unwrap();
        f.queue
            .enqueue_note(&tombstone, SyncOperation::Delete)
            .await
            .unwrap();
        f.queue.process_next().await.unwrap();

        assert!(remote_note(&f, &note.id).is_none());
        assert_eq!(f.db.get_base(&note.id).await.unwrap(), None);

        // Already gone remotely.
        f.queue
            .enqueue_note(&tombstone, SyncOperation::Delete)
            .await
            .unwrap();
        assert!(matches!(
            f.queue.process_next().await.unwrap(),
            DrainOutcome::Synced { .. }
        ));
    }

    #[tokio::test]
    async fn pending_items_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.db");

        let f = fixture(DatabaseService::open_path(&path).unwrap(), false).await;
        let older = f.db.create_note("ws", "Older", "a").await.unwrap();
        let newer = f.db.create_note("ws", "Newer", "b").await.unwrap();
        // Enqueue the newer note first so id order and enqueue order disagree.
        for _ in 0..10 {
            for note in [&newer, &older] {
                f.queue
                    .enqueue_note(note, SyncOperation::Update)
                    .await
                    .unwrap();
            }
        }
        let before: Vec<String> = f
            .queue
            .pending()
            .await
            .into_iter()
            .map(|item| item.id)
            .collect();
        drop(f);

        let f = fixture(DatabaseService::open_path(&path).unwrap(), true).await;
        let after: Vec<String> = f
            .queue
            .pending()
            .await
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(after, before);
        assert_eq!(f.queue.pending().await[0].note_id, newer.id);
        assert_eq!(f.queue.status().len, 20);

        f.queue.drain().await.unwrap();
        assert_eq!(f.remote.upload_count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_loop_pushes_one_item_per_tick() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        queued_note(&f, "A").await;
        queued_note(&f, "B").await;

        f.queue.start(&f.auth.shutdown);
        f.queue.start(&f.auth.shutdown);
        assert!(f.queue.status().running);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.remote.upload_count(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.remote.upload_count(), 2);
        assert_eq!(f.queue.status().len, 0);

        f.queue.stop().await;
        f.queue.stop().await;
        assert!(!f.queue.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_token_stops_the_loop() {
        let f = fixture(DatabaseService::open_in_memory().unwrap(), true).await;
        f.queue.start(&f.auth.shutdown);

        f.auth.shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!f.queue.status().running);
        f.queue.stop().await;
    }
}
