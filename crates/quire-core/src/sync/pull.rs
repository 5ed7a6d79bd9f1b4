//! One-shot pull of remote notes into the local store.

use std::sync::Arc;

use super::{detect_conflict, ConflictResolver, SyncQueue, SyncResult};
use crate::auth::SessionManager;
use crate::models::{note_id_from_file_name, Note, SyncOperation, NOTE_FILE_SUFFIX};
use crate::remote::{ListQuery, RemoteFile, RemoteStore};
use crate::services::{LocalRecordStore, SyncStateStore};

/// Counts from a single pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    /// Resolved versions queued for upload because they differ from remote.
    pub pushed_back: usize,
    pub skipped: usize,
}

pub struct RemotePuller {
    records: Arc<dyn LocalRecordStore>,
    sync_state: Arc<dyn SyncStateStore>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<SessionManager>,
    queue: Arc<SyncQueue>,
    resolver: ConflictResolver,
}

impl RemotePuller {
    pub fn new<S>(
        store: Arc<S>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<SessionManager>,
        queue: Arc<SyncQueue>,
        resolver: ConflictResolver,
    ) -> Self
    where
        S: LocalRecordStore + SyncStateStore + 'static,
    {
        Self {
            records: store.clone(),
            sync_state: store,
            remote,
            session,
            queue,
            resolver,
        }
    }

    /// Fetch every note file in the app folder and reconcile it with the
    /// local copy and the last-synced base.
    pub async fn pull_once(&self) -> SyncResult<PullReport> {
        let token = self.session.valid_token().await?;
        let access_token = token.access_token.as_str();
        let folder_id = self
            .remote
            .create_folder(access_token, &self.queue.config().app_folder)
            .await?;

        let mut report = PullReport::default();
        let query = ListQuery::in_folder(folder_id).name_contains(NOTE_FILE_SUFFIX);
        for file in self.remote.list(access_token, &query).await? {
            let Some(remote) = self.fetch(access_token, &file).await? else {
                report.skipped += 1;
                continue;
            };
            report.fetched += 1;
            self.reconcile(remote, &mut report).await?;
        }

        tracing::info!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            conflicts = report.conflicts,
            pushed_back = report.pushed_back,
            skipped = report.skipped,
            "Remote pull finished"
        );
        Ok(report)
    }

    async fn fetch(&self, access_token: &str, file: &RemoteFile) -> SyncResult<Option<Note>> {
        let Some(id) = note_id_from_file_name(&file.name) else {
            tracing::debug!(name = %file.name, "Ignoring non-note remote file");
            return Ok(None);
        };

        let bytes = self.remote.download(access_token, &file.id).await?;
        match serde_json::from_slice::<Note>(&bytes) {
            Ok(note) if note.id == id => Ok(Some(note)),
            Ok(note) => {
                tracing::warn!(name = %file.name, note_id = %note.id, "Remote note id does not match its file name");
                Ok(None)
            }
            Err(error) => {
                tracing::warn!(name = %file.name, %error, "Skipping undecodable remote note");
                Ok(None)
            }
        }
    }

    async fn reconcile(&self, remote: Note, report: &mut PullReport) -> SyncResult<()> {
        let Some(local) = self.records.get_by_id(&remote.id).await? else {
            self.records.save(&remote).await?;
            self.sync_state.save_base(&remote).await?;
            report.created += 1;
            return Ok(());
        };

        if local == remote {
            self.sync_state.save_base(&remote).await?;
            report.unchanged += 1;
            return Ok(());
        }

        let base = self.sync_state.get_base(&remote.id).await?;
        if detect_conflict(&local, &remote, base.as_ref()) {
            self.sync_state
                .record_conflict(
                    &remote.id,
                    local.updated_at,
                    remote.updated_at,
                    self.resolver.strategy().as_str(),
                )
                .await?;
            report.conflicts += 1;
            tracing::info!(
                note_id = %remote.id,
                strategy = %self.resolver.strategy(),
                "Resolving sync conflict"
            );
        }

        let resolved = self.resolver.resolve(&local, &remote, base.as_ref());
        if resolved != local {
            self.records.save(&resolved).await?;
            report.updated += 1;
        }
        if resolved == remote {
            self.sync_state.save_base(&remote).await?;
        } else if self.queue.has_pending(&resolved.id).await {
            // The queued item uploads the current local copy when it drains.
            tracing::debug!(note_id = %resolved.id, "Push already queued");
        } else {
            self.queue
                .enqueue_note(&resolved, SyncOperation::Update)
                .await?;
            report.pushed_back += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::testing::harness;
    use crate::auth::token_expiring_in;
    use crate::models::remote_file_name;
    use crate::remote::MemoryRemoteStore;
    use crate::services::DatabaseService;
    use crate::sync::{ConflictStrategy, SyncError, SyncQueueConfig, DEFAULT_APP_FOLDER};
    use pretty_assertions::assert_eq;

    struct Fixture {
        puller: RemotePuller,
        queue: Arc<SyncQueue>,
        db: DatabaseService,
        remote: Arc<MemoryRemoteStore>,
    }

    async fn fixture(strategy: ConflictStrategy, signed_in: bool) -> Fixture {
        let auth = harness(0, Duration::ZERO);
        if signed_in {
            auth.session.start(token_expiring_in(3600)).await.unwrap();
        }
        let db = DatabaseService::open_in_memory().unwrap();
        let store = Arc::new(db.clone());
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = SyncQueue::restore(
            store.clone(),
            remote.clone(),
            auth.session.clone(),
            SyncQueueConfig::default(),
        )
        .await
        .unwrap();
        let puller = RemotePuller::new(
            store,
            remote.clone(),
            auth.session.clone(),
            queue.clone(),
            ConflictResolver::new(strategy),
        );
        Fixture {
            puller,
            queue,
            db,
            remote,
        }
    }

    fn put_remote(f: &Fixture, note: &Note) {
        f.remote.put_file(
            DEFAULT_APP_FOLDER,
            &remote_file_name(&note.id),
            &serde_json::to_vec(note).unwrap(),
        );
    }

    #[tokio::test]
    async fn remote_only_note_is_created_locally() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, true).await;
        let note = Note::new("ws", "From elsewhere", "hello");
        put_remote(&f, &note);

        let report = f.puller.pull_once().await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.created, 1);
        assert_eq!(f.db.get_note(&note.id).await.unwrap(), Some(note.clone()));
        assert_eq!(f.db.get_base(&note.id).await.unwrap(), Some(note));
        assert_eq!(f.queue.status().len, 0);
    }

    #[tokio::test]
    async fn remote_edit_fast_forwards_local() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, true).await;
        let base = f.db.create_note("ws", "A", "x").await.unwrap();
        f.db.save_base(&base).await.unwrap();

        let mut remote = base.clone();
        remote.content = "remote edit".to_string();
        remote.updated_at += 10;
        put_remote(&f, &remote);

        let report = f.puller.pull_once().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.pushed_back, 0);
        assert_eq!(f.db.get_note(&base.id).await.unwrap(), Some(remote));
    }

    #[tokio::test]
    async fn divergent_edits_are_merged_logged_and_pushed_back() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, true).await;
        let base = f.db.create_note("ws", "A", "x").await.unwrap();
        f.db.save_base(&base).await.unwrap();
        let local = f
            .db
            .update_note(&base.id, None, Some("a much longer local edit"))
            .await
            .unwrap();

        let mut remote = base.clone();
        remote.title = "Remote title".to_string();
        remote.content = "short".to_string();
        remote.updated_at = local.updated_at + 1;
        put_remote(&f, &remote);

        let report = f.puller.pull_once().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.pushed_back, 1);

        let merged = f.db.get_note(&base.id).await.unwrap().unwrap();
        assert_eq!(merged.title, "Remote title");
        assert_eq!(merged.content, "a much longer local edit");

        let conflicts = f.db.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].strategy, "three_way_merge");

        let pending = f.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, SyncOperation::Update);
        assert_eq!(pending[0].note_id, base.id);
    }

    #[tokio::test]
    async fn repeated_pulls_do_not_queue_duplicate_pushes() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, true).await;
        let base = f.db.create_note("ws", "A", "x").await.unwrap();
        f.db.save_base(&base).await.unwrap();
        let local = f
            .db
            .update_note(&base.id, None, Some("local edit waiting to upload"))
            .await
            .unwrap();
        f.queue
            .enqueue_note(&local, SyncOperation::Update)
            .await
            .unwrap();

        let mut remote = base.clone();
        remote.title = "Remote title".to_string();
        remote.updated_at = local.updated_at + 1;
        put_remote(&f, &remote);

        for _ in 0..3 {
            let report = f.puller.pull_once().await.unwrap();
            assert_eq!(report.pushed_back, 0);
        }

        let pending = f.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].note_id, base.id);

        // The queued item carries the merged note when it drains.
        f.queue.drain().await.unwrap();
        let uploaded: Note = serde_json::from_slice(
            &f.remote
                .file(DEFAULT_APP_FOLDER, &remote_file_name(&base.id))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(uploaded.title, "Remote title");
        assert_eq!(uploaded.content, "local edit waiting to upload");
    }

    #[tokio::test]
    async fn identical_copies_are_unchanged() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, true).await;
        let note = f.db.create_note("ws", "A", "x").await.unwrap();
        put_remote(&f, &note);

        let report = f.puller.pull_once().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(f.db.get_base(&note.id).await.unwrap(), Some(note));
    }

    #[tokio::test]
    async fn undecodable_and_foreign_files_are_skipped() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, true).await;
        let good = Note::new("ws", "ok", "fine");
        put_remote(&f, &good);
        f.remote.put_file(
            DEFAULT_APP_FOLDER,
            &remote_file_name(&crate::models::NoteId::new()),
            b"{not json",
        );
        f.remote.put_file(DEFAULT_APP_FOLDER, "notes.json.bak", b"{}");
        f.remote.put_file(DEFAULT_APP_FOLDER, "readme.txt", b"hi");

        let report = f.puller.pull_once().await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.created, 1);
        // `readme.txt` is filtered out by the listing query itself.
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn pull_requires_a_session() {
        let f = fixture(ConflictStrategy::ThreeWayMerge, false).await;
        assert!(matches!(
            f.puller.pull_once().await,
            Err(SyncError::Auth(error)) if error.is_session_missing()
        ));
    }
}
