//! Reconciliation of local records against remote snapshots.
//!
//! # Responsibility
//! - Classify each local/remote pair and apply fast-forwards.
//! - Hold conflict artifacts until the caller supplies a resolution.
//! - Track the last common sync point per record.
//!
//! # Invariants
//! - A conflict is never resolved automatically; neither side is written
//!   until `resolve` is called.
//! - Operations on one id run under that id's lock and never interleave.
//! - The engine performs no network I/O.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use inkpad_common::{Error, Record, RecordId, Result};
use inkpad_storage::{get_json, keys::CONFLICTS_COLLECTION, set_json, RecordStore};

use crate::conflict::{classify, ConflictResolver, Divergence, Resolution, SyncConflict};
use crate::state::SyncEntry;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Persist unresolved conflicts so they survive a restart.
    pub queue_conflicts: bool,
}

/// Result of reconciling one remote snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No local copy existed; the remote was stored.
    Adopted(Record),
    /// The record was deleted here after the last sync and the remote has
    /// not changed since; nothing was written.
    DeletedLocally,
    /// Both sides hold the same content.
    Equivalent,
    /// The remote was newer and replaced the local copy.
    FastForwardRemote(Record),
    /// The local copy is newer and should be pushed, then confirmed with
    /// [`SyncEngine::mark_pushed`].
    FastForwardLocal(Record),
    /// Both sides changed; awaiting [`SyncEngine::resolve`].
    Conflict(SyncConflict),
    /// A conflict was detected and resolved in the same call.
    Resolved(SyncConflict),
}

/// Main sync engine for reconciling records.
pub struct SyncEngine {
    records: RecordStore,
    config: SyncConfig,
    conflicts: RwLock<BTreeMap<RecordId, SyncConflict>>,
    locks: Mutex<HashMap<RecordId, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(records: RecordStore, config: SyncConfig) -> Self {
        Self {
            records,
            config,
            conflicts: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Reconcile one remote snapshot against the local store.
    ///
    /// # Errors
    /// - `SyncConflict` if a conflict for this id is still pending
    /// - `Validation` if the remote snapshot is malformed
    /// - storage errors from reading or writing the local copy
    pub async fn reconcile(&self, remote: &Record) -> Result<ReconcileOutcome> {
        remote.validate()?;
        let _guard = self.lock_for(remote.id()).await;
        self.reconcile_locked(remote).await
    }

    /// Reconcile, letting `resolver` decide any conflict on the spot.
    pub async fn reconcile_with(
        &self,
        remote: &Record,
        resolver: &dyn ConflictResolver,
    ) -> Result<ReconcileOutcome> {
        remote.validate()?;
        let _guard = self.lock_for(remote.id()).await;

        match self.reconcile_locked(remote).await? {
            ReconcileOutcome::Conflict(conflict) => {
                let resolution = resolver.decide(&conflict);
                debug!("Resolver chose {:?} for {}", resolution, conflict.id());
                let resolved = self.resolve_locked(conflict.id(), resolution).await?;
                Ok(ReconcileOutcome::Resolved(resolved))
            }
            outcome => Ok(outcome),
        }
    }

    /// Reconcile a batch; one result per snapshot, in order.
    pub async fn reconcile_all(&self, remotes: &[Record]) -> Vec<Result<ReconcileOutcome>> {
        let mut results = Vec::with_capacity(remotes.len());
        for remote in remotes {
            results.push(self.reconcile(remote).await);
        }
        results
    }

    /// Apply the caller's decision for a pending conflict.
    ///
    /// Returns the consumed artifact with its resolved state.
    ///
    /// # Errors
    /// - `NotFound` if no conflict is pending for `id`
    /// - `SyncConflict` if the local copy changed after detection; the
    ///   pending artifact is refreshed with it and nothing is written
    pub async fn resolve(&self, id: &RecordId, resolution: Resolution) -> Result<SyncConflict> {
        let _guard = self.lock_for(id).await;
        self.resolve_locked(id, resolution).await
    }

    /// Confirm that a fast-forward-local winner reached the remote.
    ///
    /// # Errors
    /// - `SyncConflict` if a conflict for this id is still pending
    pub async fn mark_pushed(&self, id: &RecordId) -> Result<()> {
        let _guard = self.lock_for(id).await;
        self.ensure_no_conflict(id).await?;

        let store = self.records.store().as_ref();
        let mut entry = SyncEntry::load(store, id).await?;
        entry.mark_synced(Utc::now());
        entry.save(store).await?;
        debug!("Marked {} as pushed", id);
        Ok(())
    }

    /// Unresolved conflicts, by id.
    pub async fn pending_conflicts(&self) -> Vec<SyncConflict> {
        self.conflicts.read().await.values().cloned().collect()
    }

    pub async fn has_conflict(&self, id: &RecordId) -> bool {
        self.conflicts.read().await.contains_key(id)
    }

    /// Load conflicts queued by an earlier session.
    ///
    /// Returns how many were restored. Ids that already have a pending
    /// conflict keep the in-memory one.
    pub async fn restore_queued(&self) -> Result<usize> {
        let queued: Vec<SyncConflict> =
            get_json(self.records.store().as_ref(), CONFLICTS_COLLECTION)
                .await?
                .unwrap_or_default();

        let mut conflicts = self.conflicts.write().await;
        let mut restored = 0;
        for conflict in queued.into_iter().filter(|c| !c.is_resolved()) {
            if conflicts.contains_key(conflict.id()) {
                continue;
            }
            conflicts.insert(conflict.id().clone(), conflict);
            restored += 1;
        }

        if restored > 0 {
            info!("Restored {} queued conflicts", restored);
        }
        Ok(restored)
    }

    async fn reconcile_locked(&self, remote: &Record) -> Result<ReconcileOutcome> {
        let id = remote.id();
        self.ensure_no_conflict(id).await?;

        let store = self.records.store().as_ref();
        let mut entry = SyncEntry::load(store, id).await?;

        let Some(local) = self.records.get_record(id).await? else {
            if let Some(synced_at) = entry.last_synced_at {
                if remote.updated_at() <= synced_at {
                    debug!("Skipping {}, deleted locally since last sync", id);
                    return Ok(ReconcileOutcome::DeletedLocally);
                }
            }
            self.records.save_record(remote).await?;
            entry.mark_synced(Utc::now());
            entry.save(store).await?;
            debug!("Adopted remote record {}", id);
            return Ok(ReconcileOutcome::Adopted(remote.clone()));
        };

        match classify(&local, remote, entry.last_synced_at) {
            Divergence::Equivalent => {
                if entry.is_conflicted() {
                    entry.clear_conflict();
                    entry.save(store).await?;
                }
                debug!("Record {} is equivalent on both sides", id);
                Ok(ReconcileOutcome::Equivalent)
            }
            Divergence::RemoteAhead => {
                self.records.save_record(remote).await?;
                entry.mark_synced(Utc::now());
                entry.save(store).await?;
                debug!("Fast-forwarded {} to remote", id);
                Ok(ReconcileOutcome::FastForwardRemote(remote.clone()))
            }
            Divergence::LocalAhead => {
                debug!("Local copy of {} is ahead", id);
                Ok(ReconcileOutcome::FastForwardLocal(local))
            }
            Divergence::Diverged => {
                let conflict = SyncConflict::new(local, remote.clone());
                entry.mark_conflicted();
                entry.save(store).await?;
                self.conflicts
                    .write()
                    .await
                    .insert(id.clone(), conflict.clone());
                self.persist_queue().await?;
                warn!("Sync conflict detected for {}", id);
                Ok(ReconcileOutcome::Conflict(conflict))
            }
        }
    }

    async fn resolve_locked(&self, id: &RecordId, resolution: Resolution) -> Result<SyncConflict> {
        let conflict = self
            .conflicts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No pending conflict for {}", id)))?;

        if let Some(current) = self.records.get_record(id).await? {
            if current != conflict.local_record {
                let mut refreshed = conflict;
                refreshed.local_record = current;
                self.conflicts.write().await.insert(id.clone(), refreshed);
                self.persist_queue().await?;
                warn!("Local copy of {} changed since the conflict was detected", id);
                return Err(Error::SyncConflict { id: id.to_string() });
            }
        }

        self.records.save_record(conflict.chosen(resolution)).await?;

        let store = self.records.store().as_ref();
        let mut entry = SyncEntry::load(store, id).await?;
        entry.mark_synced(Utc::now());
        entry.save(store).await?;

        self.conflicts.write().await.remove(id);
        self.persist_queue().await?;

        info!("Resolved conflict for {} with {:?}", id, resolution);
        Ok(conflict.into_resolved(resolution))
    }

    async fn ensure_no_conflict(&self, id: &RecordId) -> Result<()> {
        if self.has_conflict(id).await {
            return Err(Error::SyncConflict { id: id.to_string() });
        }
        Ok(())
    }

    async fn persist_queue(&self) -> Result<()> {
        if !self.config.queue_conflicts {
            return Ok(());
        }
        let pending = self.pending_conflicts().await;
        set_json(self.records.store().as_ref(), CONFLICTS_COLLECTION, &pending).await
    }

    async fn lock_for(&self, id: &RecordId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only the map references are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictState;
    use chrono::{DateTime, Duration};
    use inkpad_common::ErrorKind;
    use inkpad_storage::{KeyValueStore, MemoryStore};

    fn engine(queue_conflicts: bool) -> (Arc<MemoryStore>, SyncEngine) {
        let store = Arc::new(MemoryStore::new());
        let records = RecordStore::new(store.clone());
        (store, SyncEngine::new(records, SyncConfig { queue_conflicts }))
    }

    fn edited(record: &Record, body: &str, at: DateTime<Utc>) -> Record {
        Record::from_parts(
            record.id().clone(),
            record.title(),
            body,
            record.tags().to_vec(),
            record.created_at(),
            at,
        )
        .unwrap()
    }

    /// Stores `base` locally and records a sync point just after it.
    async fn synced_base(engine: &SyncEngine) -> Record {
        let base = Record::new("title", "body");
        assert!(matches!(
            engine.reconcile(&base).await.unwrap(),
            ReconcileOutcome::Adopted(_)
        ));
        base
    }

    async fn last_synced(engine: &SyncEngine, id: &RecordId) -> Option<DateTime<Utc>> {
        SyncEntry::load(engine.records().store().as_ref(), id)
            .await
            .unwrap()
            .last_synced_at
    }

    #[tokio::test]
    async fn test_adopts_unknown_remote() {
        let (_, engine) = engine(false);
        let remote = Record::new("new", "from elsewhere");

        let outcome = engine.reconcile(&remote).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Adopted(remote.clone()));
        assert_eq!(
            engine.records().require_record(remote.id()).await.unwrap(),
            remote
        );
        assert!(last_synced(&engine, remote.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_equivalent_ignores_timestamps_and_writes_nothing() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let before = last_synced(&engine, base.id()).await;

        let remote = edited(&base, "body", Utc::now() + Duration::seconds(60));
        assert_eq!(
            engine.reconcile(&remote).await.unwrap(),
            ReconcileOutcome::Equivalent
        );

        let stored = engine.records().require_record(base.id()).await.unwrap();
        assert_eq!(stored.updated_at(), base.updated_at());
        assert_eq!(last_synced(&engine, base.id()).await, before);
    }

    #[tokio::test]
    async fn test_remote_ahead_fast_forwards() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;

        let remote = edited(&base, "theirs", Utc::now() + Duration::seconds(60));
        let outcome = engine.reconcile(&remote).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::FastForwardRemote(remote.clone()));
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "theirs"
        );
        assert!(engine.pending_conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn test_local_ahead_waits_for_push_confirmation() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let before = last_synced(&engine, base.id()).await;

        let local = edited(&base, "mine", Utc::now() + Duration::seconds(60));
        engine.records().save_record(&local).await.unwrap();

        let outcome = engine.reconcile(&base).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::FastForwardLocal(local.clone()));
        assert_eq!(last_synced(&engine, base.id()).await, before);

        engine.mark_pushed(base.id()).await.unwrap();
        let after = last_synced(&engine, base.id()).await;
        assert!(after.is_some());
        assert!(after >= before);
    }

    #[tokio::test]
    async fn test_both_ahead_raises_exactly_one_conflict() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);

        let local = edited(&base, "mine", later);
        engine.records().save_record(&local).await.unwrap();
        let remote = edited(&base, "theirs", later + Duration::seconds(1));

        let outcome = engine.reconcile(&remote).await.unwrap();
        let conflict = match outcome {
            ReconcileOutcome::Conflict(conflict) => conflict,
            other => panic!("expected conflict, got {other:?}"),
        };
        assert_eq!(conflict.state, ConflictState::Unresolved);
        assert_eq!(conflict.local_record, local);
        assert_eq!(conflict.remote_record, remote);

        // Nothing was written and a second pass does not duplicate.
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "mine"
        );
        let again = engine.reconcile(&remote).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::SyncConflict);
        assert_eq!(engine.pending_conflicts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_never_synced_pair_conflicts() {
        let (_, engine) = engine(false);
        let local = Record::new("title", "mine");
        engine.records().save_record(&local).await.unwrap();
        let remote = edited(&local, "theirs", local.updated_at());

        assert!(matches!(
            engine.reconcile(&remote).await.unwrap(),
            ReconcileOutcome::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_resolve_remote_writes_and_consumes() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);
        engine
            .records()
            .save_record(&edited(&base, "mine", later))
            .await
            .unwrap();
        let remote = edited(&base, "theirs", later);
        engine.reconcile(&remote).await.unwrap();

        let resolved = engine.resolve(base.id(), Resolution::Remote).await.unwrap();
        assert_eq!(resolved.state, ConflictState::ResolvedRemote);
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "theirs"
        );
        assert!(engine.pending_conflicts().await.is_empty());

        // Same remote again is now equivalent.
        assert_eq!(
            engine.reconcile(&remote).await.unwrap(),
            ReconcileOutcome::Equivalent
        );
    }

    #[tokio::test]
    async fn test_resolve_refuses_local_edited_after_detection() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);
        engine
            .records()
            .save_record(&edited(&base, "mine", later))
            .await
            .unwrap();
        engine
            .reconcile(&edited(&base, "theirs", later))
            .await
            .unwrap();

        let newer = edited(&base, "mine, edited after detection", later + Duration::seconds(5));
        engine.records().save_record(&newer).await.unwrap();

        let err = engine.resolve(base.id(), Resolution::Local).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyncConflict);
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap(),
            newer
        );
        let pending = engine.pending_conflicts().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_record, newer);

        let resolved = engine.resolve(base.id(), Resolution::Local).await.unwrap();
        assert_eq!(resolved.local_record, newer);
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "mine, edited after detection"
        );
    }

    #[tokio::test]
    async fn test_resolve_remote_keeps_later_local_edit() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);
        engine
            .records()
            .save_record(&edited(&base, "mine", later))
            .await
            .unwrap();
        engine
            .reconcile(&edited(&base, "theirs", later))
            .await
            .unwrap();
        let newer = edited(&base, "mine again", later + Duration::seconds(5));
        engine.records().save_record(&newer).await.unwrap();

        let err = engine.resolve(base.id(), Resolution::Remote).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyncConflict);
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "mine again"
        );
    }

    #[tokio::test]
    async fn test_local_deletion_is_not_undone_by_stale_remote() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        engine.records().delete_record(base.id()).await.unwrap();

        assert_eq!(
            engine.reconcile(&base).await.unwrap(),
            ReconcileOutcome::DeletedLocally
        );
        assert!(engine.records().get_record(base.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_edit_after_local_deletion_is_adopted() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        engine.records().delete_record(base.id()).await.unwrap();

        let remote = edited(&base, "theirs", Utc::now() + Duration::seconds(60));
        assert_eq!(
            engine.reconcile(&remote).await.unwrap(),
            ReconcileOutcome::Adopted(remote.clone())
        );
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let (_, engine) = engine(false);
        for n in 0..16 {
            engine.reconcile(&Record::new(format!("note {n}"), "")).await.unwrap();
        }
        assert!(engine.locks.lock().await.len() <= 1);
    }

    #[tokio::test]
    async fn test_resolve_without_conflict_is_not_found() {
        let (_, engine) = engine(false);
        let err = engine
            .resolve(&RecordId::generate(), Resolution::Local)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reconcile_with_resolver() {
        let (_, engine) = engine(false);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);
        engine
            .records()
            .save_record(&edited(&base, "mine", later))
            .await
            .unwrap();
        let remote = edited(&base, "theirs", later);

        let keep_local = |_: &SyncConflict| Resolution::Local;
        let outcome = engine.reconcile_with(&remote, &keep_local).await.unwrap();

        match outcome {
            ReconcileOutcome::Resolved(conflict) => {
                assert_eq!(conflict.state, ConflictState::ResolvedLocal)
            }
            other => panic!("expected resolution, got {other:?}"),
        }
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "mine"
        );
        assert!(!engine.has_conflict(base.id()).await);
    }

    #[tokio::test]
    async fn test_invalid_remote_rejected() {
        let (store, engine) = engine(false);
        let json = r#"{"id":"n1","title":"t","body":"b","tags":[],
            "createdAt":"2024-01-02T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let remote: Record = serde_json::from_str(json).unwrap();

        let err = engine.reconcile(&remote).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queued_conflicts_survive_restart() {
        let (store, engine) = engine(true);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);
        engine
            .records()
            .save_record(&edited(&base, "mine", later))
            .await
            .unwrap();
        engine
            .reconcile(&edited(&base, "theirs", later))
            .await
            .unwrap();

        let restarted = SyncEngine::new(
            RecordStore::new(store.clone()),
            SyncConfig {
                queue_conflicts: true,
            },
        );
        assert_eq!(restarted.restore_queued().await.unwrap(), 1);
        assert!(restarted.has_conflict(base.id()).await);

        restarted
            .resolve(base.id(), Resolution::Local)
            .await
            .unwrap();
        let queued: Vec<SyncConflict> = get_json(store.as_ref(), CONFLICTS_COLLECTION)
            .await
            .unwrap()
            .unwrap();
        assert!(queued.is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_not_queued_by_default() {
        let (store, engine) = engine(false);
        let base = synced_base(&engine).await;
        let later = Utc::now() + Duration::seconds(60);
        engine
            .records()
            .save_record(&edited(&base, "mine", later))
            .await
            .unwrap();
        engine
            .reconcile(&edited(&base, "theirs", later))
            .await
            .unwrap();

        assert!(store.get(CONFLICTS_COLLECTION).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_of_one_id_serialize() {
        let (_, engine) = engine(false);
        let engine = Arc::new(engine);
        let remote = Record::new("shared", "body");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let remote = remote.clone();
                tokio::spawn(async move { engine.reconcile(&remote).await })
            })
            .collect();

        let mut adopted = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                ReconcileOutcome::Adopted(_) => adopted += 1,
                ReconcileOutcome::Equivalent => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(adopted, 1);
        assert_eq!(engine.records().list_ids().await.unwrap().len(), 1);
    }
}
