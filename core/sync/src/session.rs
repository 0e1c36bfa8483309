//! One sync pass against a remote source.
//!
//! The engine only reconciles; a session fetches snapshots, feeds them to
//! the engine, and pushes local winners back, with every remote call wrapped
//! in the retry policy.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use inkpad_common::{Error, Record, RecordId, Result};

use crate::conflict::{ConflictResolver, ConflictState, SyncConflict};
use crate::engine::{ReconcileOutcome, SyncEngine};
use crate::retry::RetryExecutor;

/// A source of remote snapshots.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Every record the remote holds.
    async fn fetch_all(&self) -> Result<Vec<Record>>;

    /// One record; `None` if the remote does not have it.
    async fn fetch(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Store `record` on the remote, replacing any previous version.
    async fn push(&self, record: &Record) -> Result<()>;
}

/// Summary of a sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Remote records that were new locally.
    pub adopted: usize,
    /// Records already identical on both sides.
    pub equivalent: usize,
    /// Remote records skipped because they were deleted here.
    pub deleted_locally: usize,
    /// Local records replaced by a newer remote.
    pub pulled: usize,
    /// Local records pushed to the remote.
    pub pushed: usize,
    /// Conflicts decided by a resolver during the pass.
    pub resolved: usize,
    /// Ids left with an unresolved conflict.
    pub conflicts: Vec<RecordId>,
    /// Ids whose reconciliation or push failed, with the error.
    pub failed: Vec<(RecordId, String)>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.failed.is_empty()
    }
}

/// Coordinates the engine with a remote source.
pub struct SyncSession {
    engine: Arc<SyncEngine>,
    remote: Arc<dyn RemoteSource>,
    retry: RetryExecutor,
}

impl SyncSession {
    pub fn new(engine: Arc<SyncEngine>, remote: Arc<dyn RemoteSource>, retry: RetryExecutor) -> Self {
        Self {
            engine,
            remote,
            retry,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Run one pass, leaving conflicts for the caller.
    ///
    /// # Errors
    /// Only a failed `fetch_all` aborts the pass; per-record failures are
    /// collected in the report.
    pub async fn run(&self) -> Result<SyncReport> {
        self.run_inner(None).await
    }

    /// Run one pass, deciding conflicts with `resolver` as they appear.
    pub async fn run_with(&self, resolver: &dyn ConflictResolver) -> Result<SyncReport> {
        self.run_inner(Some(resolver)).await
    }

    /// Push the outcome of a resolved conflict.
    ///
    /// A local win is pushed and confirmed; a remote win needs no push.
    ///
    /// # Errors
    /// - `InvalidInput` if the conflict is still unresolved
    pub async fn push_resolution(&self, conflict: &SyncConflict) -> Result<()> {
        match conflict.state {
            ConflictState::Unresolved => Err(Error::InvalidInput(format!(
                "Conflict for {} is not resolved",
                conflict.id()
            ))),
            ConflictState::ResolvedRemote => Ok(()),
            ConflictState::ResolvedLocal => self.push_record(&conflict.local_record).await,
        }
    }

    async fn run_inner(&self, resolver: Option<&dyn ConflictResolver>) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let remotes = self.retry.execute(|| self.remote.fetch_all()).await?;
        debug!("Fetched {} records from {}", remotes.len(), self.remote.name());
        let remote_ids: HashSet<RecordId> = remotes.iter().map(|r| r.id().clone()).collect();

        for remote in &remotes {
            let outcome = match resolver {
                Some(resolver) => self.engine.reconcile_with(remote, resolver).await,
                None => self.engine.reconcile(remote).await,
            };
            self.apply(remote.id(), outcome, &mut report).await;
        }

        // Records the remote has never seen.
        for local in self.engine.records().list_records().await? {
            if remote_ids.contains(local.id()) {
                continue;
            }
            match self.push_record(&local).await {
                Ok(()) => report.pushed += 1,
                Err(err) => self.fail(local.id(), err, &mut report),
            }
        }

        report.duration = started.elapsed();
        info!(
            "Sync with {} finished in {:?}: {} adopted, {} pulled, {} pushed, {} conflicts, {} failed",
            self.remote.name(),
            report.duration,
            report.adopted,
            report.pulled,
            report.pushed,
            report.conflicts.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn apply(
        &self,
        id: &RecordId,
        outcome: Result<ReconcileOutcome>,
        report: &mut SyncReport,
    ) {
        match outcome {
            Ok(ReconcileOutcome::Adopted(_)) => report.adopted += 1,
            Ok(ReconcileOutcome::Equivalent) => report.equivalent += 1,
            Ok(ReconcileOutcome::DeletedLocally) => report.deleted_locally += 1,
            Ok(ReconcileOutcome::FastForwardRemote(_)) => report.pulled += 1,
            Ok(ReconcileOutcome::FastForwardLocal(local)) => match self.push_record(&local).await {
                Ok(()) => report.pushed += 1,
                Err(err) => self.fail(id, err, report),
            },
            Ok(ReconcileOutcome::Conflict(_)) => report.conflicts.push(id.clone()),
            Ok(ReconcileOutcome::Resolved(conflict)) => {
                report.resolved += 1;
                if let Err(err) = self.push_resolution(&conflict).await {
                    self.fail(id, err, report);
                } else if conflict.state == ConflictState::ResolvedLocal {
                    report.pushed += 1;
                }
            }
            Err(Error::SyncConflict { .. }) => report.conflicts.push(id.clone()),
            Err(err) => self.fail(id, err, report),
        }
    }

    async fn push_record(&self, record: &Record) -> Result<()> {
        self.retry.execute(|| self.remote.push(record)).await?;
        self.engine.mark_pushed(record.id()).await
    }

    fn fail(&self, id: &RecordId, err: Error, report: &mut SyncReport) {
        warn!("Sync of {} failed: {}", id, err);
        report.failed.push((id.clone(), err.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Resolution;
    use crate::engine::SyncConfig;
    use crate::retry::RetryConfig;
    use crate::remote::StoreRemote;
    use chrono::{Duration as ChronoDuration, Utc};
    use inkpad_storage::{MemoryStore, RecordStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::new(3)
                .with_initial_delay(std::time::Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    fn local_engine() -> Arc<SyncEngine> {
        let records = RecordStore::new(Arc::new(MemoryStore::new()));
        Arc::new(SyncEngine::new(records, SyncConfig::default()))
    }

    fn remote_store() -> (RecordStore, Arc<StoreRemote>) {
        let records = RecordStore::new(Arc::new(MemoryStore::new()));
        (records.clone(), Arc::new(StoreRemote::new(records)))
    }

    /// Fails the first `failures` fetches with a retryable error.
    struct Flaky {
        inner: StoreRemote,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteSource for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn fetch_all(&self) -> Result<Vec<Record>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::network("timeout", true));
            }
            self.inner.fetch_all().await
        }

        async fn fetch(&self, id: &RecordId) -> Result<Option<Record>> {
            self.inner.fetch(id).await
        }

        async fn push(&self, record: &Record) -> Result<()> {
            self.inner.push(record).await
        }
    }

    #[tokio::test]
    async fn test_two_way_pass() {
        let engine = local_engine();
        let (remote_records, remote) = remote_store();

        let theirs = Record::new("theirs", "from remote");
        remote_records.save_record(&theirs).await.unwrap();
        let mine = Record::new("mine", "from here");
        engine.records().save_record(&mine).await.unwrap();

        let session = SyncSession::new(engine.clone(), remote, fast_retry());
        let report = session.run().await.unwrap();

        assert_eq!(report.adopted, 1);
        assert_eq!(report.pushed, 1);
        assert!(report.is_clean());
        assert!(engine.records().get_record(theirs.id()).await.unwrap().is_some());
        assert!(remote_records.get_record(mine.id()).await.unwrap().is_some());

        let second = session.run().await.unwrap();
        assert_eq!(second.equivalent, 2);
        assert_eq!(second.pushed, 0);
    }

    #[tokio::test]
    async fn test_retries_transient_fetch_failures() {
        let engine = local_engine();
        let (remote_records, _) = remote_store();
        remote_records
            .save_record(&Record::new("t", "b"))
            .await
            .unwrap();

        let flaky = Arc::new(Flaky {
            inner: StoreRemote::new(remote_records),
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let session = SyncSession::new(engine, flaky.clone(), fast_retry());

        let report = session.run().await.unwrap();
        assert_eq!(report.adopted, 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_exhaustion_aborts_pass() {
        let (remote_records, _) = remote_store();
        let flaky = Arc::new(Flaky {
            inner: StoreRemote::new(remote_records),
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let session = SyncSession::new(local_engine(), flaky, fast_retry());

        let err = session.run().await.unwrap_err();
        assert!(err.is_retryable());
    }

    async fn diverge(engine: &SyncEngine, remote_records: &RecordStore, session: &SyncSession) -> Record {
        let base = Record::new("shared", "base");
        remote_records.save_record(&base).await.unwrap();
        session.run().await.unwrap();

        let later = Utc::now() + ChronoDuration::seconds(60);
        let mine = Record::from_parts(
            base.id().clone(),
            "shared",
            "mine",
            Vec::<String>::new(),
            base.created_at(),
            later,
        )
        .unwrap();
        let theirs = Record::from_parts(
            base.id().clone(),
            "shared",
            "theirs",
            Vec::<String>::new(),
            base.created_at(),
            later,
        )
        .unwrap();
        engine.records().save_record(&mine).await.unwrap();
        remote_records.save_record(&theirs).await.unwrap();
        base
    }

    #[tokio::test]
    async fn test_conflict_left_for_caller_then_pushed() {
        let engine = local_engine();
        let (remote_records, remote) = remote_store();
        let session = SyncSession::new(engine.clone(), remote, fast_retry());
        let base = diverge(&engine, &remote_records, &session).await;

        let report = session.run().await.unwrap();
        assert_eq!(report.conflicts, vec![base.id().clone()]);
        assert_eq!(
            remote_records.require_record(base.id()).await.unwrap().body(),
            "theirs"
        );

        // A second pass reports the same pending conflict.
        let again = session.run().await.unwrap();
        assert_eq!(again.conflicts, vec![base.id().clone()]);
        assert_eq!(engine.pending_conflicts().await.len(), 1);

        let resolved = engine.resolve(base.id(), Resolution::Local).await.unwrap();
        session.push_resolution(&resolved).await.unwrap();
        assert_eq!(
            remote_records.require_record(base.id()).await.unwrap().body(),
            "mine"
        );

        let clean = session.run().await.unwrap();
        assert!(clean.is_clean());
        assert_eq!(clean.equivalent, 1);
    }

    #[tokio::test]
    async fn test_run_with_resolver() {
        let engine = local_engine();
        let (remote_records, remote) = remote_store();
        let session = SyncSession::new(engine.clone(), remote, fast_retry());
        let base = diverge(&engine, &remote_records, &session).await;

        let prefer_remote = |_: &SyncConflict| Resolution::Remote;
        let report = session.run_with(&prefer_remote).await.unwrap();

        assert_eq!(report.resolved, 1);
        assert!(report.is_clean());
        assert_eq!(
            engine.records().require_record(base.id()).await.unwrap().body(),
            "theirs"
        );
    }

    #[tokio::test]
    async fn test_unresolved_push_rejected() {
        let (_, remote) = remote_store();
        let session = SyncSession::new(local_engine(), remote, fast_retry());
        let record = Record::new("a", "b");
        let conflict = SyncConflict::new(record.clone(), record);

        assert!(session.push_resolution(&conflict).await.is_err());
    }
}
