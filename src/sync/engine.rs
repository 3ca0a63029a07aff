//! Push/pull reconciliation between the local store and the remote service.
//!
//! A pass for one kind rebuilds the dirty queue, pushes each queued record
//! (creations without a precondition, edits guarded by the etag they were
//! based on), then optionally downloads the server's records. Per-record
//! failures never stop a pass; they are collected in the [`SyncReport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::error::{SyncError, SyncResult};
use super::gateway::{PushRequest, RemoteGateway};
use super::queue::DirtyQueue;
use super::report::{ConflictShadow, Fetched, PullSummary, RecordFailure, SyncReport};
use crate::db::LocalStore;
use crate::models::{Attachment, Collection, DirtyState, Entity, EntityKind, Item};

/// Stops a running pass between two records.
///
/// Records already confirmed stay confirmed; unprocessed ones keep their
/// state. The flag clears once a pass has observed it.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct PassGuards {
    items: Mutex<()>,
    collections: Mutex<()>,
    attachments: Mutex<()>,
}

pub struct SyncEngine<G> {
    store: LocalStore,
    gateway: G,
    pull_remote: bool,
    abort: AbortHandle,
    guards: PassGuards,
}

impl<G: RemoteGateway> SyncEngine<G> {
    pub fn new(store: LocalStore, gateway: G) -> Self {
        Self {
            store,
            gateway,
            pull_remote: true,
            abort: AbortHandle::new(),
            guards: PassGuards::default(),
        }
    }

    /// Whether passes download server-side records after pushing.
    pub fn with_pull_remote(mut self, enabled: bool) -> Self {
        self.pull_remote = enabled;
        self
    }

    /// Uses an existing handle, e.g. one already wired to a signal handler.
    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn guard(&self, kind: EntityKind) -> &Mutex<()> {
        match kind {
            EntityKind::Item => &self.guards.items,
            EntityKind::Collection => &self.guards.collections,
            EntityKind::Attachment => &self.guards.attachments,
        }
    }

    fn begin_pass(&self, kind: EntityKind) -> SyncResult<MutexGuard<'_, ()>> {
        self.guard(kind)
            .try_lock()
            .map_err(|_| SyncError::PassInProgress(kind))
    }

    /// Runs one pass per kind, parents before children. Stops after a pass
    /// that was aborted.
    pub async fn sync_all(&self) -> SyncResult<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(EntityKind::SYNC_ORDER.len());

        for kind in EntityKind::SYNC_ORDER {
            let report = match kind {
                EntityKind::Collection => self.sync_pass::<Collection>().await?,
                EntityKind::Item => self.sync_pass::<Item>().await?,
                EntityKind::Attachment => self.sync_pass::<Attachment>().await?,
            };
            let aborted = report.aborted;
            reports.push(report);
            if aborted {
                break;
            }
        }

        Ok(reports)
    }

    /// Pushes every pending record of `T` and, if enabled, pulls the
    /// server's records.
    ///
    /// Only a failing queue rebuild or a pass already running for the same
    /// kind returns `Err`.
    pub async fn sync_pass<T: Entity>(&self) -> SyncResult<SyncReport> {
        let _pass = self.begin_pass(T::KIND)?;
        let kind = T::KIND;
        let mut report = SyncReport::new(kind);

        let queue = DirtyQueue::<T>::rebuild(&self.store).await?;
        info!(%kind, pending = queue.len(), "starting sync pass");

        for mut record in queue {
            if self.abort.is_aborted() {
                report.aborted = true;
                break;
            }

            let key = record.key().to_string();
            match self.push_one(&mut record).await {
                Ok(()) if record.dirty() == DirtyState::Clean => {
                    report.pushed.push(record.key().to_string())
                }
                Ok(()) => report.requeued.push(record.key().to_string()),
                Err(SyncError::Conflict { .. }) => {
                    warn!(%kind, key = %key, "server has a newer version, keeping local edit");
                    report.conflicts.push(self.capture_shadow(&record).await);
                }
                Err(error) => {
                    warn!(%kind, key = %key, %error, "push failed");
                    report.failures.push(RecordFailure { key, error });
                }
            }
        }

        if report.aborted || self.abort.is_aborted() {
            report.aborted = true;
            self.abort.reset();
            info!(%kind, pushed = report.pushed.len(), "sync pass aborted");
            return Ok(report);
        }

        if self.pull_remote {
            match self.pull_unguarded::<T>().await {
                Ok(summary) => report.pull = Some(summary),
                Err(error) => {
                    warn!(%kind, %error, "pull failed");
                    report.pull_error = Some(error);
                }
            }
        }

        info!(
            %kind,
            pushed = report.pushed.len(),
            conflicts = report.conflicts.len(),
            failures = report.failures.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Pushes a single record and writes the outcome to the local store.
    ///
    /// The record is re-read from the store first, so a parent re-keyed
    /// earlier in the same pass is picked up. A clean record is left alone.
    /// When the stored row changed while the push was in flight, the new
    /// etag is adopted but the record stays `Dirty` so the later edit goes
    /// out on the next pass. When the server assigns a different key, the
    /// row is re-keyed and the records pointing at it follow.
    pub async fn push_one<T: Entity>(&self, record: &mut T) -> SyncResult<()> {
        let stored = self.store.find_by_key::<T>(record.key()).await?;
        if let Some(stored) = stored {
            *record = stored;
        }
        if !record.dirty().needs_push() {
            return Ok(());
        }

        self.check_references(record).await?;

        let request = PushRequest::from_record(record);
        let if_match = match record.dirty() {
            DirtyState::New => None,
            _ => Some(record.etag()).filter(|etag| !etag.is_empty()),
        };
        let ack = self.gateway.push_entity(T::KIND, &request, if_match).await?;

        let old_key = request.key.clone();
        let mut current = match self.store.find_by_key::<T>(&old_key).await? {
            Some(current) => current,
            None => record.clone(),
        };
        let edited_in_flight = current.content() != &request.content
            || current.parent_key() != request.parent_key.as_deref();

        if let Some(server_key) = &ack.server_key {
            current.core_mut().key = server_key.clone();
        }
        if edited_in_flight {
            debug!(kind = %T::KIND, key = %old_key, "record changed during push, staying dirty");
            let core = current.core_mut();
            core.etag = ack.etag;
            core.dirty = DirtyState::Dirty;
        } else {
            current.core_mut().mark_synced(ack.etag);
        }
        self.store.save(&mut current).await?;

        if let Some(server_key) = &ack.server_key {
            for child_kind in T::KIND.child_kinds() {
                let moved = self
                    .store
                    .reparent(*child_kind, &old_key, server_key)
                    .await?;
                debug!(kind = %child_kind, moved, "re-parented children");
            }
            if T::KIND == EntityKind::Collection {
                let moved = self
                    .store
                    .rekey_collection_members(&old_key, server_key)
                    .await?;
                debug!(moved, "moved collection members");
            }
            info!(kind = %T::KIND, old_key = %old_key, new_key = %server_key, "server assigned key");
        }

        debug!(kind = %T::KIND, key = current.key(), etag = current.etag(), "pushed record");
        *record = current;
        Ok(())
    }

    /// Fails with `ParentNotSynced` while a record this one points at (its
    /// parent, or a collection it belongs to) has not reached the server.
    /// A referenced key with no local row counts as not synced.
    async fn check_references<T: Entity>(&self, record: &T) -> SyncResult<()> {
        let mut references = Vec::new();
        if let (Some(kind), Some(key)) = (T::KIND.parent_kind(), record.parent_key()) {
            references.push((kind, key.to_string()));
        }
        for key in record.memberships().unwrap_or_default() {
            references.push((EntityKind::Collection, key));
        }

        for (kind, key) in references {
            match self.store.dirty_state(kind, &key).await? {
                Some(DirtyState::Clean) | Some(DirtyState::Dirty) => {}
                Some(DirtyState::New) | None => {
                    return Err(SyncError::ParentNotSynced {
                        kind: T::KIND,
                        key: record.key().to_string(),
                        parent_key: key,
                    })
                }
            }
        }
        Ok(())
    }

    async fn capture_shadow<T: Entity>(&self, record: &T) -> ConflictShadow {
        let remote = match self.gateway.fetch_entity(T::KIND, record.key()).await {
            Ok(remote) => Some(remote),
            Err(error) => {
                warn!(kind = %T::KIND, key = record.key(), %error, "could not fetch server copy");
                None
            }
        };
        ConflictShadow {
            kind: T::KIND,
            key: record.key().to_string(),
            local_etag: record.etag().to_string(),
            remote,
        }
    }

    /// Fetches one record from the server.
    ///
    /// The server copy is stored as `Clean` when the local copy is absent
    /// or clean. A local copy with unsent edits is kept and the server copy
    /// is returned as a shadow instead.
    pub async fn fetch_one<T: Entity>(&self, key: &str) -> SyncResult<Fetched<T>> {
        let remote = self.gateway.fetch_entity(T::KIND, key).await?;

        match self.store.find_by_key::<T>(key).await? {
            Some(local) if local.dirty().needs_push() => Ok(Fetched::LocalKept(ConflictShadow {
                kind: T::KIND,
                key: key.to_string(),
                local_etag: local.etag().to_string(),
                remote: Some(remote),
            })),
            Some(mut local) => {
                local.apply_remote(remote);
                self.store.save(&mut local).await?;
                Ok(Fetched::Applied(local))
            }
            None => {
                let mut record = T::from_remote(remote);
                self.store.save(&mut record).await?;
                Ok(Fetched::Applied(record))
            }
        }
    }

    /// Downloads every server-side record of `T`.
    ///
    /// Server-only records are inserted as `Clean`; clean local records
    /// with a different etag are refreshed. `New` and `Dirty` records are
    /// never touched.
    pub async fn pull_remote<T: Entity>(&self) -> SyncResult<PullSummary> {
        let _pass = self.begin_pass(T::KIND)?;
        self.pull_unguarded::<T>().await
    }

    async fn pull_unguarded<T: Entity>(&self) -> SyncResult<PullSummary> {
        let remotes = self.gateway.fetch_all(T::KIND, None).await?;
        let mut summary = PullSummary::default();

        for remote in remotes {
            match self.store.find_by_key::<T>(&remote.key).await? {
                None => {
                    let mut record = T::from_remote(remote);
                    self.store.save(&mut record).await?;
                    summary.inserted += 1;
                }
                Some(mut local)
                    if local.dirty() == DirtyState::Clean && local.etag() != remote.etag =>
                {
                    local.apply_remote(remote);
                    self.store.save(&mut local).await?;
                    summary.refreshed += 1;
                }
                Some(_) => {}
            }
        }

        debug!(
            kind = %T::KIND,
            inserted = summary.inserted,
            refreshed = summary.refreshed,
            "pulled remote records"
        );
        Ok(summary)
    }

    /// Resolves a conflict in favour of the local edit: the record adopts
    /// the server's etag and stays pending, so the next pass overwrites the
    /// server copy. A record deleted on the server is queued for
    /// re-creation.
    pub async fn resolve_keep_local<T: Entity>(&self, shadow: &ConflictShadow) -> SyncResult<T> {
        let mut local = self.load_local::<T>(&shadow.key).await?;

        let remote = match &shadow.remote {
            Some(remote) => Some(remote.clone()),
            None => match self.gateway.fetch_entity(T::KIND, &shadow.key).await {
                Ok(remote) => Some(remote),
                Err(SyncError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            },
        };

        let core = local.core_mut();
        match remote {
            Some(remote) => {
                core.etag = remote.etag;
                core.dirty = DirtyState::Dirty;
            }
            None => {
                core.etag.clear();
                core.dirty = DirtyState::New;
            }
        }
        self.store.save(&mut local).await?;

        info!(kind = %T::KIND, key = %shadow.key, "conflict resolved, keeping local copy");
        Ok(local)
    }

    /// Resolves a conflict in favour of the server: local content is
    /// replaced with the server copy and marked `Clean`.
    pub async fn resolve_take_remote<T: Entity>(&self, shadow: &ConflictShadow) -> SyncResult<T> {
        let remote = match &shadow.remote {
            Some(remote) => remote.clone(),
            None => self.gateway.fetch_entity(T::KIND, &shadow.key).await?,
        };

        let mut record = match self.store.find_by_key::<T>(&shadow.key).await? {
            Some(mut local) => {
                local.apply_remote(remote);
                local
            }
            None => T::from_remote(remote),
        };
        self.store.save(&mut record).await?;

        info!(kind = %T::KIND, key = %shadow.key, "conflict resolved, took server copy");
        Ok(record)
    }

    async fn load_local<T: Entity>(&self, key: &str) -> SyncResult<T> {
        self.store
            .find_by_key::<T>(key)
            .await?
            .ok_or_else(|| SyncError::MissingLocal {
                kind: T::KIND,
                key: key.to_string(),
            })
    }
}
