//! Per-suite resource ledger.
//!
//! The pool remembers every fixture the suite created or discovered, caches
//! shareable fixtures by [`PoolKey`], and reclaims everything at suite end.
//!
//! # Invariants
//!
//! - At most one cached resource per key; the factory for a key runs only
//!   while no resource is cached for it, and concurrent callers for the same
//!   key wait for that factory instead of provisioning a duplicate.
//! - A key's slot stays locked while its fixture is prepared, so callers only
//!   ever see a fixture that already reached its pre-state, and no two
//!   callers drive the same fixture at once.
//! - Once drain has started nothing new enters the ledger.
//! - Teardown walks the ledger in reverse insertion order, so dependents
//!   (an instance) go before what they depend on (its network).
//! - A failed deletion never stops the rest of the drain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pcv_core::{
    ManagedResource, Operation, PcvError, PcvResult, Provider, ResourceId, ResourceKind,
    ResourceState, ReusePolicy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Keys and entries
// ─────────────────────────────────────────────────────────────────────────────

/// Cache key for shareable fixtures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub kind: ResourceKind,
    pub policy: ReusePolicy,
    /// Desired pre-state; `None` accepts any state.
    pub state: Option<ResourceState>,
}

impl PoolKey {
    #[must_use]
    pub const fn new(kind: ResourceKind, policy: ReusePolicy, state: Option<ResourceState>) -> Self {
        Self {
            kind,
            policy,
            state,
        }
    }
}

/// What the suite owes the provider for a ledger entry at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupObligation {
    /// The suite created it and must delete it.
    Delete,
    /// It existed before the suite and must be left alone.
    Retain,
}

/// Resource handed back by a pool factory.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub resource: ManagedResource,
    pub obligation: CleanupObligation,
}

impl Acquired {
    /// A resource the suite provisioned.
    #[must_use]
    pub const fn created(resource: ManagedResource) -> Self {
        Self {
            resource,
            obligation: CleanupObligation::Delete,
        }
    }

    /// A pre-existing resource the suite found and borrowed.
    #[must_use]
    pub const fn discovered(resource: ManagedResource) -> Self {
        Self {
            resource,
            obligation: CleanupObligation::Retain,
        }
    }
}

/// Verdict of a prepare step on a pooled fixture.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// The fixture is in its pre-state and may be handed out.
    Ready(ManagedResource),
    /// The fixture vanished or became unusable; drop it and acquire another.
    Stale,
}

/// One ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Insertion sequence number within the suite.
    pub seq: u64,
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub policy: ReusePolicy,
    pub obligation: CleanupObligation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PoolKey>,
}

/// Outcome of reclaiming one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Deleted,
    AlreadyGone,
    Retained,
    /// The resource was not in the ledger.
    Untracked,
}

/// A deletion that failed during drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainFailure {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub error: PcvError,
}

/// Summary of a suite teardown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrainReport {
    /// Deleted resources, in the order deletion was issued.
    pub deleted: Vec<ResourceId>,
    pub already_gone: Vec<ResourceId>,
    pub retained: Vec<ResourceId>,
    pub failures: Vec<DrainFailure>,
}

impl DrainReport {
    /// Returns true if every owed deletion succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable warnings for failed deletions.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("failed to delete {} {}: {}", f.kind, f.id, f.error))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

type Slot = Arc<tokio::sync::Mutex<Option<ManagedResource>>>;

/// Suite-scoped fixture ledger and cache.
pub struct ResourcePool {
    provider: Arc<dyn Provider>,
    slots: Mutex<HashMap<PoolKey, Slot>>,
    ledger: Mutex<Vec<LedgerEntry>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("provider", &self.provider.name())
            .field("entries", &self.ledger.lock().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ResourcePool {
    /// Create an empty pool reclaiming resources through `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
            ledger: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true once [`ResourcePool::drain_all`] has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the ledger in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.ledger.lock().clone()
    }

    /// Number of ledger entries still owed cleanup or retention.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledger.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ledger.lock().is_empty()
    }

    fn slot(&self, key: &PoolKey) -> Slot {
        Arc::clone(
            self.slots
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None))),
        )
    }

    fn push_entry(
        &self,
        ledger: &mut Vec<LedgerEntry>,
        resource: &ManagedResource,
        policy: ReusePolicy,
        obligation: CleanupObligation,
        key: Option<PoolKey>,
    ) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        ledger.push(LedgerEntry {
            seq,
            id: resource.id.clone(),
            kind: resource.kind,
            policy,
            obligation,
            key,
        });
        seq
    }

    /// Return the cached resource for `key`, or run `factory` to provide one.
    ///
    /// Only one factory runs per key at a time; concurrent callers wait for it
    /// and then observe its result. A failing factory leaves the key empty so
    /// the next caller may try again.
    ///
    /// # Errors
    /// Returns [`PcvError::PoolClosed`] after drain has started, or whatever
    /// the factory returns.
    pub async fn lookup_or_create<F, Fut>(&self, key: PoolKey, factory: F) -> PcvResult<ManagedResource>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PcvResult<Acquired>>,
    {
        self.lookup_or_prepare(key, factory, |resource| {
            std::future::ready(Ok(Prepared::Ready(resource)))
        })
        .await
    }

    /// Like [`ResourcePool::lookup_or_create`], but every fixture handed out
    /// first passes through `prepare` while the key's slot is held.
    ///
    /// A fresh resource enters the ledger before `prepare` runs, so a failed
    /// preparation is still reclaimed at drain. A cached resource that
    /// `prepare` reports [`Prepared::Stale`] is reclaimed and replaced by a
    /// fresh one from `factory`.
    ///
    /// # Errors
    /// Returns [`PcvError::PoolClosed`] after drain has started, whatever
    /// `factory` or `prepare` returns, or [`PcvError::PreconditionFailed`]
    /// when a freshly acquired resource is already stale.
    pub async fn lookup_or_prepare<F, Fut, P, PFut>(
        &self,
        key: PoolKey,
        factory: F,
        prepare: P,
    ) -> PcvResult<ManagedResource>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PcvResult<Acquired>>,
        P: Fn(ManagedResource) -> PFut,
        PFut: Future<Output = PcvResult<Prepared>>,
    {
        if self.is_closed() {
            return Err(PcvError::PoolClosed);
        }
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;
        if self.is_closed() {
            return Err(PcvError::PoolClosed);
        }

        if let Some(resource) = cached.clone() {
            debug!(?key, id = %resource.id, "pool hit");
            match prepare(resource.clone()).await? {
                Prepared::Ready(ready) => {
                    *cached = Some(ready.clone());
                    return Ok(ready);
                }
                Prepared::Stale => {
                    *cached = None;
                    self.discard(&resource.id).await;
                }
            }
        }

        // Drain waits for this slot before taking the ledger, so the row
        // lands even if the pool closed while the factory ran.
        let acquired = factory().await?;
        let seq = self.push_entry(
            &mut self.ledger.lock(),
            &acquired.resource,
            key.policy,
            acquired.obligation,
            Some(key.clone()),
        );
        info!(
            ?key,
            id = %acquired.resource.id,
            seq,
            obligation = ?acquired.obligation,
            "pooled fixture"
        );
        match prepare(acquired.resource.clone()).await? {
            Prepared::Ready(ready) => {
                *cached = Some(ready.clone());
                Ok(ready)
            }
            Prepared::Stale => Err(PcvError::precondition(format!(
                "fresh {} fixture {} is unusable",
                acquired.resource.kind, acquired.resource.id
            ))),
        }
    }

    /// Cached resource for `key`, if any, without creating one.
    pub async fn lookup(&self, key: &PoolKey) -> Option<ManagedResource> {
        let slot = self.slots.lock().get(key).cloned()?;
        let cached = slot.lock().await;
        cached.clone()
    }

    /// Drop a stale pooled fixture from the ledger, deleting it if owed.
    ///
    /// A failed deletion puts the row back so the drain retries it.
    async fn discard(&self, id: &ResourceId) {
        let entry = {
            let mut ledger = self.ledger.lock();
            let pos = ledger.iter().position(|e| &e.id == id);
            pos.map(|pos| ledger.remove(pos))
        };
        let Some(entry) = entry else {
            return;
        };
        let outcome = match entry.obligation {
            CleanupObligation::Retain => Ok(ReleaseOutcome::Retained),
            CleanupObligation::Delete => self.reclaim(entry.kind, &entry.id).await,
        };
        match outcome {
            Ok(outcome) => warn!(%id, ?outcome, "discarded stale fixture"),
            Err(err) => {
                warn!(%id, %err, "discarding stale fixture failed, keeping it for drain");
                self.ledger.lock().push(entry);
            }
        }
    }

    /// Record a resource that is not pooled but still owes cleanup.
    ///
    /// # Errors
    /// Returns [`PcvError::PoolClosed`] after drain has started.
    pub fn register(
        &self,
        resource: &ManagedResource,
        policy: ReusePolicy,
        obligation: CleanupObligation,
    ) -> PcvResult<u64> {
        let seq = {
            // The closed check and the push share one critical section with
            // the close in `drain_all`.
            let mut ledger = self.ledger.lock();
            if self.is_closed() {
                return Err(PcvError::PoolClosed);
            }
            self.push_entry(&mut ledger, resource, policy, obligation, None)
        };
        debug!(id = %resource.id, kind = %resource.kind, %policy, seq, "registered fixture");
        Ok(seq)
    }

    /// Reclaim one resource now and remove it from the ledger.
    ///
    /// # Errors
    /// Returns the provider error if the deletion fails; the ledger row is
    /// kept so the drain retries it.
    pub async fn release(&self, id: &ResourceId) -> PcvResult<ReleaseOutcome> {
        let entry = {
            let ledger = self.ledger.lock();
            ledger.iter().find(|e| &e.id == id).cloned()
        };
        let Some(entry) = entry else {
            return Ok(ReleaseOutcome::Untracked);
        };

        let outcome = match entry.obligation {
            CleanupObligation::Retain => ReleaseOutcome::Retained,
            CleanupObligation::Delete => self.reclaim(entry.kind, &entry.id).await?,
        };

        self.ledger.lock().retain(|e| e.seq != entry.seq);
        if let Some(key) = &entry.key {
            let slot = self.slots.lock().get(key).cloned();
            if let Some(slot) = slot {
                let mut cached = slot.lock().await;
                if cached.as_ref().is_some_and(|c| &c.id == id) {
                    *cached = None;
                }
            }
        }
        debug!(%id, ?outcome, "released fixture");
        Ok(outcome)
    }

    /// Reclaim every remaining resource in reverse insertion order.
    ///
    /// Closes the pool first; in-flight factories finish before the ledger is
    /// taken. Deletion failures are collected, never fatal.
    pub async fn drain_all(&self) -> DrainReport {
        {
            let _ledger = self.ledger.lock();
            self.closed.store(true, Ordering::Release);
        }

        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        for slot in &slots {
            slot.lock().await.take();
        }
        self.slots.lock().clear();

        let mut entries = std::mem::take(&mut *self.ledger.lock());
        entries.sort_by_key(|e| std::cmp::Reverse(e.seq));

        let mut report = DrainReport::default();
        for entry in entries {
            match entry.obligation {
                CleanupObligation::Retain => report.retained.push(entry.id),
                CleanupObligation::Delete => match self.reclaim(entry.kind, &entry.id).await {
                    Ok(ReleaseOutcome::AlreadyGone) => report.already_gone.push(entry.id),
                    Ok(_) => report.deleted.push(entry.id),
                    Err(error) => {
                        warn!(id = %entry.id, kind = %entry.kind, %error, "cleanup failed");
                        report.failures.push(DrainFailure {
                            id: entry.id,
                            kind: entry.kind,
                            error,
                        });
                    }
                },
            }
        }
        info!(
            deleted = report.deleted.len(),
            already_gone = report.already_gone.len(),
            retained = report.retained.len(),
            failed = report.failures.len(),
            "pool drained"
        );
        report
    }

    async fn reclaim(&self, kind: ResourceKind, id: &ResourceId) -> PcvResult<ReleaseOutcome> {
        match self.provider.fetch(kind, id).await {
            Ok(None) => return Ok(ReleaseOutcome::AlreadyGone),
            Ok(Some(resource)) if resource.state.is_deletion() => {
                return Ok(ReleaseOutcome::AlreadyGone);
            }
            Ok(Some(_)) => {}
            Err(err) => debug!(%id, %err, "pre-delete fetch failed, deleting anyway"),
        }
        match self.provider.transition(kind, id, Operation::Delete).await {
            Ok(()) => Ok(ReleaseOutcome::Deleted),
            Err(PcvError::NotFound { .. }) => Ok(ReleaseOutcome::AlreadyGone),
            Err(err) => Err(err),
        }
    }
}
