//! Run lease: mutual exclusion for sync runs across independent processes.
//!
//! A single lease record is shared by every process of a deployment. A run
//! acquires it before touching any destination and releases it on every exit
//! path.
//!
//! # How It Works
//!
//! 1. Read the current record together with its version token
//! 2. If a *different* holder owns it and it is younger than the TTL, fail
//!    with [`Error::LeaseHeld`]
//! 3. Otherwise write `(holder, now)` conditioned on the version just read
//!    (`DoesNotExist` when there was no record)
//! 4. Release clears the record only if the caller still owns it, so a late
//!    releaser cannot clobber a lease reclaimed by someone else after staleness
//!
//! The conditional write in step 3 is only as strong as the [`LeaseStore`]
//! behind it. A store that compares and writes in two calls leaves a window
//! in which two processes can both win.
//!
//! # Example
//!
//! ```rust
//! use tabsync_core::prelude::*;
//!
//! async fn exclusive<L: LeaseStore + ?Sized>(leases: &LeaseManager<L>) -> Result<()> {
//!     let guard = leases.acquire(&HolderId::new("bot-a")).await?;
//!     // ... run the sync ...
//!     guard.release().await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::HolderId;

/// Condition a lease write is applied under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if no record exists yet.
    DoesNotExist,
    /// Write only if the record is still at this version.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Outcome of a conditional lease write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The write was applied.
    Success {
        /// Version of the record just written.
        version: String,
    },
    /// The precondition did not hold; nothing was written.
    PreconditionFailed {
        /// Version found in the store.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Default lease TTL (30 minutes).
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30 * 60);

/// Contents of the lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Whether the lease is currently taken.
    pub locked: bool,
    /// Holder that took the lease (kept after release for diagnostics).
    pub holder_id: String,
    /// When the holder took the lease.
    pub acquired_at: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    /// Creates a record for a lease taken by `holder` at `now`.
    #[must_use]
    pub fn held(holder: &HolderId, now: DateTime<Utc>) -> Self {
        Self {
            locked: true,
            holder_id: holder.as_str().to_string(),
            acquired_at: Some(now),
        }
    }

    /// Creates an unlocked record.
    #[must_use]
    pub fn cleared() -> Self {
        Self {
            locked: false,
            holder_id: String::new(),
            acquired_at: None,
        }
    }

    /// Returns the age of the lease at `now`, if it carries a timestamp.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.acquired_at.map(|at| now - at)
    }

    /// Returns true if the lease is taken and younger than `ttl` at `now`.
    ///
    /// A taken lease without a timestamp cannot be aged and counts as stale.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        self.locked && self.age(now).is_some_and(|age| age < ttl)
    }

    /// Returns true if `holder` owns this lease.
    #[must_use]
    pub fn is_held_by(&self, holder: &HolderId) -> bool {
        self.locked && self.holder_id == holder.as_str()
    }
}

/// A lease record together with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLease {
    /// The record contents.
    pub record: LeaseRecord,
    /// Opaque version used for conditional writes.
    pub version: String,
}

/// Persistence for the single lease record.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Reads the lease record, or `None` if none was ever written.
    async fn read(&self) -> Result<Option<StoredLease>>;

    /// Writes the lease record if `precondition` holds.
    async fn write(
        &self,
        record: &LeaseRecord,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;
}

/// Acquires and releases the run lease.
pub struct LeaseManager<L: LeaseStore + ?Sized> {
    store: Arc<L>,
    ttl: Duration,
}

impl<L: LeaseStore + ?Sized> Clone for LeaseManager<L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
        }
    }
}

impl<L: LeaseStore + ?Sized> LeaseManager<L> {
    /// Creates a lease manager over `store` with the given staleness TTL.
    #[must_use]
    pub fn new(store: Arc<L>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns the lease TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquires the lease for `holder` at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseHeld`] if another holder owns a fresh lease, or a
    /// storage error if the store cannot be read or written.
    pub async fn acquire(&self, holder: &HolderId) -> Result<LeaseGuard<L>> {
        self.acquire_at(holder, Utc::now()).await
    }

    /// Acquires the lease for `holder`, treating `now` as the current time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseHeld`] if another holder owns a lease younger than
    /// the TTL at `now`, or if a concurrent writer wins the conditional write.
    pub async fn acquire_at(&self, holder: &HolderId, now: DateTime<Utc>) -> Result<LeaseGuard<L>> {
        let current = self.store.read().await?;

        let precondition = match &current {
            None => WritePrecondition::DoesNotExist,
            Some(stored) => {
                let record = &stored.record;
                if record.locked && record.holder_id != holder.as_str() {
                    if record.is_fresh(now, self.ttl) {
                        return Err(held_error(record));
                    }
                    tracing::warn!(
                        holder = %holder,
                        stale_holder = %record.holder_id,
                        acquired_at = ?record.acquired_at,
                        "reclaiming stale run lease"
                    );
                }
                WritePrecondition::MatchesVersion(stored.version.clone())
            }
        };

        match self
            .store
            .write(&LeaseRecord::held(holder, now), precondition)
            .await?
        {
            WriteResult::Success { version } => {
                tracing::info!(holder = %holder, version = %version, "acquired run lease");
                Ok(LeaseGuard {
                    store: Arc::clone(&self.store),
                    holder: holder.clone(),
                    acquired_at: now,
                    version,
                    released: false,
                })
            }
            WriteResult::PreconditionFailed { current_version } => {
                tracing::info!(
                    holder = %holder,
                    current_version = %current_version,
                    "lost run lease race"
                );
                let winner = self.store.read().await?;
                Err(winner.map_or_else(
                    || Error::LeaseHeld {
                        holder_id: "unknown".into(),
                        acquired_at: String::new(),
                    },
                    |stored| held_error(&stored.record),
                ))
            }
        }
    }

    /// Releases the lease if `holder` currently owns it.
    ///
    /// Returns `true` if the lease was cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn release(&self, holder: &HolderId) -> Result<bool> {
        clear_if_held(self.store.as_ref(), holder).await
    }

    /// Reads the current lease record without acquiring it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn status(&self) -> Result<Option<LeaseRecord>> {
        Ok(self.store.read().await?.map(|stored| stored.record))
    }

    /// Returns true if some holder owns a fresh lease at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn is_locked_at(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .status()
            .await?
            .is_some_and(|record| record.is_fresh(now, self.ttl)))
    }

    /// Forcefully clears the lease (operator recovery).
    ///
    /// # Warning
    ///
    /// Only for a lease known to be abandoned but not yet stale. A running
    /// holder loses its exclusion.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn force_break(&self) -> Result<()> {
        let previous = self.status().await?;
        self.store
            .write(&LeaseRecord::cleared(), WritePrecondition::None)
            .await?;
        tracing::warn!(
            previous_holder = previous.as_ref().map_or("", |r| r.holder_id.as_str()),
            "run lease forcibly broken"
        );
        Ok(())
    }
}

fn held_error(record: &LeaseRecord) -> Error {
    Error::LeaseHeld {
        holder_id: record.holder_id.clone(),
        acquired_at: record
            .acquired_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
    }
}

async fn clear_if_held<L: LeaseStore + ?Sized>(store: &L, holder: &HolderId) -> Result<bool> {
    let Some(stored) = store.read().await? else {
        return Ok(false);
    };
    if !stored.record.is_held_by(holder) {
        tracing::debug!(
            holder = %holder,
            current_holder = %stored.record.holder_id,
            "lease not owned by caller; leaving it intact"
        );
        return Ok(false);
    }

    let mut cleared = LeaseRecord::cleared();
    cleared.holder_id.clone_from(&stored.record.holder_id);
    match store
        .write(&cleared, WritePrecondition::MatchesVersion(stored.version))
        .await?
    {
        WriteResult::Success { .. } => {
            tracing::info!(holder = %holder, "released run lease");
            Ok(true)
        }
        // Another holder took over between the read and the write.
        WriteResult::PreconditionFailed { .. } => Ok(false),
    }
}

/// Ownership of the run lease.
///
/// Prefer [`LeaseGuard::release`]. Dropping an unreleased guard inside a Tokio
/// runtime spawns a best-effort release; outside one the TTL reclaims it.
pub struct LeaseGuard<L: LeaseStore + ?Sized> {
    store: Arc<L>,
    holder: HolderId,
    acquired_at: DateTime<Utc>,
    version: String,
    released: bool,
}

impl<L: LeaseStore + ?Sized> std::fmt::Debug for LeaseGuard<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("holder", &self.holder)
            .field("acquired_at", &self.acquired_at)
            .field("version", &self.version)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<L: LeaseStore + ?Sized> LeaseGuard<L> {
    /// Returns the holder owning this guard.
    #[must_use]
    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Returns when the lease was acquired.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Returns the version token written at acquisition.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Releases the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease could not be released.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        clear_if_held(self.store.as_ref(), &self.holder).await?;
        Ok(())
    }
}

impl<L: LeaseStore + ?Sized> Drop for LeaseGuard<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let holder = self.holder.clone();
        handle.spawn(async move {
            if let Err(error) = clear_if_held(store.as_ref(), &holder).await {
                tracing::warn!(holder = %holder, error = %error, "best-effort lease release failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Compare-and-swap store keeping the record and a counter version.
    #[derive(Default)]
    struct VersionedStore {
        slot: Mutex<Option<(LeaseRecord, u64)>>,
    }

    impl VersionedStore {
        fn bump(&self, record: LeaseRecord) {
            let mut slot = self.slot.lock().expect("lock");
            let next = slot.as_ref().map_or(1, |(_, v)| v + 1);
            *slot = Some((record, next));
        }
    }

    #[async_trait]
    impl LeaseStore for VersionedStore {
        async fn read(&self) -> Result<Option<StoredLease>> {
            let slot = self.slot.lock().expect("lock");
            Ok(slot.as_ref().map(|(record, version)| StoredLease {
                record: record.clone(),
                version: version.to_string(),
            }))
        }

        async fn write(
            &self,
            record: &LeaseRecord,
            precondition: WritePrecondition,
        ) -> Result<WriteResult> {
            let mut slot = self.slot.lock().expect("lock");
            let current = slot.as_ref().map(|(_, v)| v.to_string());
            let allowed = match &precondition {
                WritePrecondition::None => true,
                WritePrecondition::DoesNotExist => current.is_none(),
                WritePrecondition::MatchesVersion(v) => current.as_ref() == Some(v),
            };
            if !allowed {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: current.unwrap_or_default(),
                });
            }
            let next = slot.as_ref().map_or(1, |(_, v)| v + 1);
            *slot = Some((record.clone(), next));
            Ok(WriteResult::Success {
                version: next.to_string(),
            })
        }
    }

    fn manager(ttl: Duration) -> LeaseManager<VersionedStore> {
        LeaseManager::new(Arc::new(VersionedStore::default()), ttl)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let leases = manager(DEFAULT_LEASE_TTL);
        let holder = HolderId::new("a");

        let guard = leases.acquire_at(&holder, at(0)).await.expect("acquire");
        assert_eq!(guard.holder(), &holder);
        assert!(leases.is_locked_at(at(1)).await.expect("status"));

        guard.release().await.expect("release");
        let record = leases.status().await.expect("status").expect("record");
        assert!(!record.locked);
        assert!(!leases.is_locked_at(at(2)).await.expect("status"));
    }

    #[tokio::test]
    async fn fresh_lease_blocks_other_holder() {
        let leases = manager(Duration::from_secs(60));
        let _guard = leases
            .acquire_at(&HolderId::new("a"), at(0))
            .await
            .expect("acquire");

        let err = leases
            .acquire_at(&HolderId::new("b"), at(30))
            .await
            .expect_err("contention");
        match err {
            Error::LeaseHeld { holder_id, .. } => assert_eq!(holder_id, "a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stale_lease_is_reclaimed() {
        let leases = manager(Duration::from_secs(60));
        let first = leases
            .acquire_at(&HolderId::new("a"), at(0))
            .await
            .expect("acquire a");

        let second = leases
            .acquire_at(&HolderId::new("b"), at(60))
            .await
            .expect("acquire b after ttl");
        assert_eq!(second.holder().as_str(), "b");

        // The late releaser must not clobber the new holder.
        first.release().await.expect("release a");
        let record = leases.status().await.expect("status").expect("record");
        assert!(record.is_held_by(&HolderId::new("b")));
    }

    #[tokio::test]
    async fn same_holder_can_reacquire() {
        let leases = manager(Duration::from_secs(60));
        let holder = HolderId::new("a");
        let first = leases.acquire_at(&holder, at(0)).await.expect("first");
        let second = leases.acquire_at(&holder, at(10)).await.expect("second");
        assert_eq!(second.acquired_at(), at(10));
        std::mem::forget(first);
        second.release().await.expect("release");
    }

    #[tokio::test]
    async fn release_by_non_owner_is_noop() {
        let leases = manager(DEFAULT_LEASE_TTL);
        let _guard = leases
            .acquire_at(&HolderId::new("a"), at(0))
            .await
            .expect("acquire");

        let released = leases.release(&HolderId::new("b")).await.expect("release");
        assert!(!released);
        assert!(leases.is_locked_at(at(1)).await.expect("status"));
    }

    #[tokio::test]
    async fn racing_writer_loses_on_version_mismatch() {
        let store = Arc::new(VersionedStore::default());
        let leases = LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL);

        // Seed an unlocked record, then bump its version behind the manager's back.
        store.bump(LeaseRecord::cleared());
        let stale = store.read().await.expect("read").expect("record");
        store.bump(LeaseRecord::held(&HolderId::new("racer"), at(0)));

        let result = store
            .write(
                &LeaseRecord::held(&HolderId::new("me"), at(0)),
                WritePrecondition::MatchesVersion(stale.version),
            )
            .await
            .expect("write");
        assert!(!result.is_success());
        assert!(
            leases
                .acquire_at(&HolderId::new("me"), at(1))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn force_break_clears_fresh_lease() {
        let leases = manager(DEFAULT_LEASE_TTL);
        let guard = leases
            .acquire_at(&HolderId::new("a"), at(0))
            .await
            .expect("acquire");
        leases.force_break().await.expect("break");
        assert!(!leases.is_locked_at(at(1)).await.expect("status"));

        leases
            .acquire_at(&HolderId::new("b"), at(2))
            .await
            .expect("acquire after break");
        std::mem::forget(guard);
    }

    #[test]
    fn lease_without_timestamp_is_stale() {
        let record = LeaseRecord {
            locked: true,
            holder_id: "ghost".into(),
            acquired_at: None,
        };
        assert!(!record.is_fresh(at(0), DEFAULT_LEASE_TTL));
    }

    #[tokio::test]
    async fn dropped_guard_releases_best_effort() {
        let leases = manager(DEFAULT_LEASE_TTL);
        {
            let _guard = leases
                .acquire_at(&HolderId::new("a"), at(0))
                .await
                .expect("acquire");
        }
        // Let the spawned release run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!leases.is_locked_at(at(1)).await.expect("status"));
    }
}
