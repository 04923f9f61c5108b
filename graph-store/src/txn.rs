//! Transaction layer (spec.md §4.6): ReadTransaction, InsertTransaction,
//! UpdateTransaction, and timestamp allocation.

use std::sync::atomic::Ordering;

use parking_lot::MutexGuard;

use crate::arena::EpochGuard;
use crate::fragment::EndpointMode;
use crate::store::GraphStore;
use crate::types::{GraphError, PropertyValue};
use crate::wal::{WalOp, WalRecord};

/// A read-only snapshot at `Ts = latest_published_ts` captured at
/// `begin`. Never blocks; cancellable at any time by dropping.
pub struct ReadTransaction<'s> {
    store: &'s GraphStore,
    ts: u64,
    guard: Option<EpochGuard>,
}

impl<'s> ReadTransaction<'s> {
    pub(crate) fn begin(store: &'s GraphStore) -> Self {
        let ts = store.latest_published_ts.load(Ordering::Acquire);
        let guard = store.fragment.arena().enter_epoch();
        ReadTransaction { store, ts, guard: Some(guard) }
    }

    pub fn snapshot_ts(&self) -> u64 {
        self.ts
    }

    pub fn vertex_num(&self, label: &str) -> Result<u32, GraphError> {
        self.store.fragment.vertex_num(label)
    }

    pub fn get_vertex(&self, label: &str, key: i64) -> Result<Option<u32>, GraphError> {
        self.store.fragment.get_vertex(label, key)
    }

    pub fn get_property(&self, label: &str, vid: u32, col: usize) -> Result<PropertyValue, GraphError> {
        self.store.fragment.get_property(label, vid, col)
    }

    pub fn get_property_by_name(
        &self,
        label: &str,
        vid: u32,
        col_name: &str,
    ) -> Result<PropertyValue, GraphError> {
        self.store.fragment.get_property_by_name(label, vid, col_name)
    }

    pub fn out_edges(
        &self,
        src_label: &str,
        src_vid: u32,
        edge_label: &str,
        dst_label: &str,
    ) -> Result<impl Iterator<Item = (u32, Option<PropertyValue>, u64)> + '_, GraphError> {
        self.store.fragment.out_edges(src_label, src_vid, edge_label, dst_label, self.ts)
    }

    pub fn in_edges(
        &self,
        dst_label: &str,
        dst_vid: u32,
        edge_label: &str,
        src_label: &str,
    ) -> Result<impl Iterator<Item = (u32, Option<PropertyValue>, u64)> + '_, GraphError> {
        self.store.fragment.in_edges(dst_label, dst_vid, edge_label, src_label, self.ts)
    }
}

impl Drop for ReadTransaction<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.store.fragment.arena().leave_epoch(guard);
        }
    }
}

/// Shared machinery for the two writer-exclusive transaction kinds.
/// Mutations are applied to the Fragment eagerly as they're staged
/// (spec.md §4.6's documented "commit-on-construct" semantics: there is
/// no side buffer, so a transaction dropped without `commit` leaves its
/// mutations visible to the LF-Indexer/Table/CSR structures — which have
/// no timestamp gate of their own — while never advancing
/// `latest_published_ts` or reaching the WAL. This is the open
/// "transaction rollback" question from spec.md §9; the documented
/// answer is: don't do that. Callers must treat staging failures as
/// fatal and not attempt to reuse a transaction afterward.
struct WriterTxn<'s> {
    store: &'s GraphStore,
    _writer_guard: MutexGuard<'s, ()>,
    timestamp: u64,
    staged: Vec<WalRecord>,
}

impl<'s> WriterTxn<'s> {
    fn begin(store: &'s GraphStore) -> Self {
        let writer_guard = store.writer_mutex.lock();
        let timestamp = store.latest_published_ts.load(Ordering::Acquire) + 1;
        WriterTxn { store, _writer_guard: writer_guard, timestamp, staged: Vec::new() }
    }

    fn stage(&mut self, op: WalOp) {
        self.staged.push(WalRecord { timestamp: self.timestamp, op });
    }

    /// Writes the batched WAL records, fsyncs according to
    /// `EngineConfig::wal_fsync`, then publishes `timestamp`. An I/O
    /// failure here is fatal per spec.md §7: the writer aborts the
    /// process rather than risk an in-memory/durable divergence.
    ///
    /// `WalFsyncPolicy::EveryN(n)` skips the fsync on all but every nth
    /// commit — the records are still appended (and visible to a replay
    /// that scans the whole file) every time, only the durability
    /// barrier is batched. A crash between two synced commits can lose
    /// the unsynced ones; that weakened guarantee is the policy's
    /// documented trade for throughput.
    fn commit(self) -> u64 {
        let mut wal = self.store.wal.lock();
        for record in &self.staged {
            if let Err(e) = wal.append(record) {
                tracing::error!(error = %e, "WAL append failed; aborting process to avoid durable/in-memory divergence");
                std::process::abort();
            }
        }

        let count = self.store.commit_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let should_sync = match self.store.config().wal_fsync {
            crate::config::WalFsyncPolicy::PerCommit => true,
            crate::config::WalFsyncPolicy::EveryN(n) => n == 0 || count % n as u64 == 0,
        };
        if should_sync {
            if let Err(e) = wal.sync() {
                tracing::error!(error = %e, "WAL fsync failed; aborting process to avoid durable/in-memory divergence");
                std::process::abort();
            }
        }
        drop(wal);
        self.store.latest_published_ts.store(self.timestamp, Ordering::Release);
        tracing::debug!(timestamp = self.timestamp, "transaction committed");
        self.timestamp
    }
}

/// Writer-exclusive transaction for new vertices and edges.
pub struct InsertTransaction<'s> {
    inner: WriterTxn<'s>,
}

impl<'s> InsertTransaction<'s> {
    pub(crate) fn begin(store: &'s GraphStore) -> Self {
        InsertTransaction { inner: WriterTxn::begin(store) }
    }

    pub fn timestamp(&self) -> u64 {
        self.inner.timestamp
    }

    pub fn add_vertex(&mut self, label: &str, properties: &[PropertyValue]) -> Result<u32, GraphError> {
        let vid = self.inner.store.fragment.add_vertex(label, properties)?;
        self.inner.stage(WalOp::AddVertex { label: label.to_string(), properties: properties.to_vec() });
        Ok(vid)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &mut self,
        src_label: &str,
        src_key: i64,
        dst_label: &str,
        dst_key: i64,
        edge_label: &str,
        prop: Option<PropertyValue>,
        mode: EndpointMode,
    ) -> Result<(), GraphError> {
        let ts = self.inner.timestamp;
        self.inner.store.fragment.add_edge(
            src_label, src_key, dst_label, dst_key, edge_label, prop.clone(), ts, mode,
        )?;
        self.inner.stage(WalOp::AddEdge {
            src_label: src_label.to_string(),
            src_key,
            dst_label: dst_label.to_string(),
            dst_key,
            edge_label: edge_label.to_string(),
            prop,
            upsert: mode == EndpointMode::Upsert,
        });
        Ok(())
    }

    /// Fsyncs the staged WAL batch and publishes `timestamp` as the new
    /// `latest_published_ts`. Returns the committed timestamp.
    pub fn commit(self) -> u64 {
        self.inner.commit()
    }
}

/// Identical to [`InsertTransaction`] but additionally permits
/// vertex-property overwrites at existing vids. Overwrites are
/// unversioned: readers may observe either the pre- or post-update value
/// until publication (spec.md §4.6's documented weakening of strict
/// MVCC for this one operation).
pub struct UpdateTransaction<'s> {
    inner: WriterTxn<'s>,
}

impl<'s> UpdateTransaction<'s> {
    pub(crate) fn begin(store: &'s GraphStore) -> Self {
        UpdateTransaction { inner: WriterTxn::begin(store) }
    }

    pub fn timestamp(&self) -> u64 {
        self.inner.timestamp
    }

    pub fn add_vertex(&mut self, label: &str, properties: &[PropertyValue]) -> Result<u32, GraphError> {
        let vid = self.inner.store.fragment.add_vertex(label, properties)?;
        self.inner.stage(WalOp::AddVertex { label: label.to_string(), properties: properties.to_vec() });
        Ok(vid)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &mut self,
        src_label: &str,
        src_key: i64,
        dst_label: &str,
        dst_key: i64,
        edge_label: &str,
        prop: Option<PropertyValue>,
        mode: EndpointMode,
    ) -> Result<(), GraphError> {
        let ts = self.inner.timestamp;
        self.inner.store.fragment.add_edge(
            src_label, src_key, dst_label, dst_key, edge_label, prop.clone(), ts, mode,
        )?;
        self.inner.stage(WalOp::AddEdge {
            src_label: src_label.to_string(),
            src_key,
            dst_label: dst_label.to_string(),
            dst_key,
            edge_label: edge_label.to_string(),
            prop,
            upsert: mode == EndpointMode::Upsert,
        });
        Ok(())
    }

    pub fn update_vertex_property(
        &mut self,
        label: &str,
        vid: u32,
        col: usize,
        value: PropertyValue,
    ) -> Result<(), GraphError> {
        self.inner.store.fragment.label_table(label)?.set(col, vid, &value)?;
        self.inner.stage(WalOp::UpdateVertexProp { label: label.to_string(), vid, col, value });
        Ok(())
    }

    pub fn commit(self) -> u64 {
        self.inner.commit()
    }
}
