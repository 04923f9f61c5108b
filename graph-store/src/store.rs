//! Top-level engine: owns the Fragment, the commit-timestamp clock, the
//! writer mutex and the WAL, and wires snapshot/replay recovery together
//! at open (spec.md §4.6, §5, §6).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::fragment::{EndpointMode, Fragment};
use crate::persistence;
use crate::schema::Schema;
use crate::txn::{InsertTransaction, ReadTransaction, UpdateTransaction};
use crate::types::GraphError;
use crate::wal::{self, WalOp, WalWriter};

pub struct GraphStore {
    pub(crate) fragment: Fragment,
    pub(crate) latest_published_ts: AtomicU64,
    pub(crate) writer_mutex: Mutex<()>,
    pub(crate) wal: Mutex<WalWriter>,
    /// Commits since open, used by `WalFsyncPolicy::EveryN` to decide
    /// whether a given commit actually fsyncs. Only ever touched while
    /// `writer_mutex` is held, so `Relaxed` is enough.
    pub(crate) commit_counter: AtomicU64,
    config: EngineConfig,
}

impl GraphStore {
    /// Opens (or creates) a store at `config.data_dir`: loads the latest
    /// snapshot if one exists, replays every WAL record committed after
    /// it, then reopens the WAL for append. A WAL record beyond the
    /// snapshot's timestamp is re-applied to the in-memory `Fragment`
    /// directly — it was already durable, so this is recovery, not a
    /// fresh write, and does not get re-logged.
    pub fn open(config: EngineConfig, schema: Schema) -> Result<Self, GraphError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let (fragment, snapshot_ts) = persistence::load(&config, schema)?;

        let mut recovered_ts = snapshot_ts;
        let wal_path = config.wal_path();
        wal::replay(&wal_path, |record| {
            if record.timestamp <= snapshot_ts {
                return Ok(());
            }
            apply_op(&fragment, record.timestamp, &record.op)?;
            recovered_ts = recovered_ts.max(record.timestamp);
            Ok(())
        })?;

        if recovered_ts > snapshot_ts {
            tracing::info!(from = snapshot_ts, to = recovered_ts, "replayed WAL records past last snapshot");
        }

        let wal = WalWriter::open(&wal_path)?;
        Ok(GraphStore {
            fragment,
            latest_published_ts: AtomicU64::new(recovered_ts),
            writer_mutex: Mutex::new(()),
            wal: Mutex::new(wal),
            commit_counter: AtomicU64::new(0),
            config,
        })
    }

    pub fn begin_read(&self) -> ReadTransaction<'_> {
        ReadTransaction::begin(self)
    }

    pub fn begin_insert(&self) -> InsertTransaction<'_> {
        InsertTransaction::begin(self)
    }

    pub fn begin_update(&self) -> UpdateTransaction<'_> {
        UpdateTransaction::begin(self)
    }

    /// Writes a fresh snapshot covering everything committed so far and
    /// truncates the WAL, so the next `open` has less to replay. Takes
    /// the writer mutex for the duration: snapshotting while a writer
    /// transaction is mid-commit would otherwise risk capturing a
    /// Fragment state newer than the WAL records it's meant to subsume.
    pub fn checkpoint(&self) -> Result<(), GraphError> {
        let _guard = self.writer_mutex.lock();
        let ts = self.latest_published_ts.load(Ordering::Acquire);
        persistence::dump(&self.config, &self.fragment, ts)?;
        let mut wal = self.wal.lock();
        *wal = WalWriter::create_truncated(&self.config.wal_path())?;
        tracing::info!(ts, "checkpoint complete, WAL truncated");
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Re-applies one recovered WAL operation directly to `fragment`, used
/// only during `open`'s replay pass.
fn apply_op(fragment: &Fragment, timestamp: u64, op: &WalOp) -> Result<(), GraphError> {
    match op {
        WalOp::AddVertex { label, properties } => {
            fragment.add_vertex(label, properties)?;
        }
        WalOp::AddEdge { src_label, src_key, dst_label, dst_key, edge_label, prop, upsert } => {
            let mode = WalOp::endpoint_mode(*upsert);
            fragment.add_edge(src_label, *src_key, dst_label, *dst_key, edge_label, prop.clone(), timestamp, mode)?;
        }
        WalOp::UpdateVertexProp { label, vid, col, value } => {
            fragment.label_table(label)?.set(*col, *vid, value)?;
        }
    }
    Ok(())
}
