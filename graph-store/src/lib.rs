//! Mutable-CSR property graph store: a lock-free external-key index, a
//! columnar vertex property table, mutable-CSR adjacency lists with an
//! epoch-reclaimed arena behind them, a single-writer/unbounded-readers
//! transaction layer, and WAL-backed crash recovery.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod arena;
mod config;
mod csr;
mod fragment;
mod indexer;
mod persistence;
mod schema;
mod store;
mod table;
mod txn;
mod types;
mod wal;

pub use config::{EngineConfig, WalFsyncPolicy};
pub use fragment::{Direction, EndpointMode};
pub use schema::{Cardinality, EdgeStrategy, EdgeTriplet, PropertyDef, Schema, VertexType};
pub use store::GraphStore;
pub use txn::{InsertTransaction, ReadTransaction, UpdateTransaction};
pub use types::{Date, GraphError, PrimitiveType, PropertyValue, SchemaError};
