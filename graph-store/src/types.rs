//! Core error and value types shared across the storage, indexing and
//! transaction layers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for every fallible outcome the core exposes.
///
/// Mirrors the split the teacher's gateway layer makes between a
/// storage-level error and an outer request-level error: `GraphError` is
/// the storage-level error; there is no outer wrapper here because the
/// HTTP/query-language layers that would define one are out of scope.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("indexer capacity exceeded for label {label} (max_vertex_num={max})")]
    CapacityExceeded { label: String, max: u32 },

    #[error("duplicate key for label {label}")]
    DuplicateKey { label: String },

    #[error("unknown vertex: label {label}, key {key}")]
    UnknownVertex { label: String, key: i64 },

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    #[error("unknown column {col} on label {label}")]
    UnknownColumn { label: String, col: String },

    #[error("unknown edge triplet: ({src_label}, {edge_label}, {dst_label})")]
    UnknownTriplet {
        src_label: String,
        edge_label: String,
        dst_label: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt WAL: {0}")]
    CorruptLog(String),

    #[error("type mismatch: column {col} expects {expected:?}, got {got:?}")]
    TypeMismatch {
        col: String,
        expected: PrimitiveType,
        got: PrimitiveType,
    },

    #[error("manifest mismatch: {0}")]
    ManifestMismatch(String),
}

/// Malformed-schema subset of [`GraphError`], kept as its own enum because
/// schema validation happens once, at open, and wants its own
/// `#[from]` conversion rather than flattening straight into `GraphError`.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid schema document: {0}")]
    InvalidDocument(String),

    #[error("store_type must be `mutable_csr`, got `{0}`")]
    WrongStoreType(String),

    #[error("unknown primitive type `{0}`")]
    UnknownPrimitiveType(String),

    #[error("vertex type `{0}` must declare exactly one primary key")]
    InvalidPrimaryKeyCount(String),

    #[error("primary key of vertex type `{0}` must be DT_SIGNED_INT64")]
    PrimaryKeyNotInt64(String),

    #[error("edge type `{0}` declares no vertex_type_pair_relations")]
    EmptyEdgeType(String),

    #[error("unknown relation cardinality `{0}`")]
    UnknownCardinality(String),

    #[error("unknown edge-storage strategy `{0}`")]
    UnknownStrategy(String),

    #[error("vertex type `{src}` or `{dst}` referenced by edge type `{edge}` is undeclared")]
    DanglingVertexReference {
        edge: String,
        src: String,
        dst: String,
    },
}

/// The fixed set of primitive property types (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Int32,
    Int64,
    UInt32,
    UInt64,
    Double,
    Bool,
    Date,
    String,
}

impl PrimitiveType {
    /// Encoded width in bytes of a fixed-width column cell. String columns
    /// store an `(offset: u64, length: u32)` slot instead (12 bytes) and
    /// back onto a per-column blob heap.
    pub fn width(self) -> usize {
        match self {
            PrimitiveType::Int32 | PrimitiveType::UInt32 => 4,
            PrimitiveType::Int64 | PrimitiveType::UInt64 => 8,
            PrimitiveType::Double => 8,
            PrimitiveType::Bool => 1,
            PrimitiveType::Date => 8,
            PrimitiveType::String => 12,
        }
    }

    pub fn from_schema_name(name: &str) -> Result<Self, SchemaError> {
        match name {
            "DT_SIGNED_INT32" => Ok(PrimitiveType::Int32),
            "DT_SIGNED_INT64" => Ok(PrimitiveType::Int64),
            "DT_UNSIGNED_INT32" => Ok(PrimitiveType::UInt32),
            "DT_UNSIGNED_INT64" => Ok(PrimitiveType::UInt64),
            "DT_DOUBLE" => Ok(PrimitiveType::Double),
            "DT_BOOL" => Ok(PrimitiveType::Bool),
            "DT_DATE" | "DT_TIMESTAMP" => Ok(PrimitiveType::Date),
            "DT_STRING" => Ok(PrimitiveType::String),
            other => Err(SchemaError::UnknownPrimitiveType(other.to_string())),
        }
    }
}

/// Fixed-size date/time value: milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Date(pub i64);

impl Date {
    pub const EPOCH: Date = Date(0);

    pub fn from_millis(ms: i64) -> Self {
        Date(ms)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A typed property cell value. One variant per [`PrimitiveType`], plus
/// `Null` for columns populated implicitly by `upsert`-created vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Double(f64),
    Bool(bool),
    Date(Date),
    String(String),
    Null,
}

impl PropertyValue {
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        match self {
            PropertyValue::Int32(_) => Some(PrimitiveType::Int32),
            PropertyValue::Int64(_) => Some(PrimitiveType::Int64),
            PropertyValue::UInt32(_) => Some(PrimitiveType::UInt32),
            PropertyValue::UInt64(_) => Some(PrimitiveType::UInt64),
            PropertyValue::Double(_) => Some(PrimitiveType::Double),
            PropertyValue::Bool(_) => Some(PrimitiveType::Bool),
            PropertyValue::Date(_) => Some(PrimitiveType::Date),
            PropertyValue::String(_) => Some(PrimitiveType::String),
            PropertyValue::Null => None,
        }
    }

    /// The value an `upsert`-created vertex gets for a column it has no
    /// data for (SPEC_FULL §4.3).
    pub fn default_for(ty: PrimitiveType) -> Self {
        match ty {
            PrimitiveType::Int32 => PropertyValue::Int32(0),
            PrimitiveType::Int64 => PropertyValue::Int64(0),
            PrimitiveType::UInt32 => PropertyValue::UInt32(0),
            PrimitiveType::UInt64 => PropertyValue::UInt64(0),
            PrimitiveType::Double => PropertyValue::Double(0.0),
            PrimitiveType::Bool => PropertyValue::Bool(false),
            PrimitiveType::Date => PropertyValue::Date(Date::EPOCH),
            PrimitiveType::String => PropertyValue::String(String::new()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int64(v) => Some(*v),
            PropertyValue::Int32(v) => Some(*v as i64),
            _ => None,
        }
    }
}
