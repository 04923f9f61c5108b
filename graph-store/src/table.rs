//! Columnar vertex property store (spec.md §4.3).
//!
//! Each column is a fixed-width extent sized for `max_vertex_num` rows,
//! obtained from an anonymous memory mapping so only touched pages
//! consume physical memory. String columns additionally hold an
//! append-only blob heap; the column extent stores `(offset, length)`
//! slots into it.

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::schema::VertexType;
use crate::types::{Date, GraphError, PrimitiveType, PropertyValue};

/// A raw fixed-width extent. Readers and the writer both hold shared
/// references to it; safety rests on the same invariant as the Mutable
/// CSR — a row index is written once (by `add_vertex`) or, for
/// `UpdateTransaction`, overwritten in place without versioning, and the
/// column widths never change.
struct RawExtent {
    ptr: *mut u8,
    byte_len: usize,
    // Kept alive for the extent's lifetime; never read through directly.
    _mmap: MmapMut,
}

// Safety: concurrent access is bounds-checked per cell and single-writer
// (see Fragment / Transaction layer); the mapping's address is stable
// for the lifetime of `_mmap`.
unsafe impl Send for RawExtent {}
unsafe impl Sync for RawExtent {}

impl RawExtent {
    fn new(byte_len: usize) -> Self {
        let mut mmap = MmapMut::map_anon(byte_len.max(1)).expect("anonymous mmap reservation");
        let ptr = mmap.as_mut_ptr();
        RawExtent { ptr, byte_len, _mmap: mmap }
    }

    #[inline]
    unsafe fn write(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.byte_len);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
    }

    #[inline]
    unsafe fn read(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.byte_len);
        std::slice::from_raw_parts(self.ptr.add(offset), len)
    }
}

enum Column {
    Fixed { extent: RawExtent, width: usize, ty: PrimitiveType },
    Str { offsets: RawExtent, blob: RwLock<Vec<u8>> },
}

impl Column {
    fn new(ty: PrimitiveType, max_vertex_num: u32) -> Self {
        let width = ty.width();
        let byte_len = width * max_vertex_num as usize;
        if ty == PrimitiveType::String {
            Column::Str {
                offsets: RawExtent::new(byte_len),
                blob: RwLock::new(Vec::new()),
            }
        } else {
            Column::Fixed { extent: RawExtent::new(byte_len), width, ty }
        }
    }

    fn primitive_type(&self) -> PrimitiveType {
        match self {
            Column::Fixed { ty, .. } => *ty,
            Column::Str { .. } => PrimitiveType::String,
        }
    }

    fn get(&self, vid: u32) -> PropertyValue {
        match self {
            Column::Fixed { extent, width, ty } => {
                let off = *width * vid as usize;
                let bytes = unsafe { extent.read(off, *width) };
                decode_fixed(*ty, bytes)
            }
            Column::Str { offsets, blob } => {
                let off = 12 * vid as usize;
                let slot = unsafe { offsets.read(off, 12) };
                let blob_offset = u64::from_le_bytes(slot[0..8].try_into().unwrap()) as usize;
                let len = u32::from_le_bytes(slot[8..12].try_into().unwrap()) as usize;
                let heap = blob.read();
                let s = String::from_utf8_lossy(&heap[blob_offset..blob_offset + len]).into_owned();
                PropertyValue::String(s)
            }
        }
    }

    fn set(&self, vid: u32, value: &PropertyValue) -> Result<(), GraphError> {
        match self {
            Column::Fixed { extent, width, ty } => {
                let bytes = encode_fixed(*ty, value)?;
                let off = *width * vid as usize;
                unsafe { extent.write(off, &bytes[..*width]) };
                Ok(())
            }
            Column::Str { offsets, blob } => {
                let s = match value {
                    PropertyValue::String(s) => s.as_str(),
                    PropertyValue::Null => "",
                    other => {
                        return Err(GraphError::TypeMismatch {
                            col: "string".into(),
                            expected: PrimitiveType::String,
                            got: other.primitive_type().unwrap_or(PrimitiveType::String),
                        });
                    }
                };
                let mut heap = blob.write();
                let blob_offset = heap.len() as u64;
                heap.extend_from_slice(s.as_bytes());
                drop(heap);
                let mut slot = [0u8; 12];
                slot[0..8].copy_from_slice(&blob_offset.to_le_bytes());
                slot[8..12].copy_from_slice(&(s.len() as u32).to_le_bytes());
                let off = 12 * vid as usize;
                unsafe { offsets.write(off, &slot) };
                Ok(())
            }
        }
    }
}

fn decode_fixed(ty: PrimitiveType, bytes: &[u8]) -> PropertyValue {
    match ty {
        PrimitiveType::Int32 => PropertyValue::Int32(i32::from_le_bytes(bytes.try_into().unwrap())),
        PrimitiveType::Int64 => PropertyValue::Int64(i64::from_le_bytes(bytes.try_into().unwrap())),
        PrimitiveType::UInt32 => PropertyValue::UInt32(u32::from_le_bytes(bytes.try_into().unwrap())),
        PrimitiveType::UInt64 => PropertyValue::UInt64(u64::from_le_bytes(bytes.try_into().unwrap())),
        PrimitiveType::Double => PropertyValue::Double(f64::from_le_bytes(bytes.try_into().unwrap())),
        PrimitiveType::Bool => PropertyValue::Bool(bytes[0] != 0),
        PrimitiveType::Date => PropertyValue::Date(Date(i64::from_le_bytes(bytes.try_into().unwrap()))),
        PrimitiveType::String => unreachable!("string columns use the Str variant"),
    }
}

fn encode_fixed(ty: PrimitiveType, value: &PropertyValue) -> Result<[u8; 8], GraphError> {
    if matches!(value, PropertyValue::Null) {
        return encode_fixed(ty, &PropertyValue::default_for(ty));
    }
    let mut buf = [0u8; 8];
    match (ty, value) {
        (PrimitiveType::Int32, PropertyValue::Int32(v)) => buf[..4].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::Int64, PropertyValue::Int64(v)) => buf[..8].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::UInt32, PropertyValue::UInt32(v)) => buf[..4].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::UInt64, PropertyValue::UInt64(v)) => buf[..8].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::Double, PropertyValue::Double(v)) => buf[..8].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::Bool, PropertyValue::Bool(v)) => buf[0] = *v as u8,
        (PrimitiveType::Date, PropertyValue::Date(d)) => buf[..8].copy_from_slice(&d.0.to_le_bytes()),
        (expected, got) => {
            return Err(GraphError::TypeMismatch {
                col: "<fixed>".into(),
                expected,
                got: got.primitive_type().unwrap_or(expected),
            });
        }
    }
    Ok(buf)
}

/// Per-label columnar property store.
pub struct Table {
    columns: Vec<Column>,
    names: Vec<String>,
    max_vertex_num: u32,
}

impl Table {
    pub fn new(vertex_type: &VertexType) -> Self {
        let columns = vertex_type
            .properties
            .iter()
            .map(|p| Column::new(p.ty, vertex_type.max_vertex_num))
            .collect();
        let names = vertex_type.properties.iter().map(|p| p.name.clone()).collect();
        Table { columns, names, max_vertex_num: vertex_type.max_vertex_num }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_type(&self, col: usize) -> PrimitiveType {
        self.columns[col].primitive_type()
    }

    pub fn get(&self, col: usize, vid: u32) -> Result<PropertyValue, GraphError> {
        self.bounds_check(vid)?;
        Ok(self.columns[col].get(vid))
    }

    pub fn set(&self, col: usize, vid: u32, value: &PropertyValue) -> Result<(), GraphError> {
        self.bounds_check(vid)?;
        self.columns[col].set(vid, value)
    }

    pub fn iter_column(&self, col: usize, up_to: u32) -> impl Iterator<Item = PropertyValue> + '_ {
        (0..up_to).map(move |vid| self.columns[col].get(vid))
    }

    pub fn iter_row(&self, vid: u32, up_to_col: usize) -> Vec<PropertyValue> {
        (0..up_to_col).map(|c| self.columns[c].get(vid)).collect()
    }

    fn bounds_check(&self, vid: u32) -> Result<(), GraphError> {
        if vid >= self.max_vertex_num {
            return Err(GraphError::CapacityExceeded {
                label: "<table>".into(),
                max: self.max_vertex_num,
            });
        }
        Ok(())
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }
}
