//! Mutable CSR: per-source growable adjacency lists for one
//! (triplet, direction) (spec.md §4.4).

use std::cell::UnsafeCell;
use std::hint;
#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::arena::{Arena, ArenaBuffer};
use crate::schema::EdgeStrategy;
use crate::types::{GraphError, PrimitiveType, PropertyValue};

const NEIGHBOR_BYTES: usize = 4;
const TIMESTAMP_BYTES: usize = 8;

/// A minimal spin lock, matching spec.md §4.4's "acquire lock[s] (spin)"
/// exactly — readers never take it, so there is no writer/reader
/// contention to worry about, only the (forbidden by the single-writer
/// design, but defensively handled) writer/writer case.
struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> std::ops::Deref for SpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> std::ops::DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T> SpinLock<T> {
    fn new(value: T) -> Self {
        SpinLock { locked: AtomicBool::new(false), data: UnsafeCell::new(value) }
    }

    fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        SpinGuard { lock: self }
    }
}

struct AdjListState {
    capacity: u32,
    owned: Option<ArenaBuffer>,
}

/// One source vertex's adjacency list: `{ buffer, size, capacity, lock }`
/// from spec.md §3.
struct AdjList {
    buffer: AtomicPtr<u8>,
    size: AtomicU32,
    state: SpinLock<AdjListState>,
}

impl Default for AdjList {
    fn default() -> Self {
        AdjList {
            buffer: AtomicPtr::new(std::ptr::null_mut()),
            size: AtomicU32::new(0),
            state: SpinLock::new(AdjListState { capacity: 0, owned: None }),
        }
    }
}

/// Per-(triplet, direction) adjacency storage. Indexed by the vid of the
/// endpoint that owns the list — source vid for an outgoing CSR,
/// destination vid for an incoming one; the caller picks which.
pub struct MutableCsr {
    strategy: EdgeStrategy,
    prop_type: Option<PrimitiveType>,
    record_size: usize,
    lists: Vec<AdjList>,
    arena: Arc<Arena>,
}

fn prop_width(ty: Option<PrimitiveType>) -> usize {
    match ty {
        None => 0,
        Some(PrimitiveType::String) => {
            panic!("Mutable CSR does not support variable-length edge properties")
        }
        Some(t) => t.width(),
    }
}

impl MutableCsr {
    pub fn new(
        strategy: EdgeStrategy,
        prop_type: Option<PrimitiveType>,
        num_sources: u32,
        arena: Arc<Arena>,
    ) -> Self {
        let record_size = NEIGHBOR_BYTES + TIMESTAMP_BYTES + prop_width(prop_type);
        let mut lists = Vec::with_capacity(num_sources as usize);
        lists.resize_with(num_sources as usize, AdjList::default);
        MutableCsr { strategy, prop_type, record_size, lists, arena }
    }

    pub fn strategy(&self) -> EdgeStrategy {
        self.strategy
    }

    /// `size_` of the adjacency list; no buffer scan needed.
    pub fn degree(&self, source: u32) -> u32 {
        self.lists[source as usize].size.load(Ordering::Acquire)
    }

    fn encode_record(&self, neighbor: u32, timestamp: u64, prop: Option<&PropertyValue>) -> Vec<u8> {
        let mut buf = vec![0u8; self.record_size];
        buf[0..4].copy_from_slice(&neighbor.to_le_bytes());
        buf[4..12].copy_from_slice(&timestamp.to_le_bytes());
        if let (Some(ty), Some(value)) = (self.prop_type, prop) {
            write_prop(&mut buf[12..], ty, value);
        }
        buf
    }

    fn decode_record(&self, bytes: &[u8]) -> (u32, u64, Option<PropertyValue>) {
        let neighbor = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let timestamp = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let prop = self.prop_type.map(|ty| read_prop(&bytes[12..], ty));
        (neighbor, timestamp, prop)
    }

    /// Writer-only. Strategy=None drops the edge silently per schema.
    pub fn insert(
        &self,
        source: u32,
        dst: u32,
        timestamp: u64,
        prop: Option<&PropertyValue>,
    ) -> Result<(), GraphError> {
        match self.strategy {
            EdgeStrategy::None => Ok(()),
            EdgeStrategy::Single => self.insert_single(source, dst, timestamp, prop),
            EdgeStrategy::Multiple => self.insert_multiple(source, dst, timestamp, prop),
        }
    }

    fn insert_single(
        &self,
        source: u32,
        dst: u32,
        timestamp: u64,
        prop: Option<&PropertyValue>,
    ) -> Result<(), GraphError> {
        let list = &self.lists[source as usize];
        let record = self.encode_record(dst, timestamp, prop);
        let mut state = list.state.lock();

        let mut new_buf = self.arena.allocate(self.record_size);
        unsafe { std::ptr::copy_nonoverlapping(record.as_ptr(), new_buf.as_ptr(), record.len()) };
        let new_ptr = new_buf.as_ptr();

        list.buffer.store(new_ptr, Ordering::Release);
        list.size.store(1, Ordering::Release);
        state.capacity = 1;
        let old = state.owned.replace(new_buf);
        drop(state);
        if let Some(old) = old {
            self.arena.retire(old);
        }
        Ok(())
    }

    fn insert_multiple(
        &self,
        source: u32,
        dst: u32,
        timestamp: u64,
        prop: Option<&PropertyValue>,
    ) -> Result<(), GraphError> {
        let list = &self.lists[source as usize];
        let record = self.encode_record(dst, timestamp, prop);
        let mut state = list.state.lock();

        let size_now = list.size.load(Ordering::Relaxed);
        if size_now == state.capacity {
            let new_capacity = (state.capacity * 2).max(1);
            let new_buf = self.arena.allocate(new_capacity as usize * self.record_size);
            if size_now > 0 {
                let old_ptr = list.buffer.load(Ordering::Relaxed);
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        old_ptr,
                        new_buf.as_ptr(),
                        size_now as usize * self.record_size,
                    );
                }
            }
            let new_ptr = new_buf.as_ptr();
            list.buffer.store(new_ptr, Ordering::Release);
            state.capacity = new_capacity;
            let old = state.owned.replace(new_buf);
            if let Some(old) = old {
                self.arena.retire(old);
            }
        }

        let buffer_ptr = list.buffer.load(Ordering::Relaxed);
        let offset = size_now as usize * self.record_size;
        unsafe {
            std::ptr::copy_nonoverlapping(record.as_ptr(), buffer_ptr.add(offset), record.len());
        }
        list.size.store(size_now + 1, Ordering::Release);
        Ok(())
    }

    /// Scans `[0, size)` of `source`'s adjacency list, filtering by
    /// `T ≤ ts`. No lock: safe per I3 (stable prefix across growth) and
    /// the release/acquire pairing on `buffer`/`size` — `size` must load
    /// before `buffer`, not after: the writer in `insert_multiple`
    /// publishes a grown `buffer` (Release) before bumping `size`
    /// (Release), and a grown buffer always holds a full copy of at
    /// least as many records as any `size` value that predates it. Load
    /// them in the opposite order — `buffer` first, then a possibly
    /// newer `size` — and a reader could pair a stale, already-retired
    /// buffer with a size from after a growth, iterating past the end of
    /// memory that's no longer live.
    pub fn edges_of(&self, source: u32, ts: u64) -> EdgeIter<'_> {
        let list = &self.lists[source as usize];
        let size = list.size.load(Ordering::Acquire);
        let buffer = list.buffer.load(Ordering::Acquire);
        EdgeIter { csr: self, buffer, size, idx: 0, ts }
    }
}

fn write_prop(buf: &mut [u8], ty: PrimitiveType, value: &PropertyValue) {
    match (ty, value) {
        (PrimitiveType::Int32, PropertyValue::Int32(v)) => buf[..4].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::Int64, PropertyValue::Int64(v)) => buf[..8].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::UInt32, PropertyValue::UInt32(v)) => buf[..4].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::UInt64, PropertyValue::UInt64(v)) => buf[..8].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::Double, PropertyValue::Double(v)) => buf[..8].copy_from_slice(&v.to_le_bytes()),
        (PrimitiveType::Bool, PropertyValue::Bool(v)) => buf[0] = *v as u8,
        (PrimitiveType::Date, PropertyValue::Date(d)) => buf[..8].copy_from_slice(&d.0.to_le_bytes()),
        _ => {
            let default = PropertyValue::default_for(ty);
            write_prop(buf, ty, &default);
        }
    }
}

fn read_prop(buf: &[u8], ty: PrimitiveType) -> PropertyValue {
    match ty {
        PrimitiveType::Int32 => PropertyValue::Int32(i32::from_le_bytes(buf[..4].try_into().unwrap())),
        PrimitiveType::Int64 => PropertyValue::Int64(i64::from_le_bytes(buf[..8].try_into().unwrap())),
        PrimitiveType::UInt32 => PropertyValue::UInt32(u32::from_le_bytes(buf[..4].try_into().unwrap())),
        PrimitiveType::UInt64 => PropertyValue::UInt64(u64::from_le_bytes(buf[..8].try_into().unwrap())),
        PrimitiveType::Double => PropertyValue::Double(f64::from_le_bytes(buf[..8].try_into().unwrap())),
        PrimitiveType::Bool => PropertyValue::Bool(buf[0] != 0),
        PrimitiveType::Date => PropertyValue::Date(crate::types::Date(i64::from_le_bytes(buf[..8].try_into().unwrap()))),
        PrimitiveType::String => unreachable!("edge properties cannot be strings"),
    }
}

/// Iterator over one source's visible adjacency, in insertion order.
pub struct EdgeIter<'a> {
    csr: &'a MutableCsr,
    buffer: *mut u8,
    size: u32,
    idx: u32,
    ts: u64,
}

// Safety: the caller holds an `EpochGuard` for the duration of iteration,
// which guarantees `buffer` is not physically reclaimed while in use.
unsafe impl Send for EdgeIter<'_> {}

impl Iterator for EdgeIter<'_> {
    type Item = (u32, Option<PropertyValue>, u64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.size {
            let offset = self.idx as usize * self.csr.record_size;
            let bytes = unsafe { std::slice::from_raw_parts(self.buffer.add(offset), self.csr.record_size) };
            let (neighbor, timestamp, prop) = self.csr.decode_record(bytes);
            self.idx += 1;
            if timestamp <= self.ts {
                return Some((neighbor, prop, timestamp));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csr(strategy: EdgeStrategy) -> MutableCsr {
        MutableCsr::new(strategy, Some(PrimitiveType::Double), 4, Arc::new(Arena::new()))
    }

    #[test]
    fn multiple_strategy_appends_in_order() {
        let c = csr(EdgeStrategy::Multiple);
        c.insert(0, 10, 1, Some(&PropertyValue::Double(1.0))).unwrap();
        c.insert(0, 11, 2, Some(&PropertyValue::Double(2.0))).unwrap();
        c.insert(0, 12, 3, Some(&PropertyValue::Double(3.0))).unwrap();
        let edges: Vec<_> = c.edges_of(0, u64::MAX).collect();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].0, 10);
        assert_eq!(edges[2].0, 12);
        assert_eq!(c.degree(0), 3);
    }

    #[test]
    fn visibility_filters_by_timestamp() {
        let c = csr(EdgeStrategy::Multiple);
        c.insert(0, 10, 1, Some(&PropertyValue::Double(1.0))).unwrap();
        c.insert(0, 11, 5, Some(&PropertyValue::Double(2.0))).unwrap();
        let edges: Vec<_> = c.edges_of(0, 1).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, 10);
    }

    #[test]
    fn single_strategy_keeps_one_slot_and_loses_history() {
        let c = csr(EdgeStrategy::Single);
        c.insert(0, 10, 1, Some(&PropertyValue::Double(1.0))).unwrap();
        c.insert(0, 11, 2, Some(&PropertyValue::Double(2.0))).unwrap();
        assert_eq!(c.degree(0), 1);
        let edges: Vec<_> = c.edges_of(0, u64::MAX).collect();
        assert_eq!(edges, vec![(11, Some(PropertyValue::Double(2.0)), 2)]);
        // documented semantics: a reader "at" the first commit's timestamp
        // still observes the *current* slot, not the historical value.
        let edges_ts1: Vec<_> = c.edges_of(0, 1).collect();
        assert_eq!(edges_ts1, vec![]);
    }

    #[test]
    fn none_strategy_drops_inserts() {
        let c = csr(EdgeStrategy::None);
        c.insert(0, 10, 1, None).unwrap();
        assert_eq!(c.degree(0), 0);
    }

    #[test]
    fn growth_preserves_prefix_across_many_appends() {
        let c = csr(EdgeStrategy::Multiple);
        for i in 0..1000u32 {
            c.insert(0, i, i as u64, Some(&PropertyValue::Double(i as f64))).unwrap();
        }
        let edges: Vec<_> = c.edges_of(0, u64::MAX).collect();
        assert_eq!(edges.len(), 1000);
        for (i, (neighbor, _, ts)) in edges.iter().enumerate() {
            assert_eq!(*neighbor, i as u32);
            assert_eq!(*ts, i as u64);
        }
    }
}

/// Model-checked concurrency tests for the lock-free read path raced
/// against the writer's grow-then-publish sequence (spec.md §4.4's
/// correctness argument, P5). Run with `RUSTFLAGS="--cfg loom" cargo
/// test --release --test loom_csr`.
#[cfg(loom)]
mod loom_tests {
    use super::*;

    /// A scan concurrent with a buffer-growing insert must observe a
    /// consistent prefix: every record it reads within `[0, observed_size)`
    /// is fully initialized, never a torn neighbor/timestamp pair.
    #[test]
    fn concurrent_scan_during_growth_sees_no_torn_record() {
        loom::model(|| {
            let c = loom::sync::Arc::new(MutableCsr::new(
                EdgeStrategy::Multiple,
                None,
                1,
                Arc::new(Arena::new()),
            ));

            let writer = {
                let c = c.clone();
                loom::thread::spawn(move || {
                    c.insert(0, 10, 1, None).unwrap();
                    c.insert(0, 11, 2, None).unwrap();
                })
            };

            // Scan potentially interleaved with the writer's two inserts,
            // including the buffer-growth reallocation the second insert
            // triggers (capacity starts at 0, grows to 1, then to 2).
            let observed: Vec<_> = c.edges_of(0, u64::MAX).map(|(n, _, t)| (n, t)).collect();
            for (n, t) in &observed {
                assert!(
                    (*n == 10 && *t == 1) || (*n == 11 && *t == 2),
                    "torn record: neighbor={n} timestamp={t}"
                );
            }

            writer.join().unwrap();
            let after: Vec<_> = c.edges_of(0, u64::MAX).map(|(n, _, t)| (n, t)).collect();
            assert_eq!(after, vec![(10, 1), (11, 2)]);
        });
    }
}
