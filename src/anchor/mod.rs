//! The anchor table: a registry of strong cross-unit roots.
//!
//! An anchor keeps one value alive independently of ordinary reachability
//! until it is disposed. The table is an arena of slots addressed by
//! generation-counted [`AnchorHandle`]s, so a handle can never observe a value
//! other than the one it was created for, even after its slot has been reused.
//!
//! ## Slot protocol
//!
//! Every slot carries a single atomic state word (generation, reader count,
//! status). All transitions are read-modify-write operations on that word:
//!
//! - `create` moves a vacant slot from `Released(g)` to `Live(g + 1)` after
//!   publishing the boxed root.
//! - A dereference registers itself as a reader, clones the root only if the
//!   slot is `Live` at the handle's generation, and then leaves.
//! - `dispose` moves `Live(g)` to `Disposed(g)` exactly once per generation.
//! - Whoever observes `Disposed` with no readers left (the disposer, or the
//!   last reader out) moves the slot to `Released`, drops the root and
//!   recycles the index.
//!
//! Because the root is only dropped once no reader is registered, a
//! dereference racing with `dispose` returns either the value or
//! [`AccessError::Disposed`], never a dangling root.
//!
//! The table never traverses the values it anchors. A value reachable only
//! through anchors stays alive until one of those anchors is disposed.

mod free_list;
mod state;

use core::fmt;
use core::num::NonZeroU32;
use core::ptr;
use std::sync::{Arc, OnceLock};

use crossbeam_utils::CachePadded;
use serde::Serialize;

use self::free_list::{FreeList, NONE};
use self::state::{next_generation, SlotState, Status, READER};
use crate::config::{AnchorConfig, ConfigError};
use crate::error::AccessError;
use crate::heap::{Confined, Entitlement};
use crate::sync::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use crate::trace::trace_event;
use crate::unit::UnitId;

const MAX_SEGMENTS: usize = 32;

/// A strong root as stored by the table.
pub(crate) type Root = Arc<dyn Confined>;

/// Opaque, copyable identifier of one anchor registration.
///
/// Handles are scoped to the table that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorHandle {
    index: u32,
    generation: NonZeroU32,
}

impl AnchorHandle {
    /// Slot index inside the table.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at creation time. Never 0.
    pub const fn generation(self) -> u32 {
        self.generation.get()
    }

    /// Packs the handle into a non-zero `u64`.
    pub const fn to_raw(self) -> u64 {
        ((self.generation.get() as u64) << 32) | self.index as u64
    }

    /// Inverse of [`to_raw`](Self::to_raw); `None` for 0 (or any value with a
    /// zero generation).
    pub const fn from_raw(raw: u64) -> Option<AnchorHandle> {
        match NonZeroU32::new((raw >> 32) as u32) {
            Some(generation) => Some(AnchorHandle {
                index: raw as u32,
                generation,
            }),
            None => None,
        }
    }
}

impl fmt::Display for AnchorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anchor#{}v{}", self.index, self.generation)
    }
}

/// Counters of a table's lifetime activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnchorStats {
    /// Anchors created.
    pub created: u64,
    /// Anchors disposed.
    pub disposed: u64,
    /// Anchors whose root has been dropped and slot recycled.
    pub released: u64,
}

impl AnchorStats {
    /// Anchors created and not yet disposed.
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.disposed)
    }

    /// Anchors still holding their root (live, or disposed with readers in flight).
    pub fn retained(&self) -> u64 {
        self.created.saturating_sub(self.released)
    }
}

struct Slot {
    state: AtomicU64,
    root: AtomicPtr<Root>,
    next_free: AtomicU32,
}

impl Slot {
    fn vacant() -> Self {
        Slot {
            state: AtomicU64::new(SlotState::VACANT.raw()),
            root: AtomicPtr::new(ptr::null_mut()),
            next_free: AtomicU32::new(NONE),
        }
    }
}

/// Lock-free registry of anchored roots.
pub struct AnchorTable {
    segments: [AtomicPtr<Slot>; MAX_SEGMENTS],
    segment_capacity: u32,
    next_index: CachePadded<AtomicU32>,
    free: CachePadded<FreeList>,
    created: AtomicU64,
    disposed: AtomicU64,
    released: AtomicU64,
}

static GLOBAL: OnceLock<Arc<AnchorTable>> = OnceLock::new();

impl AnchorTable {
    /// Creates a table with the default [`AnchorConfig`].
    pub fn new() -> Self {
        Self::build(AnchorConfig::default().segment_capacity)
    }

    /// Creates a table from a validated configuration.
    pub fn with_config(config: &AnchorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config.segment_capacity))
    }

    fn build(segment_capacity: u32) -> Self {
        AnchorTable {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            segment_capacity,
            next_index: CachePadded::new(AtomicU32::new(0)),
            free: CachePadded::new(FreeList::new()),
            created: AtomicU64::new(0),
            disposed: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// The process-wide table, built with the default configuration unless
    /// [`crate::init`] ran first.
    pub fn global() -> &'static Arc<AnchorTable> {
        GLOBAL.get_or_init(|| Arc::new(AnchorTable::new()))
    }

    pub(crate) fn install_global(config: &AnchorConfig) -> Result<(), ConfigError> {
        let table = Arc::new(AnchorTable::with_config(config)?);
        GLOBAL
            .set(table)
            .map_err(|_| ConfigError::AlreadyInitialized)
    }

    /// Anchors `root` and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics only with `u32::MAX - 1` anchors live at the same time. Released
    /// slots are recycled, so ordinary churn never gets there.
    pub fn create(&self, root: Arc<dyn Confined>) -> AnchorHandle {
        let index = self.acquire_index();
        let slot = self.slot(index);

        let boxed = Box::into_raw(Box::new(root));
        slot.root.store(boxed, Ordering::Release);

        let mut current = slot.state.load(Ordering::Acquire);
        loop {
            let state = SlotState::from_raw(current);
            debug_assert_eq!(state.status(), Status::Released);
            let generation = next_generation(state.generation());
            let live = SlotState::new(generation, state.readers(), Status::Live);
            match slot.state.compare_exchange_weak(
                current,
                live.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    trace_event!(index, generation, "anchor created");
                    return AnchorHandle {
                        index,
                        generation: NonZeroU32::new(generation).unwrap_or(NonZeroU32::MIN),
                    };
                }
                // Stale readers may come and go while we hold the slot.
                Err(actual) => current = actual,
            }
        }
    }

    /// Disposes the anchor. Returns `true` for the call that performed the
    /// transition and `false` if it was already disposed.
    pub fn dispose(&self, handle: AnchorHandle) -> bool {
        let Some(slot) = self.existing_slot(handle.index) else {
            return false;
        };

        let mut current = slot.state.load(Ordering::Acquire);
        loop {
            let state = SlotState::from_raw(current);
            if !state.admits(handle.generation()) {
                return false;
            }
            let disposed = state.with_status(Status::Disposed);
            match slot.state.compare_exchange_weak(
                current,
                disposed.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.disposed.fetch_add(1, Ordering::Relaxed);
                    trace_event!(
                        index = handle.index,
                        generation = handle.generation(),
                        readers = disposed.readers(),
                        "anchor disposed"
                    );
                    if disposed.readers() == 0 {
                        self.release(handle.index, slot, handle.generation());
                    }
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether `handle` no longer refers to a live anchor.
    pub fn is_disposed(&self, handle: AnchorHandle) -> bool {
        self.existing_slot(handle.index).map_or(true, |slot| {
            !SlotState::from_raw(slot.state.load(Ordering::Acquire)).admits(handle.generation())
        })
    }

    /// Checked dereference on behalf of `unit`.
    ///
    /// Disposal is checked first: a disposed handle reports
    /// [`AccessError::Disposed`] even to the owning unit. Only a live handle
    /// goes on to the ownership check.
    pub fn deref(&self, handle: AnchorHandle, unit: UnitId) -> Result<Arc<dyn Confined>, AccessError> {
        let root = self.retain(handle).ok_or(AccessError::Disposed)?;
        match root.entitlement(unit) {
            Entitlement::Entitled => Ok(root),
            Entitlement::NotEntitled { owner } => Err(AccessError::CrossThread {
                owner,
                caller: unit,
            }),
        }
    }

    /// Snapshot of the table's counters. Individual counters are exact; the
    /// snapshot as a whole is not atomic.
    pub fn stats(&self) -> AnchorStats {
        AnchorStats {
            created: self.created.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    /// Clones the root if `handle` is live, without the ownership check.
    fn retain(&self, handle: AnchorHandle) -> Option<Root> {
        let slot = self.existing_slot(handle.index)?;
        let entered = SlotState::from_raw(slot.state.fetch_add(READER, Ordering::Acquire));
        let root = if entered.admits(handle.generation()) {
            let root = slot.root.load(Ordering::Acquire);
            // SAFETY: the slot was live at our generation when we registered,
            // and it cannot be released while a reader is registered.
            unsafe { root.as_ref() }.cloned()
        } else {
            None
        };
        self.leave(handle.index, slot);
        root
    }

    fn leave(&self, index: u32, slot: &Slot) {
        let prev = SlotState::from_raw(slot.state.fetch_sub(READER, Ordering::AcqRel));
        if prev.status() == Status::Disposed && prev.readers() == 1 {
            self.release(index, slot, prev.generation());
        }
    }

    fn release(&self, index: u32, slot: &Slot, generation: u32) {
        let disposed = SlotState::new(generation, 0, Status::Disposed);
        let released = disposed.with_status(Status::Released);
        if slot
            .state
            .compare_exchange(
                disposed.raw(),
                released.raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            // A reader arrived, or someone else released first.
            return;
        }

        // The root must be detached before the index becomes reusable.
        let root = slot.root.swap(ptr::null_mut(), Ordering::AcqRel);
        self.free.push(index, &slot.next_free);
        self.released.fetch_add(1, Ordering::Relaxed);
        trace_event!(index, generation, "anchor released");

        if !root.is_null() {
            // SAFETY: produced by `Box::into_raw` in `create`; the successful
            // CAS above makes us its only owner. Dropping it may re-enter the
            // table through nested shared references.
            drop(unsafe { Box::from_raw(root) });
        }
    }

    fn acquire_index(&self) -> u32 {
        if let Some(index) = self.free.pop(|index| &self.slot(index).next_free) {
            return index;
        }
        match self
            .next_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < NONE).then(|| n + 1)
            }) {
            Ok(index) => index,
            Err(_) => panic!("anchor table exhausted"),
        }
    }

    #[inline]
    fn locate(&self, index: u32) -> (usize, usize) {
        let base = self.segment_capacity as u64;
        let n = index as u64 / base + 1;
        let segment = (63 - n.leading_zeros()) as usize;
        let offset = index as u64 - base * ((1u64 << segment) - 1);
        (segment, offset as usize)
    }

    #[inline]
    fn segment_len(&self, segment: usize) -> usize {
        (self.segment_capacity as usize) << segment
    }

    fn existing_slot(&self, index: u32) -> Option<&Slot> {
        let (segment, offset) = self.locate(index);
        // `u32::MAX` is never handed out and lands past the last segment.
        let base = self.segments.get(segment)?.load(Ordering::Acquire);
        if base.is_null() {
            return None;
        }
        // SAFETY: installed segments are never freed before the table and
        // `offset < segment_len(segment)` by construction of `locate`.
        Some(unsafe { &*base.add(offset) })
    }

    /// Slot for `index`, installing its segment if needed.
    fn slot(&self, index: u32) -> &Slot {
        let (segment, offset) = self.locate(index);
        let mut base = self.segments[segment].load(Ordering::Acquire);
        if base.is_null() {
            base = self.install_segment(segment);
        }
        // SAFETY: see `existing_slot`.
        unsafe { &*base.add(offset) }
    }

    fn install_segment(&self, segment: usize) -> *mut Slot {
        let len = self.segment_len(segment);
        let fresh: Box<[Slot]> = (0..len).map(|_| Slot::vacant()).collect();
        let fresh = Box::into_raw(fresh) as *mut Slot;
        match self.segments[segment].compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => fresh,
            Err(winner) => {
                // SAFETY: `fresh` was never published.
                drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len)) });
                winner
            }
        }
    }
}

impl Default for AnchorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AnchorTable {
    fn drop(&mut self) {
        for segment in 0..MAX_SEGMENTS {
            let base = self.segments[segment].swap(ptr::null_mut(), Ordering::Acquire);
            if base.is_null() {
                continue;
            }
            let len = self.segment_len(segment);
            // SAFETY: installed by `install_segment` with this exact length, and
            // `&mut self` rules out concurrent access.
            let slots = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(base, len)) };
            for slot in slots.iter() {
                let root = slot.root.swap(ptr::null_mut(), Ordering::Acquire);
                if !root.is_null() {
                    // SAFETY: produced by `Box::into_raw` in `create`.
                    drop(unsafe { Box::from_raw(root) });
                }
            }
        }
    }
}

impl fmt::Debug for AnchorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchorTable")
            .field("segment_capacity", &self.segment_capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::heap::Obj;
    use std::thread;

    fn root<T: Send + Sync + 'static>(value: T) -> (Obj<T>, Arc<dyn Confined>) {
        let obj = Obj::new(value);
        let root = obj.clone().into_root();
        (obj, root)
    }

    fn small_table() -> AnchorTable {
        AnchorTable::with_config(&AnchorConfig { segment_capacity: 2 }).unwrap()
    }

    #[test]
    fn handle_raw_round_trip() {
        let handle = AnchorHandle {
            index: 9,
            generation: NonZeroU32::new(4).unwrap(),
        };
        assert_ne!(handle.to_raw(), 0);
        assert_eq!(AnchorHandle::from_raw(handle.to_raw()), Some(handle));
        assert_eq!(AnchorHandle::from_raw(0), None);
        assert_eq!(handle.to_string(), "anchor#9v4");
    }

    #[test]
    fn locate_walks_growing_segments() {
        let table = small_table();
        assert_eq!(table.locate(0), (0, 0));
        assert_eq!(table.locate(1), (0, 1));
        assert_eq!(table.locate(2), (1, 0));
        assert_eq!(table.locate(5), (1, 3));
        assert_eq!(table.locate(6), (2, 0));
        assert_eq!(table.locate(13), (2, 7));
        assert_eq!(table.locate(14), (3, 0));
    }

    #[test]
    fn deref_returns_the_same_object() {
        let table = AnchorTable::new();
        let (obj, root) = root(String::from("anchored"));
        let handle = table.create(root);

        let got = table.deref(handle, UnitId::current()).unwrap();
        let got = Obj::<String>::from_root(got).unwrap();
        assert!(Obj::ptr_eq(&got, &obj));
    }

    #[test]
    fn dispose_is_one_shot() {
        let table = AnchorTable::new();
        let (_obj, root) = root(1u32);
        let handle = table.create(root);

        assert!(!table.is_disposed(handle));
        assert!(table.dispose(handle));
        assert!(!table.dispose(handle));
        assert!(table.is_disposed(handle));
        assert_eq!(table.deref(handle, UnitId::current()).err().unwrap(), AccessError::Disposed);

        let stats = table.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.disposed, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn disposal_is_checked_before_ownership() {
        let table = Arc::new(AnchorTable::new());
        let (_obj, root) = root(2u32);
        let handle = table.create(root);

        let remote = Arc::clone(&table);
        let live = thread::spawn(move || remote.deref(handle, UnitId::current()).map(|_| ()))
            .join()
            .unwrap();
        assert!(live.unwrap_err().is_cross_thread());

        table.dispose(handle);
        let remote = Arc::clone(&table);
        let disposed = thread::spawn(move || remote.deref(handle, UnitId::current()).map(|_| ()))
            .join()
            .unwrap();
        assert_eq!(disposed, Err(AccessError::Disposed));
        assert_eq!(table.deref(handle, UnitId::current()).err().unwrap(), AccessError::Disposed);
    }

    #[test]
    fn release_drops_the_root() {
        let table = AnchorTable::new();
        let (obj, root) = root(vec![0u8; 16]);
        let weak = obj.downgrade();
        let handle = table.create(root);

        drop(obj);
        assert!(weak.upgrade().is_some());

        table.dispose(handle);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn reused_slot_rejects_stale_handles() {
        let table = small_table();
        let (_a, root_a) = root(1u32);
        let first = table.create(root_a);
        table.dispose(first);

        let (b, root_b) = root(2u32);
        let second = table.create(root_b);
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());

        assert_eq!(table.deref(first, UnitId::current()).err().unwrap(), AccessError::Disposed);
        assert!(!table.dispose(first));
        assert!(!table.is_disposed(second));

        let got = Obj::<u32>::from_root(table.deref(second, UnitId::current()).unwrap()).unwrap();
        assert!(Obj::ptr_eq(&got, &b));
    }

    #[test]
    fn grows_across_segments() {
        let table = small_table();
        let handles: Vec<_> = (0..40u32)
            .map(|i| {
                let (_obj, root) = root(i);
                table.create(root)
            })
            .collect();

        for (i, handle) in handles.iter().enumerate() {
            let got = Obj::<u32>::from_root(table.deref(*handle, UnitId::current()).unwrap()).unwrap();
            assert_eq!(*got.get().unwrap(), i as u32);
        }
        assert_eq!(table.stats().live(), 40);
    }

    #[test]
    fn unknown_segment_reads_as_disposed() {
        let table = small_table();
        let handle = AnchorHandle::from_raw((1 << 32) | 1000).unwrap();
        assert!(table.is_disposed(handle));
        assert!(!table.dispose(handle));
        assert_eq!(table.deref(handle, UnitId::current()).err().unwrap(), AccessError::Disposed);
    }

    #[test]
    fn index_past_the_last_segment_reads_as_disposed() {
        let table = AnchorTable::with_config(&AnchorConfig { segment_capacity: 1 }).unwrap();
        assert_eq!(table.locate(u32::MAX).0, MAX_SEGMENTS);

        let handle = AnchorHandle::from_raw((1 << 32) | u64::from(u32::MAX)).unwrap();
        assert!(table.is_disposed(handle));
        assert!(!table.dispose(handle));
        assert_eq!(table.deref(handle, UnitId::current()).err().unwrap(), AccessError::Disposed);
    }

    #[test]
    fn dispose_drops_the_anchor_root_reference() {
        let table = AnchorTable::new();
        let (obj, root) = root(0u16);
        let handle = table.create(root);
        assert_eq!(Obj::strong_count(&obj), 2);

        table.dispose(handle);
        assert_eq!(Obj::strong_count(&obj), 1);
    }

    #[test]
    fn dropping_the_table_releases_roots() {
        let (obj, root) = root(5u64);
        let weak = obj.downgrade();
        drop(obj);

        let table = AnchorTable::new();
        table.create(root);
        assert!(weak.upgrade().is_some());
        drop(table);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn stats_serialize() {
        let stats = AnchorStats {
            created: 3,
            disposed: 2,
            released: 1,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["created"], 3);
        assert_eq!(stats.retained(), 2);
    }
}
