use core::fmt;
use std::sync::Arc;

use super::SharedRef;
use crate::anchor::{AnchorHandle, AnchorTable};
use crate::error::AccessError;
use crate::heap::Obj;
use crate::sync::{AtomicU64, Ordering};
use crate::trace::trace_event;

const ABSENT: u64 = 0;

/// A [`SharedRef`] behind an atomically cleared slot.
///
/// [`dispose`](Self::dispose) detaches this wrapper only. The anchor itself
/// stays live until [`shared()`](Self::shared) is disposed or the last
/// `SharedRef` clone is dropped.
pub struct DisposableSharedRef<T> {
    slot: AtomicU64,
    shared: SharedRef<T>,
}

impl<T: Send + Sync + 'static> DisposableSharedRef<T> {
    /// Allocates `value` on the calling unit and anchors it in the global table.
    pub fn new(value: T) -> Self {
        Self::from_shared(SharedRef::new(value))
    }

    /// Anchors `obj` in the global table.
    pub fn create(obj: Obj<T>) -> Self {
        Self::from_shared(SharedRef::create(obj))
    }

    /// Anchors `obj` in `table`.
    pub fn create_in(table: &Arc<AnchorTable>, obj: Obj<T>) -> Self {
        Self::from_shared(SharedRef::create_in(table, obj))
    }

    /// Wraps an existing shared reference.
    pub fn from_shared(shared: SharedRef<T>) -> Self {
        DisposableSharedRef {
            slot: AtomicU64::new(shared.handle().to_raw()),
            shared,
        }
    }

    /// Reads through the slot: [`AccessError::Disposed`] once detached,
    /// otherwise whatever the inner [`SharedRef::get`] reports.
    pub fn get(&self) -> Result<Obj<T>, AccessError> {
        let handle = AnchorHandle::from_raw(self.slot.load(Ordering::Acquire))
            .ok_or(AccessError::Disposed)?;
        self.shared.resolve(handle)
    }
}

impl<T> DisposableSharedRef<T> {
    /// Detaches the wrapper. Only the first call has an effect.
    pub fn dispose(&self) {
        if self.slot.swap(ABSENT, Ordering::AcqRel) != ABSENT {
            trace_event!(handle = %self.shared.handle(), "disposable detached");
        }
    }

    /// Whether [`get`](Self::get) would report disposal.
    pub fn is_disposed(&self) -> bool {
        self.slot.load(Ordering::Acquire) == ABSENT || self.shared.is_disposed()
    }

    /// The wrapped shared reference.
    pub fn shared(&self) -> &SharedRef<T> {
        &self.shared
    }
}

impl<T> fmt::Debug for DisposableSharedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableSharedRef")
            .field("attached", &(self.slot.load(Ordering::Acquire) != ABSENT))
            .field("shared", &self.shared)
            .finish()
    }
}
