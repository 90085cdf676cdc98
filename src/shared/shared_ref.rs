use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use std::sync::Arc;

use crate::anchor::{AnchorHandle, AnchorTable};
use crate::error::AccessError;
use crate::heap::Obj;
use crate::trace::trace_event;
use crate::unit::UnitId;

/// Owns one anchor registration; disposing it on drop is the finalizer that
/// lets unreferenced shared values be reclaimed.
struct AnchorToken {
    table: Arc<AnchorTable>,
    handle: AnchorHandle,
}

impl Drop for AnchorToken {
    fn drop(&mut self) {
        if self.table.dispose(self.handle) {
            trace_event!(handle = %self.handle, "anchor finalized");
        }
    }
}

/// A transferable, checked handle to an anchored object.
///
/// Clones share one anchor: disposing through any clone disposes it for all of
/// them. Dropping the last clone disposes the anchor as well.
///
/// ```
/// use anchored::{AccessError, SharedRef};
///
/// let shared = SharedRef::new(3);
/// assert_eq!(*shared.get().unwrap().get().unwrap(), 3);
///
/// shared.dispose();
/// assert_eq!(shared.get().unwrap_err(), AccessError::Disposed);
/// ```
pub struct SharedRef<T> {
    token: Arc<AnchorToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> SharedRef<T> {
    /// Allocates `value` on the calling unit and anchors it in the global table.
    pub fn new(value: T) -> Self {
        Self::create(Obj::new(value))
    }

    /// Anchors `obj` in the global table.
    pub fn create(obj: Obj<T>) -> Self {
        Self::create_in(AnchorTable::global(), obj)
    }

    /// Anchors `obj` in `table`.
    pub fn create_in(table: &Arc<AnchorTable>, obj: Obj<T>) -> Self {
        let handle = table.create(obj.into_root());
        SharedRef {
            token: Arc::new(AnchorToken {
                table: Arc::clone(table),
                handle,
            }),
            _marker: PhantomData,
        }
    }

    /// Returns the anchored object if the anchor is live and the calling unit
    /// may read it.
    pub fn get(&self) -> Result<Obj<T>, AccessError> {
        self.resolve(self.token.handle)
    }

    pub(crate) fn resolve(&self, handle: AnchorHandle) -> Result<Obj<T>, AccessError> {
        let root = self.token.table.deref(handle, UnitId::current())?;
        // Only reachable with a handle from another table holding another type.
        Obj::from_root(root).ok_or(AccessError::Disposed)
    }
}

impl<T> SharedRef<T> {
    /// Disposes the anchor. Repeated and concurrent calls are harmless.
    pub fn dispose(&self) {
        self.token.table.dispose(self.token.handle);
    }

    /// Whether the anchor has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.token.table.is_disposed(self.token.handle)
    }

    /// The anchor's handle.
    pub fn handle(&self) -> AnchorHandle {
        self.token.handle
    }

    /// The table holding the anchor.
    pub fn table(&self) -> &Arc<AnchorTable> {
        &self.token.table
    }
}

impl<T> Clone for SharedRef<T> {
    fn clone(&self) -> Self {
        SharedRef {
            token: Arc::clone(&self.token),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for SharedRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.token.handle == other.token.handle && Arc::ptr_eq(&self.token.table, &other.token.table)
    }
}

impl<T> Eq for SharedRef<T> {}

impl<T> Hash for SharedRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.handle.hash(state);
    }
}

impl<T> fmt::Debug for SharedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRef")
            .field("handle", &self.token.handle)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
