//! Unit-confined heap objects.
//!
//! An [`Obj`] is a reference-counted value tagged with the unit that allocated
//! it. Reading it from any other unit fails with
//! [`AccessError::CrossThread`] unless the owner has [frozen](Obj::freeze) it.
//!
//! Objects are reclaimed as soon as the last strong handle goes away. Weak
//! handles ([`WeakObj`]) observe reclamation without keeping the value alive,
//! which is how callers detect that an object graph has actually been freed.

mod confined;

pub use confined::{Confined, Entitlement};

use core::fmt;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::AccessError;
use crate::unit::UnitId;

/// Allocation backing an [`Obj`].
pub(crate) struct ObjBox<T> {
    owner: UnitId,
    frozen: AtomicBool,
    value: T,
}

impl<T: Send + Sync + 'static> Confined for ObjBox<T> {
    fn owner(&self) -> UnitId {
        self.owner
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Strong handle to a unit-confined value.
pub struct Obj<T> {
    inner: Arc<ObjBox<T>>,
}

impl<T: Send + Sync + 'static> Obj<T> {
    /// Allocates `value`, owned by the calling unit.
    pub fn new(value: T) -> Self {
        Self::with_state(value, false)
    }

    /// Allocates `value` already frozen.
    pub fn new_frozen(value: T) -> Self {
        Self::with_state(value, true)
    }

    fn with_state(value: T, frozen: bool) -> Self {
        Obj {
            inner: Arc::new(ObjBox {
                owner: UnitId::current(),
                frozen: AtomicBool::new(frozen),
                value,
            }),
        }
    }

    /// Reads the value from the calling unit.
    pub fn get(&self) -> Result<&T, AccessError> {
        self.get_as(UnitId::current())
    }

    /// Reads the value on behalf of `unit`.
    pub fn get_as(&self, unit: UnitId) -> Result<&T, AccessError> {
        match self.inner.entitlement(unit) {
            Entitlement::Entitled => Ok(&self.inner.value),
            Entitlement::NotEntitled { owner } => Err(AccessError::CrossThread { owner, caller: unit }),
        }
    }

    /// Unit that allocated the value.
    pub fn owner(&self) -> UnitId {
        self.inner.owner
    }

    /// Whether the value is readable from every unit.
    pub fn is_frozen(&self) -> bool {
        self.inner.is_frozen()
    }

    /// Makes the value readable from every unit. Only the owner may freeze;
    /// freezing an already frozen value is a no-op.
    pub fn freeze(&self) -> Result<(), AccessError> {
        if self.is_frozen() {
            return Ok(());
        }
        let caller = UnitId::current();
        if caller != self.inner.owner {
            return Err(AccessError::CrossThread {
                owner: self.inner.owner,
                caller,
            });
        }
        self.inner.frozen.store(true, Ordering::Release);
        Ok(())
    }

    /// Creates a weak handle that does not keep the value alive.
    pub fn downgrade(&self) -> WeakObj<T> {
        WeakObj {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same allocation.
    pub fn ptr_eq(a: &Obj<T>, b: &Obj<T>) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of strong handles, anchor roots included.
    pub fn strong_count(this: &Obj<T>) -> usize {
        Arc::strong_count(&this.inner)
    }

    /// Converts into the type-erased root stored by an
    /// [`AnchorTable`](crate::anchor::AnchorTable).
    pub fn into_root(self) -> Arc<dyn Confined> {
        self.inner
    }

    /// Recovers a typed handle from a table root. Returns `None` if the root
    /// holds a different type.
    pub fn from_root(root: Arc<dyn Confined>) -> Option<Obj<T>> {
        root.into_any()
            .downcast::<ObjBox<T>>()
            .ok()
            .map(|inner| Obj { inner })
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Obj {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("owner", &self.inner.owner)
            .field("frozen", &self.inner.frozen.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Weak handle to an [`Obj`].
pub struct WeakObj<T> {
    inner: Weak<ObjBox<T>>,
}

impl<T> WeakObj<T> {
    /// Upgrades to a strong handle if the value is still alive.
    pub fn upgrade(&self) -> Option<Obj<T>> {
        self.inner.upgrade().map(|inner| Obj { inner })
    }

    /// Returns `true` once the value has been reclaimed.
    pub fn is_reclaimed(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl<T> Clone for WeakObj<T> {
    fn clone(&self) -> Self {
        WeakObj {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WeakObj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObj")
            .field("reclaimed", &self.is_reclaimed())
            .finish()
    }
}
