//! Execution units.
//!
//! Every OS thread is an execution unit with its own identity. Objects are
//! confined to the unit that allocated them (see [`crate::heap`]), so the
//! identity of the *calling* unit is what the ownership check compares against.
//!
//! [`Worker`] is a dedicated unit that runs submitted tasks to completion in
//! order, which is how values and shared references travel between units.

mod oneshot;
mod queue;
mod worker;

pub use worker::{TaskFuture, Worker};

use core::fmt;
use core::num::NonZeroU64;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of an execution unit.
///
/// Ids are assigned lazily the first time a thread asks for its own id and are
/// never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(NonZeroU64);

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<UnitId>> = const { Cell::new(None) };
}

impl UnitId {
    /// Returns the id of the calling thread, assigning one on first use.
    pub fn current() -> UnitId {
        CURRENT.with(|slot| match slot.get() {
            Some(id) => id,
            None => {
                let raw = NEXT_UNIT.fetch_add(1, Ordering::Relaxed);
                // The counter starts at 1 and a u64 does not wrap in practice.
                let id = UnitId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN));
                slot.set(Some(id));
                id
            }
        })
    }

    /// Raw numeric value of the id.
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Shorthand for [`UnitId::current`].
#[inline]
pub fn current() -> UnitId {
    UnitId::current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn current_is_stable_per_thread() {
        assert_eq!(UnitId::current(), UnitId::current());
        assert_eq!(current(), UnitId::current());
    }

    #[test]
    fn threads_get_distinct_ids() {
        let here = UnitId::current();
        let there = thread::spawn(UnitId::current).join().unwrap();
        assert_ne!(here, there);
        assert!(there.get() > 0);
    }

    #[test]
    fn display_names_the_unit() {
        let id = UnitId::current();
        assert_eq!(id.to_string(), format!("unit#{}", id.get()));
    }
}
