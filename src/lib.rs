//! # `anchored` - Checked Cross-Unit Shared References
//!
//! Every thread is an *execution unit*, and objects are confined to the unit
//! that allocated them unless they have been frozen. `anchored` provides a
//! handle that carries such an object across units without giving up that
//! rule:
//!
//! - the object is kept alive by an *anchor* (a strong root in an
//!   [`AnchorTable`]) regardless of ordinary reachability;
//! - every dereference is checked, disposal first and ownership second;
//! - the anchor can be disposed from any unit, any number of times, racing or
//!   not, and a racing dereference observes either the value or
//!   [`AccessError::Disposed`].
//!
//! ## Architecture
//!
//! 1. **Execution units** ([`unit`]): `UnitId` per thread, and [`Worker`], a
//!    dedicated unit that runs tasks whose payload may include shared
//!    references.
//! 2. **Confined objects** ([`heap`]): [`Obj<T>`] with an owner tag and a
//!    one-way frozen bit; [`WeakObj<T>`] observes reclamation.
//! 3. **Anchor table** ([`anchor`]): lock-free, generation-counted registry of
//!    roots with a single atomic state word per slot.
//! 4. **Shared references** ([`shared`]): [`SharedRef<T>`] and
//!    [`DisposableSharedRef<T>`].
//!
//! ### Reclamation
//!
//! Objects are reference counted and reclaimed as soon as the last strong edge
//! disappears. The anchor table never looks inside the values it holds, so a
//! cycle that runs through anchors stays alive until one of its anchors is
//! disposed, either explicitly or because the last `SharedRef` to it was
//! dropped.
//!
//! ## Example
//!
//! ```rust
//! use anchored::{AccessError, SharedRef, Worker};
//!
//! let shared = SharedRef::new(String::from("owned here"));
//! let worker = Worker::start().unwrap();
//!
//! // The handle travels; the value stays confined to this unit.
//! let remote = worker
//!     .execute(shared.clone(), |shared| shared.get().map(|obj| obj.get().map(|s| s.len())))
//!     .result()
//!     .unwrap();
//! assert!(remote.unwrap_err().is_cross_thread());
//!
//! assert_eq!(shared.get().unwrap().get().unwrap(), "owned here");
//!
//! shared.dispose();
//! assert_eq!(shared.get().unwrap_err(), AccessError::Disposed);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod anchor;
pub mod config;
pub mod error;
pub mod heap;
pub mod shared;
pub mod unit;

mod sync;
mod trace;

pub use anchor::{AnchorHandle, AnchorStats, AnchorTable};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{AccessError, WorkerError};
pub use heap::{Obj, WeakObj};
pub use shared::{DisposableSharedRef, SharedRef};
pub use unit::{TaskFuture, UnitId, Worker};

/// Builds the global anchor table from `config`.
///
/// Must run before anything touches [`AnchorTable::global`]; afterwards it
/// fails with [`ConfigError::AlreadyInitialized`]. Tables created with
/// [`AnchorTable::with_config`] are unaffected.
pub fn init(config: &RuntimeConfig) -> Result<(), ConfigError> {
    config.validate()?;
    AnchorTable::install_global(&config.anchors)
}

const _: () = {
    use core::mem;

    // Handles are plain data and pack into one word; the zero generation is a niche.
    assert!(mem::size_of::<AnchorHandle>() == 8);
    assert!(mem::size_of::<Option<AnchorHandle>>() == 8);

    // A shared reference is a single pointer to its token.
    assert!(mem::size_of::<SharedRef<u64>>() == mem::size_of::<usize>());
    assert!(mem::size_of::<Option<SharedRef<u64>>>() == mem::size_of::<usize>());
};
