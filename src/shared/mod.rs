//! Cross-unit shared references.
//!
//! A [`SharedRef`] anchors one [`Obj`](crate::heap::Obj) in an
//! [`AnchorTable`](crate::anchor::AnchorTable) and can be moved freely between
//! units as task payload. Reading through it is checked twice, in order:
//! disposal first, then ownership.
//!
//! A [`DisposableSharedRef`] adds an atomic slot in front of the handle so that
//! `dispose` and `get` racing on the same wrapper always resolve cleanly to
//! either the value or [`AccessError::Disposed`](crate::AccessError::Disposed).

mod disposable;
mod shared_ref;

pub use disposable::DisposableSharedRef;
pub use shared_ref::SharedRef;
