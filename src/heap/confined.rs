use std::any::Any;
use std::sync::Arc;

use crate::unit::UnitId;

/// Outcome of asking whether a unit may read a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entitlement {
    /// The unit owns the value, or the value is frozen.
    Entitled,
    /// The value is confined to another unit.
    NotEntitled {
        /// Unit the value is confined to.
        owner: UnitId,
    },
}

impl Entitlement {
    /// Returns `true` for [`Entitlement::Entitled`].
    pub const fn is_entitled(self) -> bool {
        matches!(self, Entitlement::Entitled)
    }
}

/// A heap value with a confinement rule.
///
/// The anchor table stores its roots as `Arc<dyn Confined>`, which keeps the
/// table independent of the value type while still letting it apply the
/// ownership check before a typed handle is handed out.
pub trait Confined: Send + Sync + 'static {
    /// Unit that allocated the value.
    fn owner(&self) -> UnitId;

    /// Whether the value has been frozen (readable from every unit).
    fn is_frozen(&self) -> bool;

    /// Decides whether `unit` may read the value.
    fn entitlement(&self, unit: UnitId) -> Entitlement {
        let owner = self.owner();
        if self.is_frozen() || owner == unit {
            Entitlement::Entitled
        } else {
            Entitlement::NotEntitled { owner }
        }
    }

    /// Upcasts for a typed downcast on the way out of the table.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Fixed {
        owner: UnitId,
        frozen: bool,
    }

    impl Confined for Fixed {
        fn owner(&self) -> UnitId {
            self.owner
        }

        fn is_frozen(&self) -> bool {
            self.frozen
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn owner_and_frozen_are_entitled() {
        let here = UnitId::current();
        let there = thread::spawn(UnitId::current).join().unwrap();

        let owned = Fixed { owner: here, frozen: false };
        assert!(owned.entitlement(here).is_entitled());
        assert_eq!(owned.entitlement(there), Entitlement::NotEntitled { owner: here });

        let frozen = Fixed { owner: here, frozen: true };
        assert!(frozen.entitlement(there).is_entitled());
    }
}
