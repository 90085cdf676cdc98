//! Lock-free stack of recycled slot indices.
//!
//! The head packs `[tag:32 | index:32]`; the tag is bumped on every update so a
//! pop that read a stale `next` link cannot succeed after the same index has
//! been popped and pushed again in between (ABA).

use crossbeam_utils::Backoff;

use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// Sentinel for "no index".
pub(crate) const NONE: u32 = u32::MAX;

const TAG_SHIFT: u32 = 32;

pub(crate) struct FreeList {
    head: AtomicU64,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        FreeList {
            head: AtomicU64::new(Self::pack(NONE, 0)),
        }
    }

    #[inline]
    const fn pack(index: u32, tag: u32) -> u64 {
        ((tag as u64) << TAG_SHIFT) | index as u64
    }

    #[inline]
    const fn unpack(head: u64) -> (u32, u32) {
        (head as u32, (head >> TAG_SHIFT) as u32)
    }

    /// Pushes `index`, whose intrusive link is `link`.
    pub(crate) fn push(&self, index: u32, link: &AtomicU32) {
        let backoff = Backoff::new();
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (top, tag) = Self::unpack(current);
            link.store(top, Ordering::Relaxed);
            let next = Self::pack(index, tag.wrapping_add(1));
            match self
                .head
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// Pops the most recently pushed index. `link_of` resolves an index to its
    /// intrusive link; links must stay valid for as long as the list is used.
    pub(crate) fn pop<'a, F>(&self, link_of: F) -> Option<u32>
    where
        F: Fn(u32) -> &'a AtomicU32,
    {
        let backoff = Backoff::new();
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (top, tag) = Self::unpack(current);
            if top == NONE {
                return None;
            }
            let below = link_of(top).load(Ordering::Relaxed);
            let next = Self::pack(below, tag.wrapping_add(1));
            match self
                .head
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(top),
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }
}
