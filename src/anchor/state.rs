//! Packed per-slot state word.
//!
//! Layout: `[generation:32 | readers:30 | status:2]`. Every transition on a
//! slot is a single RMW on this word.

const STATUS_MASK: u64 = 0b11;
const READER_SHIFT: u32 = 2;
const READERS_MASK: u64 = ((1 << 30) - 1) << READER_SHIFT;
const GENERATION_SHIFT: u32 = 32;

/// One registered reader, as an increment on the raw word.
pub(crate) const READER: u64 = 1 << READER_SHIFT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Live = 0,
    Disposed = 1,
    Released = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotState(u64);

impl SlotState {
    /// State of a never-used slot. Generation 0 is never handed out.
    pub(crate) const VACANT: SlotState = SlotState::new(0, 0, Status::Released);

    pub(crate) const fn new(generation: u32, readers: u32, status: Status) -> Self {
        SlotState(
            ((generation as u64) << GENERATION_SHIFT)
                | (((readers as u64) << READER_SHIFT) & READERS_MASK)
                | status as u64,
        )
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        SlotState(raw)
    }

    #[inline]
    pub(crate) const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn generation(self) -> u32 {
        (self.0 >> GENERATION_SHIFT) as u32
    }

    #[inline]
    pub(crate) const fn readers(self) -> u32 {
        ((self.0 & READERS_MASK) >> READER_SHIFT) as u32
    }

    #[inline]
    pub(crate) const fn status(self) -> Status {
        match self.0 & STATUS_MASK {
            0 => Status::Live,
            1 => Status::Disposed,
            _ => Status::Released,
        }
    }

    /// Same generation and reader count, new status.
    #[inline]
    pub(crate) const fn with_status(self, status: Status) -> Self {
        SlotState((self.0 & !STATUS_MASK) | status as u64)
    }

    /// Whether a handle of `generation` may read through this slot.
    #[inline]
    pub(crate) const fn admits(self, generation: u32) -> bool {
        self.generation() == generation && matches!(self.status(), Status::Live)
    }
}

/// Generation that follows `generation`, skipping 0.
#[inline]
pub(crate) const fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        g => g,
    }
}
