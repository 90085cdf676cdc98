//! Single-value, single-use channel carrying a task's outcome back to its future.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_utils::sync::{Parker, Unparker};

const STATE_EMPTY: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_DISCONNECTED: u8 = 2;
const STATE_CONSUMED: u8 = 3;

struct Shared<T> {
    data: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
    waiter: Unparker,
}

// SAFETY: `data` is written once by the sender and read once by the receiver,
// with the hand-off ordered by `state`.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

/// Sending half; consumed by [`Sender::send`].
pub(crate) struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// Receiving half; owns the parker the sender wakes.
pub(crate) struct Receiver<T> {
    shared: Arc<Shared<T>>,
    parker: Parker,
}

/// The sender was dropped without sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TryRecvError {
    Empty,
    Disconnected,
}

pub(crate) fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let parker = Parker::new();
    let shared = Arc::new(Shared {
        data: UnsafeCell::new(MaybeUninit::uninit()),
        state: AtomicU8::new(STATE_EMPTY),
        waiter: parker.unparker().clone(),
    });

    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared, parker },
    )
}

impl<T> Sender<T> {
    /// Hands `value` to the receiver, or gives it back if the receiver is gone.
    pub(crate) fn send(self, value: T) -> Result<(), T> {
        // SAFETY: only the sender writes `data`, and `send` consumes it.
        unsafe {
            (*self.shared.data.get()).write(value);
        }

        match self.shared.state.compare_exchange(
            STATE_EMPTY,
            STATE_READY,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                self.shared.waiter.unpark();
                Ok(())
            }
            // The receiver dropped first, so nobody else will read `data`.
            Err(_) => Err(unsafe { (*self.shared.data.get()).assume_init_read() }),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        // Fails harmlessly once a value was sent.
        if self
            .shared
            .state
            .compare_exchange(
                STATE_EMPTY,
                STATE_DISCONNECTED,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            self.shared.waiter.unpark();
        }
    }
}

impl<T> Receiver<T> {
    pub(crate) fn try_recv(&self) -> Result<T, TryRecvError> {
        match self.shared.state.compare_exchange(
            STATE_READY,
            STATE_CONSUMED,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            // SAFETY: READY means the sender finished writing, and the CAS makes
            // this the only read.
            Ok(_) => Ok(unsafe { (*self.shared.data.get()).assume_init_read() }),
            Err(STATE_EMPTY) => Err(TryRecvError::Empty),
            Err(_) => Err(TryRecvError::Disconnected),
        }
    }

    /// Blocks until the value arrives or the sender disconnects.
    pub(crate) fn recv(self) -> Result<T, RecvError> {
        loop {
            match self.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Disconnected) => return Err(RecvError),
                Err(TryRecvError::Empty) => self.parker.park(),
            }
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) != STATE_EMPTY
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let state = self.shared.state.swap(STATE_CONSUMED, Ordering::Acquire);
        if state == STATE_READY {
            // SAFETY: the value was sent and never read.
            unsafe { (*self.shared.data.get()).assume_init_drop() };
        }
    }
}
