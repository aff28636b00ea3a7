//! Node lock primitives
//!
//! Every node of a [`LinkedSet`](crate::linkedset::LinkedSet) carries its own
//! lock. The set is generic over the raw lock so that callers can choose
//! between a blocking, parking mutex ([`DefaultRawMutex`]) and a pure
//! busy-wait flag ([`SpinRawMutex`]).
//!
//! Neither primitive is fair. Under heavy contention a thread may lose the
//! race for a node repeatedly.

use crossbeam_utils::Backoff;
use lock_api::{GuardSend, RawMutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// The raw lock used by a set unless another is requested.
pub type DefaultRawMutex = parking_lot::RawMutex;

/// A busy-wait lock over a single flag.
///
/// `lock` spins (with backoff) until the flag is observed clear and then
/// claims it atomically. `unlock` clears the flag. There is no queue, and no
/// ownership of anything beyond the flag itself.
#[derive(Debug)]
pub struct SpinRawMutex {
    locked: AtomicBool,
}

unsafe impl RawMutex for SpinRawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: SpinRawMutex = SpinRawMutex {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        let backoff = Backoff::new();
        loop {
            if self.try_lock() {
                return;
            }
            // Only retry the swap once the holder has let go, so we don't
            // bounce the cache line while waiting.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// A mutex built over [`SpinRawMutex`].
pub type SpinMutex<T> = lock_api::Mutex<SpinRawMutex, T>;
