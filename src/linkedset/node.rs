use crossbeam_epoch::{Atomic, Guard, Shared};
use lock_api::{Mutex, MutexGuard, RawMutex};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::hash::{SetKey, SENTINEL_KEY};

/// A single link of the set.
///
/// `key` and `value` are immutable after construction. `next` and `deleted`
/// may be read at any time, but are only written while `lock` is held.
pub(crate) struct Node<T, R: RawMutex> {
    pub(crate) key: SetKey,
    pub(crate) value: Option<T>,
    pub(crate) next: Atomic<Node<T, R>>,
    deleted: AtomicBool,
    lock: Mutex<R, ()>,
}

impl<T, R: RawMutex> Node<T, R> {
    pub(crate) fn sentinel() -> Self {
        Node {
            key: SENTINEL_KEY,
            value: None,
            next: Atomic::null(),
            deleted: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn new(key: SetKey, value: T) -> Self {
        Node {
            key,
            value: Some(value),
            next: Atomic::null(),
            deleted: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    /// Block until this node's lock is ours. Released when the guard drops.
    #[inline]
    pub(crate) fn acquire(&self) -> MutexGuard<'_, R, ()> {
        self.lock.lock()
    }

    #[inline]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T, R>> {
        self.next.load(Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Flag this node as logically removed. Once set this is never cleared.
    /// Callers must hold the node lock.
    #[inline]
    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl<T: Debug, R: RawMutex> Debug for Node<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
