//! LinkedSet - A lock coupled, lazily deleted concurrent set
//!
//! The set is a singly linked list kept in ascending order of a key derived
//! from each payload's hash, anchored by a permanent sentinel head. Many
//! threads may insert and remove at the same time. There is no lock over the
//! whole structure: each mutation finds its position without locks, then
//! locks only the two adjacent nodes it is about to edit (the predecessor
//! first, then its successor), checks that the pair is still linked and live,
//! and performs the edit.
//!
//! A mutation that finds its pair has changed underneath it does *not* retry.
//! It returns `false` and leaves the set untouched, and it is up to the
//! caller to issue the call again if it needs the operation to land.
//!
//! Membership is decided by key alone on insert. Two payloads with
//! colliding hashes are considered the same element, and the second insert
//! reports success without storing anything.
//!
//! Unlinked nodes are reclaimed with crossbeam-epoch, so a thread that is
//! still walking over a node another thread just removed can keep reading it
//! safely until it finishes its operation.

mod node;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use lock_api::RawMutex;
use std::fmt::{self, Debug, Display};
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, trace};

use self::node::Node;
use crate::hash::{key_of, DefaultKeyState, SetKey};
use crate::lock::{DefaultRawMutex, SpinRawMutex};

/// A [`LinkedSet`] whose nodes are guarded by busy-wait locks.
pub type SpinLinkedSet<T, S = DefaultKeyState> = LinkedSet<T, S, SpinRawMutex>;

/// A concurrent, hash ordered set with per-node locking.
///
/// Payloads must implement `Hash` deterministically under the set's
/// `BuildHasher`, and `Eq`, which is used to tell apart colliding payloads
/// during removal.
///
/// # Examples
/// ```
/// use lazyset::LinkedSet;
///
/// let set = LinkedSet::new();
/// assert!(set.insert(1u64));
/// assert!(set.insert(2u64));
/// assert_eq!(set.len(), 2);
///
/// assert!(set.remove(&1u64));
/// assert_eq!(set.len(), 1);
/// ```
pub struct LinkedSet<T, S = DefaultKeyState, R: RawMutex = DefaultRawMutex> {
    head: Atomic<Node<T, R>>,
    // Non-owning, denotes the last node or head when empty.
    tail: Atomic<Node<T, R>>,
    size: AtomicUsize,
    build_hasher: S,
}

// Result of the locked phase of a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveOutcome {
    Removed,
    // The key matched but the payload did not. Nothing was changed.
    CollisionMiss,
    Conflict,
    Fault,
}

impl RemoveOutcome {
    fn reported(self) -> bool {
        matches!(self, RemoveOutcome::Removed | RemoveOutcome::CollisionMiss)
    }
}

impl<T> LinkedSet<T, DefaultKeyState, DefaultRawMutex> {
    /// Create an empty set using the default key hasher and blocking node locks.
    pub fn new() -> Self {
        Self::with_hasher(DefaultKeyState::default())
    }
}

impl<T, S, R> LinkedSet<T, S, R>
where
    R: RawMutex,
{
    /// Create an empty set that derives ordering keys with `build_hasher`.
    ///
    /// The hasher must produce the same output for the same payload for the
    /// whole life of the set.
    pub fn with_hasher(build_hasher: S) -> Self {
        let head = Atomic::new(Node::sentinel());
        let tail = head.clone();
        LinkedSet {
            head,
            tail,
            size: AtomicUsize::new(0),
            build_hasher,
        }
    }

    /// The number of elements in the set. This is advisory while other
    /// threads are mutating the set.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Returns `true` if the set holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate<'g>(
        &self,
        pred: &Node<T, R>,
        curr: Shared<'g, Node<T, R>>,
        guard: &'g Guard,
    ) -> bool {
        // An absent curr still requires pred to end the chain, or a concurrent
        // append to pred would be overwritten.
        let linked = pred.next(guard) == curr;
        match unsafe { curr.as_ref() } {
            Some(curr_ref) => !pred.is_deleted() && !curr_ref.is_deleted() && linked,
            None => !pred.is_deleted() && linked,
        }
    }
}

impl<T, S, R> LinkedSet<T, S, R>
where
    T: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher,
    R: RawMutex,
{
    /// Add `value` to the set.
    ///
    /// Returns `true` if the value was stored, or if an element with the same
    /// key is already present (in which case `value` is dropped). Returns
    /// `false` if a concurrent change was detected after locking, and the set
    /// is left unchanged.
    pub fn insert(&self, value: T) -> bool {
        let guard = &epoch::pin();
        let key = key_of(&self.build_hasher, &value);
        let (pred, curr) = self.search_insert(key, guard);
        self.insert_at(value, key, pred, curr, guard)
    }

    /// Remove `value` from the set.
    ///
    /// Returns `true` if the value was removed, if the set is empty, if the
    /// key is beyond the greatest key present, or if the search stopped on a
    /// node with a colliding key that holds a different payload (nothing is
    /// removed in that case). Returns `false` if a concurrent change was
    /// detected after locking, or if the search ran off the end of the list.
    pub fn remove(&self, value: &T) -> bool {
        if self.is_empty() {
            return true;
        }

        let guard = &epoch::pin();
        let key = key_of(&self.build_hasher, value);
        let tail = self.tail.load(Ordering::Acquire, guard);
        // tail is never null, it falls back to head.
        if unsafe { tail.deref() }.key < key {
            return true;
        }

        match self.search_remove(value, key, guard) {
            Some((pred, curr)) => self.remove_at(value, pred, curr, guard),
            None => {
                debug!(key, "remove search ran off the end of the list");
                false
            }
        }
    }

    // Find the last node with key <= `key` and its successor. No locks taken.
    fn search_insert<'g>(
        &self,
        key: SetKey,
        guard: &'g Guard,
    ) -> (Shared<'g, Node<T, R>>, Shared<'g, Node<T, R>>) {
        let mut pred = self.head.load(Ordering::Acquire, guard);
        let mut curr = unsafe { pred.deref() }.next(guard);

        while let Some(curr_ref) = unsafe { curr.as_ref() } {
            if curr_ref.key > key {
                break;
            }
            pred = curr;
            curr = curr_ref.next(guard);
        }

        (pred, curr)
    }

    fn insert_at<'g>(
        &self,
        value: T,
        key: SetKey,
        pred: Shared<'g, Node<T, R>>,
        curr: Shared<'g, Node<T, R>>,
        guard: &'g Guard,
    ) -> bool {
        let pred_ref = unsafe { pred.deref() };
        let curr_ref = unsafe { curr.as_ref() };

        // Nearer the head first, always.
        let pred_lock = pred_ref.acquire();
        let curr_lock = curr_ref.map(|c| c.acquire());

        let inserted = if !self.validate(pred_ref, curr, guard) {
            debug!(key, "insert conflict, pair changed before lock");
            false
        } else if pred_ref.key == key {
            trace!(key, "insert of present key");
            true
        } else {
            let node = Owned::new(Node::new(key, value)).into_shared(guard);
            if curr_ref.is_some() {
                unsafe { node.deref() }.next.store(curr, Ordering::Relaxed);
                pred_ref.next.store(node, Ordering::Release);
                trace!(key, "spliced");
            } else {
                // tail moves before the node is published, so the next append
                // (which has to lock this node) can't be overwritten by us.
                self.tail.store(node, Ordering::Release);
                pred_ref.next.store(node, Ordering::Release);
                trace!(key, "appended");
            }
            self.size.fetch_add(1, Ordering::AcqRel);
            true
        };

        drop(curr_lock);
        drop(pred_lock);
        inserted
    }

    // Walk until the key is passed or a node holding `value` is found. None
    // if the list ended first.
    fn search_remove<'g>(
        &self,
        value: &T,
        key: SetKey,
        guard: &'g Guard,
    ) -> Option<(Shared<'g, Node<T, R>>, Shared<'g, Node<T, R>>)> {
        let mut pred = self.head.load(Ordering::Acquire, guard);
        let mut curr = unsafe { pred.deref() }.next(guard);

        loop {
            let curr_ref = unsafe { curr.as_ref() }?;
            if curr_ref.key > key || curr_ref.value.as_ref() == Some(value) {
                return Some((pred, curr));
            }
            pred = curr;
            curr = curr_ref.next(guard);
        }
    }

    fn remove_at<'g>(
        &self,
        value: &T,
        pred: Shared<'g, Node<T, R>>,
        curr: Shared<'g, Node<T, R>>,
        guard: &'g Guard,
    ) -> bool {
        let pred_ref = unsafe { pred.deref() };
        let curr_ref = unsafe { curr.deref() };

        let pred_lock = pred_ref.acquire();
        let curr_lock = curr_ref.acquire();

        let outcome = if !self.validate(pred_ref, curr, guard) {
            RemoveOutcome::Conflict
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| {
                curr_ref.value.as_ref() == Some(value)
            })) {
                Ok(true) => {
                    pred_ref.next.store(curr_ref.next(guard), Ordering::Release);
                    curr_ref.mark_deleted();
                    if self.tail.load(Ordering::Acquire, guard) == curr {
                        self.tail.store(pred, Ordering::Release);
                    }
                    self.size.fetch_sub(1, Ordering::AcqRel);
                    RemoveOutcome::Removed
                }
                Ok(false) => RemoveOutcome::CollisionMiss,
                Err(_) => RemoveOutcome::Fault,
            }
        };

        drop(curr_lock);
        drop(pred_lock);

        match outcome {
            RemoveOutcome::Removed => {
                trace!(key = curr_ref.key, "unlinked");
                // Unreachable from head now, readers still pinned keep it alive.
                unsafe { guard.defer_destroy(curr) };
            }
            RemoveOutcome::CollisionMiss => {
                trace!(key = curr_ref.key, "remove stopped on colliding payload");
            }
            RemoveOutcome::Conflict => {
                debug!(key = curr_ref.key, "remove conflict, pair changed before lock");
            }
            RemoveOutcome::Fault => {
                error!(
                    key = curr_ref.key,
                    "payload comparison panicked during remove, set unchanged"
                );
            }
        }

        outcome.reported()
    }
}

impl<T, S, R> LinkedSet<T, S, R>
where
    T: Display,
    R: RawMutex,
{
    /// Render the live elements as `key:value` pairs in key order, separated
    /// by commas.
    ///
    /// No locks are taken, so under concurrent mutation this is only a rough
    /// picture of the set: it may include a node that was removed mid walk.
    pub fn snapshot(&self) -> String {
        self.to_string()
    }
}

impl<T, S, R> Display for LinkedSet<T, S, R>
where
    T: Display,
    R: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &epoch::pin();
        let head = unsafe { self.head.load(Ordering::Acquire, guard).deref() };
        let mut curr = head.next(guard);
        let mut first = true;

        while let Some(node) = unsafe { curr.as_ref() } {
            if let (false, Some(value)) = (node.is_deleted(), node.value.as_ref()) {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{}:{}", node.key, value)?;
                first = false;
            }
            curr = node.next(guard);
        }
        Ok(())
    }
}

impl<T, S, R> Debug for LinkedSet<T, S, R>
where
    R: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedSet")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T, S, R> Default for LinkedSet<T, S, R>
where
    S: Default,
    R: RawMutex,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T, S, R: RawMutex> Drop for LinkedSet<T, S, R> {
    fn drop(&mut self) {
        // We are the only owner, so walk the chain and free every node in it.
        // Removed nodes were already handed to the collector and are not
        // reachable from here.
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.load(Ordering::Relaxed, guard);
            while let Some(node) = curr.as_ref() {
                let next = node.next.load(Ordering::Relaxed, guard);
                drop(curr.into_owned());
                curr = next;
            }
        }
    }
}

#[cfg(test)]
impl<T, S, R> LinkedSet<T, S, R>
where
    R: RawMutex,
{
    // Check ordering, that no deleted or locked node is reachable, that tail
    // is the last node and that len agrees with the chain. Only meaningful
    // when no other thread is mutating.
    pub(crate) fn verify(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        let mut last = head;
        let mut last_key = unsafe { head.deref() }.key;
        let mut count = 0;
        let mut curr = unsafe { head.deref() }.next(guard);

        while let Some(node) = unsafe { curr.as_ref() } {
            if node.key <= last_key || node.is_deleted() || node.is_locked() {
                return false;
            }
            if node.value.is_none() {
                return false;
            }
            last = curr;
            last_key = node.key;
            count += 1;
            curr = node.next(guard);
        }

        self.tail.load(Ordering::Acquire, guard) == last && count == self.len()
    }

    pub(crate) fn keys(&self) -> Vec<SetKey> {
        let guard = &epoch::pin();
        let head = unsafe { self.head.load(Ordering::Acquire, guard).deref() };
        let mut keys = Vec::new();
        let mut curr = head.next(guard);
        while let Some(node) = unsafe { curr.as_ref() } {
            keys.push(node.key);
            curr = node.next(guard);
        }
        keys
    }

    pub(crate) fn tail_key(&self) -> SetKey {
        let guard = &epoch::pin();
        unsafe { self.tail.load(Ordering::Acquire, guard).deref() }.key
    }
}
