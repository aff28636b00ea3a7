//! Lazyset - A lock coupled concurrent linked set
//!
//! This crate provides [`LinkedSet`], a set that many threads can insert into
//! and remove from at the same time without a lock over the whole structure.
//! Elements are kept in a singly linked list ordered by a key derived from
//! their hash. A mutation only ever locks the two adjacent nodes it edits,
//! so operations on different parts of the list proceed in parallel, while
//! operations that touch the same pair of nodes serialise on that pair.
//!
//! The set trades completeness for simplicity. Mutations that race with
//! each other may fail and report `false` instead of retrying, there is no
//! linearizable `contains` or iteration, and the only read operation is a
//! diagnostic [`LinkedSet::snapshot`].
//!
//! # Features
//! The hasher used to derive ordering keys is selected with features.
//!
//! * `foldhash` - use the foldhash crate with a fixed seed (default)
//! * `ahash` - use the ahash crate with fixed seeds
//!
//! With neither enabled the standard library `DefaultHasher` is used.

#![warn(unused_extern_crates)]
#![warn(missing_docs)]

pub mod hash;
pub mod linkedset;
pub mod lock;

pub use linkedset::{LinkedSet, SpinLinkedSet};
pub use lock::{DefaultRawMutex, SpinRawMutex};
