//! Ordering key derivation.
//!
//! The set orders its nodes by a signed key derived from the payload hash.
//! This hash must be deterministic for the whole life of a set: two equal
//! payloads must always map to the same key, otherwise dedup and removal
//! silently miss. That rules out per-process random seeding, so the default
//! states below use fixed seeds.

use std::hash::{BuildHasher, Hash};

#[cfg(feature = "ahash")]
const AHASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

#[cfg(all(feature = "foldhash", not(feature = "ahash")))]
const FOLDHASH_SEED: u64 = 0x4528_21e6_38d0_1377;

/// The key space. The head sentinel uses [`SENTINEL_KEY`] so it always sorts first.
pub type SetKey = i64;

/// Key of the head sentinel. A payload that hashes to this value is treated
/// as already present and is never stored.
pub const SENTINEL_KEY: SetKey = SetKey::MIN;

/// A deterministic hasher state used when none is provided.
#[cfg(feature = "ahash")]
#[derive(Clone, Debug)]
pub struct DefaultKeyState(ahash::RandomState);

/// A deterministic hasher state used when none is provided.
#[cfg(all(feature = "foldhash", not(feature = "ahash")))]
#[derive(Clone, Debug)]
pub struct DefaultKeyState(foldhash::fast::FixedState);

/// A deterministic hasher state used when none is provided.
#[cfg(all(not(feature = "foldhash"), not(feature = "ahash")))]
#[derive(Clone, Debug)]
pub struct DefaultKeyState(
    std::hash::BuildHasherDefault<std::collections::hash_map::DefaultHasher>,
);

impl Default for DefaultKeyState {
    fn default() -> Self {
        #[cfg(feature = "ahash")]
        {
            let [a, b, c, d] = AHASH_SEEDS;
            DefaultKeyState(ahash::RandomState::with_seeds(a, b, c, d))
        }
        #[cfg(all(feature = "foldhash", not(feature = "ahash")))]
        {
            DefaultKeyState(foldhash::fast::FixedState::with_seed(FOLDHASH_SEED))
        }
        #[cfg(all(not(feature = "foldhash"), not(feature = "ahash")))]
        {
            DefaultKeyState(Default::default())
        }
    }
}

impl BuildHasher for DefaultKeyState {
    #[cfg(feature = "ahash")]
    type Hasher = ahash::AHasher;
    #[cfg(all(feature = "foldhash", not(feature = "ahash")))]
    type Hasher = foldhash::fast::FoldHasher;
    #[cfg(all(not(feature = "foldhash"), not(feature = "ahash")))]
    type Hasher = std::collections::hash_map::DefaultHasher;

    fn build_hasher(&self) -> Self::Hasher {
        self.0.build_hasher()
    }
}

/// Map a payload to its ordering key.
#[inline]
pub(crate) fn key_of<T, S>(build_hasher: &S, value: &T) -> SetKey
where
    T: Hash + ?Sized,
    S: BuildHasher,
{
    // Reinterpret the bits, the ordering only needs to be total and stable.
    build_hasher.hash_one(value) as SetKey
}
