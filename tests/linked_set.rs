use std::collections::BTreeSet;
use std::hash::{BuildHasher, Hasher};
use std::thread::scope;

use lazyset::{LinkedSet, SpinLinkedSet};
use proptest::prelude::*;

// Split a snapshot back into (key, value) pairs.
fn parse_snapshot(snap: &str) -> Vec<(i64, String)> {
    if snap.is_empty() {
        return Vec::new();
    }
    snap.split(',')
        .map(|pair| {
            let (k, v) = pair.split_once(':').unwrap();
            (k.parse().unwrap(), v.to_string())
        })
        .collect()
}

fn assert_strictly_ordered(pairs: &[(i64, String)]) {
    assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0), "{:?}", pairs);
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u8),
    Remove(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Insert),
        any::<u8>().prop_map(Op::Remove),
    ]
}

proptest::proptest! {
    #[test]
    fn linked_set_matches_btreeset(ops in proptest::collection::vec(op_strategy(), 0..256)) {
        let mut model = BTreeSet::new();
        let set = LinkedSet::new();

        for op in ops {
            match op {
                Op::Insert(v) => {
                    // Single threaded there is nothing to conflict with.
                    prop_assert!(set.insert(v));
                    model.insert(v);
                }
                Op::Remove(v) => {
                    prop_assert!(set.remove(&v));
                    model.remove(&v);
                }
            }

            let pairs = parse_snapshot(&set.snapshot());
            assert_strictly_ordered(&pairs);
            let values: BTreeSet<u8> = pairs.iter().map(|(_, v)| v.parse().unwrap()).collect();
            prop_assert_eq!(&values, &model);
            prop_assert_eq!(set.len(), model.len());
        }
    }

    #[test]
    fn spin_linked_set_ordered(values: Vec<u16>) {
        let set = SpinLinkedSet::<u16>::default();
        for v in values.iter() {
            prop_assert!(set.insert(*v));
        }
        let pairs = parse_snapshot(&set.snapshot());
        assert_strictly_ordered(&pairs);
        let distinct: BTreeSet<u16> = values.iter().copied().collect();
        prop_assert_eq!(pairs.len(), distinct.len());
    }
}

#[test]
fn remove_from_empty_and_beyond() {
    let set: LinkedSet<String> = LinkedSet::new();
    assert!(set.remove(&"a".to_string()));
    assert!(set.is_empty());

    assert!(set.insert("one".to_string()));
    let before = set.snapshot();
    // Whatever the key of these, they were never inserted and must not
    // disturb the set.
    for absent in ["zzz", "nnn", "a"] {
        let _ = set.remove(&absent.to_string());
    }
    assert_eq!(set.snapshot(), before);
    assert_eq!(set.len(), 1);
}

#[test]
fn display_matches_snapshot() {
    let set = LinkedSet::new();
    for v in [3u32, 1, 2] {
        assert!(set.insert(v));
    }
    assert_eq!(format!("{}", set), set.snapshot());
    assert_eq!(parse_snapshot(&set.snapshot()).len(), 3);
    assert_eq!(format!("{:?}", set), "LinkedSet { len: 3, .. }");
}

fn insert_all(set: &LinkedSet<String>, values: &[&str]) {
    for v in values {
        while !set.insert(v.to_string()) {}
    }
}

fn remove_all(set: &LinkedSet<String>, values: &[&str]) {
    for v in values {
        while !set.remove(&v.to_string()) {}
    }
}

fn remove_absent(set: &LinkedSet<String>, values: &[&str]) {
    for v in values {
        // May report a conflict, but never changes anything.
        let _ = set.remove(&v.to_string());
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn three_workers() {
    let _ = tracing_subscriber::fmt::try_init();
    let set: LinkedSet<String> = LinkedSet::new();

    scope(|scope| {
        let set = &set;
        scope.spawn(move || {
            remove_absent(set, &["a", "zzz", "nnn"]);
            insert_all(set, &["one", "two", "aaa", "bbb", "ccc"]);
            remove_absent(set, &["a", "zzz", "nnn"]);
            insert_all(set, &["test1", "test2", "xxx", "yyy"]);
            remove_all(set, &["bbb", "two"]);
            let _ = set.remove(&"test1".to_string());
        });
        scope.spawn(move || {
            insert_all(set, &["ones", "twos", "aaas", "bbbs", "cccs"]);
            remove_absent(set, &["a", "zzz", "nnn"]);
            insert_all(set, &["test1", "test2", "xxx", "yyy"]);
            remove_all(set, &["cccs", "twos"]);
            let _ = set.remove(&"test1".to_string());
            let _ = set.remove(&"test2".to_string());
        });
        scope.spawn(move || {
            insert_all(set, &["on", "tw", "aa", "bb", "cc"]);
            remove_absent(set, &["zzz", "nnn"]);
            insert_all(set, &["test1", "test2", "xxx", "yyy"]);
            remove_all(set, &["cc", "tw"]);
            let _ = set.remove(&"test1".to_string());
            let _ = set.remove(&"test2".to_string());
        });
    });

    let pairs = parse_snapshot(&set.snapshot());
    assert_strictly_ordered(&pairs);
    assert_eq!(pairs.len(), set.len());

    let present: BTreeSet<&str> = pairs.iter().map(|(_, v)| v.as_str()).collect();
    for kept in [
        "one", "aaa", "ccc", "ones", "aaas", "bbbs", "on", "aa", "bb", "xxx", "yyy",
    ] {
        assert!(present.contains(kept), "missing {}", kept);
    }
    for gone in ["two", "bbb", "twos", "cccs", "tw", "cc", "a", "zzz", "nnn"] {
        assert!(!present.contains(gone), "unexpected {}", gone);
    }
}

// Keys equal to the integer, so the threads below really work on disjoint
// stretches of the list.
#[derive(Debug, Default, Clone, Copy)]
struct IdentityState;

#[derive(Debug, Default)]
struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("only u64 keys are hashed here");
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
}

impl BuildHasher for IdentityState {
    type Hasher = IdentityHasher;

    fn build_hasher(&self) -> IdentityHasher {
        IdentityHasher::default()
    }
}

const RANGE: u64 = 1_000;

#[test]
#[cfg_attr(miri, ignore)]
fn disjoint_ranges_concurrent() {
    let set: LinkedSet<u64, IdentityState> = LinkedSet::with_hasher(IdentityState);

    // Seed the boundary so the two threads never edit the same link.
    assert!(set.insert(RANGE));

    let results: Vec<bool> = scope(|scope| {
        let set = &set;
        let workers: Vec<_> = (0..2u64)
            .map(|t| {
                scope.spawn(move || {
                    // Descending, so each insert lands in front of the last one.
                    (t * RANGE + 1..(t + 1) * RANGE).rev().all(|v| set.insert(v))
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    assert_eq!(results, vec![true, true]);
    assert!(set.insert(0));
    assert!(set.insert(2 * RANGE));

    let pairs = parse_snapshot(&set.snapshot());
    assert_strictly_ordered(&pairs);
    let values: BTreeSet<u64> = pairs.iter().map(|(_, v)| v.parse().unwrap()).collect();
    assert_eq!(values, (0..=2 * RANGE).collect::<BTreeSet<_>>());
    assert_eq!(set.len(), (2 * RANGE + 1) as usize);
}
