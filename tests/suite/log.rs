//! Persistent log behaviour across longer histories

use std::collections::BTreeSet;

use opal_core::{LogError, PersistentLog};
use opal_types::Operation;
use pretty_assertions::assert_eq;

/// Small deterministic generator so the histories are reproducible.
fn ops(seed: u64, count: usize) -> Vec<Operation<u8>> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let value = (state >> 33) as u8 % 8;
            if (state >> 60) % 3 == 0 {
                Operation::Delete(value)
            } else {
                Operation::Add(value)
            }
        })
        .collect()
}

fn replay(ops: &[Operation<u8>]) -> BTreeSet<u8> {
    let mut set = BTreeSet::new();
    for op in ops {
        match op {
            Operation::Add(v) => set.insert(*v),
            Operation::Delete(v) => set.remove(v),
        };
    }
    set
}

#[test]
fn view_matches_set_semantics_for_long_histories() {
    for seed in [1, 7, 42] {
        let history = ops(seed, 64);
        let mut log = PersistentLog::new();
        let root = log.empty();
        let tip = log.apply_all(root, history.clone());
        assert_eq!(log.view(tip), replay(&history), "seed {seed}");
    }
}

#[test]
fn every_version_stays_readable_after_branching() {
    let mut log = PersistentLog::new();
    let root = log.set([1, 2, 3]);
    let trunk = log.add(root, 4);
    let left = log.del(trunk, 1);
    let right = log.add(trunk, 5);

    assert_eq!(log.view(root), BTreeSet::from([1, 2, 3]));
    assert_eq!(log.view(trunk), BTreeSet::from([1, 2, 3, 4]));
    assert_eq!(log.view(left), BTreeSet::from([2, 3, 4]));
    assert_eq!(log.view(right), BTreeSet::from([1, 2, 3, 4, 5]));
    assert_eq!(log.common_ancestor(left, right), Some(trunk));
}

#[test]
fn disjoint_branches_merge_to_the_same_view_in_either_order() {
    let mut log = PersistentLog::new();
    let base = log.set([0]);
    let x = log.apply_all(base, ops(3, 16).into_iter().map(|op| op.map(|v| v + 10)));
    let y = log.apply_all(base, ops(5, 16).into_iter().map(|op| op.map(|v| v + 20)));

    let xy = log.merge(x, y).unwrap();
    let yx = log.merge(y, x).unwrap();
    assert_eq!(log.view(xy), log.view(yx));

    let expected: BTreeSet<u8> = log.view(x).union(&log.view(y)).copied().collect();
    assert_eq!(log.view(xy), expected);
}

#[test]
fn diff_replayed_on_parent_reproduces_child() {
    let mut log = PersistentLog::new();
    let parent = log.set([1, 2]);
    let child = log.apply_all(parent, ops(11, 24));

    let delta = log.diff(parent, child).unwrap();
    let rebuilt = log.apply_all(parent, delta);
    assert_eq!(log.view(rebuilt), log.view(child));
}

#[test]
fn unrelated_roots_are_structural_errors() {
    let mut log = PersistentLog::new();
    let a = log.set([1]);
    let b = log.set([2]);
    let b1 = log.add(b, 3);
    assert!(matches!(log.diff(a, b1), Err(LogError::Structural { .. })));
    assert!(matches!(log.merge(a, b1), Err(LogError::Structural { .. })));
    assert_eq!(log.common_ancestor(a, b1), None);
}
