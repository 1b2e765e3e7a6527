// Ordered and hashed container suite.
//
// Invariants exercised:
// - Ord orders by pointee value first, then by identity: inserting the
//   same object twice deduplicates, different objects with equal values
//   are both kept.
// - Eq/Hash are identity-based; empty pointers are equal to each other.
use rc_ptr::{Collector, LinkedPtr, Ptr};
use std::collections::{BTreeSet, HashSet};

// Test: ordered set of strong pointers.
// Verifies: same-object dedupe, equal-value retention, value order.
#[test]
fn btree_set_dedupes_by_identity_orders_by_value() {
    let three = Ptr::new(3);
    let one = Ptr::new(1);
    let other_three = Ptr::new(3);

    let mut set = BTreeSet::new();
    assert!(set.insert(three.clone()));
    assert!(!set.insert(three.clone()));
    assert!(set.insert(other_three.clone()));
    assert!(set.insert(one.clone()));
    assert!(set.insert(Ptr::null()));
    assert!(!set.insert(Ptr::null()));
    assert_eq!(set.len(), 4);

    let values: Vec<Option<i32>> = set.iter().map(|p| p.get().copied()).collect();
    assert_eq!(values, vec![None, Some(1), Some(3), Some(3)]);
    assert!(set.contains(&other_three));
    assert_eq!(three.use_count(), 2);
}

// Test: hashed set.
// Verifies: identity hashing; a projected view at the same address with
// the same block is the same element.
#[test]
fn hash_set_uses_identity() {
    let a = Ptr::new(String::from("a"));
    let twin = Ptr::new(String::from("a"));
    let mut set = HashSet::new();
    set.insert(a.clone());
    set.insert(a.clone());
    set.insert(twin);
    assert_eq!(set.len(), 2);
    assert!(set.contains(&a));
}

// Test: ring handles in an ordered set.
// Verifies: the same dedupe/retain split as Ptr.
#[test]
fn linked_ptrs_in_btree_set() {
    let a = LinkedPtr::new(String::from("x"));
    let b = LinkedPtr::new(String::from("x"));
    let mut set = BTreeSet::new();
    set.insert(a.clone());
    set.insert(a.clone());
    set.insert(b);
    assert_eq!(set.len(), 2);
    assert_eq!(a.use_count(), 2);
}

// Test: cycle-collectable handles in an ordered set.
// Verifies: value order with identity tie-break.
#[test]
fn cc_handles_in_btree_set() {
    let c = Collector::new();
    let x = c.alloc(2u32);
    let y = c.alloc(2u32);
    let z = c.alloc(1u32);
    let set: BTreeSet<_> = [x.clone(), x.clone(), y, z].into_iter().collect();
    assert_eq!(set.len(), 3);
    assert_eq!(**set.iter().next().expect("non-empty"), 1);
}
