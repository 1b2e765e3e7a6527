// Link-sharer ring suite.
//
// Invariants exercised:
// - The object lives while any handle in its ring lives and is destroyed
//   exactly once, by the last handle to leave.
// - use_count() equals ring size; unique() iff the ring has one node.
// - swap() exchanges objects and rings in all four solitary/shared
//   combinations.
use rc_ptr::{LinkedPtr, RefError};
use std::cell::Cell;
use std::rc::Rc;

struct Tracked {
    drops: Rc<Cell<usize>>,
    id: u32,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn tracked(drops: &Rc<Cell<usize>>, id: u32) -> LinkedPtr<Tracked> {
    LinkedPtr::new(Tracked {
        drops: drops.clone(),
        id,
    })
}

// Test: three handles, any two dropped.
// Verifies: body survives two drops in every order; third destroys.
#[test]
fn three_handles_any_two_dropped() {
    for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
        let drops = Rc::new(Cell::new(0));
        let a = tracked(&drops, 1);
        let mut handles = vec![Some(a.clone()), Some(a.clone()), Some(a)];
        assert_eq!(handles[0].as_ref().map(LinkedPtr::use_count), Some(3));
        handles[order[0]] = None;
        handles[order[1]] = None;
        assert_eq!(drops.get(), 0);
        let last = handles[order[2]].take().expect("kept");
        assert!(last.unique());
        assert_eq!(last.id, 1);
        drop(last);
        assert_eq!(drops.get(), 1);
    }
}

fn swap_case(left_shared: bool, right_shared: bool) {
    let drops = Rc::new(Cell::new(0));
    let mut a = tracked(&drops, 1);
    let mut b = tracked(&drops, 2);
    let a_peer = left_shared.then(|| a.clone());
    let b_peer = right_shared.then(|| b.clone());

    a.swap(&mut b);
    assert_eq!((a.id, b.id), (2, 1));
    assert_eq!(a.use_count(), 1 + usize::from(right_shared));
    assert_eq!(b.use_count(), 1 + usize::from(left_shared));
    if let Some(p) = &b_peer {
        assert!(LinkedPtr::ptr_eq(p, &a));
    }
    if let Some(p) = &a_peer {
        assert!(LinkedPtr::ptr_eq(p, &b));
    }

    drop(a_peer);
    drop(b_peer);
    assert_eq!(drops.get(), 0);
    assert!(a.unique() && b.unique());
    drop(a);
    drop(b);
    assert_eq!(drops.get(), 2);
}

// Test: swap across all solitary/shared combinations.
// Verifies: objects and rings exchanged; no body dropped early.
#[test]
fn swap_all_four_cases() {
    swap_case(false, false);
    swap_case(true, false);
    swap_case(false, true);
    swap_case(true, true);
}

// Test: swap within one ring.
// Verifies: both handles keep the same object and ring size.
#[test]
fn swap_within_same_ring() {
    let drops = Rc::new(Cell::new(0));
    let mut a = tracked(&drops, 1);
    let mut b = a.clone();
    a.swap(&mut b);
    assert_eq!(a.use_count(), 2);
    assert!(LinkedPtr::ptr_eq(&a, &b));
}

// Test: assign, reset and set.
// Verifies: self-assign no-op; leaving a ring only destroys when solitary.
#[test]
fn assign_reset_set() {
    let drops = Rc::new(Cell::new(0));
    let mut a = tracked(&drops, 1);
    let b = tracked(&drops, 2);
    let alias = a.clone();
    a.assign(&alias);
    assert_eq!(a.use_count(), 2);

    a.assign(&b);
    assert_eq!(drops.get(), 0);
    assert_eq!(b.use_count(), 2);
    assert!(alias.unique());

    a.reset();
    assert!(a.is_null());
    assert_eq!(b.use_count(), 1);

    a.set(Tracked {
        drops: drops.clone(),
        id: 3,
    });
    assert_eq!(a.id, 3);
    drop(alias);
    assert_eq!(drops.get(), 1);
}

// Test: empty ring handles.
// Verifies: strict access fails with the ring kind in the message.
#[test]
fn empty_handle_strict_access() {
    let n: LinkedPtr<u8> = LinkedPtr::default();
    let err = n.try_get().expect_err("empty");
    assert!(matches!(err, RefError::NullDereference { kind: "LinkedPtr", .. }));
    assert!(err.to_string().starts_with("LinkedPtr 0x"));
    assert_eq!(format!("{n:?}"), "LinkedPtr(null)");
}

thread_local! {
    static GUARD_DROPS: Cell<usize> = const { Cell::new(0) };
}

// Zero-sized, so every body would otherwise share one dangling address.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Guard;

impl Drop for Guard {
    fn drop(&mut self) {
        GUARD_DROPS.with(|d| d.set(d.get() + 1));
    }
}

// Test: rings over zero-sized bodies.
// Assumes: each ring gets its own address even when its body has no size.
// Verifies: distinct rings are distinct objects for assign, ptr_eq and
// BTreeSet; each body is dropped once.
#[test]
fn zero_sized_rings_stay_distinct() {
    GUARD_DROPS.with(|d| d.set(0));
    let mut a = LinkedPtr::new(Guard);
    let b = LinkedPtr::new(Guard);
    assert!(!LinkedPtr::ptr_eq(&a, &b));
    assert_ne!(a.addr(), b.addr());

    a.assign(&b);
    assert_eq!(GUARD_DROPS.with(Cell::get), 1);
    assert_eq!(b.use_count(), 2);
    assert!(LinkedPtr::ptr_eq(&a, &b));

    let set: std::collections::BTreeSet<_> =
        [LinkedPtr::new(Guard), LinkedPtr::new(Guard), b.clone()]
            .into_iter()
            .collect();
    assert_eq!(set.len(), 3);
    drop(set);
    assert_eq!(GUARD_DROPS.with(Cell::get), 3);
    drop(a);
    drop(b);
    assert_eq!(GUARD_DROPS.with(Cell::get), 4);
}

// Test: handles moved by a growing Vec.
// Assumes: each handle's ring node lives on the heap, not in the handle.
// Verifies: moving handles around keeps every ring intact.
#[test]
fn moved_handles_keep_their_ring() {
    let drops = Rc::new(Cell::new(0));
    let first = tracked(&drops, 1);
    let mut handles = Vec::with_capacity(1);
    for _ in 0..64 {
        handles.push(first.clone());
    }
    let moved: Vec<_> = handles.drain(10..).collect();
    assert_eq!(first.use_count(), 65);
    assert!(moved.iter().all(|h| h.id == 1 && h.use_count() == 65));
    drop(handles);
    drop(moved);
    assert!(first.unique());
    drop(first);
    assert_eq!(drops.get(), 1);
}
