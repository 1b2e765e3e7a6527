#![cfg(test)]

// Property tests kept inside the crate so they can reach crate-private
// checks (ring consistency, adapter depth bookkeeping).

use crate::linked::LinkedPtr;
use crate::ptr::Ptr;
use crate::weak::WeakPtr;
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

struct Tracked {
    drops: Rc<Cell<usize>>,
    head: u32,
    tail: u32,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

// Handle-indexed operations over a pool of strong and weak pointers that
// all start from one object.
#[derive(Clone, Debug)]
enum Op {
    Clone(usize),
    Drop(usize),
    Reset(usize),
    Assign(usize, usize),
    ProjectTail(usize),
    Downgrade(usize),
    DropWeak(usize),
    Upgrade(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let i = 0usize..16;
    let op = prop_oneof![
        i.clone().prop_map(Op::Clone),
        i.clone().prop_map(Op::Drop),
        i.clone().prop_map(Op::Reset),
        (i.clone(), i.clone()).prop_map(|(a, b)| Op::Assign(a, b)),
        i.clone().prop_map(Op::ProjectTail),
        i.clone().prop_map(Op::Downgrade),
        i.clone().prop_map(Op::DropWeak),
        i.prop_map(Op::Upgrade),
    ];
    proptest::collection::vec(op, 1..80)
}

// Every strong view is a projection of one object: either the whole object
// (`head`) or its tail field, reached through an adapter.
enum View {
    Whole(Ptr<Tracked>),
    Tail(Ptr<u32>),
}

impl View {
    fn use_count(&self) -> usize {
        match self {
            View::Whole(p) => p.use_count(),
            View::Tail(p) => p.use_count(),
        }
    }

    fn is_null(&self) -> bool {
        match self {
            View::Whole(p) => p.is_null(),
            View::Tail(p) => p.is_null(),
        }
    }
}

// Property: counts across a mix of typed views.
// - use_count() from every non-empty view equals the number of non-empty
//   strong views.
// - The object is destroyed exactly once, when the last strong view goes.
// - Weak pointers resolve iff a strong view remains.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_views_share_one_count(ops in arb_ops()) {
        let drops = Rc::new(Cell::new(0));
        let mut views = vec![View::Whole(Ptr::new(Tracked { drops: drops.clone(), head: 1, tail: 2 }))];
        let mut weaks: Vec<WeakPtr<Tracked>> = Vec::new();

        for op in ops {
            match op {
                Op::Clone(i) if !views.is_empty() => {
                    let v = match &views[i % views.len()] {
                        View::Whole(p) => View::Whole(p.clone()),
                        View::Tail(p) => View::Tail(p.clone()),
                    };
                    views.push(v);
                }
                Op::Drop(i) if !views.is_empty() => {
                    let n = views.len();
                    views.swap_remove(i % n);
                }
                Op::Reset(i) if !views.is_empty() => {
                    let n = views.len();
                    match &mut views[i % n] {
                        View::Whole(p) => p.reset(),
                        View::Tail(p) => p.reset(),
                    }
                }
                Op::Assign(a, b) if !views.is_empty() => {
                    let n = views.len();
                    let src = match &views[b % n] {
                        View::Whole(p) => Some(p.clone()),
                        View::Tail(_) => None,
                    };
                    if let (Some(src), View::Whole(dst)) = (src, &mut views[a % n]) {
                        dst.assign(&src);
                    }
                }
                Op::ProjectTail(i) if !views.is_empty() => {
                    let n = views.len();
                    if let View::Whole(p) = &views[i % n] {
                        let t = p.project(|t| &t.tail);
                        prop_assert_eq!(t.get().copied(), p.get().map(|t| t.tail));
                        views.push(View::Tail(t));
                    }
                }
                Op::Downgrade(i) if !views.is_empty() => {
                    let n = views.len();
                    if let View::Whole(p) = &views[i % n] {
                        weaks.push(p.downgrade());
                    }
                }
                Op::DropWeak(i) if !weaks.is_empty() => {
                    let n = weaks.len();
                    weaks.swap_remove(i % n);
                }
                Op::Upgrade(i) if !weaks.is_empty() => {
                    let n = weaks.len();
                    if let Some(p) = weaks[i % n].upgrade() {
                        prop_assert_eq!(p.head, 1);
                        views.push(View::Whole(p));
                    }
                }
                _ => {}
            }

            let live = views.iter().filter(|v| !v.is_null()).count();
            for v in views.iter().filter(|v| !v.is_null()) {
                prop_assert_eq!(v.use_count(), live);
            }
            prop_assert_eq!(drops.get(), usize::from(live == 0));
            for w in &weaks {
                prop_assert_eq!(w.is_expired(), live == 0);
            }
            if live == 0 {
                // Nothing can bring the object back.
                views.clear();
            }
        }
        drop(views);
        drop(weaks);
        prop_assert_eq!(drops.get(), 1);
    }
}

#[derive(Clone, Debug)]
enum RingOp {
    Clone(usize),
    Drop(usize),
    Swap(usize, usize),
    Reset(usize),
    Fresh(u8),
}

fn arb_ring_ops() -> impl Strategy<Value = Vec<RingOp>> {
    let i = 0usize..12;
    let op = prop_oneof![
        i.clone().prop_map(RingOp::Clone),
        i.clone().prop_map(RingOp::Drop),
        (i.clone(), i.clone()).prop_map(|(a, b)| RingOp::Swap(a, b)),
        i.prop_map(RingOp::Reset),
        any::<u8>().prop_map(RingOp::Fresh),
    ];
    proptest::collection::vec(op, 1..80)
}

// Property: ring structure under clone/drop/swap/reset.
// - Every ring stays a single consistent cycle.
// - use_count() equals the number of handles sharing the same body.
// - Each body is dropped exactly once, when its last handle goes.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_ring_invariants(ops in arb_ring_ops()) {
        let drops = Rc::new(Cell::new(0usize));
        let created = Cell::new(1usize);
        let mk = |v: u8| {
            LinkedPtr::new(Tracked { drops: drops.clone(), head: u32::from(v), tail: 0 })
        };
        let mut handles = vec![mk(0)];

        for op in ops {
            match op {
                RingOp::Clone(i) if !handles.is_empty() => {
                    let c = handles[i % handles.len()].clone();
                    handles.push(c);
                }
                RingOp::Drop(i) if !handles.is_empty() => {
                    let n = handles.len();
                    handles.swap_remove(i % n);
                }
                RingOp::Swap(a, b) if handles.len() >= 2 => {
                    let n = handles.len();
                    let (a, b) = (a % n, b % n);
                    if a != b {
                        let (lo, hi) = (a.min(b), a.max(b));
                        let (left, right) = handles.split_at_mut(hi);
                        left[lo].swap(&mut right[0]);
                    }
                }
                RingOp::Reset(i) if !handles.is_empty() => {
                    let n = handles.len();
                    handles[i % n].reset();
                }
                RingOp::Fresh(v) => {
                    created.set(created.get() + 1);
                    handles.push(mk(v));
                }
                _ => {}
            }

            let mut bodies = std::collections::HashMap::new();
            for h in handles.iter().filter(|h| !h.is_null()) {
                prop_assert!(h.ring_is_consistent());
                *bodies.entry(h.addr()).or_insert(0usize) += 1;
            }
            for h in handles.iter().filter(|h| !h.is_null()) {
                prop_assert_eq!(h.use_count(), bodies[&h.addr()]);
            }
            prop_assert_eq!(drops.get() + bodies.len(), created.get());
        }
        drop(handles);
        prop_assert_eq!(drops.get(), created.get());
    }
}
