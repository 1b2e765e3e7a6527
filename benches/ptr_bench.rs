use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rc_ptr::{Collector, Dyn, LinkedPtr, Ptr};
use std::rc::Rc;
use std::time::Duration;

const N: usize = 1_000;

// Allocate N objects, copy every handle once, then release everything.
// The same loop runs over each pointer kind and over std's Rc.

fn bench_alloc_copy_release(c: &mut Criterion) {
    let mut g = c.benchmark_group("alloc_copy_release");

    g.bench_function("ptr", |b| {
        b.iter(|| {
            let owned: Vec<Ptr<u64>> = (0..N as u64).map(Ptr::new).collect();
            let copies: Vec<_> = owned.iter().cloned().collect();
            black_box((owned, copies))
        })
    });

    g.bench_function("ptr_intrusive", |b| {
        b.iter(|| {
            let owned: Vec<Ptr<Dyn<u64>>> =
                (0..N as u64).map(|i| Ptr::new_counted(Dyn::new(i))).collect();
            let copies: Vec<_> = owned.iter().cloned().collect();
            black_box((owned, copies))
        })
    });

    g.bench_function("linked", |b| {
        b.iter(|| {
            let owned: Vec<LinkedPtr<u64>> = (0..N as u64).map(LinkedPtr::new).collect();
            let copies: Vec<_> = owned.iter().cloned().collect();
            black_box((owned, copies))
        })
    });

    g.bench_function("cc", |b| {
        let collector = Collector::new();
        b.iter(|| {
            let owned: Vec<_> = (0..N as u64).map(|i| collector.alloc(i)).collect();
            let copies: Vec<_> = owned.iter().cloned().collect();
            black_box((owned, copies))
        })
    });

    g.bench_function("std_rc", |b| {
        b.iter(|| {
            let owned: Vec<Rc<u64>> = (0..N as u64).map(Rc::new).collect();
            let copies: Vec<_> = owned.iter().cloned().collect();
            black_box((owned, copies))
        })
    });

    g.finish();
}

fn bench_copy_reset(c: &mut Criterion) {
    let mut g = c.benchmark_group("copy_reset");

    g.bench_function("ptr", |b| {
        let p = Ptr::new(7u64);
        b.iter(|| {
            let mut q = p.clone();
            q.reset();
            black_box(q)
        })
    });

    g.bench_function("ptr_adapted", |b| {
        let p = Ptr::new((1u64, 2u64));
        let part = p.project(|t| &t.1);
        b.iter(|| {
            let mut q = part.clone();
            q.reset();
            black_box(q)
        })
    });

    g.bench_function("linked", |b| {
        let p = LinkedPtr::new(7u64);
        b.iter(|| {
            let mut q = p.clone();
            q.reset();
            black_box(q)
        })
    });

    g.finish();
}

fn bench_collect_cycles(c: &mut Criterion) {
    use rc_ptr::{Cc, Trace, Tracer};
    use std::cell::RefCell;

    struct Node {
        next: RefCell<Option<Cc<Node>>>,
    }
    unsafe impl Trace for Node {
        fn trace(&self, tracer: &mut Tracer<'_>) {
            self.next.trace(tracer);
        }
    }

    c.bench_function("collect_ring_of_1k", |b| {
        b.iter_batched(
            || {
                let collector = Collector::new();
                let first = collector.alloc(Node {
                    next: RefCell::new(None),
                });
                let mut prev = first.clone();
                for _ in 1..N {
                    let n = collector.alloc(Node {
                        next: RefCell::new(None),
                    });
                    *prev.next.borrow_mut() = Some(n.clone());
                    prev = n;
                }
                *prev.next.borrow_mut() = Some(first);
                collector
            },
            |collector| black_box(collector.collect()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(3));
    targets = bench_alloc_copy_release, bench_copy_reset, bench_collect_cycles
}
criterion_main!(benches);
