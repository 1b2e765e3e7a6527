//! rc-ptr: single-threaded reference-counted smart pointers with
//! intrusive or non-intrusive counting, weak pointers, link-sharing rings
//! and an explicit cycle collector.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: shared ownership of heap objects without a tracing runtime,
//!   plus an opt-in pass that reclaims cycles.
//! - Layers:
//!   - CounterBlock: strong/weak counts and a type-erased destroy action
//!     bound once per allocation. Allocated next to the value, or embedded
//!     in it (`SelfCounted`, `Dyn<T>`).
//!   - CounterRef / CountAdapter: the route from a handle to its block.
//!     Direct when the handle exposes the allocation's own address;
//!     through a chain of adapters when a projection moved it.
//!   - Ptr<T> / WeakPtr<T>: the public strong and weak pointers.
//!   - LinkedPtr<T>: sharing through a ring of handles, no counter.
//!   - Collector / Cc<T> / CcWeak<T>: counted handles registered in a
//!     per-collector slot arena, with a Scan -> Mark -> Free pass.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by design (no atomics).
//! - The destroy action is captured from the allocated type at first
//!   construction. Every later view (projection, upcast, trait object)
//!   shares the same block, so destruction never runs through a partial
//!   type.
//! - An empty pointer never allocates, and copying or projecting one
//!   never allocates either.
//!
//! Conversions
//! - Rust has no inheritance; a "base" is a part of a composite value.
//!   `Ptr::project` takes a closure `&T -> &U` evaluated once; if the
//!   resulting address differs from the source's, the new pointer gets a
//!   `CountAdapter` forwarding to the source's route. `AsBase<B>` names
//!   the common projection so `upcast::<B>()` reads like a cast.
//!
//! Dereference modes
//! - `get()` is permissive (`Option`), `try_get()` is strict (`Result`
//!   with `RefError::NullDereference`), and `Deref` is strict and panics
//!   with the same message. The caller picks per call site.
//!
//! Reentrancy policy
//! - Destroy actions may freely create and drop pointers: counts are
//!   updated before user code runs, and a block holds a weak count on
//!   itself while destroying so nested drops cannot free its storage.
//! - The collector never holds a registry borrow across user code. User
//!   `Trace` impls run inside a debug-only reentrancy guard; allocating or
//!   dropping a `Cc` from `trace` panics in debug builds.
//! - `collect()` inside a pass (e.g. from a `Drop` run during Free)
//!   returns `RefError::ReentrantCollection`.
//!
//! Overflow semantics
//! - Count overflow aborts, matching `Rc`. Underflow is an invariant
//!   violation and panics.
//!
//! Notes and non-goals
//! - No thread-safe counting.
//! - Cycles are only reclaimed by an explicit `collect()`; dropping a
//!   `Collector` while cycles remain leaks them, like `Rc`.
//! - Debug builds track adopted addresses to catch `Ptr::from_raw` on an
//!   address that is already owned.

mod adapter;
mod block;
mod cc;
mod collector;
mod error;
mod linked;
mod log;
mod ptr;
mod ptr_proptest;
mod reentrancy;
mod trace;
mod weak;

// Public surface
pub use block::{CounterBlock, Counting, Dyn, SelfCounted};
pub use cc::{Cc, CcWeak};
pub use collector::{Collection, Collector, Phase};
pub use error::RefError;
pub use linked::LinkedPtr;
pub use ptr::{AsBase, Ptr};
pub use trace::{Trace, Tracer};
pub use weak::WeakPtr;
