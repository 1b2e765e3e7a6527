//! Counter blocks: the strong/weak count pair plus the type-erased action
//! that destroys the allocation they govern.
//!
//! A block is either allocated next to a boxed value (non-intrusive) or
//! embedded in the value itself (intrusive, see [`SelfCounted`]). Either
//! way the destroy action is captured when the block is first bound and
//! never changes afterwards, so destruction always runs against the type
//! that was originally allocated.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use std::alloc::{dealloc, Layout};

use crate::error::invariant;

/// How a block is attached to the object it counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counting {
    /// The block lives inside the pointee.
    Intrusive,
    /// The block was allocated separately from the pointee.
    NonIntrusive,
}

#[derive(Clone, Copy)]
pub(crate) struct DestroyAction {
    storage: NonNull<()>,
    destroy: unsafe fn(NonNull<()>),
    release: unsafe fn(NonNull<()>),
    kind: Counting,
}

/// Strong and weak counts for one allocation.
///
/// Embed a `CounterBlock` in a type and implement [`SelfCounted`] to make
/// the type intrusively counted. A fresh block is unbound; it becomes bound
/// the first time a [`Ptr`](crate::Ptr) adopts the containing object.
///
/// Cloning yields a fresh unbound block: copying a counted object never
/// copies its counts.
pub struct CounterBlock {
    strong: Cell<usize>,
    weak: Cell<usize>,
    action: Cell<Option<DestroyAction>>,
    _nosend: PhantomData<*mut ()>,
}

// No Drop impl: an intrusive block is still read after its containing
// object has been dropped in place.

impl CounterBlock {
    pub const fn new() -> Self {
        Self {
            strong: Cell::new(0),
            weak: Cell::new(0),
            action: Cell::new(None),
            _nosend: PhantomData,
        }
    }

    /// Number of strong pointers currently sharing this block.
    pub fn strong_count(&self) -> usize {
        self.strong.get()
    }

    /// Number of weak pointers currently observing this block.
    pub fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// `None` while the block is unbound.
    pub fn counting(&self) -> Option<Counting> {
        self.action.get().map(|a| a.kind)
    }

    pub fn is_bound(&self) -> bool {
        self.action.get().is_some()
    }

    /// Allocate a non-intrusive block for `value` with a strong count of 1.
    /// `destroy` runs once, on the last strong release, and must dispose of
    /// the value.
    ///
    /// Safety: `value` must be valid until `destroy` runs and must not be
    /// owned by any other block. `destroy` must not borrow anything that can
    /// end before the last handle does.
    pub(crate) unsafe fn allocate<T, D>(value: NonNull<T>, destroy: D) -> NonNull<CounterBlock>
    where
        T: ?Sized,
        D: FnOnce(NonNull<T>),
    {
        adopted::register(value);
        let owned = Box::new(OwnedBlock {
            block: CounterBlock::new(),
            value,
            destroy: ManuallyDrop::new(destroy),
        });
        let storage = NonNull::from(Box::leak(owned));
        let block = storage.cast::<CounterBlock>();
        let b = block.as_ref();
        b.action.set(Some(DestroyAction {
            storage: storage.cast(),
            destroy: destroy_owned::<T, D>,
            release: release_owned::<T, D>,
            kind: Counting::NonIntrusive,
        }));
        b.strong.set(1);
        block
    }

    /// [`allocate`](Self::allocate) for a value that came from
    /// `Box::into_raw`, destroyed by dropping the box.
    pub(crate) unsafe fn allocate_boxed<T: ?Sized>(value: NonNull<T>) -> NonNull<CounterBlock> {
        Self::allocate(value, |v: NonNull<T>| drop(Box::from_raw(v.as_ptr())))
    }

    /// Bind the block embedded in `obj` with a strong count of 1.
    ///
    /// Safety: `obj` must come from `Box::into_raw`.
    pub(crate) unsafe fn bind_intrusive<T: SelfCounted>(obj: NonNull<T>) -> NonNull<CounterBlock> {
        let b = obj.as_ref().counter_block();
        if b.is_bound() {
            invariant("self-counted object is already owned by a counter block");
        }
        b.action.set(Some(DestroyAction {
            storage: obj.cast(),
            destroy: destroy_in_place::<T>,
            release: release_in_place::<T>,
            kind: Counting::Intrusive,
        }));
        b.strong.set(1);
        NonNull::from(b)
    }

    #[inline]
    pub(crate) unsafe fn increment_strong(this: NonNull<CounterBlock>) {
        bump(&this.as_ref().strong);
    }

    #[inline]
    pub(crate) unsafe fn increment_weak(this: NonNull<CounterBlock>) {
        bump(&this.as_ref().weak);
    }

    /// Drop one strong count. Runs the destroy action on the 1 -> 0
    /// transition and releases the storage once no weak count remains.
    pub(crate) unsafe fn decrement_strong(this: NonNull<CounterBlock>) {
        let b = this.as_ref();
        let s = b.strong.get();
        if s == 0 {
            invariant("strong count underflow");
        }
        b.strong.set(s - 1);
        if s != 1 {
            return;
        }
        let Some(action) = b.action.get() else {
            invariant("counted object has no destroy action");
        };
        // Hold a weak count so nested drops cannot release storage while
        // the destroy action runs.
        bump(&b.weak);
        (action.destroy)(action.storage);
        Self::decrement_weak(this);
    }

    pub(crate) unsafe fn decrement_weak(this: NonNull<CounterBlock>) {
        let b = this.as_ref();
        let w = b.weak.get();
        if w == 0 {
            invariant("weak count underflow");
        }
        b.weak.set(w - 1);
        if w == 1 && b.strong.get() == 0 {
            if let Some(action) = b.action.get() {
                (action.release)(action.storage);
            }
        }
    }
}

/// Increment a count, aborting on overflow like `Rc`. Shared by every
/// count in the crate.
#[inline]
pub(crate) fn bump(c: &Cell<usize>) {
    let n = c.get().wrapping_add(1);
    c.set(n);
    if n == 0 {
        std::process::abort();
    }
}

impl Default for CounterBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CounterBlock {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl fmt::Debug for CounterBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterBlock")
            .field("strong", &self.strong.get())
            .field("weak", &self.weak.get())
            .field("counting", &self.counting())
            .finish()
    }
}

#[repr(C)]
struct OwnedBlock<T: ?Sized, D> {
    block: CounterBlock,
    value: NonNull<T>,
    // Taken exactly once, by `destroy_owned`.
    destroy: ManuallyDrop<D>,
}

unsafe fn destroy_owned<T: ?Sized, D: FnOnce(NonNull<T>)>(storage: NonNull<()>) {
    let owned = storage.cast::<OwnedBlock<T, D>>().as_ptr();
    let value = (*owned).value;
    let destroy = ManuallyDrop::take(&mut (*owned).destroy);
    adopted::unregister(value);
    destroy(value);
}

unsafe fn release_owned<T: ?Sized, D>(storage: NonNull<()>) {
    drop(Box::from_raw(storage.cast::<OwnedBlock<T, D>>().as_ptr()));
}

unsafe fn destroy_in_place<T>(storage: NonNull<()>) {
    core::ptr::drop_in_place(storage.cast::<T>().as_ptr());
}

unsafe fn release_in_place<T>(storage: NonNull<()>) {
    let layout = Layout::new::<T>();
    if layout.size() != 0 {
        dealloc(storage.cast::<u8>().as_ptr(), layout);
    }
}

/// A type that carries its own [`CounterBlock`].
///
/// # Safety
///
/// `counter_block` must return a block stored inside `self`, and must
/// return the same block for the whole life of the object.
pub unsafe trait SelfCounted {
    fn counter_block(&self) -> &CounterBlock;
}

/// Wraps any value with an embedded counter block, making it
/// [`SelfCounted`].
#[derive(Default, Clone)]
pub struct Dyn<T> {
    block: CounterBlock,
    value: T,
}

impl<T> Dyn<T> {
    pub const fn new(value: T) -> Self {
        Self {
            block: CounterBlock::new(),
            value,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

unsafe impl<T> SelfCounted for Dyn<T> {
    fn counter_block(&self) -> &CounterBlock {
        &self.block
    }
}

impl<T> Deref for Dyn<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Dyn<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: PartialEq> PartialEq for Dyn<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Dyn<T> {}

impl<T: PartialOrd> PartialOrd for Dyn<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<T: Ord> Ord for Dyn<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Dyn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dyn").field(&self.value).finish()
    }
}

/// Debug-only registry of addresses currently owned by a non-intrusive
/// block. Adopting an address twice would destroy it twice.
mod adopted {
    use core::ptr::NonNull;

    #[cfg(debug_assertions)]
    thread_local! {
        static ADOPTED: core::cell::RefCell<hashbrown::HashSet<usize>> =
            core::cell::RefCell::new(hashbrown::HashSet::new());
    }

    #[cfg(debug_assertions)]
    fn key<T: ?Sized>(value: NonNull<T>) -> Option<usize> {
        // Zero-sized values share dangling addresses.
        let size = unsafe { core::mem::size_of_val(value.as_ref()) };
        (size != 0).then(|| value.cast::<u8>().as_ptr() as usize)
    }

    #[cfg(debug_assertions)]
    pub(super) fn register<T: ?Sized>(value: NonNull<T>) {
        let Some(addr) = key(value) else { return };
        let fresh = ADOPTED
            .try_with(|set| set.borrow_mut().insert(addr))
            .unwrap_or(true);
        if !fresh {
            crate::error::invariant("address adopted by more than one counter block");
        }
    }

    #[cfg(debug_assertions)]
    pub(super) fn unregister<T: ?Sized>(value: NonNull<T>) {
        let Some(addr) = key(value) else { return };
        let _ = ADOPTED.try_with(|set| set.borrow_mut().remove(&addr));
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub(super) fn register<T: ?Sized>(_value: NonNull<T>) {}

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub(super) fn unregister<T: ?Sized>(_value: NonNull<T>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn fresh_block_is_unbound() {
        let b = CounterBlock::new();
        assert_eq!(b.strong_count(), 0);
        assert_eq!(b.weak_count(), 0);
        assert_eq!(b.counting(), None);
        assert!(!b.clone().is_bound());
    }

    #[test]
    fn non_intrusive_destroys_once_and_releases_after_weak() {
        let drops = Rc::new(Cell::new(0));
        let raw = NonNull::from(Box::leak(Box::new(Tracked(drops.clone()))));
        unsafe {
            let b = CounterBlock::allocate_boxed(raw);
            assert_eq!(b.as_ref().counting(), Some(Counting::NonIntrusive));
            CounterBlock::increment_strong(b);
            CounterBlock::increment_weak(b);
            CounterBlock::decrement_strong(b);
            assert_eq!(drops.get(), 0);
            CounterBlock::decrement_strong(b);
            assert_eq!(drops.get(), 1);
            assert_eq!(b.as_ref().strong_count(), 0);
            assert_eq!(b.as_ref().weak_count(), 1);
            CounterBlock::decrement_weak(b);
        }
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn intrusive_binds_embedded_block() {
        let drops = Rc::new(Cell::new(0));
        let raw = NonNull::from(Box::leak(Box::new(Dyn::new(Tracked(drops.clone())))));
        unsafe {
            let b = CounterBlock::bind_intrusive(raw);
            assert_eq!(b, NonNull::from(raw.as_ref().counter_block()));
            assert_eq!(b.as_ref().counting(), Some(Counting::Intrusive));
            CounterBlock::decrement_strong(b);
        }
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn binding_twice_panics() {
        let raw = NonNull::from(Box::leak(Box::new(Dyn::new(7u32))));
        unsafe {
            let b = CounterBlock::bind_intrusive(raw);
            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                CounterBlock::bind_intrusive(raw);
            }));
            assert!(res.is_err());
            CounterBlock::decrement_strong(b);
        }
    }

    #[test]
    fn dyn_clone_does_not_copy_counts() {
        let raw = NonNull::from(Box::leak(Box::new(Dyn::new(3u8))));
        unsafe {
            let b = CounterBlock::bind_intrusive(raw);
            let copy = raw.as_ref().clone();
            assert!(!copy.counter_block().is_bound());
            assert_eq!(*copy, 3);
            CounterBlock::decrement_strong(b);
        }
    }
}
