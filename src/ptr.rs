//! The strong pointer.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::adapter::CounterRef;
use crate::block::{CounterBlock, Counting, SelfCounted};
use crate::error::RefError;
use crate::weak::WeakPtr;

/// The raw address a handle exposes plus the route to its counter block.
pub(crate) struct Shared<T: ?Sized> {
    pub(crate) raw: NonNull<T>,
    pub(crate) counter: CounterRef,
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Shared<T> {}

impl<T: ?Sized> Shared<T> {
    pub(crate) fn addr(&self) -> usize {
        self.raw.cast::<u8>().as_ptr() as usize
    }

    /// Same object: same thin address and same root block.
    pub(crate) fn same_target(&self, other: &Shared<T>) -> bool {
        self.addr() == other.addr() && self.counter.block() == other.counter.block()
    }
}

/// A single-threaded, reference-counted strong pointer.
///
/// A `Ptr` is either empty or shares ownership of one heap object. The
/// count lives in a separately allocated [`CounterBlock`] (`Ptr::new`) or
/// inside the object itself (`Ptr::new_counted`). Converting a `Ptr` to a
/// view of a sub-object (`project`, `upcast`) keeps sharing the original
/// block, so the object is always destroyed as the type it was allocated
/// as.
pub struct Ptr<T: ?Sized> {
    slot: Option<Shared<T>>,
    _owns: PhantomData<T>,
    // !Send + !Sync
    _nosend: PhantomData<*mut ()>,
}

impl<T: ?Sized> Ptr<T> {
    /// An empty pointer. Never allocates.
    pub const fn null() -> Self {
        Self {
            slot: None,
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    pub(crate) fn from_shared(slot: Option<Shared<T>>) -> Self {
        Self {
            slot,
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    /// Take ownership of a boxed value with a freshly allocated block.
    pub fn from_box(value: Box<T>) -> Self {
        let raw = NonNull::from(Box::leak(value));
        Self::adopt(raw, unsafe { CounterBlock::allocate_boxed(raw) })
    }

    /// Adopt a pointer obtained from `Box::into_raw`. A null pointer yields
    /// an empty `Ptr`.
    ///
    /// # Safety
    ///
    /// `raw` must be null or come from `Box::<T>::into_raw`, and must not be
    /// adopted again while this `Ptr` or its copies are alive. Debug builds
    /// panic on duplicate adoption of a live address.
    pub unsafe fn from_raw(raw: *mut T) -> Self {
        match NonNull::new(raw) {
            None => Self::null(),
            Some(raw) => Self::adopt(raw, CounterBlock::allocate_boxed(raw)),
        }
    }

    /// Adopt `raw` with a custom destroy action. `destroy` runs exactly
    /// once, when the last strong pointer of any view is released, and is
    /// responsible for disposing of the object. A null pointer yields an
    /// empty `Ptr` and `destroy` is dropped without running.
    ///
    /// # Safety
    ///
    /// `raw` must be null or point to a valid `T` that stays valid until
    /// `destroy` runs, and must not be adopted again while this `Ptr` or
    /// its copies are alive.
    pub unsafe fn from_raw_with<D>(raw: *mut T, destroy: D) -> Self
    where
        D: FnOnce(NonNull<T>) + 'static,
    {
        match NonNull::new(raw) {
            None => Self::null(),
            Some(raw) => Self::adopt(raw, CounterBlock::allocate(raw, destroy)),
        }
    }

    fn adopt(raw: NonNull<T>, block: NonNull<CounterBlock>) -> Self {
        Self::from_shared(Some(Shared {
            raw,
            counter: CounterRef::Direct(block),
        }))
    }

    pub fn is_null(&self) -> bool {
        self.slot.is_none()
    }

    /// Permissive access: `None` when empty.
    pub fn get(&self) -> Option<&T> {
        self.slot.map(|s| unsafe { &*s.raw.as_ptr() })
    }

    /// Strict access: `NullDereference` when empty.
    pub fn try_get(&self) -> Result<&T, RefError> {
        self.get().ok_or_else(|| RefError::null_deref("Ptr", self))
    }

    /// Mutable access when this is the only handle of any kind to a
    /// non-intrusively counted object.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let s = self.slot?;
        let block = unsafe { s.counter.block().as_ref() };
        let exclusive = block.strong_count() == 1
            && block.weak_count() == 0
            && block.counting() == Some(Counting::NonIntrusive);
        exclusive.then(|| unsafe { &mut *s.raw.as_ptr() })
    }

    /// Number of strong pointers sharing the object; 0 when empty.
    pub fn use_count(&self) -> usize {
        self.slot.map_or(0, |s| s.counter.strong_count())
    }

    pub fn weak_count(&self) -> usize {
        self.slot.map_or(0, |s| s.counter.weak_count())
    }

    pub fn unique(&self) -> bool {
        self.use_count() == 1
    }

    pub fn counting(&self) -> Option<Counting> {
        self.slot
            .and_then(|s| unsafe { s.counter.block().as_ref().counting() })
    }

    /// Address of the counter block shared by every view of the object;
    /// null when empty.
    pub fn counter_addr(&self) -> *const CounterBlock {
        self.slot
            .map_or(core::ptr::null(), |s| s.counter.block().as_ptr() as *const _)
    }

    /// Number of count adapters between this pointer and its block.
    pub fn adapter_depth(&self) -> usize {
        self.slot.map_or(0, |s| s.counter.depth())
    }

    pub fn as_raw(&self) -> Option<NonNull<T>> {
        self.slot.map(|s| s.raw)
    }

    /// Thin address of the pointee; 0 when empty.
    pub fn addr(&self) -> usize {
        self.slot.map_or(0, |s| s.addr())
    }

    /// Identity comparison. Two empty pointers are equal.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (a.slot, b.slot) {
            (None, None) => true,
            (Some(x), Some(y)) => x.same_target(&y),
            _ => false,
        }
    }

    /// True when both pointers share one counter block, whatever view of
    /// the object each one exposes.
    pub fn same_block<U: ?Sized>(a: &Self, b: &Ptr<U>) -> bool {
        !a.is_null() && a.counter_addr() == b.counter_addr()
    }

    /// Make `self` share `other`'s object. Self-assignment is a no-op.
    pub fn assign(&mut self, other: &Ptr<T>) {
        if Self::ptr_eq(self, other) {
            return;
        }
        *self = other.clone();
    }

    /// Release the current object, leaving `self` empty.
    pub fn reset(&mut self) {
        if let Some(s) = self.slot.take() {
            unsafe { s.counter.dec_strong() };
        }
    }

    pub fn set_box(&mut self, value: Box<T>) {
        self.reset();
        *self = Self::from_box(value);
    }

    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::null())
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.slot, &mut other.slot);
    }

    pub fn downgrade(&self) -> WeakPtr<T> {
        if let Some(s) = self.slot {
            unsafe { s.counter.inc_weak() };
        }
        WeakPtr::from_shared(self.slot)
    }

    /// A pointer to a part of the object, sharing its counts.
    ///
    /// The returned pointer exposes the address `f` yields. When that
    /// address differs from `self`'s, the new pointer reaches the block
    /// through a count adapter. Projecting an empty pointer yields an empty
    /// pointer without allocating.
    pub fn project<U: ?Sized, F>(&self, f: F) -> Ptr<U>
    where
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let Some(s) = self.slot else {
            return Ptr::null();
        };
        let raw = NonNull::from(f(unsafe { &*s.raw.as_ptr() }));
        let moved = raw.cast::<u8>() != s.raw.cast::<u8>();
        let counter = if moved {
            CounterRef::adapt(s.counter)
        } else {
            s.counter
        };
        unsafe { counter.inc_strong() };
        Ptr::from_shared(Some(Shared { raw, counter }))
    }

    /// Convert to a pointer to a base part, via [`AsBase`].
    pub fn upcast<B: ?Sized>(&self) -> Ptr<B>
    where
        T: AsBase<B>,
    {
        self.project(|t| t.as_base())
    }
}

impl<T> Ptr<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Release the current object and bind a new one.
    pub fn set(&mut self, value: T) {
        self.set_box(Box::new(value));
    }
}

impl<T: SelfCounted> Ptr<T> {
    /// Take ownership of a self-counted value, using its embedded block.
    pub fn new_counted(value: T) -> Self {
        Self::from_counted_box(Box::new(value))
    }

    /// Panics if the value's block is already bound.
    pub fn from_counted_box(value: Box<T>) -> Self {
        if value.counter_block().is_bound() {
            crate::error::invariant("self-counted object is already owned by a counter block");
        }
        let raw = NonNull::from(Box::leak(value));
        Self::adopt(raw, unsafe { CounterBlock::bind_intrusive(raw) })
    }

    /// Another strong pointer to an object already owned by some `Ptr`,
    /// found through its embedded block. `None` when the object is not
    /// currently owned.
    pub fn share(obj: &T) -> Option<Self> {
        let block = obj.counter_block();
        if !block.is_bound() || block.strong_count() == 0 {
            return None;
        }
        let counter = CounterRef::Direct(NonNull::from(block));
        unsafe { counter.inc_strong() };
        Some(Self::from_shared(Some(Shared {
            raw: NonNull::from(obj),
            counter,
        })))
    }
}

/// Access to a base part of a composite type.
///
/// Implement once per (derived, base) pair; [`Ptr::upcast`] uses it to
/// convert pointers.
pub trait AsBase<B: ?Sized> {
    fn as_base(&self) -> &B;
}

impl<T: ?Sized> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        if let Some(s) = self.slot {
            unsafe { s.counter.inc_strong() };
        }
        Self::from_shared(self.slot)
    }
}

impl<T: ?Sized> Drop for Ptr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Ptr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Deref for Ptr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.try_get() {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<T: ?Sized> From<Box<T>> for Ptr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for Ptr<T> {}

impl<T: ?Sized> Hash for Ptr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
        self.counter_addr().hash(state);
    }
}

/// Orders by pointee value, then by identity. Empty sorts first.
impl<T: ?Sized + Ord> Ord for Ptr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.get()
            .cmp(&other.get())
            .then_with(|| self.addr().cmp(&other.addr()))
            .then_with(|| self.counter_addr().cmp(&other.counter_addr()))
    }
}

impl<T: ?Sized + Ord> PartialOrd for Ptr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("Ptr").field(&v).finish(),
            None => f.write_str("Ptr(null)"),
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => v.fmt(f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(self.addr() as *const ()), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Dyn;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn null_is_free_and_reports_zero() {
        let p: Ptr<i32> = Ptr::null();
        let q = p.clone();
        assert!(q.is_null());
        assert_eq!(q.use_count(), 0);
        assert_eq!(q.counter_addr(), core::ptr::null());
        assert!(q.get().is_none());
        assert!(matches!(q.try_get(), Err(RefError::NullDereference { kind: "Ptr", .. })));
    }

    #[test]
    fn last_drop_destroys_once() {
        let drops = Rc::new(Cell::new(0));
        let a = Ptr::new(Tracked(drops.clone()));
        let b = a.clone();
        assert_eq!(a.use_count(), 2);
        drop(a);
        assert_eq!(drops.get(), 0);
        assert!(b.unique());
        drop(b);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn intrusive_uses_embedded_block() {
        let p = Ptr::new_counted(Dyn::new(9));
        assert_eq!(p.counting(), Some(Counting::Intrusive));
        let block: *const CounterBlock = p.counter_block();
        assert_eq!(p.counter_addr(), block);
        let again = Ptr::share(&*p).expect("owned");
        assert_eq!(again.use_count(), 2);
        assert!(Ptr::ptr_eq(&p, &again));
    }

    #[test]
    fn share_of_unowned_object_is_none() {
        let loose = Dyn::new(1);
        assert!(Ptr::share(&loose).is_none());
    }

    #[test]
    fn get_mut_requires_exclusive_non_intrusive() {
        let mut p = Ptr::new(1);
        *p.get_mut().expect("unique") += 1;
        assert_eq!(*p, 2);
        let w = p.downgrade();
        assert!(p.get_mut().is_none());
        drop(w);
        let q = p.clone();
        assert!(p.get_mut().is_none());
        drop(q);
        assert!(p.get_mut().is_some());

        let mut c = Ptr::new_counted(Dyn::new(1));
        assert!(c.get_mut().is_none());
    }

    #[repr(C)]
    struct Pair {
        first: u32,
        second: u32,
    }

    #[test]
    fn projection_to_same_address_shares_counter_directly() {
        let p = Ptr::new(Pair { first: 7, second: 8 });
        let first = p.project(|t| &t.first);
        let second = p.project(|t| &t.second);
        assert_eq!(first.adapter_depth(), 0);
        assert_eq!(second.adapter_depth(), 1);
        assert_eq!(p.use_count(), 3);
        assert_eq!((*first, *second), (7, 8));
    }
}
