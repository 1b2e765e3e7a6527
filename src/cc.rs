//! Cycle-collectable handles.
//!
//! A `Cc` allocation is a header followed by the value. The header keeps
//! the true strong and weak counts, an alive flag and the slot key in the
//! owning collector. Counting frees acyclic garbage immediately; cycles
//! wait for [`Collector::collect`](crate::Collector::collect).
//!
//! The value is dropped at most once, when the object stops being alive.
//! The allocation is freed once it is dead and no strong or weak handle
//! remains, so a handle that outlives its value reads as empty instead of
//! dangling.

use core::cell::Cell;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::NonNull;
use std::rc::Rc;

use crate::block::bump;
use crate::collector::{Heap, SlotKey};
use crate::error::{invariant, RefError};
use crate::trace::{Trace, Tracer};

pub(crate) struct CcVTable {
    trace: unsafe fn(NonNull<CcHeader>, &mut Tracer<'_>),
    drop_value: unsafe fn(NonNull<CcHeader>),
    dealloc: unsafe fn(NonNull<CcHeader>),
}

struct VTable<T>(PhantomData<T>);

impl<T: Trace + 'static> VTable<T> {
    const VTABLE: &'static CcVTable = &CcVTable {
        trace: trace_value::<T>,
        drop_value: drop_value::<T>,
        dealloc: dealloc_box::<T>,
    };
}

unsafe fn trace_value<T: Trace>(h: NonNull<CcHeader>, tracer: &mut Tracer<'_>) {
    let b = &*h.cast::<CcBox<T>>().as_ptr();
    b.value.trace(tracer);
}

unsafe fn drop_value<T>(h: NonNull<CcHeader>) {
    let b = h.cast::<CcBox<T>>().as_ptr();
    match (*b).destroy.take() {
        Some(destroy) => destroy(NonNull::from(&mut *(*b).value).cast()),
        None => ManuallyDrop::drop(&mut (*b).value),
    }
}

unsafe fn dealloc_box<T>(h: NonNull<CcHeader>) {
    drop(Box::from_raw(h.cast::<CcBox<T>>().as_ptr()));
}

pub(crate) struct CcHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    alive: Cell<bool>,
    key: Cell<SlotKey>,
    heap: Rc<Heap>,
    vtable: &'static CcVTable,
}

/// Moves the value out of its slot and disposes of it.
pub(crate) type CustomDestroy = Box<dyn FnOnce(NonNull<()>)>;

#[repr(C)]
pub(crate) struct CcBox<T> {
    header: CcHeader,
    value: ManuallyDrop<T>,
    destroy: Option<CustomDestroy>,
}

impl<T: Trace + 'static> CcBox<T> {
    /// A leaked, not yet registered allocation with a strong count of 1.
    pub(crate) fn new(
        value: T,
        heap: Rc<Heap>,
        destroy: Option<CustomDestroy>,
    ) -> NonNull<CcBox<T>> {
        let b = Box::new(CcBox {
            header: CcHeader {
                strong: Cell::new(1),
                weak: Cell::new(0),
                alive: Cell::new(true),
                key: Cell::new(SlotKey::default()),
                heap,
                vtable: VTable::<T>::VTABLE,
            },
            value: ManuallyDrop::new(value),
            destroy,
        });
        NonNull::from(Box::leak(b))
    }
}

impl CcHeader {
    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    pub(crate) fn key(&self) -> SlotKey {
        self.key.get()
    }

    pub(crate) fn set_key(&self, key: SlotKey) {
        self.key.set(key);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.get()
    }

    pub(crate) fn belongs_to(&self, heap: &Heap) -> bool {
        core::ptr::eq(&*self.heap, heap)
    }

    pub(crate) unsafe fn trace(h: NonNull<CcHeader>, tracer: &mut Tracer<'_>) {
        (h.as_ref().vtable.trace)(h, tracer);
    }

    /// Take a hold on the object, mark it dead and remove it from its
    /// collector. The value is left in place.
    pub(crate) unsafe fn detach(h: NonNull<CcHeader>) {
        let hdr = h.as_ref();
        bump(&hdr.strong);
        hdr.alive.set(false);
        hdr.heap.unregister(hdr.key.get(), h);
    }

    pub(crate) unsafe fn drop_value(h: NonNull<CcHeader>) {
        (h.as_ref().vtable.drop_value)(h);
    }

    /// Release the hold taken by `detach`.
    pub(crate) unsafe fn release_hold(h: NonNull<CcHeader>) {
        Self::dec_strong(h);
    }

    unsafe fn dec_strong(h: NonNull<CcHeader>) {
        let hdr = h.as_ref();
        let s = hdr.strong.get();
        if s == 0 {
            invariant("Cc strong count underflow");
        }
        hdr.strong.set(s - 1);
        if s != 1 {
            return;
        }
        if hdr.alive.get() {
            Self::detach(h);
            Self::drop_value(h);
            Self::dec_strong(h);
        } else {
            Self::maybe_dealloc(h);
        }
    }

    unsafe fn dec_weak(h: NonNull<CcHeader>) {
        let hdr = h.as_ref();
        let w = hdr.weak.get();
        if w == 0 {
            invariant("Cc weak count underflow");
        }
        hdr.weak.set(w - 1);
        if w == 1 {
            Self::maybe_dealloc(h);
        }
    }

    unsafe fn maybe_dealloc(h: NonNull<CcHeader>) {
        let hdr = h.as_ref();
        if hdr.strong.get() == 0 && hdr.weak.get() == 0 && !hdr.alive.get() {
            let dealloc = hdr.vtable.dealloc;
            dealloc(h);
        }
    }
}

/// A strong handle to an object owned by a [`Collector`](crate::Collector).
///
/// Handles count like [`Ptr`](crate::Ptr). A handle whose object was freed
/// by a collection pass reads as empty.
pub struct Cc<T> {
    ptr: Option<NonNull<CcBox<T>>>,
    _owns: PhantomData<T>,
    // !Send + !Sync
    _nosend: PhantomData<*mut ()>,
}

impl<T> Cc<T> {
    pub const fn null() -> Self {
        Self {
            ptr: None,
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    /// Adopts the strong count the allocation was created with.
    pub(crate) fn from_box(b: NonNull<CcBox<T>>) -> Self {
        Self {
            ptr: Some(b),
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    pub(crate) fn header(&self) -> Option<NonNull<CcHeader>> {
        self.ptr.map(|p| p.cast())
    }

    fn hdr(&self) -> Option<&CcHeader> {
        self.ptr.map(|p| unsafe { &(*p.as_ptr()).header })
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// False for empty handles and for handles whose object was freed.
    pub fn is_alive(&self) -> bool {
        self.hdr().is_some_and(CcHeader::is_alive)
    }

    pub fn get(&self) -> Option<&T> {
        let p = self.ptr?;
        let b = unsafe { &*p.as_ptr() };
        b.header.alive.get().then(|| &*b.value)
    }

    pub fn try_get(&self) -> Result<&T, RefError> {
        self.get().ok_or_else(|| RefError::null_deref("Cc", self))
    }

    /// Strong handles to a live object; 0 when empty or freed.
    pub fn use_count(&self) -> usize {
        self.hdr()
            .filter(|h| h.is_alive())
            .map_or(0, CcHeader::strong)
    }

    pub fn weak_count(&self) -> usize {
        self.hdr().map_or(0, |h| h.weak.get())
    }

    pub fn unique(&self) -> bool {
        self.use_count() == 1
    }

    /// Address of the allocation; 0 when empty.
    pub fn addr(&self) -> usize {
        self.ptr.map_or(0, |p| p.as_ptr() as usize)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    pub fn assign(&mut self, other: &Cc<T>) {
        if Self::ptr_eq(self, other) {
            return;
        }
        *self = other.clone();
    }

    pub fn reset(&mut self) {
        if let Some(p) = self.ptr.take() {
            unsafe { CcHeader::dec_strong(p.cast()) };
        }
    }

    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::null())
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.ptr, &mut other.ptr);
    }

    pub fn downgrade(&self) -> CcWeak<T> {
        if let Some(h) = self.hdr() {
            bump(&h.weak);
        }
        CcWeak {
            ptr: self.ptr,
            _nosend: PhantomData,
        }
    }
}

impl<T> Clone for Cc<T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.hdr() {
            bump(&h.strong);
        }
        Self {
            ptr: self.ptr,
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }
}

impl<T> Drop for Cc<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Default for Cc<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Deref for Cc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.try_get() {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<T> PartialEq for Cc<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for Cc<T> {}

impl<T> Hash for Cc<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

/// Orders by value, then by address. Empty and freed handles sort first.
impl<T: Ord> Ord for Cc<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.get()
            .cmp(&other.get())
            .then_with(|| self.addr().cmp(&other.addr()))
    }
}

impl<T: Ord> PartialOrd for Cc<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: fmt::Debug> fmt::Debug for Cc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("Cc").field(v).finish(),
            None => f.write_str("Cc(null)"),
        }
    }
}

/// A weak handle to a `Cc` object.
pub struct CcWeak<T> {
    ptr: Option<NonNull<CcBox<T>>>,
    _nosend: PhantomData<*mut ()>,
}

impl<T> CcWeak<T> {
    pub const fn new() -> Self {
        Self {
            ptr: None,
            _nosend: PhantomData,
        }
    }

    fn hdr(&self) -> Option<&CcHeader> {
        self.ptr.map(|p| unsafe { &(*p.as_ptr()).header })
    }

    /// A strong handle while the object is alive.
    pub fn upgrade(&self) -> Option<Cc<T>> {
        let h = self.hdr().filter(|h| h.is_alive())?;
        bump(&h.strong);
        Some(Cc {
            ptr: self.ptr,
            _owns: PhantomData,
            _nosend: PhantomData,
        })
    }

    /// Strict form of [`upgrade`](Self::upgrade): `NullDereference` when
    /// empty or freed.
    pub fn try_upgrade(&self) -> Result<Cc<T>, RefError> {
        self.upgrade()
            .ok_or_else(|| RefError::null_deref("CcWeak", self))
    }

    pub fn is_expired(&self) -> bool {
        !self.hdr().is_some_and(CcHeader::is_alive)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }
}

impl<T> Clone for CcWeak<T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.hdr() {
            bump(&h.weak);
        }
        Self {
            ptr: self.ptr,
            _nosend: PhantomData,
        }
    }
}

impl<T> Drop for CcWeak<T> {
    fn drop(&mut self) {
        if let Some(p) = self.ptr.take() {
            unsafe { CcHeader::dec_weak(p.cast()) };
        }
    }
}

impl<T> Default for CcWeak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CcWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(CcWeak)")
    }
}
