//! Link-sharing pointers.
//!
//! Handles that share one object form a circular doubly linked ring. There
//! is no counter: a handle leaving a ring of one destroys the object.
//! Each non-empty handle owns one heap node; moving a handle never touches
//! the ring.

use core::cell::Cell;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::ptr::NonNull;

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use crate::error::RefError;

struct Node<T: ?Sized> {
    body: NonNull<T>,
    next: Cell<NonNull<Node<T>>>,
    prev: Cell<NonNull<Node<T>>>,
}

impl<T: ?Sized> Node<T> {
    /// A solitary node owning `body`.
    fn alloc(body: NonNull<T>) -> NonNull<Node<T>> {
        let dangling = NonNull::dangling();
        let node = NonNull::from(Box::leak(Box::new(Node {
            body,
            next: Cell::new(dangling),
            prev: Cell::new(dangling),
        })));
        let n = unsafe { node.as_ref() };
        n.next.set(node);
        n.prev.set(node);
        node
    }
}

/// Zero-sized bodies all live at one dangling address, which would make
/// distinct rings compare equal. Give such a body a private one-byte
/// anchor allocation so every ring has its own address.
///
/// Safety: `body` must come from `Box::into_raw`.
unsafe fn anchor<T: ?Sized>(body: NonNull<T>) -> NonNull<T> {
    let Some(layout) = anchor_layout(body) else {
        return body;
    };
    let Some(at) = NonNull::new(alloc(layout)) else {
        handle_alloc_error(layout)
    };
    let offset = (at.as_ptr() as isize).wrapping_sub(body.cast::<u8>().as_ptr() as isize);
    NonNull::new_unchecked(body.as_ptr().wrapping_byte_offset(offset))
}

fn anchor_layout<T: ?Sized>(body: NonNull<T>) -> Option<Layout> {
    let body = unsafe { body.as_ref() };
    if mem::size_of_val(body) != 0 {
        return None;
    }
    Layout::from_size_align(1, mem::align_of_val(body)).ok()
}

/// Drop the body and free its storage, including any anchor.
///
/// Safety: `body` must come from [`anchor`] and be dropped only once.
unsafe fn destroy<T: ?Sized>(body: NonNull<T>) {
    let layout = anchor_layout(body);
    // A zero-sized box never deallocates, so this only runs the destructor
    // when the body is anchored.
    drop(Box::from_raw(body.as_ptr()));
    if let Some(layout) = layout {
        dealloc(body.cast::<u8>().as_ptr(), layout);
    }
}

/// A shared-ownership pointer whose sharers are linked in a ring.
pub struct LinkedPtr<T: ?Sized> {
    node: Option<NonNull<Node<T>>>,
    _owns: PhantomData<T>,
    // !Send + !Sync
    _nosend: PhantomData<*mut ()>,
}

impl<T: ?Sized> LinkedPtr<T> {
    pub const fn null() -> Self {
        Self {
            node: None,
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    pub fn from_box(value: Box<T>) -> Self {
        let body = NonNull::from(Box::leak(value));
        Self {
            node: Some(Node::alloc(unsafe { anchor(body) })),
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    fn body(&self) -> Option<NonNull<T>> {
        self.node.map(|n| unsafe { n.as_ref().body })
    }

    pub fn is_null(&self) -> bool {
        self.node.is_none()
    }

    pub fn get(&self) -> Option<&T> {
        self.body().map(|b| unsafe { &*b.as_ptr() })
    }

    pub fn try_get(&self) -> Result<&T, RefError> {
        self.get().ok_or_else(|| RefError::null_deref("LinkedPtr", self))
    }

    /// Thin address of the pointee; 0 when empty.
    pub fn addr(&self) -> usize {
        self.body().map_or(0, |b| b.cast::<u8>().as_ptr() as usize)
    }

    /// Number of handles in this ring. Walks the ring.
    pub fn use_count(&self) -> usize {
        let Some(start) = self.node else { return 0 };
        let mut n = 1;
        let mut cur = unsafe { start.as_ref().next.get() };
        while cur != start {
            n += 1;
            cur = unsafe { cur.as_ref().next.get() };
        }
        n
    }

    pub fn unique(&self) -> bool {
        self.node
            .is_some_and(|n| unsafe { n.as_ref().next.get() } == n)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.is_null() == b.is_null() && a.addr() == b.addr()
    }

    pub fn assign(&mut self, other: &LinkedPtr<T>) {
        if Self::ptr_eq(self, other) {
            return;
        }
        *self = other.clone();
    }

    /// Leave the ring; destroys the object if this was the last handle.
    pub fn reset(&mut self) {
        let Some(node) = self.node.take() else { return };
        let boxed = unsafe { Box::from_raw(node.as_ptr()) };
        let next = boxed.next.get();
        if next == node {
            let body = boxed.body;
            drop(boxed);
            unsafe { destroy(body) };
        } else {
            let prev = boxed.prev.get();
            unsafe {
                prev.as_ref().next.set(next);
                next.as_ref().prev.set(prev);
            }
        }
    }

    pub fn set_box(&mut self, value: Box<T>) {
        self.reset();
        *self = Self::from_box(value);
    }

    /// Exchange objects and ring membership. O(1).
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.node, &mut other.node);
    }

    /// Walks the ring checking link symmetry and a shared body.
    #[cfg(test)]
    pub(crate) fn ring_is_consistent(&self) -> bool {
        let Some(start) = self.node else { return true };
        let body = unsafe { start.as_ref().body }.cast::<u8>();
        let mut cur = start;
        loop {
            let n = unsafe { cur.as_ref() };
            let next = n.next.get();
            if unsafe { next.as_ref().prev.get() } != cur || n.body.cast::<u8>() != body {
                return false;
            }
            cur = next;
            if cur == start {
                return true;
            }
        }
    }
}

impl<T> LinkedPtr<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    pub fn set(&mut self, value: T) {
        self.set_box(Box::new(value));
    }
}

impl<T: ?Sized> Clone for LinkedPtr<T> {
    /// Splices a new node right after this one.
    fn clone(&self) -> Self {
        let Some(src) = self.node else {
            return Self::null();
        };
        let s = unsafe { src.as_ref() };
        let node = Node::alloc(s.body);
        let after = s.next.get();
        unsafe {
            let n = node.as_ref();
            n.prev.set(src);
            n.next.set(after);
            after.as_ref().prev.set(node);
        }
        s.next.set(node);
        Self {
            node: Some(node),
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for LinkedPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for LinkedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Deref for LinkedPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.try_get() {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<T: ?Sized> PartialEq for LinkedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for LinkedPtr<T> {}

impl<T: ?Sized> Hash for LinkedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

/// Orders by pointee value, then by address. Empty sorts first.
impl<T: ?Sized + Ord> Ord for LinkedPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.get()
            .cmp(&other.get())
            .then_with(|| self.addr().cmp(&other.addr()))
    }
}

impl<T: ?Sized + Ord> PartialOrd for LinkedPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for LinkedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("LinkedPtr").field(&v).finish(),
            None => f.write_str("LinkedPtr(null)"),
        }
    }
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
    fn clone_splices_and_counts() {
        let a = LinkedPtr::new(5);
        assert!(a.unique());
        let b = a.clone();
        let c = b.clone();
        assert_eq!(a.use_count(), 3);
        assert!(a.ring_is_consistent());
        drop(b);
        assert_eq!(c.use_count(), 2);
        assert!(c.ring_is_consistent());
    }

    #[test]
    fn last_handle_destroys() {
        let drops = Rc::new(Cell::new(0));
        let a = LinkedPtr::new(Tracked(drops.clone()));
        let b = a.clone();
        drop(a);
        assert_eq!(drops.get(), 0);
        drop(b);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn null_handles_are_not_rings() {
        let n: LinkedPtr<u8> = LinkedPtr::null();
        let m = n.clone();
        assert_eq!(m.use_count(), 0);
        assert!(!m.unique());
        assert!(LinkedPtr::ptr_eq(&n, &m));
        assert!(matches!(m.try_get(), Err(RefError::NullDereference { kind: "LinkedPtr", .. })));
    }
}
