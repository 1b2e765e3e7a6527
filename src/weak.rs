//! Weak pointers over counter blocks.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::RefError;
use crate::ptr::{Ptr, Shared};

/// Observes an object owned by [`Ptr`]s without keeping it alive.
///
/// A weak pointer keeps the counter block (and, for self-counted objects,
/// the object's storage) allocated but never the value itself.
pub struct WeakPtr<T: ?Sized> {
    slot: Option<Shared<T>>,
    _nosend: PhantomData<*mut ()>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty weak pointer. Never allocates.
    pub const fn new() -> Self {
        Self {
            slot: None,
            _nosend: PhantomData,
        }
    }

    /// Caller must already hold a weak count for `slot`.
    pub(crate) fn from_shared(slot: Option<Shared<T>>) -> Self {
        Self {
            slot,
            _nosend: PhantomData,
        }
    }

    fn live(&self) -> Option<Shared<T>> {
        self.slot.filter(|s| s.counter.strong_count() > 0)
    }

    /// The object's address while any strong pointer remains.
    pub fn get(&self) -> Option<NonNull<T>> {
        self.live().map(|s| s.raw)
    }

    /// Strict form of [`get`](Self::get): `NullDereference` when empty or
    /// expired.
    pub fn try_get(&self) -> Result<NonNull<T>, RefError> {
        self.get().ok_or_else(|| RefError::null_deref("WeakPtr", self))
    }

    pub fn upgrade(&self) -> Option<Ptr<T>> {
        let s = self.live()?;
        unsafe { s.counter.inc_strong() };
        Some(Ptr::from_shared(Some(s)))
    }

    pub fn is_expired(&self) -> bool {
        self.live().is_none()
    }

    pub fn strong_count(&self) -> usize {
        self.slot.map_or(0, |s| s.counter.strong_count())
    }

    pub fn weak_count(&self) -> usize {
        self.slot.map_or(0, |s| s.counter.weak_count())
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (a.slot, b.slot) {
            (None, None) => true,
            (Some(x), Some(y)) => x.same_target(&y),
            _ => false,
        }
    }

    pub fn assign(&mut self, other: &WeakPtr<T>) {
        if Self::ptr_eq(self, other) {
            return;
        }
        *self = other.clone();
    }

    pub fn reset(&mut self) {
        if let Some(s) = self.slot.take() {
            unsafe { s.counter.dec_weak() };
        }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(s) = self.slot {
            unsafe { s.counter.inc_weak() };
        }
        Self::from_shared(self.slot)
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&Ptr<T>> for WeakPtr<T> {
    fn from(p: &Ptr<T>) -> Self {
        p.downgrade()
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(WeakPtr)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Dyn;

    #[test]
    fn empty_weak_is_expired() {
        let w: WeakPtr<u8> = WeakPtr::new();
        assert!(w.is_expired());
        assert!(w.upgrade().is_none());
        assert_eq!(w.clone().weak_count(), 0);
    }

    #[test]
    fn weak_tracks_strong_lifetime() {
        let p = Ptr::new(String::from("x"));
        let w = p.downgrade();
        assert_eq!(w.get(), p.as_raw());
        assert_eq!(p.weak_count(), 1);
        let up = w.upgrade().expect("alive");
        assert_eq!(p.use_count(), 2);
        drop(up);
        drop(p);
        assert!(w.get().is_none());
        assert_eq!(w.strong_count(), 0);
        assert_eq!(w.weak_count(), 1);
    }

    #[test]
    fn try_get_is_strict_when_empty_or_expired() {
        let empty: WeakPtr<u32> = WeakPtr::new();
        let err = empty.try_get().expect_err("empty");
        assert!(matches!(err, RefError::NullDereference { kind: "WeakPtr", .. }));

        let p = Ptr::new(4u32);
        let w = p.downgrade();
        assert_eq!(w.try_get().ok(), p.as_raw());
        drop(p);
        let msg = w.try_get().expect_err("expired").to_string();
        assert!(msg.starts_with("WeakPtr 0x"), "{msg}");
        assert!(msg.ends_with("no ref-counted object has been assigned!"), "{msg}");
    }

    #[test]
    fn intrusive_weak_outlives_value() {
        let p = Ptr::new_counted(Dyn::new(vec![1, 2, 3]));
        let w = p.downgrade();
        drop(p);
        assert!(w.is_expired());
        let w2 = w.clone();
        drop(w);
        assert!(w2.upgrade().is_none());
    }
}
