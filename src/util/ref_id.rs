use stable_deref_trait::StableDeref;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// Reference whose identity (for equality and hashing) is the address it points at
///
/// Classes, methods, code objects and heap objects all live in append-only arenas for the whole
/// lifetime of the runtime, so the address is a perfectly good identity and comparing it is much
/// cheaper than comparing names.
pub struct RefId<'a, T: ?Sized>(pub &'a T);

impl<'a, T: ?Sized> RefId<'a, T> {
    /// Raw address of the referenced value
    pub fn as_ptr(&self) -> *const T {
        self.0 as *const T
    }
}

impl<'a, T: ?Sized> Clone for RefId<'a, T> {
    fn clone(&self) -> Self {
        RefId(self.0)
    }
}

impl<'a, T: ?Sized> Copy for RefId<'a, T> {}

impl<'a, T: ?Sized> Hash for RefId<'a, T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state)
    }
}

impl<'a, 'b, T: ?Sized> PartialEq<RefId<'b, T>> for RefId<'a, T> {
    fn eq(&self, other: &RefId<'b, T>) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl<'a, T: ?Sized> Eq for RefId<'a, T> {}

impl<'a, T: ?Sized + fmt::Debug> fmt::Debug for RefId<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'a, T: ?Sized> Deref for RefId<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0
    }
}

// Lets a `RefId` be stored as the value of elsa's frozen collections
unsafe impl<'a, T: ?Sized> StableDeref for RefId<'a, T> {}
