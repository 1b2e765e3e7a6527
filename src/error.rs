//! Error taxonomy shared by every pointer kind and the collector.

use thiserror::Error;

/// Failures reported by the pointer family.
///
/// `NullDereference` is recoverable and surfaces through `try_get`.
/// `InvariantViolation` marks a programmer error and is raised as a panic
/// carrying the formatted message. `ReentrantCollection` is returned by
/// [`Collector::collect`](crate::Collector::collect) when a pass is already
/// running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    #[error("{kind} {addr:#x} is attempting to dereference, but no ref-counted object has been assigned!")]
    NullDereference { kind: &'static str, addr: usize },
    #[error("invariant violation: {what}")]
    InvariantViolation { what: &'static str },
    #[error("collection requested while a collection pass is in progress")]
    ReentrantCollection,
}

impl RefError {
    pub(crate) fn null_deref<H: ?Sized>(kind: &'static str, handle: &H) -> Self {
        RefError::NullDereference {
            kind,
            addr: handle as *const H as *const () as usize,
        }
    }
}

/// Panic with an `InvariantViolation`. Used for misuse that leaves no
/// sound way to continue.
#[cold]
#[track_caller]
pub(crate) fn invariant(what: &'static str) -> ! {
    panic!("{}", RefError::InvariantViolation { what })
}

#[cfg(test)]
mod tests {
    use super::RefError;

    #[test]
    fn null_deref_message_names_kind_and_address() {
        let e = RefError::NullDereference {
            kind: "Ptr",
            addr: 0x1000,
        };
        assert_eq!(
            e.to_string(),
            "Ptr 0x1000 is attempting to dereference, but no ref-counted object has been assigned!"
        );
    }

    #[test]
    fn reentrant_message() {
        let e = RefError::ReentrantCollection;
        assert!(e.to_string().contains("in progress"));
    }
}
