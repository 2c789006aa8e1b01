//! Opaque, process-unique identity handles.
//!
//! The original engine identifies data writers, data readers, and RPC
//! sessions by the raw address of a user-held object. Per the redesign notes,
//! this crate instead issues small integer handles from a process-global
//! counter: never dereferenced, only compared and used as map keys.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// An opaque, process-unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Issue a fresh handle, unique for the lifetime of this process.
    pub fn next() -> Self {
        Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let a = Handle::next();
        let b = Handle::next();
        assert_ne!(a, b);
    }
}
