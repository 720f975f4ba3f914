use thiserror::Error;

/// Recoverable failure modes for [`crate::BuddyPool`] operations.
///
/// Backing-region acquisition/release failure is **not** represented
/// here: per the allocator's error model that class is fatal and
/// terminates the process rather than returning a value (see
/// [`crate::pool::BuddyPool::new`]).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BuddyError {
    /// A null pool or a zero-byte request was passed to an operation
    /// that requires a real size.
    #[error("invalid argument: pool missing or requested size is zero")]
    InvalidArgument,

    /// The requested order exceeds the pool's top order, or every
    /// free list up to the top order was empty when scanned.
    #[error("out of memory: no free block large enough in this pool")]
    OutOfMemory,
}
