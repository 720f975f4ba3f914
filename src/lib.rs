//! A binary buddy memory allocator over a single fixed-size,
//! power-of-two region of address space obtained once at
//! construction.
//!
//! [`BuddyPool`] owns a backing region acquired from an anonymous
//! memory map and serves allocation requests out of it, splitting
//! blocks on demand and recursively coalescing them with their buddies
//! on free. It is deterministic, single-threaded, and bounded by
//! `O(K_M)` list operations per call. See the crate's `DESIGN.md` for
//! the reasoning behind each design choice.
//!
//! ```
//! use buddy_pool::BuddyPool;
//!
//! let mut pool = BuddyPool::new(1 << 20);
//! let p = pool.alloc(64).unwrap();
//! pool.free(Some(p));
//! pool.destroy();
//! ```

mod block;
mod error;
mod order;
mod pool;

pub use block::Tag;
pub use error::BuddyError;
pub use order::order_for_bytes;
pub use pool::{BuddyPool, DEFAULT_K, MAX_K, MIN_K, SMALLEST_K};
