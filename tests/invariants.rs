//! Property-based tests for the allocator's universal invariants:
//! tiling, full coalescing, buddy involution, LIFO reuse, and capacity.
//! The scenario-specific tests live alongside the code in
//! `src/pool.rs`'s `#[cfg(test)]` module; these generalize over random
//! sequences with `proptest` instead.

use std::ptr::NonNull;

use buddy_pool::{BuddyPool, MIN_K};
use proptest::collection::vec;
use proptest::prelude::*;

fn total_free_bytes(pool: &BuddyPool) -> usize {
    (0..=pool.top_order()).map(|order| pool.free_block_count(order) * (1usize << order)).sum()
}

fn assert_fully_coalesced(pool: &BuddyPool) {
    for order in 0..pool.top_order() {
        assert_eq!(pool.free_block_count(order), 0, "order {order} should have coalesced away");
    }
    assert_eq!(pool.free_block_count(pool.top_order()), 1);
}

proptest! {
    /// Tiling: after every operation in a random alloc/free sequence,
    /// free bytes plus still-outstanding reserved bytes exactly cover
    /// the pool, with no overlap and no gap.
    #[test]
    fn tiling_holds_across_random_sequences(
        ops in vec((any::<bool>(), 1usize..4096), 1..64)
    ) {
        let mut pool = BuddyPool::new(1 << MIN_K);
        let mut outstanding: Vec<(NonNull<u8>, usize)> = Vec::new();

        for (prefer_alloc, size) in ops {
            if prefer_alloc || outstanding.is_empty() {
                if let Ok(p) = pool.alloc(size) {
                    let (_, order) = pool.block_state(p);
                    outstanding.push((p, order));
                }
            } else {
                let idx = size % outstanding.len();
                let (p, _) = outstanding.swap_remove(idx);
                pool.free(Some(p));
            }

            let reserved_bytes: usize = outstanding.iter().map(|(_, order)| 1usize << order).sum();
            prop_assert_eq!(total_free_bytes(&pool) + reserved_bytes, pool.capacity_bytes());
        }

        for (p, _) in outstanding {
            pool.free(Some(p));
        }
        assert_fully_coalesced(&pool);
    }

    /// Buddy involution holds for every order below the top, regardless
    /// of which address within the pool we start from.
    #[test]
    fn buddy_of_is_an_involution(order in 0usize..MIN_K, offset_blocks in 0u64..64) {
        let pool = BuddyPool::new(1 << MIN_K);
        let block_size = 1usize << order;

        // Restrict offsets to block-aligned addresses within the pool.
        let max_blocks = pool.capacity_bytes() / block_size;
        let block_index = (offset_blocks as usize) % max_blocks.max(1);
        let addr = pool.base_addr() + block_index * block_size;

        let buddy = pool.buddy_of(addr, order);
        prop_assert_ne!(buddy, addr);
        prop_assert_eq!(pool.buddy_of(buddy, order), addr);
    }

    /// LIFO reuse: alloc, free, alloc of the same size returns the same
    /// address, for any size that fits the pool.
    #[test]
    fn lifo_reuse_holds_for_any_fitting_size(size in 1usize..(1 << MIN_K)) {
        let mut pool = BuddyPool::new(1 << MIN_K);
        if let Ok(p1) = pool.alloc(size) {
            pool.free(Some(p1));
            let p2 = pool.alloc(size).expect("freeing then re-requesting the same size must succeed");
            prop_assert_eq!(p1, p2);
            pool.free(Some(p2));
        }
    }
}

#[test]
fn capacity_is_exactly_pool_size_minus_header() {
    let mut pool = BuddyPool::new(1 << MIN_K);
    let max = pool.max_payload_bytes();

    let p = pool.alloc(max).expect("largest payload must fit exactly once");
    assert!(pool.alloc(max).is_err(), "pool has no room for a second max-size allocation");
    pool.free(Some(p));

    assert!(pool.alloc(max + 1).is_err(), "one byte over capacity must fail");
    assert_fully_coalesced(&pool);
}
