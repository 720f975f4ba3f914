//! Pool lifecycle, allocation, and free/coalesce paths: the three
//! concerns that actually own a [`BuddyPool`]'s state. Order arithmetic
//! lives in [`crate::order`]; free-list mechanics live in
//! [`crate::block`].

use std::mem;
use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::block::{self, BlockHeader, Tag};
use crate::error::BuddyError;
use crate::order::{self, buddy_addr};

/// Default top order used when [`BuddyPool::new`] is asked for `0`
/// bytes, expressed as `2^DEFAULT_K`.
pub const DEFAULT_K: usize = 30;
/// Lower clamp on a pool's top order.
pub const MIN_K: usize = 20;
/// Upper bound on a pool's top order. The pool's actual top order is
/// always strictly less than this (see the clamp in [`BuddyPool::new`]).
pub const MAX_K: usize = 48;
/// Floor applied to the order an allocation request is rounded up to,
/// independent of [`order::order_for_bytes`] itself.
pub const SMALLEST_K: usize = 6;

/// A single fixed-size, power-of-two pool managed by the binary buddy
/// algorithm.
///
/// Constructing one (`BuddyPool::new`) acquires the backing region and
/// seeds the free lists; dropping one releases the region. Payload
/// pointers returned by [`BuddyPool::alloc`] are raw and owned by the
/// caller until the matching [`BuddyPool::free`] (or a relocating
/// [`BuddyPool::realloc`]).
pub struct BuddyPool {
    kval_m: usize,
    numbytes: usize,
    base: MmapMut,
    avail: Box<[BlockHeader]>,
}

const fn header_size() -> usize {
    mem::size_of::<BlockHeader>()
}

/// Terminates the process via an uncatchable signal. Used for the two
/// fatal, unrecoverable paths a pool can hit: backing-region acquisition
/// and release failure.
fn fatal(context: &str) -> ! {
    log::error!("fatal buddy pool error: {context}");
    unsafe {
        libc::raise(libc::SIGKILL);
    }
    std::process::abort();
}

impl BuddyPool {
    /// Acquires a backing region and seeds its free lists, folded into
    /// construction since a Rust constructor returns a fully-formed
    /// value or not at all.
    ///
    /// `requested_bytes == 0` selects [`DEFAULT_K`]; otherwise the
    /// target order is [`order::order_for_bytes`] of the request,
    /// clamped to `[MIN_K, MAX_K - 1]`.
    ///
    /// # Panics / process termination
    /// Backing-region acquisition failure is fatal: this function
    /// terminates the process with `SIGKILL` rather than returning an
    /// error. No partial-init state is observable.
    pub fn new(requested_bytes: usize) -> BuddyPool {
        let kval = if requested_bytes == 0 { DEFAULT_K } else { order::order_for_bytes(requested_bytes) };
        let kval = kval.clamp(MIN_K, MAX_K - 1);
        let numbytes = 1usize << kval;

        let base = match MmapMut::map_anon(numbytes) {
            Ok(m) => m,
            Err(err) => fatal(&format!("backing region mmap of {numbytes} bytes failed: {err}")),
        };

        let avail: Box<[BlockHeader]> = (0..MAX_K).map(BlockHeader::sentinel).collect();
        let mut pool = BuddyPool { kval_m: kval, numbytes, base, avail };

        for i in 0..=kval {
            unsafe { block::init_self_loop(pool.avail_ptr(i)) };
        }

        let top = pool.base.as_mut_ptr() as *mut BlockHeader;
        unsafe {
            (*top).tag = Tag::Avail;
            (*top).order = kval;
            (*top).next = pool.avail_ptr(kval);
            (*top).prev = pool.avail_ptr(kval);
            let sentinel = pool.avail_ptr(kval);
            (*sentinel).next = top;
            (*sentinel).prev = top;
        }

        log::debug!("buddy pool initialized: kval_m={kval}, numbytes={numbytes}");
        pool
    }

    /// Consumes and releases the pool. Equivalent to dropping it;
    /// provided so the `new`/`destroy` pairing has a direct spelling.
    /// Backing region release failure is fatal.
    pub fn destroy(self) {
        // Drop performs the actual release.
    }

    /// The pool's top order (`K_M`).
    pub fn top_order(&self) -> usize {
        self.kval_m
    }

    /// Total size of the backing region in bytes (`2^K_M`).
    pub fn capacity_bytes(&self) -> usize {
        self.numbytes
    }

    /// Largest single payload this pool can ever satisfy
    /// (`2^K_M - sizeof(header)`).
    pub fn max_payload_bytes(&self) -> usize {
        self.numbytes - header_size()
    }

    /// `sizeof(header)`: the bytes every block (free or reserved)
    /// spends on its header before the payload begins. Exposed per
    /// spec's list of constants a caller may need, e.g. to size a
    /// request that must land on a particular order.
    pub fn header_bytes() -> usize {
        header_size()
    }

    /// The pool's base address, the address at which the backing
    /// region begins and relative to which every block address and
    /// buddy computation is taken. Exposed for tests.
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Raw pointer to the sentinel anchoring the free list at `order`.
    fn avail_ptr(&self, order: usize) -> *mut BlockHeader {
        (self.avail.as_ptr() as *mut BlockHeader).wrapping_add(order)
    }

    /// Allocates a block able to hold `nbytes` payload bytes and
    /// returns a pointer to the start of the payload.
    ///
    /// # Errors
    /// [`BuddyError::InvalidArgument`] if `nbytes == 0`;
    /// [`BuddyError::OutOfMemory`] if the request (header included)
    /// exceeds the pool's top order, or no free list up to the top
    /// order yields a block.
    pub fn alloc(&mut self, nbytes: usize) -> Result<NonNull<u8>, BuddyError> {
        if nbytes == 0 {
            log::warn!("buddy alloc rejected: zero-byte request");
            return Err(BuddyError::InvalidArgument);
        }

        let k_need = order::order_for_bytes(nbytes + header_size()).max(SMALLEST_K);
        if k_need > self.kval_m {
            log::warn!("buddy alloc rejected: {nbytes} bytes needs order {k_need} > kval_m {}", self.kval_m);
            return Err(BuddyError::OutOfMemory);
        }

        let mut block = None;
        let mut k = k_need;
        while k <= self.kval_m {
            if let Some(b) = unsafe { block::list_pop_front(self.avail_ptr(k)) } {
                block = Some(b);
                break;
            }
            k += 1;
        }
        let block = match block {
            Some(b) => b,
            None => {
                log::warn!("buddy alloc rejected: no free block up to order {}", self.kval_m);
                return Err(BuddyError::OutOfMemory);
            }
        };

        // Split the lower half down to k_need, publishing each upper
        // half as a new free block: retain the low half, free the high half.
        let mut cur_order = k;
        while cur_order > k_need {
            cur_order -= 1;
            unsafe {
                (*block.as_ptr()).order = cur_order;
                let buddy = buddy_addr(self.base_addr(), block.as_ptr() as usize, cur_order) as *mut BlockHeader;
                (*buddy).order = cur_order;
                block::list_push_front(self.avail_ptr(cur_order), buddy);
            }
        }

        unsafe {
            (*block.as_ptr()).tag = Tag::Reserved;
            (*block.as_ptr()).order = k_need;
        }
        log::debug!("buddy alloc: {nbytes} bytes at order {k_need}");

        let payload = unsafe { (block.as_ptr() as *mut u8).add(header_size()) };
        Ok(unsafe { NonNull::new_unchecked(payload) })
    }

    /// Returns `payload` to the pool, coalescing with an available
    /// same-order buddy up to the top order.
    ///
    /// `payload == None` is a silent no-op.
    pub fn free(&mut self, payload: Option<NonNull<u8>>) {
        let payload = match payload {
            Some(p) => p,
            None => return,
        };

        let mut block = unsafe { (payload.as_ptr()).sub(header_size()) as *mut BlockHeader };
        unsafe { (*block).tag = Tag::Avail };

        loop {
            let order = unsafe { (*block).order };
            if order >= self.kval_m {
                break;
            }
            let buddy = buddy_addr(self.base_addr(), block as usize, order) as *mut BlockHeader;
            let (buddy_tag, buddy_order) = unsafe { ((*buddy).tag, (*buddy).order) };
            if buddy_tag != Tag::Avail || buddy_order != order {
                break;
            }
            unsafe { block::list_unlink(buddy) };
            let merged = if (buddy as usize) < (block as usize) { buddy } else { block };
            unsafe { (*merged).order = order + 1 };
            block = merged;
        }

        let order = unsafe { (*block).order };
        log::debug!("buddy free: coalesced to order {order}");
        unsafe { block::list_push_front(self.avail_ptr(order), block) };
    }

    /// Resizes the allocation at `payload` to hold `nbytes` bytes.
    ///
    /// - `payload == None` behaves like [`BuddyPool::alloc`].
    /// - `nbytes == 0` frees `payload` and returns `Ok(None)`.
    /// - Otherwise: if `nbytes` still fits the block one order down,
    ///   the original pointer is returned unchanged (this allocator
    ///   never shrinks a block in place). If it does not fit, a new
    ///   block is allocated, the overlap is copied, the old block is
    ///   freed, and the new pointer is returned. On allocation failure
    ///   the old block is left untouched and reserved.
    pub fn realloc(
        &mut self,
        payload: Option<NonNull<u8>>,
        nbytes: usize,
    ) -> Result<Option<NonNull<u8>>, BuddyError> {
        let payload = match payload {
            None => return self.alloc(nbytes).map(Some),
            Some(p) => p,
        };
        if nbytes == 0 {
            self.free(Some(payload));
            return Ok(None);
        }

        let block = unsafe { (payload.as_ptr()).sub(header_size()) as *mut BlockHeader };
        let order = unsafe { (*block).order };
        let allocated = 1usize << order;
        let old_payload_capacity = allocated - header_size();
        let min_req = if order > 0 { (1usize << (order - 1)) - header_size() + 1 } else { 0 };

        if nbytes > min_req {
            let new_payload = self.alloc(nbytes)?;
            let copy_len = old_payload_capacity.min(nbytes);
            unsafe {
                std::ptr::copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), copy_len);
            }
            self.free(Some(payload));
            Ok(Some(new_payload))
        } else {
            Ok(Some(payload))
        }
    }

    /// Number of free blocks currently linked at `order`. Exposed so
    /// tests can check full-pool/empty-pool invariants without
    /// inspecting header internals directly.
    pub fn free_block_count(&self, order: usize) -> usize {
        let sentinel = self.avail_ptr(order);
        let mut count = 0;
        let mut cur = unsafe { (*sentinel).next };
        while cur as *const BlockHeader != sentinel as *const BlockHeader {
            count += 1;
            cur = unsafe { (*cur).next };
        }
        count
    }

    /// The `(tag, order)` of the block backing `payload`, for tests.
    pub fn block_state(&self, payload: NonNull<u8>) -> (Tag, usize) {
        let block = unsafe { (payload.as_ptr()).sub(header_size()) as *const BlockHeader };
        unsafe { ((*block).tag, (*block).order) }
    }

    /// The address of the buddy of the block at `block_addr` (a block's
    /// own address, not a payload pointer) at `order`. Exposed for
    /// tests.
    pub fn buddy_of(&self, block_addr: usize, order: usize) -> usize {
        buddy_addr(self.base_addr(), block_addr, order)
    }

    /// The block address backing `payload` (a payload pointer returned
    /// by [`BuddyPool::alloc`]), i.e. `payload - sizeof(header)`.
    pub fn block_addr_of(&self, payload: NonNull<u8>) -> usize {
        payload.as_ptr() as usize - header_size()
    }
}

impl Drop for BuddyPool {
    fn drop(&mut self) {
        log::debug!("buddy pool released: {} bytes", self.numbytes);
        // `MmapMut`'s own `Drop` unmaps the region.
    }
}
