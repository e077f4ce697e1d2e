//! # rallocator — a segregated free-list `sbrk`/`mmap` allocator
//!
//! This crate provides a user-space dynamic memory allocator built directly
//! on `sbrk` and `mmap`, in the tradition of a teaching `malloc`: first-fit
//! size-segregated free lists for small and medium requests, block
//! splitting and coalescing to keep fragmentation down, and a dedicated
//! `mmap` region for anything large enough that sharing the heap with
//! smaller blocks wouldn't pay off.
//!
//! ## Overview
//!
//! ```text
//!   Heap spine (sbrk-backed, address order):
//!
//!   ┌─────────┬─────────┬─────────┬──────────────────────┐
//!   │ Block A │ Block B │ Block C │     (wilderness)      │
//!   │  in use │  free   │  in use │  free, highest addr   │
//!   └─────────┴─────────┴─────────┴──────────────────────┘
//!        ▲                              ▲
//!        │                              └── grows via sbrk without
//!        │                                  disturbing anything below it
//!        └── head: lowest-address block ever placed on the spine
//!
//!   Bucket table (128 buckets, 128 KiB wide each):
//!   free blocks of similar size are threaded together for O(buckets) —
//!   not O(blocks) — first-fit lookup.
//!
//!   Large requests (>= 128 KiB) skip both structures entirely and get
//!   their own `mmap` region, reclaimed individually on free.
//! ```
//!
//! ## Crate structure
//!
//! ```text
//!   rallocator
//!   ├── align        - fixed 8-byte alignment policy
//!   ├── os           - sbrk/mmap/munmap wrappers
//!   ├── fault        - BlockFault, internal invariant violations
//!   ├── block        - BlockHeader, the fixed metadata prefix
//!   ├── bucket       - a single size-sorted intrusive free list
//!   ├── bucket_table - the 128-entry array of buckets
//!   ├── heap         - the address-ordered heap spine
//!   └── allocator    - Allocator, tying the above together
//! ```
//!
//! ## Quick start
//!
//! ```
//! use rallocator::Allocator;
//!
//! let mut allocator = Allocator::new();
//!
//! unsafe {
//!     let ptr = allocator.allocate(64) as *mut u64;
//!     assert!(!ptr.is_null());
//!
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     allocator.free(ptr as *mut u8);
//! }
//! ```
//!
//! The same ten operations are also available as free functions
//! (`smalloc`, `scalloc`, `srealloc`, `sfree`, and the six `_num_*`/
//! `_size_meta_data` statistics readers) backed by a thread-local
//! singleton, for callers migrating from a C-style global allocator API.
//! Prefer the instance API in new code: a single process-wide `sbrk`
//! cursor shared across threads would let their heap-spine bookkeeping
//! race, so each thread's free functions operate on that thread's own
//! allocator rather than a truly global one.
//!
//! ## Safety
//!
//! This crate is inherently unsafe, as it deals with raw memory management
//! and direct OS calls. Every allocation and deallocation operation
//! requires an `unsafe` block. Callers must ensure pointers are not used
//! after being freed, are not freed twice, and were obtained from the same
//! `Allocator` (or thread-local singleton) they're being returned to.
//!
//! ## Limitations
//!
//! - Single-threaded per `Allocator` instance — no internal synchronization.
//! - Unix-only: requires `libc`'s `sbrk`/`mmap`/`munmap`.

pub mod align;
mod allocator;
mod block;
mod bucket;
mod bucket_table;
mod fault;
mod heap;
mod os;
mod stats;

pub use allocator::{Allocator, LARGE_ALLOC_THRESHOLD, MAX_REQUEST, MIN_SPLIT};
pub use fault::BlockFault;

use std::cell::RefCell;

thread_local! {
  static THREAD_ALLOCATOR: RefCell<Allocator> = RefCell::new(Allocator::new());
}

/// Allocates `size` bytes on the calling thread's allocator. Returns null
/// on failure.
///
/// # Safety
///
/// Same contract as [`Allocator::allocate`].
pub unsafe fn smalloc(size: usize) -> *mut u8 {
  THREAD_ALLOCATOR.with(|a| unsafe { a.borrow_mut().allocate(size) })
}

/// Allocates `count * size` zero-filled bytes on the calling thread's
/// allocator. Returns null on overflow or failure.
///
/// # Safety
///
/// Same contract as [`Allocator::zalloc`].
pub unsafe fn scalloc(count: usize, size: usize) -> *mut u8 {
  THREAD_ALLOCATOR.with(|a| unsafe { a.borrow_mut().zalloc(count, size) })
}

/// Resizes the allocation at `p` to `size` bytes on the calling thread's
/// allocator.
///
/// # Safety
///
/// Same contract as [`Allocator::reallocate`].
pub unsafe fn srealloc(p: *mut u8, size: usize) -> *mut u8 {
  THREAD_ALLOCATOR.with(|a| unsafe { a.borrow_mut().reallocate(p, size) })
}

/// Frees the allocation at `p` on the calling thread's allocator. A no-op
/// if `p` is null.
///
/// # Safety
///
/// Same contract as [`Allocator::free`].
pub unsafe fn sfree(p: *mut u8) {
  THREAD_ALLOCATOR.with(|a| unsafe { a.borrow_mut().free(p) })
}

pub fn _num_free_blocks() -> usize {
  THREAD_ALLOCATOR.with(|a| a.borrow().num_free_blocks())
}

pub fn _num_free_bytes() -> usize {
  THREAD_ALLOCATOR.with(|a| a.borrow().num_free_bytes())
}

pub fn _num_allocated_blocks() -> usize {
  THREAD_ALLOCATOR.with(|a| a.borrow().num_allocated_blocks())
}

pub fn _num_allocated_bytes() -> usize {
  THREAD_ALLOCATOR.with(|a| a.borrow().num_allocated_bytes())
}

pub fn _num_meta_data_bytes() -> usize {
  THREAD_ALLOCATOR.with(|a| a.borrow().num_meta_data_bytes())
}

pub fn _size_meta_data() -> usize {
  THREAD_ALLOCATOR.with(|a| a.borrow().size_meta_data())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn free_functions_round_trip_through_the_thread_local_singleton() {
    unsafe {
      let before = _num_allocated_blocks();
      let p = smalloc(64);
      assert!(!p.is_null());
      assert_eq!(_num_allocated_blocks(), before + 1);

      sfree(p);
      assert_eq!(_num_allocated_blocks(), before);
    }
  }

  #[test]
  fn scalloc_zero_fills() {
    unsafe {
      let p = scalloc(8, 8) as *mut u64;
      assert!(!p.is_null());
      for i in 0..8 {
        assert_eq!(*p.add(i), 0);
      }
      sfree(p as *mut u8);
    }
  }
}
