//! `BlockHeader`, the fixed-layout metadata prefix placed immediately before
//! every region this allocator hands out.
//!
//! ```text
//!   ┌─────────────────────────────────────────┬──────────────────────┐
//!   │               BlockHeader                │      user data       │
//!   │  size | is_free | is_mapped | prev_in_heap│                      │
//!   │       next_free | prev_free | owner_bucket│  `size` bytes        │
//!   │                 user_handle                │                      │
//!   └─────────────────────────────────────────┴──────────────────────┘
//!                                               ▲
//!                                               └ pointer returned to caller
//! ```
//!
//! `user_handle` is a single machine word whose *address* is the pointer
//! handed back to callers; nothing meaningful is ever stored in it. Its
//! only purpose is to give the payload a stable offset from the block's own
//! address without relying on struct-layout assumptions elsewhere in the
//! crate (see [`user_data_ptr`] / [`header_of`]).
//!
//! This module only ever touches the fields of the block passed to it: it
//! has no notion of a heap spine or a bucket table. Orchestrating those
//! (splitting, coalescing, wilderness bookkeeping) is [`crate::heap`],
//! [`crate::bucket_table`] and [`crate::allocator`]'s job.

use std::mem;
use std::ptr::{self, addr_of_mut};

use crate::bucket::Bucket;
use crate::fault::BlockFault;
use crate::stats::Stats;

#[repr(C)]
pub(crate) struct BlockHeader {
  pub(crate) size: usize,
  pub(crate) is_free: bool,
  pub(crate) is_mapped: bool,
  pub(crate) prev_in_heap: *mut BlockHeader,
  pub(crate) next_free: *mut BlockHeader,
  pub(crate) prev_free: *mut BlockHeader,
  pub(crate) owner_bucket: *mut Bucket,
  user_handle: usize,
}

/// Full size of the header, including the trailing `user_handle` word.
pub(crate) const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// The header size minus one word — this is what `num_meta_data_bytes`
/// counts per live block, since the last word is really the start of the
/// caller's own region rather than bookkeeping overhead.
pub const HEADER_SIZE_FOR_STATS: usize = HEADER_SIZE - mem::size_of::<usize>();

/// Stamps the fixed fields of a freshly obtained block. Does not touch the
/// heap spine or statistics; callers threading this block into the spine
/// (see `HeapSpine`) or straight into a `mmap` region own that bookkeeping.
pub(crate) unsafe fn init_fields(block: *mut BlockHeader, size: usize, is_free: bool, is_mapped: bool, prev_in_heap: *mut BlockHeader) {
  unsafe {
    addr_of_mut!((*block).size).write(size);
    addr_of_mut!((*block).is_free).write(is_free);
    addr_of_mut!((*block).is_mapped).write(is_mapped);
    addr_of_mut!((*block).prev_in_heap).write(prev_in_heap);
    addr_of_mut!((*block).next_free).write(ptr::null_mut());
    addr_of_mut!((*block).prev_free).write(ptr::null_mut());
    addr_of_mut!((*block).owner_bucket).write(ptr::null_mut());
  }
}

/// The address of the payload, which callers receive as the `*mut u8`
/// result of `allocate`/`zalloc`/`reallocate`.
pub(crate) unsafe fn user_data_ptr(block: *mut BlockHeader) -> *mut u8 {
  unsafe { addr_of_mut!((*block).user_handle) as *mut u8 }
}

/// The inverse of [`user_data_ptr`]: recovers the owning header from a
/// pointer the caller handed back to `free`/`reallocate`.
///
/// # Safety
///
/// `user_ptr` must have been returned by this allocator and not yet freed.
pub(crate) unsafe fn header_of(user_ptr: *mut u8) -> *mut BlockHeader {
  unsafe { user_ptr.sub(HEADER_SIZE_FOR_STATS) as *mut BlockHeader }
}

/// Grows or shrinks `block` in place, adjusting the counter pair that
/// matches its current free/allocated state by the signed delta. Does not
/// touch the heap spine — the caller is responsible for threading in or
/// removing any block this resize displaces.
pub(crate) unsafe fn set_size(block: *mut BlockHeader, new_size: usize, stats: &mut Stats) {
  unsafe {
    let old_size = (*block).size;
    stats.on_resize((*block).is_free, old_size, new_size);
    (*block).size = new_size;
  }
}

/// Flips `block` from allocated to free and updates statistics accordingly.
/// Does not coalesce with neighbors or insert `block` into a bucket; see
/// `Allocator::free` for that orchestration.
pub(crate) unsafe fn mark_free(block: *mut BlockHeader, stats: &mut Stats) {
  unsafe {
    stats.on_free((*block).size);
    (*block).is_free = true;
  }
}

/// Flips `block` from free to allocated and updates statistics. Fails if
/// `block` is already allocated or is a mapped block (mapped blocks are
/// always allocated at creation and never re-enter this path).
pub(crate) unsafe fn mark_allocated(block: *mut BlockHeader, stats: &mut Stats) -> Result<(), BlockFault> {
  unsafe {
    if (*block).is_mapped {
      return Err(BlockFault::InvalidForMapped);
    }
    if !(*block).is_free {
      return Err(BlockFault::AlreadyAllocated);
    }
    stats.on_allocate((*block).size);
    (*block).is_free = false;
    Ok(())
  }
}

/// Zeroes out a destroyed block's links so a stray read through a stale
/// pointer fails loudly (null dereference) instead of silently. Statistics
/// and spine unlinking are the caller's responsibility (see `HeapSpine`).
pub(crate) unsafe fn destroy_fields(block: *mut BlockHeader) {
  unsafe {
    (*block).size = 0;
    (*block).prev_in_heap = ptr::null_mut();
    (*block).next_free = ptr::null_mut();
    (*block).prev_free = ptr::null_mut();
    (*block).owner_bucket = ptr::null_mut();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::alloc::{Layout, alloc, dealloc};

  struct Scratch {
    ptr: *mut u8,
    layout: Layout,
  }

  impl Scratch {
    fn new() -> Self {
      let layout = Layout::new::<BlockHeader>();
      let ptr = unsafe { alloc(layout) };
      Self { ptr, layout }
    }

    fn block(&self) -> *mut BlockHeader {
      self.ptr as *mut BlockHeader
    }
  }

  impl Drop for Scratch {
    fn drop(&mut self) {
      unsafe { dealloc(self.ptr, self.layout) };
    }
  }

  #[test]
  fn user_data_ptr_round_trips_through_header_of() {
    let scratch = Scratch::new();
    let block = scratch.block();
    unsafe {
      init_fields(block, 64, false, false, ptr::null_mut());
      let data = user_data_ptr(block);
      assert_eq!(header_of(data), block);
    }
  }

  #[test]
  fn mark_allocated_then_free_round_trips_stats() {
    let scratch = Scratch::new();
    let block = scratch.block();
    let mut stats = Stats::default();

    unsafe {
      init_fields(block, 100, true, false, ptr::null_mut());
      stats.on_init(100, true);

      mark_allocated(block, &mut stats).unwrap();
      assert_eq!(stats.num_allocated_bytes(), 100);
      assert_eq!(stats.num_free_bytes(), 0);

      assert_eq!(mark_allocated(block, &mut stats), Err(BlockFault::AlreadyAllocated));

      mark_free(block, &mut stats);
      assert_eq!(stats.num_free_bytes(), 100);
    }
  }

  #[test]
  fn mark_allocated_rejects_mapped_blocks() {
    let scratch = Scratch::new();
    let block = scratch.block();
    let mut stats = Stats::default();

    unsafe {
      init_fields(block, 100, false, true, ptr::null_mut());
      assert_eq!(mark_allocated(block, &mut stats), Err(BlockFault::InvalidForMapped));
    }
  }
}
