//! `Allocator`, the allocation core tying the heap spine, the bucket table
//! and statistics together behind the four public operations:
//! [`Allocator::allocate`], [`Allocator::zalloc`], [`Allocator::reallocate`]
//! and [`Allocator::free`].
//!
//! Routing, in order of preference for a request of `size` bytes:
//!
//! 1. `size == 0` or `size` over [`MAX_REQUEST`] — reject (null).
//! 2. `size >= LARGE_ALLOC_THRESHOLD` — a dedicated `mmap` region.
//! 3. A first-fit scan of the bucket table — reuse a freed block, splitting
//!    off any profitably large leftover.
//! 4. The wilderness, if free — grow it in place via `sbrk`.
//! 5. Otherwise — extend the break for a brand-new block.

use std::ptr;

use crate::block::{self, BlockHeader};
use crate::bucket_table::{BUCKET_WIDTH, BucketTable};
use crate::heap::HeapSpine;
use crate::os;
use crate::stats::Stats;
use crate::align::align_up;

/// No single request may ask for more than this many bytes.
pub const MAX_REQUEST: usize = 100_000_000;

/// Requests at or above this size bypass the bucket table entirely and get
/// their own `mmap` region, reclaimed individually on `free`.
pub const LARGE_ALLOC_THRESHOLD: usize = BUCKET_WIDTH;

/// A free block is only split if the leftover would itself be at least
/// this many bytes, on top of its own header — otherwise the sliver isn't
/// worth the bookkeeping.
pub const MIN_SPLIT: usize = 128;

pub struct Allocator {
  heap: HeapSpine,
  buckets: BucketTable,
  stats: Stats,
}

impl Default for Allocator {
  fn default() -> Self {
    Self::new()
  }
}

impl Allocator {
  pub fn new() -> Self {
    Self { heap: HeapSpine::new(), buckets: BucketTable::new(), stats: Stats::default() }
  }

  /// Requests `size` bytes, returning a null pointer on failure (invalid
  /// size, or the OS refusing to hand over more memory).
  ///
  /// # Safety
  ///
  /// Must not be called concurrently with any other method on the same
  /// `Allocator` from a different thread.
  pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
    if size == 0 || size > MAX_REQUEST {
      return ptr::null_mut();
    }
    let size = align_up(size);

    if size >= LARGE_ALLOC_THRESHOLD {
      return unsafe { self.allocate_mapped(size) };
    }

    if let Some(block) = unsafe { self.buckets.acquire(size) } {
      unsafe { self.split_if_profitable(block, size) };
      unsafe { block::mark_allocated(block, &mut self.stats) }.expect("block acquired from a bucket must be free");
      return unsafe { block::user_data_ptr(block) };
    }

    unsafe { self.extend_and_allocate(size) }
  }

  /// Requests `count * size` bytes and zero-fills the whole returned
  /// payload, including the rounding up `allocate` does to the alignment
  /// word. Fails (null) if `count * size` overflows `usize` or if the
  /// underlying `allocate` call fails.
  ///
  /// # Safety
  ///
  /// Same as [`Allocator::allocate`].
  pub unsafe fn zalloc(&mut self, count: usize, size: usize) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
      return ptr::null_mut();
    };
    let p = unsafe { self.allocate(total) };
    if !p.is_null() {
      let allocated_size = unsafe { (*block::header_of(p)).size };
      unsafe { ptr::write_bytes(p, 0, allocated_size) };
    }
    p
  }

  /// Resizes the allocation at `p` to `size` bytes, preserving the
  /// min(old, new) leading bytes of its content. `p == null` behaves like
  /// `allocate(size)`. Returns null (leaving `p` untouched) on failure.
  ///
  /// # Safety
  ///
  /// `p` must be null or a pointer previously returned by this allocator
  /// and not yet freed. Same threading constraint as [`Allocator::allocate`].
  pub unsafe fn reallocate(&mut self, p: *mut u8, size: usize) -> *mut u8 {
    if p.is_null() {
      return unsafe { self.allocate(size) };
    }
    if size == 0 || size > MAX_REQUEST {
      return ptr::null_mut();
    }
    let size = align_up(size);
    let curr = unsafe { block::header_of(p) };

    if size >= LARGE_ALLOC_THRESHOLD || unsafe { (*curr).is_mapped } {
      return unsafe { self.reallocate_to_mapped(curr, p, size) };
    }

    let curr_size = unsafe { (*curr).size };

    if curr_size >= size {
      unsafe { self.split_if_profitable(curr, size) };
      return p;
    }

    let prev = unsafe { (*curr).prev_in_heap };
    let next = unsafe { self.heap.next_of(curr) };
    let prev_free = !prev.is_null() && unsafe { (*prev).is_free };
    let next_free = !next.is_null() && unsafe { (*next).is_free };

    if prev_free && unsafe { (*prev).size + curr_size } >= size {
      return unsafe { self.realloc_merge_prev(prev, curr, p, size) };
    }
    if next_free && unsafe { curr_size + (*next).size } >= size {
      return unsafe { self.realloc_merge_next(curr, next, size) };
    }
    if prev_free && next_free && unsafe { (*prev).size + curr_size + (*next).size } >= size {
      return unsafe { self.realloc_merge_both(prev, curr, next, p, size) };
    }
    if self.heap.is_wilderness(curr) {
      let delta = size as isize - curr_size as isize;
      if unsafe { os::extend_break(delta) }.is_none() {
        return ptr::null_mut();
      }
      unsafe { block::set_size(curr, size, &mut self.stats) };
      return p;
    }

    let new_p = unsafe { self.allocate(size) };
    if new_p.is_null() {
      return ptr::null_mut();
    }
    unsafe { ptr::copy_nonoverlapping(p, new_p, curr_size) };
    unsafe { self.free(p) };
    new_p
  }

  /// Returns the allocation at `p` to the allocator. A null `p` is a no-op.
  ///
  /// # Safety
  ///
  /// `p` must be null or a pointer previously returned by this allocator
  /// and not yet freed.
  pub unsafe fn free(&mut self, p: *mut u8) {
    if p.is_null() {
      return;
    }
    let block = unsafe { block::header_of(p) };

    if unsafe { (*block).is_mapped } {
      let size = unsafe { (*block).size };
      self.stats.on_destroy(size, false);
      unsafe { block::destroy_fields(block) };
      unsafe { os::unmap(block as *mut u8, size + block::HEADER_SIZE) };
      return;
    }

    unsafe { self.set_free_and_coalesce(block) };
  }

  pub fn num_free_blocks(&self) -> usize {
    self.stats.num_free_blocks()
  }

  pub fn num_free_bytes(&self) -> usize {
    self.stats.num_free_bytes()
  }

  pub fn num_allocated_blocks(&self) -> usize {
    self.stats.num_allocated_blocks()
  }

  pub fn num_allocated_bytes(&self) -> usize {
    self.stats.num_allocated_bytes()
  }

  pub fn num_meta_data_bytes(&self) -> usize {
    self.stats.num_meta_data_bytes()
  }

  pub fn size_meta_data(&self) -> usize {
    self.stats.size_meta_data()
  }

  unsafe fn allocate_mapped(&mut self, size: usize) -> *mut u8 {
    match unsafe { os::map(size + block::HEADER_SIZE) } {
      Some(region) => {
        let block = region as *mut BlockHeader;
        unsafe { block::init_fields(block, size, false, true, ptr::null_mut()) };
        self.stats.on_init(size, false);
        unsafe { block::user_data_ptr(block) }
      }
      None => ptr::null_mut(),
    }
  }

  unsafe fn extend_and_allocate(&mut self, size: usize) -> *mut u8 {
    let wilderness = self.heap.wilderness();
    if !wilderness.is_null() && unsafe { (*wilderness).is_free } {
      let old_size = unsafe { (*wilderness).size };
      let delta = size as isize - old_size as isize;
      if unsafe { os::extend_break(delta) }.is_none() {
        return ptr::null_mut();
      }
      unsafe { BucketTable::unbucket(wilderness) };
      unsafe { block::set_size(wilderness, size, &mut self.stats) };
      unsafe { block::mark_allocated(wilderness, &mut self.stats) }.expect("wilderness must be free before growing it");
      return unsafe { block::user_data_ptr(wilderness) };
    }

    let total = block::HEADER_SIZE + size;
    match unsafe { os::extend_break(total as isize) } {
      Some(base) => {
        let block = base as *mut BlockHeader;
        unsafe { self.heap.push_new_block(block, size, false, &mut self.stats) };
        unsafe { block::user_data_ptr(block) }
      }
      None => ptr::null_mut(),
    }
  }

  /// If shrinking `block` to `requested_size` would leave a remainder big
  /// enough to be worth keeping (its own header plus at least
  /// [`MIN_SPLIT`] bytes), splits it off as a new free block and routes it
  /// into the bucket table. Leaves `block`'s free/allocated status alone.
  unsafe fn split_if_profitable(&mut self, block: *mut BlockHeader, requested_size: usize) {
    let current_size = unsafe { (*block).size };
    if current_size < requested_size {
      return;
    }
    let remainder = current_size - requested_size;
    if remainder < crate::block::HEADER_SIZE + MIN_SPLIT {
      return;
    }

    let leftover_size = remainder - crate::block::HEADER_SIZE;
    unsafe { block::set_size(block, requested_size, &mut self.stats) };
    let leftover = unsafe { (block as *mut u8).add(crate::block::HEADER_SIZE + requested_size) } as *mut BlockHeader;
    unsafe { self.heap.insert_after_split(leftover, block, leftover_size, &mut self.stats) };
    unsafe { self.buckets.add(leftover) };
  }

  /// Marks `block` free, then absorbs its free forward and/or backward
  /// neighbors on the heap spine, inserting whichever block survives into
  /// the bucket table exactly once. Returns the surviving block.
  unsafe fn set_free_and_coalesce(&mut self, block: *mut BlockHeader) -> *mut BlockHeader {
    unsafe { block::mark_free(block, &mut self.stats) };
    let mut survivor = block;

    let next = unsafe { self.heap.next_of(survivor) };
    if !next.is_null() && unsafe { (*next).is_free } {
      unsafe { BucketTable::unbucket(next) };
      let next_size = unsafe { (*next).size };
      unsafe { block::set_size(survivor, (*survivor).size + next_size + crate::block::HEADER_SIZE, &mut self.stats) };
      unsafe { self.heap.destroy(next, &mut self.stats) };
    }

    let prev = unsafe { (*survivor).prev_in_heap };
    if !prev.is_null() && unsafe { (*prev).is_free } {
      unsafe { BucketTable::unbucket(prev) };
      let survivor_size = unsafe { (*survivor).size };
      unsafe { block::set_size(prev, (*prev).size + survivor_size + crate::block::HEADER_SIZE, &mut self.stats) };
      unsafe { self.heap.destroy(survivor, &mut self.stats) };
      survivor = prev;
    }

    unsafe { self.buckets.add(survivor) };
    survivor
  }

  unsafe fn realloc_merge_prev(&mut self, prev: *mut BlockHeader, curr: *mut BlockHeader, p: *mut u8, size: usize) -> *mut u8 {
    unsafe { BucketTable::unbucket(prev) };
    unsafe { block::mark_allocated(prev, &mut self.stats) }.expect("prev must be free before merging");
    let curr_size = unsafe { (*curr).size };
    unsafe { block::set_size(prev, (*prev).size + curr_size + crate::block::HEADER_SIZE, &mut self.stats) };
    unsafe { self.heap.destroy(curr, &mut self.stats) };

    let new_p = unsafe { block::user_data_ptr(prev) };
    unsafe { ptr::copy(p, new_p, curr_size) };
    unsafe { self.split_if_profitable(prev, size) };
    new_p
  }

  unsafe fn realloc_merge_next(&mut self, curr: *mut BlockHeader, next: *mut BlockHeader, size: usize) -> *mut u8 {
    unsafe { BucketTable::unbucket(next) };
    let next_size = unsafe { (*next).size };
    unsafe { block::set_size(curr, (*curr).size + next_size + crate::block::HEADER_SIZE, &mut self.stats) };
    unsafe { self.heap.destroy(next, &mut self.stats) };
    unsafe { self.split_if_profitable(curr, size) };
    unsafe { block::user_data_ptr(curr) }
  }

  unsafe fn realloc_merge_both(&mut self, prev: *mut BlockHeader, curr: *mut BlockHeader, next: *mut BlockHeader, p: *mut u8, size: usize) -> *mut u8 {
    unsafe { BucketTable::unbucket(next) };
    unsafe { BucketTable::unbucket(prev) };
    unsafe { block::mark_allocated(prev, &mut self.stats) }.expect("prev must be free before merging");

    let curr_size = unsafe { (*curr).size };
    let next_size = unsafe { (*next).size };
    unsafe { block::set_size(prev, (*prev).size + curr_size + next_size + 2 * crate::block::HEADER_SIZE, &mut self.stats) };

    // Ascending address order (curr, then next) so each `destroy` relays
    // the right predecessor forward through the still-intact `prev_in_heap`
    // of the block it's removing. See `HeapSpine::destroy`.
    unsafe { self.heap.destroy(curr, &mut self.stats) };
    unsafe { self.heap.destroy(next, &mut self.stats) };

    let new_p = unsafe { block::user_data_ptr(prev) };
    unsafe { ptr::copy(p, new_p, curr_size) };
    unsafe { self.split_if_profitable(prev, size) };
    new_p
  }

  /// Moves the allocation at `p` into a fresh `mmap` region of `size`
  /// bytes. The old region is destroyed and unmapped unconditionally,
  /// whether or not it was itself `mmap`'d — unmapping a non-page-aligned
  /// heap-spine block header is a guaranteed (and harmless) `EINVAL` no-op,
  /// but spine bookkeeping and statistics for it are still retired
  /// properly via `HeapSpine::destroy` first.
  unsafe fn reallocate_to_mapped(&mut self, curr: *mut BlockHeader, p: *mut u8, size: usize) -> *mut u8 {
    let new_region = match unsafe { os::map(size + block::HEADER_SIZE) } {
      Some(r) => r,
      None => return ptr::null_mut(),
    };
    let new_block = new_region as *mut BlockHeader;
    unsafe { block::init_fields(new_block, size, false, true, ptr::null_mut()) };
    self.stats.on_init(size, false);

    let old_size = unsafe { (*curr).size };
    let was_mapped = unsafe { (*curr).is_mapped };
    unsafe { ptr::copy_nonoverlapping(p, block::user_data_ptr(new_block), old_size.min(size)) };

    if was_mapped {
      self.stats.on_destroy(old_size, false);
      unsafe { block::destroy_fields(curr) };
    } else {
      unsafe { self.heap.destroy(curr, &mut self.stats) };
    }
    unsafe { os::unmap(curr as *mut u8, old_size + block::HEADER_SIZE) };

    unsafe { block::user_data_ptr(new_block) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocate_zero_and_oversized_are_rejected() {
    let mut a = Allocator::new();
    unsafe {
      assert!(a.allocate(0).is_null());
      assert!(a.allocate(MAX_REQUEST + 1).is_null());
    }
  }

  #[test]
  fn allocate_and_free_round_trip() {
    let mut a = Allocator::new();
    unsafe {
      let p = a.allocate(64);
      assert!(!p.is_null());
      assert_eq!(a.num_allocated_blocks(), 1);

      (p as *mut u64).write(0xDEADBEEF);
      assert_eq!((p as *mut u64).read(), 0xDEADBEEF);

      a.free(p);
      assert_eq!(a.num_allocated_blocks(), 0);
      assert_eq!(a.num_free_blocks(), 1);
    }
  }

  #[test]
  fn free_then_allocate_reuses_block() {
    let mut a = Allocator::new();
    unsafe {
      let p1 = a.allocate(256);
      a.free(p1);
      let p2 = a.allocate(200);
      assert_eq!(p1, p2);
    }
  }

  #[test]
  fn splitting_returns_leftover_to_a_bucket() {
    let mut a = Allocator::new();
    unsafe {
      let p1 = a.allocate(4096);
      a.free(p1);

      let p2 = a.allocate(64);
      assert_eq!(p1, p2);
      // The remainder (4096 - 64 - header, well over MIN_SPLIT) becomes a
      // free block of its own.
      assert!(a.num_free_blocks() >= 1);

      let p3 = a.allocate(32);
      assert!(!p3.is_null());
      assert_ne!(p2, p3);
    }
  }

  #[test]
  fn coalesces_adjacent_free_blocks_on_free() {
    let mut a = Allocator::new();
    unsafe {
      let p1 = a.allocate(128);
      let p2 = a.allocate(128);
      let p3 = a.allocate(128);

      a.free(p1);
      a.free(p3);
      assert_eq!(a.num_free_blocks(), 2);

      a.free(p2);
      // All three merge into a single free block.
      assert_eq!(a.num_free_blocks(), 1);
      assert_eq!(a.num_allocated_blocks(), 0);
    }
  }

  #[test]
  fn zalloc_zero_fills_and_rejects_overflow() {
    let mut a = Allocator::new();
    unsafe {
      let p = a.zalloc(16, 8) as *mut u8;
      assert!(!p.is_null());
      for i in 0..128 {
        assert_eq!(*p.add(i), 0);
      }

      assert!(a.zalloc(usize::MAX, 2).is_null());
    }
  }

  #[test]
  fn reallocate_null_behaves_like_allocate() {
    let mut a = Allocator::new();
    unsafe {
      let p = a.reallocate(ptr::null_mut(), 32);
      assert!(!p.is_null());
    }
  }

  #[test]
  fn reallocate_shrink_in_place_keeps_pointer() {
    let mut a = Allocator::new();
    unsafe {
      let p = a.allocate(256);
      let p2 = a.reallocate(p, 32);
      assert_eq!(p, p2);
    }
  }

  #[test]
  fn reallocate_grow_merges_with_free_next_neighbor() {
    let mut a = Allocator::new();
    unsafe {
      let p1 = a.allocate(64);
      let p2 = a.allocate(64);
      a.free(p2);

      let grown = a.reallocate(p1, 100);
      assert_eq!(grown, p1);
    }
  }

  #[test]
  fn reallocate_large_target_moves_to_mapped_region() {
    let mut a = Allocator::new();
    unsafe {
      let p = a.allocate(64);
      (p as *mut u32).write(0x1234);

      let grown = a.reallocate(p, LARGE_ALLOC_THRESHOLD);
      assert!(!grown.is_null());
      assert_eq!((grown as *mut u32).read(), 0x1234);
    }
  }

  #[test]
  fn large_allocations_are_offloaded_to_mmap() {
    let mut a = Allocator::new();
    unsafe {
      let p = a.allocate(LARGE_ALLOC_THRESHOLD);
      assert!(!p.is_null());
      assert_eq!(a.num_allocated_blocks(), 1);

      a.free(p);
      assert_eq!(a.num_allocated_blocks(), 0);
      assert_eq!(a.num_free_blocks(), 0);
    }
  }
}
