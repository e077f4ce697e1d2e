//! `HeapSpine`, the address-ordered, doubly-threaded list of blocks living
//! on the `sbrk` heap (as opposed to individually `mmap`'d large blocks,
//! which never enter this structure).
//!
//! Unlike the bucket table's free-list links, spine adjacency isn't stored
//! redundantly in both directions: the forward neighbor of a block is
//! always computable from its own address and size (`next_of`), while the
//! backward neighbor is the one link actually stored (`prev_in_heap`).
//! `head` is the lowest-address block ever placed on the spine;
//! `wilderness` is the highest-address one, the only block whose size can
//! change without disturbing anything above it.

use crate::block::{self, BlockHeader, HEADER_SIZE};
use crate::stats::Stats;

pub(crate) struct HeapSpine {
  head: *mut BlockHeader,
  wilderness: *mut BlockHeader,
}

impl HeapSpine {
  pub(crate) const fn new() -> Self {
    Self { head: std::ptr::null_mut(), wilderness: std::ptr::null_mut() }
  }

  pub(crate) fn wilderness(&self) -> *mut BlockHeader {
    self.wilderness
  }

  pub(crate) fn head(&self) -> *mut BlockHeader {
    self.head
  }

  pub(crate) fn is_wilderness(&self, block: *mut BlockHeader) -> bool {
    block == self.wilderness
  }

  /// Computes the forward neighbor of `block` by address arithmetic, or
  /// null if `block` is the wilderness (there is nothing above it yet).
  ///
  /// # Safety
  ///
  /// `block` must currently be a live spine block (not mapped, not
  /// destroyed).
  pub(crate) unsafe fn next_of(&self, block: *mut BlockHeader) -> *mut BlockHeader {
    debug_assert!(unsafe { !(*block).is_mapped });
    if block == self.wilderness {
      return std::ptr::null_mut();
    }
    unsafe { (block as *mut u8).add(HEADER_SIZE + (*block).size) as *mut BlockHeader }
  }

  /// Appends a brand-new block obtained from extending the program break.
  /// Always becomes the new wilderness, since `sbrk` only ever grows the
  /// heap upward.
  pub(crate) unsafe fn push_new_block(&mut self, block: *mut BlockHeader, size: usize, is_free: bool, stats: &mut Stats) {
    let prev = self.wilderness;
    unsafe { block::init_fields(block, size, is_free, false, prev) };
    if self.head.is_null() {
      self.head = block;
    }
    self.wilderness = block;
    stats.on_init(size, is_free);
  }

  /// Threads a split leftover into the spine immediately after
  /// `prev_block`, which must already have been shrunk to its final size
  /// via [`block::set_size`] before this is called (the leftover's address
  /// is derived from that new, smaller size). If `prev_block` was the
  /// wilderness, the leftover becomes the new wilderness; otherwise the
  /// block that used to follow `prev_block` has its `prev_in_heap`
  /// rewritten to point at the leftover.
  pub(crate) unsafe fn insert_after_split(&mut self, leftover: *mut BlockHeader, prev_block: *mut BlockHeader, leftover_size: usize, stats: &mut Stats) {
    let was_wilderness = self.wilderness == prev_block;
    unsafe { block::init_fields(leftover, leftover_size, true, false, prev_block) };

    if was_wilderness {
      self.wilderness = leftover;
    } else {
      let after = unsafe { self.next_of(leftover) };
      if !after.is_null() {
        unsafe { (*after).prev_in_heap = leftover };
      }
    }
    stats.on_init(leftover_size, true);
  }

  /// Unlinks `block` from the spine (fixing up its forward neighbor's
  /// `prev_in_heap`, and the `wilderness`/`head` pointers if `block` was
  /// either), decrements statistics for its current size and state, and
  /// clears its fields.
  ///
  /// When removing more than one block in the same operation (coalescing
  /// two or three adjacent blocks into one survivor), call this in
  /// ascending-address order: each call relies on the block's own
  /// `prev_in_heap` to relay the correct predecessor forward, and that
  /// relay only has the right value if lower-addressed removals already
  /// ran.
  pub(crate) unsafe fn destroy(&mut self, block: *mut BlockHeader, stats: &mut Stats) {
    unsafe {
      let next = self.next_of(block);
      let prev_link = (*block).prev_in_heap;

      if !next.is_null() {
        (*next).prev_in_heap = prev_link;
      }
      if block == self.wilderness {
        self.wilderness = prev_link;
      }
      if block == self.head {
        self.head = next;
      }

      let was_free = (*block).is_free;
      let size = (*block).size;
      stats.on_destroy(size, was_free);
      block::destroy_fields(block);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::alloc::{Layout, alloc, dealloc};

  struct Scratch {
    ptrs: Vec<*mut u8>,
  }

  impl Scratch {
    fn new() -> Self {
      Self { ptrs: Vec::new() }
    }

    fn block(&mut self) -> *mut BlockHeader {
      let layout = Layout::new::<BlockHeader>();
      let ptr = unsafe { alloc(layout) };
      self.ptrs.push(ptr);
      ptr as *mut BlockHeader
    }
  }

  impl Drop for Scratch {
    fn drop(&mut self) {
      let layout = Layout::new::<BlockHeader>();
      for ptr in &self.ptrs {
        unsafe { dealloc(*ptr, layout) };
      }
    }
  }

  #[test]
  fn push_new_block_becomes_wilderness_and_head() {
    let mut scratch = Scratch::new();
    let mut spine = HeapSpine::new();
    let mut stats = Stats::default();

    unsafe {
      let a = scratch.block();
      spine.push_new_block(a, 64, false, &mut stats);
      assert_eq!(spine.head(), a);
      assert_eq!(spine.wilderness(), a);

      let b = scratch.block();
      spine.push_new_block(b, 32, false, &mut stats);
      assert_eq!(spine.head(), a);
      assert_eq!(spine.wilderness(), b);
      assert_eq!((*b).prev_in_heap, a);
    }
  }

  #[test]
  fn destroy_tail_block_updates_wilderness() {
    let mut scratch = Scratch::new();
    let mut spine = HeapSpine::new();
    let mut stats = Stats::default();

    unsafe {
      let a = scratch.block();
      spine.push_new_block(a, 64, false, &mut stats);
      let b = scratch.block();
      spine.push_new_block(b, 32, true, &mut stats);

      spine.destroy(b, &mut stats);
      assert_eq!(spine.wilderness(), a);
      assert_eq!(stats.num_free_blocks(), 0);
    }
  }
}
