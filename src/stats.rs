//! Process-wide(-ish) allocator statistics.
//!
//! Four raw counters back six read accessors. Every other module mutates
//! `Stats` only through the `on_*` methods below, each named after the
//! lifecycle transition that drives it, so the bookkeeping stays in one
//! place instead of being re-derived at every call site.

use crate::block::HEADER_SIZE_FOR_STATS;

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
  free_blocks: usize,
  free_bytes: usize,
  allocated_blocks: usize,
  allocated_bytes: usize,
}

impl Stats {
  /// A block of `size` bytes was just threaded into the heap spine or
  /// `mmap`'d in, landing directly in the free or allocated pool.
  pub(crate) fn on_init(&mut self, size: usize, is_free: bool) {
    if is_free {
      self.free_blocks += 1;
      self.free_bytes += size;
    } else {
      self.allocated_blocks += 1;
      self.allocated_bytes += size;
    }
  }

  /// A block of `size` bytes (in the given state) is gone for good —
  /// unmapped, or coalesced away into a neighbor.
  pub(crate) fn on_destroy(&mut self, size: usize, is_free: bool) {
    if is_free {
      self.free_blocks -= 1;
      self.free_bytes -= size;
    } else {
      self.allocated_blocks -= 1;
      self.allocated_bytes -= size;
    }
  }

  /// A block in the given state was resized from `old_size` to `new_size`
  /// without changing its free/allocated status or block count.
  pub(crate) fn on_resize(&mut self, is_free: bool, old_size: usize, new_size: usize) {
    let delta = new_size as isize - old_size as isize;
    let bytes = if is_free { &mut self.free_bytes } else { &mut self.allocated_bytes };
    *bytes = (*bytes as isize + delta) as usize;
  }

  /// A free block of `size` bytes was handed out.
  pub(crate) fn on_allocate(&mut self, size: usize) {
    self.free_blocks -= 1;
    self.free_bytes -= size;
    self.allocated_blocks += 1;
    self.allocated_bytes += size;
  }

  /// An allocated block of `size` bytes was returned.
  pub(crate) fn on_free(&mut self, size: usize) {
    self.allocated_blocks -= 1;
    self.allocated_bytes -= size;
    self.free_blocks += 1;
    self.free_bytes += size;
  }

  pub fn num_free_blocks(&self) -> usize {
    self.free_blocks
  }

  pub fn num_free_bytes(&self) -> usize {
    self.free_bytes
  }

  pub fn num_allocated_blocks(&self) -> usize {
    self.free_blocks + self.allocated_blocks
  }

  pub fn num_allocated_bytes(&self) -> usize {
    self.free_bytes + self.allocated_bytes
  }

  pub fn num_meta_data_bytes(&self) -> usize {
    self.num_allocated_blocks() * HEADER_SIZE_FOR_STATS
  }

  pub fn size_meta_data(&self) -> usize {
    HEADER_SIZE_FOR_STATS
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn init_and_destroy_are_inverses() {
    let mut stats = Stats::default();
    stats.on_init(100, true);
    stats.on_init(50, false);
    assert_eq!(stats.num_free_blocks(), 1);
    assert_eq!(stats.num_free_bytes(), 100);
    assert_eq!(stats.num_allocated_blocks(), 2);
    assert_eq!(stats.num_allocated_bytes(), 150);

    stats.on_destroy(100, true);
    stats.on_destroy(50, false);
    assert_eq!(stats.num_allocated_blocks(), 0);
    assert_eq!(stats.num_allocated_bytes(), 0);
  }

  #[test]
  fn allocate_then_free_round_trips() {
    let mut stats = Stats::default();
    stats.on_init(200, true);

    stats.on_allocate(200);
    assert_eq!(stats.num_free_bytes(), 0);
    assert_eq!(stats.num_allocated_bytes(), 200);

    stats.on_free(200);
    assert_eq!(stats.num_free_bytes(), 200);
    assert_eq!(stats.num_allocated_bytes(), 0);
  }

  #[test]
  fn resize_adjusts_matching_pool_only() {
    let mut stats = Stats::default();
    stats.on_init(100, false);
    stats.on_resize(false, 100, 180);
    assert_eq!(stats.num_allocated_bytes(), 180);
    assert_eq!(stats.num_free_bytes(), 0);
  }
}
