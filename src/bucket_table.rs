//! `BucketTable`, the fixed array of 128 size-segregated [`Bucket`]s that
//! backs first-fit allocation below the large-allocation threshold.
//!
//! Bucket `i` holds free blocks whose size falls in
//! `[i * BUCKET_WIDTH, (i + 1) * BUCKET_WIDTH)`, with the last bucket
//! absorbing everything at or above `(BUCKET_COUNT - 1) * BUCKET_WIDTH`
//! (nothing above [`LARGE_ALLOC_THRESHOLD`] ever reaches here, so that
//! overflow bucket in practice only ever holds blocks just under the
//! threshold). The table is heap-boxed so the addresses
//! [`BlockHeader::owner_bucket`](crate::block::BlockHeader) points back at
//! stay valid no matter where the owning `Allocator` itself gets moved.

use crate::block::BlockHeader;
use crate::bucket::Bucket;

pub(crate) const BUCKET_COUNT: usize = 128;
const KIB: usize = 1024;

/// Width of a single bucket's size range, and also the threshold at and
/// above which a request is offloaded to `mmap` instead of the bucket
/// table (see [`crate::allocator`]).
pub(crate) const BUCKET_WIDTH: usize = KIB * BUCKET_COUNT;

pub(crate) struct BucketTable {
  buckets: Box<[Bucket; BUCKET_COUNT]>,
}

impl BucketTable {
  pub(crate) fn new() -> Self {
    Self { buckets: Box::new(std::array::from_fn(|_| Bucket::new())) }
  }

  fn index_of(size: usize) -> usize {
    (size / BUCKET_WIDTH).min(BUCKET_COUNT - 1)
  }

  /// # Safety
  ///
  /// `block` must not already be linked into any bucket.
  pub(crate) unsafe fn add(&mut self, block: *mut BlockHeader) {
    let idx = unsafe { Self::index_of((*block).size) };
    unsafe { self.buckets[idx].add(block) };
  }

  /// Starts at `bucket_of(size)` and walks upward through wider buckets
  /// until a first-fit match is found.
  pub(crate) unsafe fn acquire(&mut self, size: usize) -> Option<*mut BlockHeader> {
    let start = Self::index_of(size);
    for bucket in &mut self.buckets[start..] {
      if let Some(block) = unsafe { bucket.acquire(size) } {
        return Some(block);
      }
    }
    None
  }

  /// Removes `block` from whichever bucket it currently lives in, using
  /// its own stored `owner_bucket` pointer. A no-op if `block` isn't
  /// bucketed (`owner_bucket` is null).
  ///
  /// # Safety
  ///
  /// `owner_bucket`, if non-null, must point at a bucket inside this table.
  pub(crate) unsafe fn unbucket(block: *mut BlockHeader) {
    unsafe {
      let owner = (*block).owner_bucket;
      if !owner.is_null() {
        (*owner).remove(block);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn index_of_clamps_to_last_bucket() {
    assert_eq!(BucketTable::index_of(0), 0);
    assert_eq!(BucketTable::index_of(BUCKET_WIDTH - 1), 0);
    assert_eq!(BucketTable::index_of(BUCKET_WIDTH), 1);
    assert_eq!(BucketTable::index_of(BUCKET_WIDTH * 1000), BUCKET_COUNT - 1);
  }
}
