//! Word-alignment policy.
//!
//! Every user-facing size in this crate is rounded up to an 8-byte boundary
//! before it reaches the block manager: allocation requests, the `count *
//! size` product computed by `zalloc`, and the target size passed to
//! `reallocate`. The header itself is a multiple of the alignment word, so
//! a split leftover never starts on a misaligned address.

/// The allocator's fixed alignment word, pinned at 8 bytes on every target.
pub const ALIGNMENT: usize = 8;

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
pub fn align_up(size: usize) -> usize {
  (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Macro form of [`align_up`], kept for callers used to the `align!(...)`
/// spelling.
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}
