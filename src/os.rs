//! Thin wrappers over the two OS primitives this allocator relies on:
//! program-break extension for the heap spine, and anonymous mapping for
//! large, individually-reclaimable requests. Both convert the C failure
//! sentinels into `Option::None` so nothing above this module deals with
//! `-1` or `MAP_FAILED` directly.

use std::ptr;

use libc::{c_void, intptr_t};

/// Moves the program break by `delta` bytes (negative shrinks it) and
/// returns the break's position *before* the move, i.e. the start of the
/// newly available region when `delta` is positive.
///
/// Returns `None` if `sbrk` fails, typically because the requested break
/// would exceed `RLIMIT_DATA` or there is no more address space to give.
///
/// # Safety
///
/// `sbrk` mutates process-wide state. Callers on the same thread are fine;
/// interleaving calls from multiple threads can desynchronize a heap spine
/// built on top of the addresses this function hands out.
pub(crate) unsafe fn extend_break(delta: isize) -> Option<*mut u8> {
  let prev = unsafe { libc::sbrk(delta as intptr_t) };
  if prev as isize == -1 { None } else { Some(prev as *mut u8) }
}

/// Creates a new anonymous, private mapping of at least `bytes` bytes.
///
/// Returns `None` on `mmap` failure. The mapping is `PROT_READ | PROT_WRITE`
/// only — large allocations never need to be executable.
///
/// # Safety
///
/// The returned pointer is valid for `bytes` bytes until [`unmap`] is
/// called on it with the same length.
pub(crate) unsafe fn map(bytes: usize) -> Option<*mut u8> {
  let addr = unsafe {
    libc::mmap(
      ptr::null_mut(),
      bytes,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if addr == libc::MAP_FAILED { None } else { Some(addr as *mut u8) }
}

/// Releases a mapping previously returned by [`map`].
///
/// The return value of `munmap` is ignored, matching the reference
/// implementation: a failure here (e.g. a non-page-aligned `region`) has no
/// corrective action available to the caller.
///
/// # Safety
///
/// `region`/`bytes` must describe a mapping this process currently holds.
pub(crate) unsafe fn unmap(region: *mut u8, bytes: usize) {
  unsafe {
    libc::munmap(region as *mut c_void, bytes);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  // `sbrk` is process-wide; serialize the tests that touch it so a parallel
  // `cargo test` run doesn't interleave program-break moves from two threads.
  static BRK_LOCK: Mutex<()> = Mutex::new(());

  #[test]
  fn extend_break_grows_and_shrinks() {
    let _guard = BRK_LOCK.lock().unwrap();

    unsafe {
      let before = extend_break(0).unwrap();
      let grown = extend_break(64).unwrap();
      assert_eq!(grown, before);

      let after_grow = extend_break(0).unwrap();
      assert_eq!(after_grow as usize, before as usize + 64);

      extend_break(-64).unwrap();
      let after_shrink = extend_break(0).unwrap();
      assert_eq!(after_shrink, before);
    }
  }

  #[test]
  fn map_and_unmap_round_trip() {
    unsafe {
      let region = map(4096).expect("mmap should succeed for a page");
      assert!(!region.is_null());

      ptr::write_bytes(region, 0xAB, 4096);
      assert_eq!(*region, 0xAB);

      unmap(region, 4096);
    }
  }
}
