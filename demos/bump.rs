use std::io::Read;
use std::ptr;

use libc::sbrk;
use rallocator::Allocator;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!("[{}] PID = {}, program break (sbrk(0)) = {:?}", label, std::process::id(), unsafe { sbrk(0) },);
}

/// Debug helper mirroring the old `print_alloc`: reports a request's size,
/// the address it was given, and the current program break.
unsafe fn debug_snapshot(label: &str, size: usize, addr: *mut u8) {
  println!("[{}] requested {} bytes, address = {:?}, program break = {:?}", label, size, addr, unsafe { sbrk(0) });
}

fn main() {
  let mut allocator = Allocator::new();

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate space for a u32.
    // --------------------------------------------------------------------
    let first_block = allocator.allocate(4);
    debug_snapshot("1", 4, first_block);

    let first_ptr = first_block as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_ptr.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 12 bytes.
    // --------------------------------------------------------------------
    let second_block = allocator.allocate(12);
    debug_snapshot("2", 12, second_block);

    ptr::write_bytes(second_block, 0xAB, 12);
    println!("[2] Initialized second block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate a u64 to observe alignment.
    // --------------------------------------------------------------------
    let third_block = allocator.allocate(8);
    debug_snapshot("3", 8, third_block);

    let third_ptr = third_block as *mut u64;
    third_ptr.write(0x1122334455667788);
    println!("[3] Value written = 0x{:X}", third_ptr.read());
    println!("[3] Address = {:#X}, addr % 8 = {}", third_block as usize, third_block as usize % 8);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Allocate an array of u16 to force more movement.
    // --------------------------------------------------------------------
    let fourth_block = allocator.allocate(32);
    debug_snapshot("4", 32, fourth_block);

    let fourth_ptr = fourth_block as *mut u16;
    for i in 0..16 {
      fourth_ptr.add(i).write(i as u16);
    }
    println!("[4] Wrote 0..15 into the u16 array");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Free the first block. Unlike a pure bump allocator, this one
    //    keeps the freed block around for reuse instead of discarding it.
    // --------------------------------------------------------------------
    allocator.free(first_block);
    println!("\n[5] Freed first_block at {:?}", first_block);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Allocate a small block and see whether the freed block is reused.
    // --------------------------------------------------------------------
    let fifth_block = allocator.allocate(2);
    debug_snapshot("6", 2, fifth_block);

    println!(
      "[6] fifth_block == first_block? {}",
      if fifth_block == first_block { "Yes, it reused the freed block" } else { "No, it allocated somewhere else" }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Allocate a large block to push past the mmap threshold and
    //    observe that the program break does *not* move for it.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big_size = 256 * 1024;
    let big_block = allocator.allocate(big_size);
    debug_snapshot("7", big_size, big_block);

    print_program_break("after large alloc");
    block_until_enter_pressed();

    allocator.free(big_block);

    println!("\n[8] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
