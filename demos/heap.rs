use std::error::Error;

use tagalloc::{Arena, BlockPtr, Heap};
use tracing_subscriber::EnvFilter;

/// Prints every block between the sentinels, in address order.
fn print_blocks<A: Arena>(
  label: &str,
  heap: &Heap<A>,
) {
  let stats = heap.stats();
  println!(
    "\n[{}] arena = {} bytes, {} allocated, {} free, {} extensions",
    label, stats.arena_bytes, stats.allocated_blocks, stats.free_blocks, stats.extensions
  );

  for info in heap.blocks() {
    let state = if info.allocated { "allocated" } else { "free" };
    println!("    {:>8} {:>6} bytes  {}", info.ptr.to_string(), info.size, state);
  }

  let free: Vec<String> = heap.free_blocks().map(|ptr| ptr.to_string()).collect();
  println!("    free list: [{}]", free.join(" -> "));

  match heap.check() {
    Ok(()) => println!("    consistency: ok"),
    Err(violation) => println!("    consistency: {violation}"),
  }
}

fn allocate<A: Arena>(
  heap: &mut Heap<A>,
  size: usize,
) -> Result<BlockPtr, Box<dyn Error>> {
  Ok(heap.allocate(size)?.ok_or("zero-sized request")?)
}

fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  #[cfg(unix)]
  let arena = tagalloc::MmapArena::reserve(1 << 20)?;
  #[cfg(not(unix))]
  let arena = tagalloc::VecArena::with_limit(1 << 20);

  let mut heap = Heap::new(arena)?;
  print_blocks("start", &heap);

  // --------------------------------------------------------------------
  // 1) The first request grows the arena by one chunk and splits it.
  // --------------------------------------------------------------------
  let a = allocate(&mut heap, 24)?;
  heap.payload_mut(a)?[..4].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
  println!("\n[1] allocate(24) = {} at address {:#x}", a, heap.address(a));
  print_blocks("1", &heap);

  // --------------------------------------------------------------------
  // 2) Three more neighbors.
  // --------------------------------------------------------------------
  let b = allocate(&mut heap, 100)?;
  let c = allocate(&mut heap, 40)?;
  let d = allocate(&mut heap, 8)?;
  println!("\n[2] allocate(100) = {b}, allocate(40) = {c}, allocate(8) = {d}");
  print_blocks("2", &heap);

  // --------------------------------------------------------------------
  // 3) Freeing b and then c merges them into one free block.
  // --------------------------------------------------------------------
  heap.free(b)?;
  heap.free(c)?;
  println!("\n[3] free({b}), free({c})");
  print_blocks("3", &heap);

  // --------------------------------------------------------------------
  // 4) Growing a absorbs the merged block, so a does not move.
  // --------------------------------------------------------------------
  let grown = heap.resize(Some(a), 120)?;
  println!("\n[4] resize({a}, 120) = {:?}", grown.map(|ptr| ptr.to_string()));
  print_blocks("4", &heap);

  // --------------------------------------------------------------------
  // 5) Double free is reported, not acted upon.
  // --------------------------------------------------------------------
  heap.free(d)?;
  if let Err(err) = heap.free(d) {
    println!("\n[5] second free({d}): {err}");
  }

  // --------------------------------------------------------------------
  // 6) A request bigger than any free block grows the arena again.
  // --------------------------------------------------------------------
  let big = allocate(&mut heap, 10_000)?;
  println!("\n[6] allocate(10000) = {big}");
  print_blocks("6", &heap);

  if let Some(a) = grown {
    let value = u32::from_le_bytes(heap.payload(a)?[..4].try_into().unwrap_or_default());
    println!("\n[7] value still stored in a = {value:#X}");
  }

  Ok(())
}
