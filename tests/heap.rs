use tagalloc::{Arena, BlockPtr, Heap, HeapConfig, HeapError, VecArena};

const MIN_BLOCK: usize = 16;

fn heap() -> Heap<VecArena> {
  Heap::new(VecArena::new()).unwrap()
}

fn alloc<A: Arena>(
  heap: &mut Heap<A>,
  size: usize,
) -> BlockPtr {
  let ptr = heap.allocate(size).unwrap().unwrap();
  heap.check().unwrap();
  ptr
}

fn alignment_and_sizing<A: Arena>(mut heap: Heap<A>) {
  let align = heap.config().alignment;

  for size in [1, 7, 8, 9, 15, 16, 17, 100, 1000, 5000, 70_000] {
    let ptr = alloc(&mut heap, size);

    assert_eq!(ptr.offset() % align, 0, "size {size}");
    assert!(heap.usable_size(ptr).unwrap() >= size, "size {size}");
  }
}

#[test]
fn test_alignment_and_sizing() {
  alignment_and_sizing(heap());
  alignment_and_sizing(Heap::with_config(VecArena::new(), HeapConfig::new().with_alignment(64)).unwrap());
}

#[cfg(unix)]
#[test]
fn test_absolute_addresses_are_aligned() {
  let arena = tagalloc::MmapArena::reserve(1 << 24).unwrap();
  let mut heap = Heap::new(arena).unwrap();

  for size in [1, 24, 333, 4096, 100_000] {
    let ptr = alloc(&mut heap, size);
    assert_eq!(heap.address(ptr) % 8, 0);
  }

  alignment_and_sizing(heap);
}

#[test]
fn test_zero_size_requests() {
  let mut heap = heap();

  assert_eq!(heap.allocate(0), Ok(None));
  assert_eq!(heap.stats().extensions, 0);

  let ptr = alloc(&mut heap, 32);
  assert_eq!(heap.resize(Some(ptr), 0), Ok(None));
  assert_eq!(heap.stats().allocated_blocks, 0);
  heap.check().unwrap();
}

#[test]
fn test_first_allocation_on_empty_heap() {
  let mut heap = heap();

  let ptr = alloc(&mut heap, 1);
  let stats = heap.stats();

  assert_eq!(ptr.offset() % 8, 0);
  assert_eq!(stats.extensions, 1);
  assert_eq!(stats.free_blocks, 1);
  assert_eq!(heap.free_blocks().count(), 1);
  assert_eq!(stats.free_bytes, 4096 - MIN_BLOCK);
}

#[test]
fn test_reuse_after_free_is_lifo() {
  let mut heap = heap();
  let _guard = alloc(&mut heap, 40);
  let a = alloc(&mut heap, 100);
  let _b = alloc(&mut heap, 40);

  heap.free(a).unwrap();
  heap.check().unwrap();

  assert_eq!(alloc(&mut heap, 64), a);
}

#[test]
fn test_coalescing_enables_larger_allocation() {
  let mut heap = heap();
  let _left = alloc(&mut heap, 40);
  let a = alloc(&mut heap, 48);
  let b = alloc(&mut heap, 80);
  let _right = alloc(&mut heap, 40);

  let s1 = heap.usable_size(a).unwrap() + 8;
  let s2 = heap.usable_size(b).unwrap() + 8;
  let extensions = heap.stats().extensions;

  heap.free(a).unwrap();
  heap.free(b).unwrap();
  heap.check().unwrap();

  let merged = heap.free_blocks().find(|&ptr| ptr == a);
  assert_eq!(merged, Some(a));

  let c = alloc(&mut heap, s1 + s2 - 8);
  assert_eq!(c, a);
  assert_eq!(heap.stats().extensions, extensions);
}

#[test]
fn test_growth_accounting() {
  let mut heap = heap();
  alloc(&mut heap, 10);

  let before = heap.stats();
  let big = alloc(&mut heap, 3 * 4096);
  let after = heap.stats();

  assert_eq!(after.extensions, before.extensions + 1);
  assert!(after.arena_bytes - before.arena_bytes >= 3 * 4096 + 8);
  assert!(heap.usable_size(big).unwrap() >= 3 * 4096);
}

#[test]
fn test_extension_merges_with_trailing_free_block() {
  let mut heap = heap();
  alloc(&mut heap, 10);

  // The 4080-byte tail is too small, so the heap grows and merges it with
  // the new chunk instead of leaving two adjacent free blocks.
  let ptr = alloc(&mut heap, 5000);

  assert_eq!(ptr.offset(), 32);
  assert_eq!(heap.stats().free_blocks, 1);
}

#[test]
fn test_resize_grows_in_place() {
  let mut heap = heap();
  let a = alloc(&mut heap, 24);
  let b = alloc(&mut heap, 64);
  let _c = alloc(&mut heap, 24);

  heap.payload_mut(a).unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
  heap.free(b).unwrap();

  let grown = heap.resize(Some(a), 80).unwrap().unwrap();
  heap.check().unwrap();

  assert_eq!(grown, a);
  assert!(heap.usable_size(a).unwrap() >= 80);
  assert_eq!(&heap.payload(a).unwrap()[..4], &[1, 2, 3, 4]);
}

#[test]
fn test_resize_moves_when_blocked() {
  let mut heap = heap();
  let a = alloc(&mut heap, 24);
  let _b = alloc(&mut heap, 24);

  let data: Vec<u8> = (0..24).collect();
  heap.payload_mut(a).unwrap()[..24].copy_from_slice(&data);

  let moved = heap.resize(Some(a), 200).unwrap().unwrap();
  heap.check().unwrap();

  assert_ne!(moved, a);
  assert_eq!(&heap.payload(moved).unwrap()[..24], &data[..]);
  assert_eq!(heap.usable_size(a), Err(HeapError::InvalidPointer { offset: a.offset() }));
  assert!(heap.free_blocks().any(|ptr| ptr == a));
}

#[test]
fn test_resize_to_same_size_is_identity() {
  let mut heap = heap();
  let a = alloc(&mut heap, 20);
  let before: Vec<_> = heap.blocks().collect();

  assert_eq!(heap.resize(Some(a), 17).unwrap(), Some(a));
  assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
}

#[test]
fn test_resize_shrink_frees_tail() {
  let mut heap = heap();
  let a = alloc(&mut heap, 500);
  let _b = alloc(&mut heap, 8);

  assert_eq!(heap.resize(Some(a), 8).unwrap(), Some(a));
  heap.check().unwrap();

  assert_eq!(heap.usable_size(a).unwrap(), 8);
  assert_eq!(heap.free_blocks().next().map(|ptr| ptr.offset()), Some(a.offset() + MIN_BLOCK));
}

#[test]
fn test_resize_null_allocates() {
  let mut heap = heap();

  let ptr = heap.resize(None, 48).unwrap().unwrap();
  heap.check().unwrap();

  assert!(heap.usable_size(ptr).unwrap() >= 48);
}

#[test]
fn test_out_of_memory_leaves_heap_intact() {
  let mut heap = Heap::new(VecArena::with_limit(2 * 4096)).unwrap();
  let a = alloc(&mut heap, 1000);
  heap.payload_mut(a).unwrap()[0] = 42;

  let before: Vec<_> = heap.blocks().collect();
  let arena = heap.arena().len();

  assert!(matches!(heap.allocate(10_000), Err(HeapError::OutOfMemory { .. })));
  assert!(matches!(heap.resize(Some(a), 10_000), Err(HeapError::OutOfMemory { .. })));
  assert!(matches!(heap.allocate(usize::MAX), Err(HeapError::OutOfMemory { .. })));

  assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
  assert_eq!(heap.arena().len(), arena);
  assert_eq!(heap.payload(a).unwrap()[0], 42);
  heap.check().unwrap();

  // Smaller requests still succeed afterwards.
  alloc(&mut heap, 100);
}

#[test]
fn test_initial_sentinels_need_room() {
  let result = Heap::new(VecArena::with_limit(8));
  assert!(matches!(result, Err(HeapError::OutOfMemory { .. })));
}

#[test]
fn test_rejects_non_empty_arena() {
  let mut arena = VecArena::new();
  arena.grow(64).unwrap();

  assert!(matches!(Heap::new(arena), Err(HeapError::InvalidConfig { .. })));
}

#[test]
fn test_double_free_is_reported() {
  let mut heap = heap();
  let a = alloc(&mut heap, 24);
  let _b = alloc(&mut heap, 24);

  heap.free(a).unwrap();
  let before: Vec<_> = heap.blocks().collect();

  assert_eq!(heap.free(a), Err(HeapError::DoubleFree { offset: a.offset() }));
  assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
  heap.check().unwrap();
}

#[test]
fn test_double_free_after_merge_is_reported() {
  let mut heap = heap();
  let a = alloc(&mut heap, 24);
  let b = alloc(&mut heap, 24);
  let _c = alloc(&mut heap, 24);

  heap.free(a).unwrap();
  heap.free(b).unwrap();

  assert_eq!(heap.free(b), Err(HeapError::DoubleFree { offset: b.offset() }));
  heap.check().unwrap();
}

#[test]
fn test_invalid_pointers_are_reported() {
  let mut heap = heap();
  let a = alloc(&mut heap, 64);

  for offset in [4, 8, a.offset() + 1, a.offset() + 16, 1 << 30] {
    let ptr = BlockPtr::from_offset(offset).unwrap();

    assert_eq!(heap.free(ptr), Err(HeapError::InvalidPointer { offset }));
    assert_eq!(heap.resize(Some(ptr), 8), Err(HeapError::InvalidPointer { offset }));
  }

  heap.check().unwrap();
}

#[test]
fn test_strict_checks_reject_forged_blocks() {
  let config = HeapConfig::new().with_strict_checks(true);
  let mut heap = Heap::with_config(VecArena::new(), config).unwrap();
  let a = alloc(&mut heap, 256);

  // Forge a plausible block inside a's payload.
  let forged = 64;
  let payload = heap.payload_mut(a).unwrap();
  let tag = tagalloc::Tag::allocated(32).pack().to_le_bytes();
  payload[forged - a.offset() - 4..forged - a.offset()].copy_from_slice(&tag);
  payload[forged - a.offset() + 24..forged - a.offset() + 28].copy_from_slice(&tag);

  let ptr = BlockPtr::from_offset(forged).unwrap();
  assert_eq!(heap.free(ptr), Err(HeapError::InvalidPointer { offset: forged }));
  heap.check().unwrap();

  heap.free(a).unwrap();
  heap.check().unwrap();
}

/// Writes matching allocated tags for a fake block at `forged` inside the
/// payload of `host`, optionally with a bogus footer before it.
fn forge_block(
  heap: &mut Heap<VecArena>,
  host: BlockPtr,
  forged: usize,
  prev_footer: Option<u32>,
) {
  let start = host.offset();
  let payload = heap.payload_mut(host).unwrap();
  let tag = tagalloc::Tag::allocated(32).pack().to_le_bytes();
  payload[forged - start - 4..forged - start].copy_from_slice(&tag);
  payload[forged - start + 24..forged - start + 28].copy_from_slice(&tag);

  if let Some(word) = prev_footer {
    payload[forged - start - 8..forged - start - 4].copy_from_slice(&word.to_le_bytes());
  }
}

#[test]
fn test_forged_blocks_rejected_by_default() {
  let mut heap = heap();
  let a = alloc(&mut heap, 256);
  let forged = a.offset() + 64;

  forge_block(&mut heap, a, forged, None);
  let ptr = BlockPtr::from_offset(forged).unwrap();

  assert_eq!(heap.free(ptr), Err(HeapError::InvalidPointer { offset: forged }));
  assert_eq!(heap.resize(Some(ptr), 100), Err(HeapError::InvalidPointer { offset: forged }));
  heap.check().unwrap();

  forge_block(&mut heap, a, forged, Some(0xFFFF_FFF0));
  assert_eq!(heap.free(ptr), Err(HeapError::InvalidPointer { offset: forged }));
  heap.check().unwrap();

  heap.free(a).unwrap();
  heap.check().unwrap();
}

#[test]
fn test_forged_block_with_wild_follower_rejected() {
  let mut heap = heap();
  let a = alloc(&mut heap, 256);
  let forged = a.offset() + 64;

  // Preceding footer points back at a real-looking block, but the block
  // after the forged one is garbage.
  forge_block(&mut heap, a, forged, None);
  let start = a.offset();
  let payload = heap.payload_mut(a).unwrap();
  let fake_prev = tagalloc::Tag::allocated(16).pack().to_le_bytes();
  payload[forged - start - 20..forged - start - 16].copy_from_slice(&fake_prev);
  payload[forged - start - 8..forged - start - 4].copy_from_slice(&fake_prev);
  payload[forged - start + 28..forged - start + 32].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

  let ptr = BlockPtr::from_offset(forged).unwrap();
  assert_eq!(heap.free(ptr), Err(HeapError::InvalidPointer { offset: forged }));
  heap.check().unwrap();
}

#[test]
fn test_independent_heaps() {
  let mut first = heap();
  let mut second = heap();

  let a = alloc(&mut first, 100);
  let b = alloc(&mut second, 100);
  first.free(a).unwrap();

  assert_eq!(a, b);
  assert_eq!(second.usable_size(b).unwrap(), 104);
  assert_eq!(first.stats().allocated_blocks, 0);
}
