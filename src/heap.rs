use tracing::{debug, trace, warn};

use crate::{
  align,
  arena::{Arena, VecArena},
  block::{self, BlockPtr, MAX_ARENA_BYTES, OVERHEAD, Tag, WSIZE},
  config::HeapConfig,
  error::HeapError,
  free_list::FreeList,
};

/// An explicit free-list allocator over one growable arena.
///
/// The heap owns its arena, free-list head and configuration, so independent
/// heaps never share state. All operations run to completion on the calling
/// thread.
pub struct Heap<A: Arena = VecArena> {
  pub(crate) arena: A,
  pub(crate) config: HeapConfig,
  pub(crate) free: FreeList,
  /// Payload offset of the prologue block.
  pub(crate) prologue: usize,
  extensions: usize,
}

/// A block as seen by an address-order walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub ptr: BlockPtr,
  /// Total size including both tags.
  pub size: usize,
  pub allocated: bool,
}

/// A snapshot of how the arena is carved up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub arena_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  /// Number of times the heap asked its arena for a new chunk.
  pub extensions: usize,
}

impl Heap<VecArena> {
  /// A heap over an unbounded [`VecArena`] with the default configuration.
  pub fn with_vec_arena() -> Result<Self, HeapError> {
    Self::new(VecArena::new())
  }
}

impl<A: Arena> Heap<A> {
  pub fn new(arena: A) -> Result<Self, HeapError> {
    Self::with_config(arena, HeapConfig::default())
  }

  /// Lays down the padding, prologue and epilogue in an empty arena.
  pub fn with_config(
    mut arena: A,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    config.validate()?;

    if !arena.is_empty() {
      return Err(HeapError::InvalidConfig {
        reason: "arena must be empty",
      });
    }

    let align = config.alignment;
    let initial = 2 * align;
    let base = arena.grow(initial).map_err(|err| {
      warn!(error = %err, bytes = initial, "arena refused initial sentinels");
      HeapError::OutOfMemory { requested: initial }
    })?;

    if base != 0 {
      return Err(HeapError::InvalidConfig {
        reason: "arena must start at offset zero",
      });
    }

    let prologue = align;
    let mem = arena.bytes_mut();
    mem[..initial].fill(0);
    block::set_tags(mem, prologue, Tag::allocated(align));
    block::write_word(mem, initial - WSIZE, Tag::EPILOGUE.pack());

    debug!(alignment = align, chunk = config.chunk_size, "heap initialized");

    Ok(Self {
      arena,
      config,
      free: FreeList::new(),
      prologue,
      extensions: 0,
    })
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  /// Allocates a block whose payload holds at least `size` bytes.
  ///
  /// Returns `Ok(None)` for a zero-sized request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<BlockPtr>, HeapError> {
    if size == 0 {
      return Ok(None);
    }

    let asize = self.adjust(size)?;
    let bp = self.malloc(asize)?;

    trace!(size, asize, offset = bp, "allocate");

    Ok(Some(BlockPtr::new(bp)))
  }

  /// Releases a block and merges it with free neighbors.
  pub fn free(
    &mut self,
    ptr: BlockPtr,
  ) -> Result<(), HeapError> {
    let bp = self.live_block(ptr)?;

    self.release(bp);

    trace!(offset = bp, "free");

    Ok(())
  }

  /// Changes the payload size of a block, moving it only when the space
  /// after it cannot absorb the growth.
  ///
  /// `resize(None, n)` allocates and `resize(Some(ptr), 0)` frees.
  pub fn resize(
    &mut self,
    ptr: Option<BlockPtr>,
    size: usize,
  ) -> Result<Option<BlockPtr>, HeapError> {
    let Some(ptr) = ptr else {
      return self.allocate(size);
    };

    if size == 0 {
      self.free(ptr)?;
      return Ok(None);
    }

    let bp = self.live_block(ptr).map_err(|err| match err {
      HeapError::DoubleFree { offset } => HeapError::InvalidPointer { offset },
      err => err,
    })?;
    let asize = self.adjust(size)?;
    let old = block::header(self.arena.bytes(), bp).size;

    if asize <= old {
      self.shrink(bp, old, asize);
      trace!(offset = bp, old, asize, "resize in place");
      return Ok(Some(ptr));
    }

    if self.grow_in_place(bp, old, asize) {
      debug!(offset = bp, old, asize, "resize absorbed following free space");
      return Ok(Some(ptr));
    }

    let new = self.malloc(asize)?;
    let len = size.min(old - OVERHEAD);
    self.arena.bytes_mut().copy_within(bp..bp + len, new);
    self.release(bp);

    trace!(from = bp, to = new, copied = len, "resize moved block");

    Ok(Some(BlockPtr::new(new)))
  }

  /// Usable payload bytes of a live block.
  pub fn usable_size(
    &self,
    ptr: BlockPtr,
  ) -> Result<usize, HeapError> {
    let bp = self.live_payload(ptr)?;
    Ok(block::header(self.arena.bytes(), bp).size - OVERHEAD)
  }

  pub fn payload(
    &self,
    ptr: BlockPtr,
  ) -> Result<&[u8], HeapError> {
    let bp = self.live_payload(ptr)?;
    let size = block::header(self.arena.bytes(), bp).size;
    Ok(&self.arena.bytes()[bp..bp + size - OVERHEAD])
  }

  pub fn payload_mut(
    &mut self,
    ptr: BlockPtr,
  ) -> Result<&mut [u8], HeapError> {
    let bp = self.live_payload(ptr)?;
    let size = block::header(self.arena.bytes(), bp).size;
    Ok(&mut self.arena.bytes_mut()[bp..bp + size - OVERHEAD])
  }

  /// Absolute address of a payload at this moment. Only stable for arenas
  /// whose base never moves.
  pub fn address(
    &self,
    ptr: BlockPtr,
  ) -> usize {
    self.arena.base() as usize + ptr.offset()
  }

  /// Every block between the sentinels, in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      mem: self.arena.bytes(),
      bp: self.prologue + self.config.alignment,
    }
  }

  /// Free blocks in list order, most recently inserted first.
  pub fn free_blocks(&self) -> impl Iterator<Item = BlockPtr> + '_ {
    self.free.iter(self.arena.bytes()).map(BlockPtr::new)
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      arena_bytes: self.arena.len(),
      extensions: self.extensions,
      ..HeapStats::default()
    };

    for info in self.blocks() {
      if info.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += info.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += info.size;
      }
    }

    stats
  }

  /// Block size for a payload of `size` bytes.
  fn adjust(
    &self,
    size: usize,
  ) -> Result<usize, HeapError> {
    if size > MAX_ARENA_BYTES - OVERHEAD - self.config.alignment {
      warn!(size, "request exceeds the largest possible arena");
      return Err(HeapError::OutOfMemory { requested: size });
    }

    Ok(align!(size + OVERHEAD, self.config.alignment).max(self.config.min_block_size()))
  }

  fn malloc(
    &mut self,
    asize: usize,
  ) -> Result<usize, HeapError> {
    let bp = match self.find_fit(asize) {
      Some(bp) => bp,
      None => self.extend(asize.max(self.config.chunk_bytes()))?,
    };

    self.place(bp, asize);

    Ok(bp)
  }

  /// First fit in free-list order.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    let mem = self.arena.bytes();
    self.free.iter(mem).find(|&bp| block::header(mem, bp).size >= asize)
  }

  /// Marks `asize` bytes of the free block at `bp` allocated, splitting off
  /// the tail when it can stand as a block of its own.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let min = self.config.min_block_size();
    let mem = self.arena.bytes_mut();
    let csize = block::header(mem, bp).size;

    self.free.remove(mem, bp);

    if csize - asize >= min {
      block::set_tags(mem, bp, Tag::allocated(asize));
      let rest = bp + asize;
      block::set_tags(mem, rest, Tag::free(csize - asize));
      self.free.insert(mem, rest);
    } else {
      block::set_tags(mem, bp, Tag::allocated(csize));
    }
  }

  /// Grows the arena by at least `bytes` and returns the resulting free
  /// block, already merged with a free block that ended at the old epilogue.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, HeapError> {
    let size = align!(bytes, self.config.alignment);

    if size > MAX_ARENA_BYTES - self.arena.len() {
      warn!(bytes = size, arena = self.arena.len(), "heap would exceed the largest arena");
      return Err(HeapError::OutOfMemory { requested: size });
    }

    let bp = self.arena.grow(size).map_err(|err| {
      warn!(error = %err, bytes = size, "arena refused to grow");
      HeapError::OutOfMemory { requested: size }
    })?;

    // The old epilogue header becomes the new block's header.
    let mem = self.arena.bytes_mut();
    block::set_tags(mem, bp, Tag::free(size));
    block::write_word(mem, bp + size - WSIZE, Tag::EPILOGUE.pack());

    self.extensions += 1;
    debug!(offset = bp, bytes = size, arena = self.arena.len(), "extended heap");

    Ok(self.coalesce(bp))
  }

  fn release(
    &mut self,
    bp: usize,
  ) {
    let mem = self.arena.bytes_mut();
    let size = block::header(mem, bp).size;
    block::set_tags(mem, bp, Tag::free(size));
    self.coalesce(bp);
  }

  /// Free blocks immediately before and after `bp` in address order. The
  /// sentinels are allocated, so neither side ever leaves the heap.
  pub(crate) fn neighbors(
    &self,
    bp: usize,
  ) -> (Option<usize>, Option<usize>) {
    let mem = self.arena.bytes();
    let prev = block::prev(mem, bp);
    let next = block::next(mem, bp);

    (
      (!block::header(mem, prev).allocated).then_some(prev),
      (!block::header(mem, next).allocated).then_some(next),
    )
  }

  /// Merges the free block at `bp` with its free neighbors and links the
  /// result at the head of the free list.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let (prev, next) = self.neighbors(bp);
    let mem = self.arena.bytes_mut();
    let mut start = bp;
    let mut size = block::header(mem, bp).size;

    if let Some(next) = next {
      size += block::header(mem, next).size;
      self.free.remove(mem, next);
    }

    if let Some(prev) = prev {
      size += block::header(mem, prev).size;
      self.free.remove(mem, prev);
      start = prev;
    }

    block::set_tags(mem, start, Tag::free(size));
    self.free.insert(mem, start);

    start
  }

  fn shrink(
    &mut self,
    bp: usize,
    old: usize,
    asize: usize,
  ) {
    if old - asize < self.config.min_block_size() {
      return;
    }

    let mem = self.arena.bytes_mut();
    block::set_tags(mem, bp, Tag::allocated(asize));
    block::set_tags(mem, bp + asize, Tag::free(old - asize));
    self.coalesce(bp + asize);
  }

  /// Absorbs the free blocks following `bp` if together they reach `asize`.
  /// Leaves everything untouched otherwise.
  fn grow_in_place(
    &mut self,
    bp: usize,
    old: usize,
    asize: usize,
  ) -> bool {
    let mem = self.arena.bytes();
    let mut total = old;

    while total < asize {
      let tag = block::header(mem, bp + total);
      if tag.allocated {
        return false;
      }
      total += tag.size;
    }

    let mem = self.arena.bytes_mut();
    let mut cursor = bp + old;

    while cursor < bp + total {
      let size = block::header(mem, cursor).size;
      self.free.remove(mem, cursor);
      cursor += size;
    }

    if total - asize >= self.config.min_block_size() {
      block::set_tags(mem, bp, Tag::allocated(asize));
      block::set_tags(mem, bp + asize, Tag::free(total - asize));
      self.coalesce(bp + asize);
    } else {
      block::set_tags(mem, bp, Tag::allocated(total));
    }

    true
  }

  /// Validates a handle handed back by a caller. Nothing is mutated until
  /// this succeeds.
  fn live_block(
    &self,
    ptr: BlockPtr,
  ) -> Result<usize, HeapError> {
    let bp = ptr.offset();
    let invalid = HeapError::InvalidPointer { offset: bp };
    let mem = self.arena.bytes();
    let align = self.config.alignment;

    // The epilogue payload sits exactly at the end of the arena.
    let first = self.prologue + align;
    if bp % align != 0 || bp < first || bp >= mem.len() {
      warn!(offset = bp, "pointer outside the heap");
      return Err(invalid);
    }

    let tag = block::header(mem, bp);
    if !self.plausible_size(tag.size, mem.len() - bp) {
      warn!(offset = bp, tag = %tag, "pointer does not start a block");
      return Err(invalid);
    }

    if !tag.allocated {
      warn!(offset = bp, "block is already free");
      return Err(HeapError::DoubleFree { offset: bp });
    }

    if block::footer(mem, bp) != tag {
      warn!(offset = bp, tag = %tag, "header and footer disagree");
      return Err(invalid);
    }

    if !self.neighbors_intact(mem, bp, tag.size) {
      warn!(offset = bp, tag = %tag, "pointer is not between two blocks");
      return Err(invalid);
    }

    if self.config.strict_checks && !self.blocks().any(|info| info.ptr == ptr) {
      warn!(offset = bp, "pointer is not a block boundary");
      return Err(invalid);
    }

    Ok(bp)
  }

  /// O(1) sanity check of the tags `coalesce` will read around `bp`.
  fn neighbors_intact(
    &self,
    mem: &[u8],
    bp: usize,
    size: usize,
  ) -> bool {
    let align = self.config.alignment;
    let first = self.prologue + align;

    let prev = Tag::unpack(block::read_word(mem, bp - OVERHEAD));
    let prev_ok = if bp == first {
      prev == Tag::allocated(align)
    } else {
      self.plausible_size(prev.size, bp - first) && block::header(mem, bp - prev.size) == prev
    };

    let next = bp + size;
    let next_ok = if next == mem.len() {
      block::header(mem, next) == Tag::EPILOGUE
    } else {
      let tag = block::header(mem, next);
      self.plausible_size(tag.size, mem.len() - next) && block::footer(mem, next) == tag
    };

    prev_ok && next_ok
  }

  fn plausible_size(
    &self,
    size: usize,
    room: usize,
  ) -> bool {
    size >= self.config.min_block_size() && size % self.config.alignment == 0 && size <= room
  }

  /// Like `live_block`, for read-only accessors that never free.
  fn live_payload(
    &self,
    ptr: BlockPtr,
  ) -> Result<usize, HeapError> {
    self.live_block(ptr).map_err(|err| match err {
      HeapError::DoubleFree { offset } => HeapError::InvalidPointer { offset },
      err => err,
    })
  }
}

/// Address-order iterator over the blocks of a heap.
pub struct Blocks<'a> {
  mem: &'a [u8],
  bp: usize,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.bp > self.mem.len() {
      return None;
    }

    let tag = block::header(self.mem, self.bp);
    if tag.size == 0 || tag.size > self.mem.len() - self.bp {
      return None;
    }

    let info = BlockInfo {
      ptr: BlockPtr::new(self.bp),
      size: tag.size,
      allocated: tag.allocated,
    };
    self.bp += tag.size;

    Some(info)
  }
}
