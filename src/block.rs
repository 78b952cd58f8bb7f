//! Binary block layout.
//!
//! ```text
//!   Allocated block:              Free block:
//!   ┌────────────┐ bp - 4         ┌────────────┐ bp - 4
//!   │ header tag │                │ header tag │
//!   ├────────────┤ bp             ├────────────┤ bp
//!   │            │                │ prev free  │
//!   │  payload   │                ├────────────┤ bp + 4
//!   │            │                │ next free  │
//!   │            │                ├────────────┤
//!   │            │                │   unused   │
//!   ├────────────┤ bp + size - 8  ├────────────┤ bp + size - 8
//!   │ footer tag │                │ footer tag │
//!   └────────────┘                └────────────┘
//! ```
//!
//! Blocks are addressed by `bp`, the arena offset of their payload. Tags are
//! little-endian 32-bit words packing `size | allocated`.

use std::fmt;

/// Size of a tag or free-list link word.
pub const WSIZE: usize = 4;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WSIZE;

/// Largest alignment a heap can be configured with.
pub const MAX_ALIGNMENT: usize = 4096;

/// Largest arena a heap will grow to. Sizes and links must fit in a word.
pub const MAX_ARENA_BYTES: usize = u32::MAX as usize & !(MAX_ALIGNMENT - 1);

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// The decoded form of a boundary tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  pub const EPILOGUE: Tag = Tag {
    size: 0,
    allocated: true,
  };

  pub fn free(size: usize) -> Self {
    Self {
      size,
      allocated: false,
    }
  }

  pub fn allocated(size: usize) -> Self {
    Self {
      size,
      allocated: true,
    }
  }

  pub fn pack(self) -> u32 {
    debug_assert!(self.size <= MAX_ARENA_BYTES && self.size & 0x7 == 0);
    self.size as u32 | if self.allocated { ALLOC_BIT } else { 0 }
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOC_BIT == ALLOC_BIT,
    }
  }
}

impl fmt::Display for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let state = if self.allocated { "allocated" } else { "free" };
    write!(f, "{}/{}", self.size, state)
  }
}

/// Handle to an allocated payload, expressed as an offset into the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(u32);

impl BlockPtr {
  pub(crate) fn new(bp: usize) -> Self {
    debug_assert!(bp != 0 && bp <= MAX_ARENA_BYTES);
    Self(bp as u32)
  }

  /// Rebuilds a handle from a raw offset. Offset zero is never a payload.
  pub fn from_offset(offset: usize) -> Option<Self> {
    u32::try_from(offset).ok().filter(|&o| o != 0).map(Self)
  }

  pub fn offset(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for BlockPtr {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

pub fn read_word(
  mem: &[u8],
  at: usize,
) -> u32 {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&mem[at..at + WSIZE]);
  u32::from_le_bytes(word)
}

pub fn write_word(
  mem: &mut [u8],
  at: usize,
  value: u32,
) {
  mem[at..at + WSIZE].copy_from_slice(&value.to_le_bytes());
}

pub fn header(
  mem: &[u8],
  bp: usize,
) -> Tag {
  Tag::unpack(read_word(mem, bp - WSIZE))
}

/// Reads the footer using the size recorded in the header.
pub fn footer(
  mem: &[u8],
  bp: usize,
) -> Tag {
  let size = header(mem, bp).size;
  Tag::unpack(read_word(mem, bp + size - OVERHEAD))
}

/// Writes both boundary tags of the block at `bp`.
pub fn set_tags(
  mem: &mut [u8],
  bp: usize,
  tag: Tag,
) {
  let packed = tag.pack();
  write_word(mem, bp - WSIZE, packed);
  write_word(mem, bp + tag.size - OVERHEAD, packed);
}

pub fn next(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp + header(mem, bp).size
}

/// Walks backwards through the preceding block's footer.
pub fn prev(
  mem: &[u8],
  bp: usize,
) -> usize {
  bp - Tag::unpack(read_word(mem, bp - OVERHEAD)).size
}
