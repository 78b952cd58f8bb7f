use crate::{
  align,
  block::{MAX_ALIGNMENT, MAX_ARENA_BYTES},
  error::HeapError,
};

/// Payload alignment. Also the granularity of every block size.
pub const DEFAULT_ALIGNMENT: usize = 8;
/// Minimum number of bytes requested from the arena when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Settings carried by a [`Heap`](crate::Heap) for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Power of two between 8 and 4096.
  pub alignment: usize,
  /// Growth granularity. Rounded up to `alignment`.
  pub chunk_size: usize,
  /// Re-derive block membership with a full heap walk before `free` and
  /// `resize` trust a handle. Makes those operations O(blocks).
  pub strict_checks: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      alignment: DEFAULT_ALIGNMENT,
      chunk_size: DEFAULT_CHUNK_SIZE,
      strict_checks: false,
    }
  }
}

impl HeapConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_alignment(
    mut self,
    alignment: usize,
  ) -> Self {
    self.alignment = alignment;
    self
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_strict_checks(
    mut self,
    strict_checks: bool,
  ) -> Self {
    self.strict_checks = strict_checks;
    self
  }

  /// Smallest block that can hold both tags and both free-list links.
  pub fn min_block_size(&self) -> usize {
    2 * self.alignment
  }

  pub fn validate(&self) -> Result<(), HeapError> {
    if !self.alignment.is_power_of_two() {
      return Err(HeapError::InvalidConfig {
        reason: "alignment must be a power of two",
      });
    }
    if !(DEFAULT_ALIGNMENT..=MAX_ALIGNMENT).contains(&self.alignment) {
      return Err(HeapError::InvalidConfig {
        reason: "alignment must be between 8 and 4096 bytes",
      });
    }
    if self.chunk_size == 0 || self.chunk_size > MAX_ARENA_BYTES {
      return Err(HeapError::InvalidConfig {
        reason: "chunk size must be non-zero and fit the arena",
      });
    }
    Ok(())
  }

  /// Chunk size rounded to the alignment. Only meaningful once validated.
  pub(crate) fn chunk_bytes(&self) -> usize {
    align!(self.chunk_size, self.alignment)
  }
}
