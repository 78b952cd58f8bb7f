//! Growable byte arenas a [`Heap`](crate::Heap) manages.
//!
//! An arena only ever grows at its high end, like a program break moved by
//! `sbrk(2)`. The heap addresses it by offset, so an arena is free to move
//! its storage when it grows.

use std::{io, ptr::NonNull, slice};

use crate::{align, block::MAX_ARENA_BYTES, error::ArenaError};

/// The heap-growth primitive and the bounds the consistency checker reads.
pub trait Arena {
  /// Appends `increment` bytes and returns the previous end offset. Either
  /// grants the whole increment or nothing.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, ArenaError>;

  /// Current size in bytes.
  fn len(&self) -> usize;

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Lowest addressable offset.
  fn low(&self) -> usize {
    0
  }

  /// Highest addressable offset, if any byte exists.
  fn high(&self) -> Option<usize> {
    self.len().checked_sub(1)
  }

  /// Absolute address of offset zero. May change across `grow` calls.
  fn base(&self) -> *const u8 {
    self.bytes().as_ptr()
  }
}

/// An arena backed by a `Vec<u8>`, bounded by a byte limit.
///
/// Growing may move the buffer, so absolute addresses carry no alignment
/// guarantee beyond the allocator's. Offsets are always aligned.
#[derive(Debug)]
pub struct VecArena {
  buf: Vec<u8>,
  limit: usize,
}

impl VecArena {
  pub fn new() -> Self {
    Self::with_limit(MAX_ARENA_BYTES)
  }

  pub fn with_limit(limit: usize) -> Self {
    Self {
      buf: Vec::new(),
      limit,
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Default for VecArena {
  fn default() -> Self {
    Self::new()
  }
}

impl Arena for VecArena {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, ArenaError> {
    let old = self.buf.len();
    let available = self.limit.saturating_sub(old);

    if increment > available {
      return Err(ArenaError::Exhausted {
        requested: increment,
        available,
      });
    }

    self.buf.try_reserve(increment)?;
    self.buf.resize(old + increment, 0);

    Ok(old)
  }

  fn len(&self) -> usize {
    self.buf.len()
  }

  fn bytes(&self) -> &[u8] {
    &self.buf
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf
  }
}

/// An arena carved out of one anonymous mapping.
///
/// The whole limit is reserved up front with no access rights and pages are
/// committed with `mprotect(2)` as the break moves, so the base never moves
/// and is page aligned.
#[cfg(unix)]
#[derive(Debug)]
pub struct MmapArena {
  base: NonNull<u8>,
  reserved: usize,
  committed: usize,
  len: usize,
}

// SAFETY: the mapping is owned exclusively by this value.
#[cfg(unix)]
unsafe impl Send for MmapArena {}

#[cfg(unix)]
impl MmapArena {
  /// Reserves address space for up to `limit` bytes.
  pub fn reserve(limit: usize) -> Result<Self, ArenaError> {
    let reserved = align!(limit.clamp(1, MAX_ARENA_BYTES), page_size());

    // SAFETY: anonymous private mapping with no address hint; the result is
    // checked against MAP_FAILED before use.
    let addr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        reserved,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(io::Error::last_os_error().into());
    }

    let base = NonNull::new(addr as *mut u8)
      .ok_or_else(|| ArenaError::Os(io::Error::other("mmap returned null")))?;

    Ok(Self {
      base,
      reserved,
      committed: 0,
      len: 0,
    })
  }

  pub fn reserved(&self) -> usize {
    self.reserved
  }
}

#[cfg(unix)]
impl Arena for MmapArena {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<usize, ArenaError> {
    let old = self.len;
    let available = self.reserved - old;

    if increment > available {
      return Err(ArenaError::Exhausted {
        requested: increment,
        available,
      });
    }

    let end = old + increment;

    if end > self.committed {
      let target = align!(end, page_size()).min(self.reserved);

      // SAFETY: [committed, target) lies inside the reservation.
      let rc = unsafe {
        libc::mprotect(
          self.base.as_ptr().add(self.committed) as *mut libc::c_void,
          target - self.committed,
          libc::PROT_READ | libc::PROT_WRITE,
        )
      };

      if rc != 0 {
        return Err(io::Error::last_os_error().into());
      }

      self.committed = target;
    }

    self.len = end;

    Ok(old)
  }

  fn len(&self) -> usize {
    self.len
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: the first `len` bytes are committed, readable and zero-filled
    // by the kernel on first touch.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
  }
}

#[cfg(unix)]
impl Drop for MmapArena {
  fn drop(&mut self) {
    // SAFETY: unmapping exactly the reservation made in `reserve`.
    unsafe {
      libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.reserved);
    }
  }
}

#[cfg(unix)]
fn page_size() -> usize {
  // SAFETY: sysconf has no memory-safety preconditions.
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if size > 0 { size as usize } else { 4096 }
}
