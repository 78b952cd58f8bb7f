//! Heap consistency checker.
//!
//! A read-only scan meant for tests. It never trusts a tag or link before
//! bounds-checking it, so it can run against a corrupted arena.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::{
  arena::Arena,
  block::{self, OVERHEAD, Tag, WSIZE},
  free_list,
  heap::Heap,
};

/// The first structural invariant found broken.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Violation {
  #[error("prologue: expected {expected}, found header {header} footer {footer}")]
  BadPrologue { expected: Tag, header: Tag, footer: Tag },

  #[error("epilogue: block at {offset:#x} with tag {tag} does not end the arena of {len:#x} bytes")]
  BadEpilogue { offset: usize, tag: Tag, len: usize },

  #[error("block size: block at {offset:#x} has size {size}")]
  BadSize { offset: usize, size: usize },

  #[error("contiguity: block at {offset:#x} runs past the end of the arena")]
  Overrun { offset: usize },

  #[error("boundary tags: block at {offset:#x} has header {header} but footer {footer}")]
  TagMismatch { offset: usize, header: Tag, footer: Tag },

  #[error("coalescing: free blocks at {first:#x} and {second:#x} are adjacent")]
  Uncoalesced { first: usize, second: usize },

  #[error("free list: node {offset:#x} lies outside the heap")]
  NodeOutOfBounds { offset: usize },

  #[error("free list: node {offset:#x} is misaligned")]
  NodeMisaligned { offset: usize },

  #[error("free list: node {offset:#x} is marked allocated")]
  NodeAllocated { offset: usize },

  #[error("free list: node {offset:#x} has a stale previous link")]
  BrokenLink { offset: usize },

  #[error("free list: node {offset:#x} is visited twice")]
  Cycle { offset: usize },

  #[error("free list: node {offset:#x} is not a free block of the heap")]
  Unlisted { offset: usize },

  #[error("free list: heap scan found {scanned} free blocks, list holds {listed}")]
  CountMismatch { scanned: usize, listed: usize },
}

impl<A: Arena> Heap<A> {
  /// Verifies every structural invariant of the heap.
  pub fn check(&self) -> Result<(), Violation> {
    let free = self.check_blocks()?;
    self.check_free_list(&free)
  }

  /// Address-order scan. Returns the offsets of the free blocks it saw.
  fn check_blocks(&self) -> Result<BTreeSet<usize>, Violation> {
    let mem = self.arena.bytes();
    let len = mem.len();
    let align = self.config.alignment;
    let min = self.config.min_block_size();

    let expected = Tag::allocated(align);
    let prologue = self.prologue;
    let header = block::header(mem, prologue);
    let footer = Tag::unpack(block::read_word(mem, prologue + align - OVERHEAD));
    if header != expected || footer != expected {
      return Err(Violation::BadPrologue {
        expected,
        header,
        footer,
      });
    }

    let mut free = BTreeSet::new();
    let mut prev_free = None;
    let mut bp = prologue + align;

    loop {
      if bp > len {
        return Err(Violation::Overrun { offset: bp });
      }

      let tag = block::header(mem, bp);

      if tag.size == 0 {
        if bp != len || !tag.allocated {
          return Err(Violation::BadEpilogue { offset: bp, tag, len });
        }
        break;
      }

      if tag.size % align != 0 || tag.size < min {
        return Err(Violation::BadSize {
          offset: bp,
          size: tag.size,
        });
      }
      if tag.size > len - bp {
        return Err(Violation::Overrun { offset: bp });
      }

      let footer = block::footer(mem, bp);
      if footer != tag {
        return Err(Violation::TagMismatch {
          offset: bp,
          header: tag,
          footer,
        });
      }

      if tag.allocated {
        prev_free = None;
      } else {
        if let Some(first) = prev_free {
          return Err(Violation::Uncoalesced { first, second: bp });
        }
        prev_free = Some(bp);
        free.insert(bp);
      }

      bp += tag.size;
    }

    Ok(free)
  }

  /// Walks the free list and matches it against the address-order scan.
  fn check_free_list(
    &self,
    free: &BTreeSet<usize>,
  ) -> Result<(), Violation> {
    let mem = self.arena.bytes();
    let align = self.config.alignment;
    let first = self.arena.low() + self.prologue + align;
    // A node needs its header, both links and its footer inside the arena.
    let end = self.arena.high().map_or(0, |high| high + 1);
    let limit = end.saturating_sub(self.config.min_block_size() - WSIZE);

    let mut seen = BTreeSet::new();
    let mut prev = None;
    let mut node = self.free.head();

    while let Some(bp) = node {
      if bp < first || bp > limit {
        return Err(Violation::NodeOutOfBounds { offset: bp });
      }
      if bp % align != 0 {
        return Err(Violation::NodeMisaligned { offset: bp });
      }
      if block::header(mem, bp).allocated {
        return Err(Violation::NodeAllocated { offset: bp });
      }
      if !seen.insert(bp) {
        return Err(Violation::Cycle { offset: bp });
      }
      if free_list::prev_free(mem, bp) != prev {
        return Err(Violation::BrokenLink { offset: bp });
      }
      if !free.contains(&bp) {
        return Err(Violation::Unlisted { offset: bp });
      }

      prev = Some(bp);
      node = free_list::next_free(mem, bp);
    }

    if seen.len() != free.len() {
      return Err(Violation::CountMismatch {
        scanned: free.len(),
        listed: seen.len(),
      });
    }

    Ok(())
  }
}
