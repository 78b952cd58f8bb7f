//! Explicit free list.
//!
//! A doubly linked LIFO list threaded through the payloads of free blocks.
//! Links are arena offsets stored as words; offset zero means "none".

use crate::block::{WSIZE, read_word, write_word};

fn link(
  mem: &[u8],
  at: usize,
) -> Option<usize> {
  match read_word(mem, at) {
    0 => None,
    offset => Some(offset as usize),
  }
}

fn set_link(
  mem: &mut [u8],
  at: usize,
  to: Option<usize>,
) {
  write_word(mem, at, to.map_or(0, |offset| offset as u32));
}

pub fn prev_free(
  mem: &[u8],
  bp: usize,
) -> Option<usize> {
  link(mem, bp)
}

pub fn next_free(
  mem: &[u8],
  bp: usize,
) -> Option<usize> {
  link(mem, bp + WSIZE)
}

#[derive(Debug, Default)]
pub struct FreeList {
  head: Option<usize>,
}

impl FreeList {
  pub fn new() -> Self {
    Self { head: None }
  }

  pub fn head(&self) -> Option<usize> {
    self.head
  }

  /// Links `bp` in front of the current head.
  pub fn insert(
    &mut self,
    mem: &mut [u8],
    bp: usize,
  ) {
    set_link(mem, bp, None);
    set_link(mem, bp + WSIZE, self.head);

    if let Some(head) = self.head {
      set_link(mem, head, Some(bp));
    }

    self.head = Some(bp);
  }

  /// Splices `bp` out by relinking its neighbors.
  pub fn remove(
    &mut self,
    mem: &mut [u8],
    bp: usize,
  ) {
    let prev = prev_free(mem, bp);
    let next = next_free(mem, bp);

    match prev {
      Some(prev) => set_link(mem, prev + WSIZE, next),
      None => self.head = next,
    }

    if let Some(next) = next {
      set_link(mem, next, prev);
    }
  }

  pub fn iter<'a>(
    &self,
    mem: &'a [u8],
  ) -> Iter<'a> {
    Iter {
      mem,
      current: self.head,
    }
  }
}

/// Walks the list from the head. Assumes the links are intact.
pub struct Iter<'a> {
  mem: &'a [u8],
  current: Option<usize>,
}

impl Iterator for Iter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let bp = self.current?;
    self.current = next_free(self.mem, bp);
    Some(bp)
  }
}
