//! Error types.
//!
//! Every heap error is local and recoverable: the heap stays consistent and
//! usable after any of them is returned.

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

/// Errors surfaced by [`Heap`](crate::Heap) operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HeapError {
  /// The arena refused to grow far enough to satisfy the request.
  #[error("out of memory: cannot satisfy a request of {requested} bytes")]
  OutOfMemory { requested: usize },

  /// The handle does not name a live block of this heap.
  #[error("invalid pointer: offset {offset:#x} is not a live block")]
  InvalidPointer { offset: usize },

  /// The block is already free.
  #[error("double free: block at offset {offset:#x} is already free")]
  DoubleFree { offset: usize },

  #[error("invalid configuration: {reason}")]
  InvalidConfig { reason: &'static str },
}

/// Errors reported by an [`Arena`](crate::Arena) that cannot grow.
#[derive(Debug, Error)]
pub enum ArenaError {
  #[error("arena exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("failed to reserve arena memory: {0}")]
  Reserve(#[from] TryReserveError),

  #[error("operating system refused arena memory: {0}")]
  Os(#[from] io::Error),
}
