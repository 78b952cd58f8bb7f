//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate provides an **explicit free-list allocator** that manages one
//! contiguous, growable byte arena. It implements `allocate`, `free` and
//! `resize` on top of nothing but a primitive that appends bytes to the
//! arena, the way `malloc` sits on top of `sbrk(2)`.
//!
//! ## Overview
//!
//! ```text
//!   Arena layout:
//!
//!   ┌─────┬──────────┬────────────┬──────────┬────────────┬─────┬──────────┐
//!   │ pad │ prologue │ allocated  │   free   │ allocated  │ ... │ epilogue │
//!   │     │  8 / A   │   block    │  block   │   block    │     │  header  │
//!   └─────┴──────────┴────────────┴──────────┴────────────┴─────┴──────────┘
//!   ▲                                   │                            ▲
//!   offset 0                            │                            arena end
//!                                       ▼
//!                          free list head (LIFO, doubly linked)
//! ```
//!
//! Every block carries a header and a footer tag holding its size and an
//! allocated flag, so both neighbors of a block can be found in O(1) and
//! adjacent free blocks are merged as soon as they appear. Free blocks are
//! threaded onto a doubly linked list through their own payloads and
//! searched first-fit.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macro (align!)
//!   ├── arena      - Arena trait, VecArena, MmapArena
//!   ├── block      - Boundary tags and block geometry
//!   ├── check      - Consistency checker
//!   ├── config     - HeapConfig
//!   ├── error      - HeapError, ArenaError
//!   ├── free_list  - Explicit free list (internal)
//!   └── heap       - Heap: allocate, free, resize
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, VecArena};
//!
//! let mut heap = Heap::new(VecArena::new()).unwrap();
//!
//! let ptr = heap.allocate(12).unwrap().unwrap();
//! heap.payload_mut(ptr).unwrap()[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.resize(Some(ptr), 64).unwrap().unwrap();
//! assert_eq!(&heap.payload(ptr).unwrap()[..5], b"hello");
//!
//! heap.free(ptr).unwrap();
//! assert!(heap.check().is_ok());
//! ```
//!
//! ## How It Works
//!
//! A request for `n` bytes becomes a block of `max(2A, align(n + 8, A))`
//! bytes, `A` being the configured alignment:
//!
//! ```text
//!   Allocated block:
//!   ┌──────────┬────────────────────────────────────┬──────────┐
//!   │  header  │              payload               │  footer  │
//!   │ size | 1 │          (n bytes or more)         │ size | 1 │
//!   └──────────┴────────────────────────────────────┴──────────┘
//!              ▲
//!              └── BlockPtr handed to the caller
//!
//!   Free block:
//!   ┌──────────┬───────────┬───────────┬────────────┬──────────┐
//!   │  header  │ prev free │ next free │   unused   │  footer  │
//!   │ size | 0 │  offset   │  offset   │            │ size | 0 │
//!   └──────────┴───────────┴───────────┴────────────┴──────────┘
//! ```
//!
//! When no free block fits, the arena grows by at least one chunk. The old
//! epilogue header becomes the header of the new free block, which is then
//! merged with a free block ending at the old epilogue.
//!
//! Handles are offsets into the arena rather than raw pointers, so an arena
//! may move its storage as it grows. [`MmapArena`] never moves and gives
//! page-aligned payload addresses.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a `Heap` needs `&mut self` for every change
//! - **Never shrinks**: freed memory is reused but not returned to the arena
//! - **4 GiB ceiling**: sizes and links are stored in 32-bit words

pub mod align;
mod arena;
mod block;
mod check;
mod config;
mod error;
mod free_list;
mod heap;

#[cfg(unix)]
pub use arena::MmapArena;
pub use arena::{Arena, VecArena};
pub use block::{BlockPtr, MAX_ARENA_BYTES, Tag};
pub use check::Violation;
pub use config::{DEFAULT_ALIGNMENT, DEFAULT_CHUNK_SIZE, HeapConfig};
pub use error::{ArenaError, HeapError};
pub use heap::{BlockInfo, Blocks, Heap, HeapStats};
