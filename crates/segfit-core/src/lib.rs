//! # segfit-core
//!
//! A segregated-fit heap allocator over a single growable, contiguous byte
//! region. Blocks carry boundary tags (header/footer pairs), free blocks are
//! linked into 9 size-class LIFO lists through their payload words, freeing
//! coalesces with physical neighbors immediately, and allocation is
//! first-fit in ascending class order with heap growth as the fallback.
//!
//! The heap is an owned arena and every block handle is an offset into it,
//! so the whole crate is safe Rust: no `unsafe` code is permitted.
//!
//! - [`arena`]: the growable region and its `sbrk`-style growth primitive
//! - [`block`]: boundary-tag encoding and block arithmetic
//! - [`size_class`]: the fixed 9-class size partition
//! - [`free_list`]: per-class doubly-linked LIFO stacks
//! - [`allocator`]: the allocation engine (`allocate`/`release`/`resize`)
//! - [`checker`]: diagnostic full-heap invariant scanner

#![deny(unsafe_code)]

pub mod allocator;
pub mod arena;
pub mod block;
pub mod checker;
pub mod free_list;
pub mod size_class;

pub use allocator::{
    AllocEvent, AllocatorConfig, BlockInfo, EventLevel, HeapStats, SegFitAllocator,
};
pub use arena::{Arena, HeapError};
pub use checker::CheckError;
