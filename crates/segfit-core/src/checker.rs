//! Heap consistency checker.
//!
//! Diagnostic full-heap scanner for test and debug builds. Walks the heap by
//! boundary tags and every free list by links, and reports the first
//! violated invariant as a typed error. The checker never repairs anything.

use thiserror::Error;

use crate::allocator::SegFitAllocator;
use crate::block::{self, ALIGNMENT, DSIZE, MIN_BLOCK, WSIZE};
use crate::size_class::{self, NUM_CLASSES};

/// First violated heap invariant found by [`SegFitAllocator::check`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// A block's header and footer disagree.
    #[error("block {block}: header {header_size}/{header_allocated} disagrees with footer {footer_size}/{footer_allocated}")]
    TagMismatch {
        block: usize,
        header_size: usize,
        header_allocated: bool,
        footer_size: usize,
        footer_allocated: bool,
    },
    /// A block's size is not a multiple of the alignment.
    #[error("block {block}: size {size} is not {ALIGNMENT}-byte aligned")]
    MisalignedSize { block: usize, size: usize },
    /// A block is smaller than the minimum block size.
    #[error("block {block}: size {size} is below the {MIN_BLOCK}-byte minimum")]
    UndersizedBlock { block: usize, size: usize },
    /// A block extends past the end of the region.
    #[error("block {block}: size {size} runs past the heap end {heap_end}")]
    OutOfBounds {
        block: usize,
        size: usize,
        heap_end: usize,
    },
    /// The heap walk did not terminate on a zero-size allocated epilogue in
    /// the last word of the region.
    #[error("heap walk ended at {at} without finding the epilogue sentinel")]
    EpilogueMissing { at: usize },
    /// Two physically adjacent blocks are both free.
    #[error("adjacent free blocks at {first} and {second} escaped coalescing")]
    AdjacentFree { first: usize, second: usize },
    /// A free list links a block whose tag says allocated.
    #[error("free list {class} holds block {block} marked allocated")]
    AllocatedInFreeList { class: usize, block: usize },
    /// A free list links a block whose size belongs to another class.
    #[error("free list {class} holds block {block} of size {size}, which belongs to class {expected}")]
    WrongClass {
        class: usize,
        block: usize,
        size: usize,
        expected: usize,
    },
    /// A pred/succ link points outside the heap or at a misaligned offset.
    #[error("free list {class}: link from {block} targets invalid offset {target}")]
    InvalidLink {
        class: usize,
        block: usize,
        target: usize,
    },
    /// A block's successor does not link back to it.
    #[error("free list {class}: {block} and its successor {successor} are not mutually linked")]
    BrokenBackLink {
        class: usize,
        block: usize,
        successor: usize,
    },
    /// A free list loops or holds more blocks than the heap does.
    #[error("free list {class} does not terminate")]
    UnterminatedList { class: usize },
    /// The physical scan and the list scan disagree on free-block counts.
    #[error("heap scan found {heap_count} free blocks but the lists hold {list_count}")]
    CountMismatch {
        heap_count: usize,
        list_count: usize,
    },
}

impl SegFitAllocator {
    /// Scans the whole heap and all free lists, returning the first violated
    /// invariant. Intended for tests and debugging, not production paths.
    pub fn check(&self) -> Result<(), CheckError> {
        let heap_free = self.check_physical_walk()?;
        let list_total = self.check_lists(heap_free)?;
        if heap_free != list_total {
            return Err(CheckError::CountMismatch {
                heap_count: heap_free,
                list_count: list_total,
            });
        }
        Ok(())
    }

    /// Convenience wrapper: `true` when [`check`](SegFitAllocator::check)
    /// finds no violation.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.check().is_ok()
    }

    // Walks blocks by size arithmetic from the prologue to the epilogue.
    // Returns the number of free blocks. Walk termination exactly on the
    // last word subsumes the no-overlap property: block ranges tile the
    // region with no gaps and no intersections.
    fn check_physical_walk(&self) -> Result<usize, CheckError> {
        let heap_end = self.arena.len();
        let mut bp = self.base;
        let mut free_count = 0;
        let mut prev_free: Option<usize> = None;

        loop {
            let header = block::header(&self.arena, bp);
            if header.size == 0 {
                // Epilogue: must be allocated and sit in the final word.
                if !header.allocated || block::header_at(bp) != heap_end - WSIZE {
                    return Err(CheckError::EpilogueMissing { at: bp });
                }
                return Ok(free_count);
            }
            if header.size % ALIGNMENT != 0 {
                return Err(CheckError::MisalignedSize {
                    block: bp,
                    size: header.size,
                });
            }
            if bp != self.base && header.size < MIN_BLOCK {
                return Err(CheckError::UndersizedBlock {
                    block: bp,
                    size: header.size,
                });
            }
            if bp + header.size > heap_end {
                return Err(CheckError::OutOfBounds {
                    block: bp,
                    size: header.size,
                    heap_end,
                });
            }
            let footer = block::footer(&self.arena, bp);
            if footer != header {
                return Err(CheckError::TagMismatch {
                    block: bp,
                    header_size: header.size,
                    header_allocated: header.allocated,
                    footer_size: footer.size,
                    footer_allocated: footer.allocated,
                });
            }
            if !header.allocated {
                if let Some(first) = prev_free {
                    return Err(CheckError::AdjacentFree { first, second: bp });
                }
                free_count += 1;
                prev_free = Some(bp);
            } else {
                prev_free = None;
            }
            bp += header.size;
        }
    }

    // Walks every free list by links, validating membership, class fit, and
    // link symmetry. `heap_free` bounds traversal so a corrupt cycle cannot
    // hang the checker. Returns the total linked block count.
    fn check_lists(&self, heap_free: usize) -> Result<usize, CheckError> {
        let heap_end = self.arena.len();
        let first_block = self.base + DSIZE;
        let mut total = 0;

        for class in 0..NUM_CLASSES {
            let mut seen = 0;
            let mut cursor = self.lists.head(class);
            let mut prev: Option<usize> = None;

            while let Some(bp) = cursor {
                if bp % ALIGNMENT != 0 || bp < first_block || bp + DSIZE > heap_end {
                    return Err(CheckError::InvalidLink {
                        class,
                        block: prev.unwrap_or(bp),
                        target: bp,
                    });
                }
                let header = block::header(&self.arena, bp);
                if header.allocated {
                    return Err(CheckError::AllocatedInFreeList { class, block: bp });
                }
                let expected = size_class::class_for(header.size);
                if expected != class {
                    return Err(CheckError::WrongClass {
                        class,
                        block: bp,
                        size: header.size,
                        expected,
                    });
                }
                seen += 1;
                if seen > heap_free {
                    return Err(CheckError::UnterminatedList { class });
                }
                if let Some(next) = self.lists.successor(&self.arena, bp) {
                    if block::pred_link(&self.arena, next) != bp as u32 {
                        return Err(CheckError::BrokenBackLink {
                            class,
                            block: bp,
                            successor: next,
                        });
                    }
                }
                prev = Some(bp);
                cursor = self.lists.successor(&self.arena, bp);
            }
            total += seen;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SegFitAllocator;
    use crate::block::Tag;

    fn allocator_with_layout() -> (SegFitAllocator, usize) {
        let mut a = SegFitAllocator::new().unwrap();
        let bp = a.allocate(100).unwrap();
        let other = a.allocate(200).unwrap();
        a.release(other);
        (a, bp)
    }

    #[test]
    fn test_clean_heap_passes() {
        let (a, _) = allocator_with_layout();
        assert_eq!(a.check(), Ok(()));
        assert!(a.is_consistent());
    }

    #[test]
    fn test_detects_tag_mismatch() {
        let (mut a, bp) = allocator_with_layout();
        // Corrupt the footer's size field only.
        let footer_at = block::footer_at(&a.arena, bp);
        let tag = Tag {
            size: block::block_size(&a.arena, bp) + 8,
            allocated: true,
        };
        a.arena.write_word(footer_at, tag.encode());
        assert!(matches!(a.check(), Err(CheckError::TagMismatch { block, .. }) if block == bp));
    }

    #[test]
    fn test_detects_adjacent_free_blocks() {
        let (mut a, bp) = allocator_with_layout();
        // Flip the allocated bit without going through release, so no
        // coalescing happens and the neighbor stays free.
        let size = block::block_size(&a.arena, bp);
        block::write_tags(&mut a.arena, bp, size, false);
        a.lists.insert(&mut a.arena, bp);
        assert!(matches!(a.check(), Err(CheckError::AdjacentFree { .. })));
    }

    #[test]
    fn test_detects_allocated_block_in_free_list() {
        let (mut a, bp) = allocator_with_layout();
        // Link a live block without clearing its allocated bit. The list
        // insert classifies by size, so corrupt the list directly.
        let size = block::block_size(&a.arena, bp);
        block::write_tags(&mut a.arena, bp, size, false);
        a.lists.insert(&mut a.arena, bp);
        block::write_tags(&mut a.arena, bp, size, true);
        assert!(matches!(
            a.check(),
            Err(CheckError::AllocatedInFreeList { block, .. }) if block == bp
        ));
    }

    #[test]
    fn test_detects_free_block_missing_from_lists() {
        let mut a = SegFitAllocator::new().unwrap();
        let x = a.allocate(24).unwrap();
        let _y = a.allocate(24).unwrap();
        // Mark `x` free but never link it: both physical neighbors stay
        // allocated, so the scan sees one more free block than the lists.
        let size = block::block_size(&a.arena, x);
        block::write_tags(&mut a.arena, x, size, false);
        assert!(matches!(a.check(), Err(CheckError::CountMismatch { .. })));
    }

    #[test]
    fn test_detects_clobbered_epilogue() {
        let (mut a, _) = allocator_with_layout();
        let end = a.arena.len();
        a.arena.write_word(end - 4, Tag { size: 0, allocated: false }.encode());
        assert!(matches!(a.check(), Err(CheckError::EpilogueMissing { .. })));
    }

    #[test]
    fn test_detects_broken_back_link() {
        let mut a = SegFitAllocator::new().unwrap();
        // Two same-class free blocks separated by live spacers, so they sit
        // in one list without coalescing. LIFO order puts `second` at the
        // head with `first` as its successor.
        let first = a.allocate(40).unwrap();
        let _s1 = a.allocate(40).unwrap();
        let second = a.allocate(40).unwrap();
        let _s2 = a.allocate(40).unwrap();
        a.release(first);
        a.release(second);
        assert_eq!(a.check(), Ok(()));

        block::set_pred_link(&mut a.arena, first, 0xDEAD_BEE8);
        assert!(matches!(
            a.check(),
            Err(CheckError::BrokenBackLink { block, successor, .. })
                if block == second && successor == first
        ));
    }
}
