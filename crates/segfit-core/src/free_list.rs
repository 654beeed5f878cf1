//! Segregated free-list manager.
//!
//! One doubly-linked LIFO stack of free blocks per size class. The links are
//! the pred/succ words overlaid on each free block's payload (see
//! [`crate::block`]); only the 9 roots live outside the arena. A free block
//! is linked into exactly one list, the one matching its current size, so
//! membership is recomputed on every insert after a coalesce or split.

use crate::arena::Arena;
use crate::block::{self, NIL};
use crate::size_class::{self, NUM_CLASSES};

/// Roots of the 9 per-class free lists.
pub struct FreeLists {
    roots: [Option<u32>; NUM_CLASSES],
}

impl FreeLists {
    /// Creates a manager with all lists empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            roots: [None; NUM_CLASSES],
        }
    }

    /// Empties every list without touching the arena.
    pub fn clear(&mut self) {
        self.roots = [None; NUM_CLASSES];
    }

    /// Head block of `class`, if any.
    #[must_use]
    pub fn head(&self, class: usize) -> Option<usize> {
        self.roots[class].map(|bp| bp as usize)
    }

    /// Pushes the free block at `bp` onto the head of the list matching its
    /// current size. O(1).
    pub fn insert(&mut self, arena: &mut Arena, bp: usize) {
        let class = size_class::class_for(block::block_size(arena, bp));
        match self.roots[class] {
            Some(old_head) => {
                block::set_pred_link(arena, old_head as usize, bp as u32);
                block::set_succ_link(arena, bp, old_head);
            }
            None => {
                block::set_succ_link(arena, bp, NIL);
            }
        }
        block::set_pred_link(arena, bp, NIL);
        self.roots[class] = Some(bp as u32);
    }

    /// Splices the free block at `bp` out of its list. O(1) via the stored
    /// pred/succ links; only the block, its list neighbors, and possibly the
    /// class root are touched.
    pub fn remove(&mut self, arena: &mut Arena, bp: usize) {
        let class = size_class::class_for(block::block_size(arena, bp));
        let pred = block::pred_link(arena, bp);
        let succ = block::succ_link(arena, bp);
        match (pred != NIL, succ != NIL) {
            (true, true) => {
                block::set_succ_link(arena, pred as usize, succ);
                block::set_pred_link(arena, succ as usize, pred);
            }
            (true, false) => {
                block::set_succ_link(arena, pred as usize, NIL);
            }
            (false, true) => {
                block::set_pred_link(arena, succ as usize, NIL);
                self.roots[class] = Some(succ);
            }
            (false, false) => {
                self.roots[class] = None;
            }
        }
    }

    /// Successor of `bp` within its list, if any.
    #[must_use]
    pub fn successor(&self, arena: &Arena, bp: usize) -> Option<usize> {
        let succ = block::succ_link(arena, bp);
        (succ != NIL).then_some(succ as usize)
    }

    /// Number of blocks currently linked in `class`.
    #[must_use]
    pub fn class_len(&self, arena: &Arena, class: usize) -> usize {
        let mut count = 0;
        let mut cursor = self.head(class);
        while let Some(bp) = cursor {
            count += 1;
            cursor = self.successor(arena, bp);
        }
        count
    }

    /// Number of blocks linked across all classes.
    #[must_use]
    pub fn total_len(&self, arena: &Arena) -> usize {
        (0..NUM_CLASSES).map(|c| self.class_len(arena, c)).sum()
    }
}

impl Default for FreeLists {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::write_tags;

    // Lays out `sizes` as consecutive free blocks starting at offset 8 and
    // returns their payload offsets.
    fn build_heap(arena: &mut Arena, sizes: &[usize]) -> Vec<usize> {
        let total: usize = sizes.iter().sum();
        arena.sbrk(total + 16).unwrap();
        let mut bp = 8;
        let mut blocks = Vec::new();
        for &size in sizes {
            write_tags(arena, bp, size, false);
            blocks.push(bp);
            bp += size;
        }
        blocks
    }

    #[test]
    fn test_insert_is_lifo() {
        let mut arena = Arena::with_limit(1024);
        let mut lists = FreeLists::new();
        let blocks = build_heap(&mut arena, &[24, 24, 24]);
        for &bp in &blocks {
            lists.insert(&mut arena, bp);
        }
        // All three land in class 0, most recently freed first.
        assert_eq!(lists.head(0), Some(blocks[2]));
        assert_eq!(lists.successor(&arena, blocks[2]), Some(blocks[1]));
        assert_eq!(lists.successor(&arena, blocks[1]), Some(blocks[0]));
        assert_eq!(lists.successor(&arena, blocks[0]), None);
        assert_eq!(lists.class_len(&arena, 0), 3);
    }

    #[test]
    fn test_insert_classifies_by_size() {
        let mut arena = Arena::with_limit(1024);
        let mut lists = FreeLists::new();
        let blocks = build_heap(&mut arena, &[24, 48, 136]);
        for &bp in &blocks {
            lists.insert(&mut arena, bp);
        }
        assert_eq!(lists.head(0), Some(blocks[0]));
        assert_eq!(lists.head(1), Some(blocks[1]));
        assert_eq!(lists.head(3), Some(blocks[2]));
        assert_eq!(lists.total_len(&arena), 3);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut arena = Arena::with_limit(1024);
        let mut lists = FreeLists::new();
        let blocks = build_heap(&mut arena, &[24, 24, 24, 24]);
        for &bp in &blocks {
            lists.insert(&mut arena, bp);
        }
        // List order is 3, 2, 1, 0.
        lists.remove(&mut arena, blocks[2]); // middle
        assert_eq!(lists.head(0), Some(blocks[3]));
        assert_eq!(lists.successor(&arena, blocks[3]), Some(blocks[1]));

        lists.remove(&mut arena, blocks[3]); // head
        assert_eq!(lists.head(0), Some(blocks[1]));

        lists.remove(&mut arena, blocks[0]); // tail
        assert_eq!(lists.successor(&arena, blocks[1]), None);

        lists.remove(&mut arena, blocks[1]); // last one
        assert_eq!(lists.head(0), None);
        assert_eq!(lists.total_len(&arena), 0);
    }

    #[test]
    fn test_clear() {
        let mut arena = Arena::with_limit(1024);
        let mut lists = FreeLists::new();
        for &bp in &build_heap(&mut arena, &[24, 48]) {
            lists.insert(&mut arena, bp);
        }
        lists.clear();
        assert_eq!(lists.total_len(&arena), 0);
    }
}
