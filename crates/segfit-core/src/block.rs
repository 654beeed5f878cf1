//! Block format: boundary tags and block arithmetic.
//!
//! Every block, free or allocated, is bounded by a matching pair of tags: a
//! header in the word immediately before the payload and a footer in the last
//! word of the block. A tag packs the block size (always a multiple of the
//! alignment, so its low three bits are zero) with an allocated bit, which
//! lets a heap walker move in either direction using nothing but the current
//! block's own size field.
//!
//! When a block is free, the first two payload words are reinterpreted as
//! predecessor/successor links within its segregated list. Links hold payload
//! offsets into the arena; [`NIL`] is the explicit "no neighbor" marker,
//! distinct from every reachable offset.
//!
//! All byte-level encoding lives in this module; the rest of the crate only
//! manipulates decoded sizes, flags, and offsets.

use crate::arena::Arena;

/// Word and tag size (bytes).
pub const WSIZE: usize = 4;
/// Double-word size; also the per-block header+footer overhead (bytes).
pub const DSIZE: usize = 8;
/// Payload alignment guaranteed by the allocator (bytes).
pub const ALIGNMENT: usize = 8;
/// Minimum block size: header + pred + succ + footer (bytes).
pub const MIN_BLOCK: usize = 16;
/// "No neighbor" marker stored in free-list link fields.
pub const NIL: u32 = u32::MAX;

/// Rounds `size` up to the alignment boundary.
#[must_use]
pub fn align(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Total block size needed for a payload request of `size` bytes: the
/// aligned payload plus tag overhead. `None` when the request is so large
/// the arithmetic would wrap.
#[must_use]
pub fn request_size(size: usize) -> Option<usize> {
    size.checked_next_multiple_of(ALIGNMENT)?.checked_add(DSIZE)
}

/// Decoded boundary tag: block size plus allocated flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Total block size in bytes, overhead included.
    pub size: usize,
    /// Whether the block is currently handed out to a caller.
    pub allocated: bool,
}

impl Tag {
    /// Packs the tag into its word encoding.
    #[must_use]
    pub fn encode(self) -> u32 {
        debug_assert_eq!(self.size % ALIGNMENT, 0);
        self.size as u32 | u32::from(self.allocated)
    }

    /// Decodes a tag word.
    #[must_use]
    pub fn decode(word: u32) -> Self {
        Self {
            size: (word & !0x7) as usize,
            allocated: word & 0x1 != 0,
        }
    }
}

/// Offset of the header word for the block at payload offset `bp`.
#[must_use]
pub fn header_at(bp: usize) -> usize {
    bp - WSIZE
}

/// Offset of the footer word for the block at payload offset `bp`.
#[must_use]
pub fn footer_at(arena: &Arena, bp: usize) -> usize {
    bp + block_size(arena, bp) - DSIZE
}

/// Reads the header tag of the block at `bp`.
#[must_use]
pub fn header(arena: &Arena, bp: usize) -> Tag {
    Tag::decode(arena.read_word(header_at(bp)))
}

/// Reads the footer tag of the block at `bp`.
#[must_use]
pub fn footer(arena: &Arena, bp: usize) -> Tag {
    Tag::decode(arena.read_word(footer_at(arena, bp)))
}

/// Total size of the block at `bp`, per its header.
#[must_use]
pub fn block_size(arena: &Arena, bp: usize) -> usize {
    header(arena, bp).size
}

/// Allocated flag of the block at `bp`, per its header.
#[must_use]
pub fn is_allocated(arena: &Arena, bp: usize) -> bool {
    header(arena, bp).allocated
}

/// Writes matching header and footer tags for a block of `size` bytes at
/// payload offset `bp`.
pub fn write_tags(arena: &mut Arena, bp: usize, size: usize, allocated: bool) {
    let word = Tag { size, allocated }.encode();
    arena.write_word(header_at(bp), word);
    arena.write_word(bp + size - DSIZE, word);
}

/// Payload offset of the physically next block.
#[must_use]
pub fn next_block(arena: &Arena, bp: usize) -> usize {
    bp + block_size(arena, bp)
}

/// Payload offset of the physically previous block, located through its
/// footer (the word just before this block's header).
#[must_use]
pub fn prev_block(arena: &Arena, bp: usize) -> usize {
    bp - prev_footer(arena, bp).size
}

/// Footer tag of the physically previous block.
#[must_use]
pub fn prev_footer(arena: &Arena, bp: usize) -> Tag {
    Tag::decode(arena.read_word(bp - DSIZE))
}

/// Reads the predecessor link of the free block at `bp`.
#[must_use]
pub fn pred_link(arena: &Arena, bp: usize) -> u32 {
    arena.read_word(bp)
}

/// Writes the predecessor link of the free block at `bp`.
pub fn set_pred_link(arena: &mut Arena, bp: usize, link: u32) {
    arena.write_word(bp, link);
}

/// Reads the successor link of the free block at `bp`.
#[must_use]
pub fn succ_link(arena: &Arena, bp: usize) -> u32 {
    arena.read_word(bp + WSIZE)
}

/// Writes the successor link of the free block at `bp`.
pub fn set_succ_link(arena: &mut Arena, bp: usize, link: u32) {
    arena.write_word(bp + WSIZE, link);
}

/// Usable payload bytes of a block of `size` total bytes.
#[must_use]
pub fn payload_len(size: usize) -> usize {
    size - DSIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(1), 8);
        assert_eq!(align(8), 8);
        assert_eq!(align(9), 16);
        assert_eq!(align(24), 24);
        assert_eq!(align(0), 0);
    }

    #[test]
    fn test_request_size_rejects_overflow() {
        assert_eq!(request_size(1), Some(16));
        assert_eq!(request_size(24), Some(32));
        assert_eq!(request_size(usize::MAX), None);
        // Already aligned, but no room left for the tags.
        assert_eq!(request_size(usize::MAX - 7), None);
    }

    #[test]
    fn test_tag_round_trip() {
        for &size in &[0usize, 8, 16, 48, 16384, 1 << 20] {
            for &allocated in &[false, true] {
                let tag = Tag { size, allocated };
                assert_eq!(Tag::decode(tag.encode()), tag);
            }
        }
    }

    #[test]
    fn test_tags_and_neighbors() {
        let mut arena = Arena::with_limit(256);
        arena.sbrk(96).unwrap();
        // Two adjacent blocks: 32 bytes at bp 8, 48 bytes at bp 40.
        write_tags(&mut arena, 8, 32, true);
        write_tags(&mut arena, 40, 48, false);

        assert_eq!(header(&arena, 8), Tag { size: 32, allocated: true });
        assert_eq!(footer(&arena, 8), Tag { size: 32, allocated: true });
        assert_eq!(next_block(&arena, 8), 40);
        assert_eq!(prev_block(&arena, 40), 8);
        assert!(!is_allocated(&arena, 40));
        assert_eq!(payload_len(block_size(&arena, 40)), 40);
    }

    #[test]
    fn test_free_links() {
        let mut arena = Arena::with_limit(64);
        arena.sbrk(32).unwrap();
        write_tags(&mut arena, 8, 16, false);
        set_pred_link(&mut arena, 8, NIL);
        set_succ_link(&mut arena, 8, 24);
        assert_eq!(pred_link(&arena, 8), NIL);
        assert_eq!(succ_link(&arena, 8), 24);
    }
}
