//! Allocation engine.
//!
//! [`SegFitAllocator`] owns all allocator state: the arena, the 9 segregated
//! free-list roots, the reuse guard, configuration, metrics, and the
//! lifecycle event buffer. There is no process-wide singleton; callers create
//! an instance, drive it from one logical thread, and drop it when done.
//!
//! Block handles are payload offsets into the arena. Offset 0 is never a
//! valid handle (the region starts with a padding word and prologue), so it
//! doubles as the null handle in [`SegFitAllocator::resize`].

use std::collections::VecDeque;

use serde::Serialize;

use crate::arena::{Arena, DEFAULT_HEAP_LIMIT, HeapError};
use crate::block::{self, ALIGNMENT, DSIZE, MIN_BLOCK, WSIZE, align};
use crate::free_list::FreeLists;
use crate::size_class;

/// Default heap-growth increment (bytes).
pub const DEFAULT_GROWTH_CHUNK: usize = 64;

/// Configuration for [`SegFitAllocator`]. All fields have defaults matching
/// the tuned reference behavior.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Hard ceiling on total heap size in bytes. Default: 20 MiB.
    pub heap_limit: usize,
    /// Minimum heap-growth increment in bytes. Default: 64.
    pub growth_chunk: usize,
    /// Depth of the reuse guard: how many recently split-off remainders
    /// `find_fit` refuses to hand back out. A single slot reproduces the
    /// reference behavior; this is a tunable, not an invariant. Default: 1.
    pub reuse_guard_slots: usize,
    /// Request-size rewrites applied before alignment. Workload-specific
    /// fragmentation tuning, carried as configuration rather than policy.
    /// Default: 448/456 -> 512 and 112/120 -> 128.
    pub round_hints: Vec<(usize, usize)>,
    /// Capacity of the lifecycle event buffer; 0 disables recording.
    /// Default: 256.
    pub lifecycle_log_capacity: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            heap_limit: DEFAULT_HEAP_LIMIT,
            growth_chunk: DEFAULT_GROWTH_CHUNK,
            reuse_guard_slots: 1,
            round_hints: vec![(448, 512), (456, 512), (112, 128), (120, 128)],
            lifecycle_log_capacity: 256,
        }
    }
}

/// Lifecycle event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventLevel {
    Trace,
    Info,
    Warn,
}

/// Structured lifecycle record for one allocator decision.
#[derive(Debug, Clone, Serialize)]
pub struct AllocEvent {
    /// Monotonic decision id.
    pub decision_id: u64,
    /// Severity level.
    pub level: EventLevel,
    /// Entry point (`allocate`, `release`, `resize`, `extend`).
    pub op: &'static str,
    /// Event kind within the entry point.
    pub event: &'static str,
    /// Block handle involved, if any.
    pub block: Option<usize>,
    /// Size involved, if any (request or block size, per event).
    pub size: Option<usize>,
    /// Size class involved, if any.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details.
    pub details: String,
    /// Snapshot: heap size at record time.
    pub heap_size: usize,
    /// Snapshot: live allocation count at record time.
    pub active_count: usize,
}

/// Point-in-time counters snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Current heap size in bytes.
    pub heap_size: usize,
    /// Live allocations.
    pub active_count: usize,
    /// Payload bytes currently handed out (block sizes minus overhead).
    pub live_payload_bytes: usize,
    /// Free blocks linked across all classes.
    pub free_blocks: usize,
    /// Heap-growth calls performed.
    pub extend_calls: u64,
    /// `find_fit` successes.
    pub fit_hits: u64,
    /// `find_fit` exhaustions that fell back to heap growth.
    pub fit_misses: u64,
    /// Placements that split off a remainder.
    pub splits: u64,
    /// Coalesce operations that merged at least two blocks.
    pub merges: u64,
    /// Fitting blocks skipped because they sat in the reuse guard.
    pub reuse_guard_skips: u64,
}

#[derive(Debug, Default)]
struct Metrics {
    extend_calls: u64,
    fit_hits: u64,
    fit_misses: u64,
    splits: u64,
    merges: u64,
    reuse_guard_skips: u64,
}

/// Descriptor of one heap block, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Payload offset.
    pub offset: usize,
    /// Total block size in bytes.
    pub size: usize,
    /// Allocated flag.
    pub allocated: bool,
}

/// Segregated-fit allocator over a growable arena.
pub struct SegFitAllocator {
    pub(crate) arena: Arena,
    pub(crate) lists: FreeLists,
    pub(crate) base: usize,
    config: AllocatorConfig,
    reuse_guard: VecDeque<usize>,
    events: VecDeque<AllocEvent>,
    next_decision_id: u64,
    active_count: usize,
    live_payload_bytes: usize,
    metrics: Metrics,
}

impl SegFitAllocator {
    /// Creates an allocator with default configuration and performs the
    /// initial heap growth.
    pub fn new() -> Result<Self, HeapError> {
        Self::with_config(AllocatorConfig::default())
    }

    /// Creates an allocator with the given configuration and performs the
    /// initial heap growth.
    pub fn with_config(mut config: AllocatorConfig) -> Result<Self, HeapError> {
        config.growth_chunk =
            align(config.growth_chunk.clamp(MIN_BLOCK, usize::MAX - ALIGNMENT + 1));
        let mut allocator = Self {
            arena: Arena::with_limit(config.heap_limit),
            lists: FreeLists::new(),
            base: 0,
            config,
            reuse_guard: VecDeque::new(),
            events: VecDeque::new(),
            next_decision_id: 1,
            active_count: 0,
            live_payload_bytes: 0,
            metrics: Metrics::default(),
        };
        allocator.init()?;
        Ok(allocator)
    }

    /// Returns the allocator to its freshly initialized state: empty lists,
    /// zeroed metrics, one initial growth.
    pub fn reset(&mut self) -> Result<(), HeapError> {
        self.arena.reset();
        self.lists.clear();
        self.reuse_guard.clear();
        self.events.clear();
        self.next_decision_id = 1;
        self.active_count = 0;
        self.live_payload_bytes = 0;
        self.metrics = Metrics::default();
        self.init()
    }

    // Lays down padding, prologue, and epilogue, then grows once.
    fn init(&mut self) -> Result<(), HeapError> {
        let start = self.arena.sbrk(4 * WSIZE)?;
        self.arena.write_word(start, 0);
        let prologue = block::Tag {
            size: DSIZE,
            allocated: true,
        }
        .encode();
        self.arena.write_word(start + WSIZE, prologue);
        self.arena.write_word(start + 2 * WSIZE, prologue);
        let epilogue = block::Tag {
            size: 0,
            allocated: true,
        }
        .encode();
        self.arena.write_word(start + 3 * WSIZE, epilogue);
        self.base = start + DSIZE;
        self.extend(self.config.growth_chunk / WSIZE)?;
        Ok(())
    }

    /// Allocates a block with at least `size` payload bytes, returning its
    /// payload offset, or `None` for a zero-size request or on heap
    /// exhaustion. The offset is always 8-byte aligned.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            self.record(
                EventLevel::Trace,
                "allocate",
                "zero_size",
                None,
                Some(0),
                None,
                "noop",
                String::new(),
            );
            return None;
        }
        let Some(asize) = self.adjusted_request(size) else {
            self.record(
                EventLevel::Warn,
                "allocate",
                "oversized_request",
                None,
                Some(size),
                None,
                "oom",
                String::new(),
            );
            return None;
        };
        let class = size_class::class_for(asize);
        let bp = match self.find_fit(asize) {
            Some(bp) => {
                self.metrics.fit_hits += 1;
                bp
            }
            None => {
                self.metrics.fit_misses += 1;
                let words = asize.max(self.config.growth_chunk) / WSIZE;
                match self.extend(words) {
                    Ok(bp) => bp,
                    Err(err) => {
                        self.record(
                            EventLevel::Warn,
                            "allocate",
                            "heap_exhausted",
                            None,
                            Some(size),
                            Some(class),
                            "oom",
                            err.to_string(),
                        );
                        return None;
                    }
                }
            }
        };
        let bp = self.place(bp, asize);
        self.active_count += 1;
        self.live_payload_bytes += block::payload_len(block::block_size(&self.arena, bp));
        self.record(
            EventLevel::Trace,
            "allocate",
            "alloc",
            Some(bp),
            Some(size),
            Some(class),
            "success",
            format!("block_size={}", block::block_size(&self.arena, bp)),
        );
        Some(bp)
    }

    /// Releases the block at payload offset `bp`.
    ///
    /// # Hazard
    ///
    /// `bp` must be a live handle previously returned by [`allocate`] or
    /// [`resize`] on this instance. Releasing a foreign offset or releasing
    /// twice corrupts the heap; it is not detected in release builds (the
    /// zero-overhead contract of the design), though debug builds assert on
    /// gross misuse.
    ///
    /// [`allocate`]: SegFitAllocator::allocate
    /// [`resize`]: SegFitAllocator::resize
    pub fn release(&mut self, bp: usize) {
        debug_assert!(bp % ALIGNMENT == 0, "misaligned handle {bp}");
        debug_assert!(bp >= self.base + DSIZE && bp < self.arena.len());
        debug_assert!(block::is_allocated(&self.arena, bp), "double release of {bp}");
        let size = block::block_size(&self.arena, bp);
        block::write_tags(&mut self.arena, bp, size, false);
        self.lists.insert(&mut self.arena, bp);
        self.coalesce(bp);
        self.active_count = self.active_count.saturating_sub(1);
        self.live_payload_bytes = self
            .live_payload_bytes
            .saturating_sub(block::payload_len(size));
        self.record(
            EventLevel::Trace,
            "release",
            "free",
            Some(bp),
            Some(size),
            Some(size_class::class_for(size)),
            "success",
            String::new(),
        );
    }

    /// Resizes the block at `bp` to hold at least `size` payload bytes.
    ///
    /// `bp == 0` behaves as [`allocate`]; `size == 0` behaves as [`release`]
    /// and returns `None`. Growth prefers absorbing a free physical successor
    /// or extending the heap in place over relocating; the returned offset
    /// equals `bp` whenever in-place resizing succeeded. Returns `None` on
    /// heap exhaustion, leaving the block untouched.
    ///
    /// [`allocate`]: SegFitAllocator::allocate
    /// [`release`]: SegFitAllocator::release
    pub fn resize(&mut self, bp: usize, size: usize) -> Option<usize> {
        if bp == 0 {
            return self.allocate(size);
        }
        if size == 0 {
            self.release(bp);
            self.record(
                EventLevel::Trace,
                "resize",
                "zero_size_as_release",
                Some(bp),
                Some(0),
                None,
                "freed",
                String::new(),
            );
            return None;
        }

        let Some(new_size) = block::request_size(size) else {
            self.record(
                EventLevel::Warn,
                "resize",
                "oversized_request",
                Some(bp),
                Some(size),
                None,
                "oom",
                String::new(),
            );
            return None;
        };
        let old_size = block::block_size(&self.arena, bp);

        if new_size == old_size {
            return Some(bp);
        }
        if new_size < old_size {
            return Some(self.shrink_in_place(bp, old_size, new_size));
        }
        self.grow(bp, old_size, new_size, size)
    }

    // Carves the tail off a live block and releases it. Keeps the block
    // whole when the tail would be below the minimum block size.
    fn shrink_in_place(&mut self, bp: usize, old_size: usize, new_size: usize) -> usize {
        let tail = old_size - new_size;
        if tail < MIN_BLOCK {
            return bp;
        }
        block::write_tags(&mut self.arena, bp, new_size, true);
        let rest = bp + new_size;
        block::write_tags(&mut self.arena, rest, tail, false);
        self.lists.insert(&mut self.arena, rest);
        self.coalesce(rest);
        self.live_payload_bytes = self.live_payload_bytes.saturating_sub(tail);
        self.record(
            EventLevel::Trace,
            "resize",
            "shrink_in_place",
            Some(bp),
            Some(new_size),
            Some(size_class::class_for(new_size)),
            "success",
            format!("released_tail={tail}"),
        );
        bp
    }

    // Growth half of resize: in-place absorption, in-place heap extension,
    // or relocation, in that order of preference.
    fn grow(&mut self, bp: usize, old_size: usize, new_size: usize, request: usize) -> Option<usize> {
        let next = block::next_block(&self.arena, bp);
        let next_tag = block::header(&self.arena, bp + old_size);
        let next_is_epilogue = next_tag.size == 0;
        let mut avail = if !next_tag.allocated { next_tag.size } else { 0 };

        let needed = new_size - old_size;
        let local = avail >= needed;
        let at_heap_end = next_is_epilogue
            || (avail > 0 && block::header(&self.arena, next + avail).size == 0);

        if !local && at_heap_end {
            // The free run after this block touches the epilogue; grow the
            // heap by the shortfall and let the new region merge into it.
            let shortfall = needed - avail;
            let words = shortfall.max(self.config.growth_chunk) / WSIZE;
            if let Err(err) = self.extend(words) {
                self.record(
                    EventLevel::Warn,
                    "resize",
                    "heap_exhausted",
                    Some(bp),
                    Some(request),
                    None,
                    "oom",
                    err.to_string(),
                );
                return None;
            }
            avail = block::block_size(&self.arena, next);
        }

        if local || at_heap_end {
            self.unlist(next);
            let total = old_size + avail;
            let remainder = total - new_size;
            if remainder >= MIN_BLOCK {
                block::write_tags(&mut self.arena, bp, new_size, true);
                let rest = bp + new_size;
                block::write_tags(&mut self.arena, rest, remainder, false);
                self.lists.insert(&mut self.arena, rest);
                self.guard_remainder(rest);
                self.live_payload_bytes += new_size - old_size;
            } else {
                block::write_tags(&mut self.arena, bp, total, true);
                self.live_payload_bytes += total - old_size;
            }
            self.record(
                EventLevel::Trace,
                "resize",
                "grow_in_place",
                Some(bp),
                Some(request),
                Some(size_class::class_for(new_size)),
                "success",
                format!("absorbed={avail} remainder={remainder}", remainder = total - new_size),
            );
            return Some(bp);
        }

        // Relocate: allocate fresh, copy the old payload, release the old
        // block. Copy length is the old payload size; growth guarantees the
        // new payload is at least as large.
        let new_bp = self.allocate(request)?;
        self.arena
            .copy_within(bp, new_bp, block::payload_len(old_size));
        self.release(bp);
        self.record(
            EventLevel::Trace,
            "resize",
            "grow_moved",
            Some(new_bp),
            Some(request),
            Some(size_class::class_for(new_size)),
            "success",
            format!("moved_from={bp}"),
        );
        Some(new_bp)
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }

    /// Payload bytes of the live block at `bp`.
    #[must_use]
    pub fn payload(&self, bp: usize) -> &[u8] {
        let len = block::payload_len(block::block_size(&self.arena, bp));
        self.arena.slice(bp, len)
    }

    /// Mutable payload bytes of the live block at `bp`.
    pub fn payload_mut(&mut self, bp: usize) -> &mut [u8] {
        let len = block::payload_len(block::block_size(&self.arena, bp));
        self.arena.slice_mut(bp, len)
    }

    /// Snapshot of allocator counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            heap_size: self.arena.len(),
            active_count: self.active_count,
            live_payload_bytes: self.live_payload_bytes,
            free_blocks: self.lists.total_len(&self.arena),
            extend_calls: self.metrics.extend_calls,
            fit_hits: self.metrics.fit_hits,
            fit_misses: self.metrics.fit_misses,
            splits: self.metrics.splits,
            merges: self.metrics.merges,
            reuse_guard_skips: self.metrics.reuse_guard_skips,
        }
    }

    /// Walks the heap and describes every block between prologue and
    /// epilogue, in address order. Diagnostic.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let mut out = Vec::new();
        let mut bp = self.base + DSIZE;
        loop {
            let tag = block::header(&self.arena, bp);
            if tag.size == 0 {
                break;
            }
            out.push(BlockInfo {
                offset: bp,
                size: tag.size,
                allocated: tag.allocated,
            });
            bp += tag.size;
        }
        out
    }

    /// Recorded lifecycle events, oldest first.
    #[must_use]
    pub fn lifecycle_events(&self) -> impl Iterator<Item = &AllocEvent> {
        self.events.iter()
    }

    /// Drains and returns all recorded lifecycle events.
    pub fn drain_lifecycle_events(&mut self) -> Vec<AllocEvent> {
        self.events.drain(..).collect()
    }

    // ------------------------------------------------------------------
    // Internal machinery
    // ------------------------------------------------------------------

    // Applies configured request-size rewrites, then alignment and overhead.
    // `None` when the request is too large for the size arithmetic.
    fn adjusted_request(&self, size: usize) -> Option<usize> {
        let size = self
            .config
            .round_hints
            .iter()
            .find(|&&(from, _)| from == size)
            .map_or(size, |&(_, to)| to);
        block::request_size(size)
    }

    // Grows the heap by `words` words (floored at the growth chunk, rounded
    // up to even), formats the new
    // region as one free block followed by a fresh epilogue, and coalesces
    // it with a trailing free block if one was abutting the old epilogue.
    fn extend(&mut self, words: usize) -> Result<usize, HeapError> {
        let words = words.max(self.config.growth_chunk / WSIZE);
        let words = if words % 2 == 1 { words + 1 } else { words };
        let size = words * WSIZE;
        let bp = self.arena.sbrk(size)?;
        self.metrics.extend_calls += 1;
        // The old epilogue header becomes the new block's header.
        block::write_tags(&mut self.arena, bp, size, false);
        let epilogue = block::Tag {
            size: 0,
            allocated: true,
        }
        .encode();
        let end = block::next_block(&self.arena, bp);
        self.arena.write_word(block::header_at(end), epilogue);
        self.lists.insert(&mut self.arena, bp);
        let merged = self.coalesce(bp);
        self.record(
            EventLevel::Trace,
            "extend",
            "grow",
            Some(merged),
            Some(size),
            Some(size_class::class_for(block::block_size(&self.arena, merged))),
            "success",
            String::new(),
        );
        Ok(merged)
    }

    // Merges the freshly freed block at `bp` with free physical neighbors.
    // Expects `bp` to already be linked in its list; returns the merged
    // block's offset (the predecessor's when merging left). Postcondition:
    // no two adjacent free blocks around the returned block.
    fn coalesce(&mut self, bp: usize) -> usize {
        let prev_free = !block::prev_footer(&self.arena, bp).allocated;
        let next = block::next_block(&self.arena, bp);
        let next_free = !block::is_allocated(&self.arena, next);
        let mut size = block::block_size(&self.arena, bp);

        let merged = match (prev_free, next_free) {
            (false, false) => return bp,
            (false, true) => {
                self.unlist(bp);
                self.unlist(next);
                size += block::block_size(&self.arena, next);
                block::write_tags(&mut self.arena, bp, size, false);
                bp
            }
            (true, false) => {
                let prev = block::prev_block(&self.arena, bp);
                self.unlist(bp);
                self.unlist(prev);
                size += block::block_size(&self.arena, prev);
                block::write_tags(&mut self.arena, prev, size, false);
                prev
            }
            (true, true) => {
                let prev = block::prev_block(&self.arena, bp);
                self.unlist(bp);
                self.unlist(prev);
                self.unlist(next);
                size += block::block_size(&self.arena, prev)
                    + block::block_size(&self.arena, next);
                block::write_tags(&mut self.arena, prev, size, false);
                prev
            }
        };
        self.metrics.merges += 1;
        self.lists.insert(&mut self.arena, merged);
        merged
    }

    // First-fit scan from the matching class upward. Blocks held in the
    // reuse guard are skipped even when large enough.
    fn find_fit(&mut self, size: usize) -> Option<usize> {
        let mut class = size_class::class_for(size);
        loop {
            let mut cursor = self.lists.head(class);
            while let Some(bp) = cursor {
                if block::block_size(&self.arena, bp) >= size {
                    if self.reuse_guard.contains(&bp) {
                        self.metrics.reuse_guard_skips += 1;
                    } else {
                        return Some(bp);
                    }
                }
                cursor = self.lists.successor(&self.arena, bp);
            }
            class = size_class::next_class(class)?;
        }
    }

    // Removes `bp` from its list, allocates `size` bytes at its start, and
    // splits off the remainder when it can stand as a block of its own.
    fn place(&mut self, bp: usize, size: usize) -> usize {
        let total = block::block_size(&self.arena, bp);
        self.unlist(bp);
        let remainder = total - size;
        if remainder >= MIN_BLOCK {
            block::write_tags(&mut self.arena, bp, size, true);
            let rest = bp + size;
            block::write_tags(&mut self.arena, rest, remainder, false);
            self.lists.insert(&mut self.arena, rest);
            self.metrics.splits += 1;
        } else {
            block::write_tags(&mut self.arena, bp, total, true);
        }
        bp
    }

    // List removal that also retires any reuse-guard entry for the block,
    // so the guard never outlives the block's free-list identity.
    fn unlist(&mut self, bp: usize) {
        self.lists.remove(&mut self.arena, bp);
        self.reuse_guard.retain(|&guarded| guarded != bp);
    }

    // Remembers a freshly split-off remainder so find_fit does not hand it
    // straight back out. Bounded FIFO; oldest entries fall off.
    fn guard_remainder(&mut self, bp: usize) {
        if self.config.reuse_guard_slots == 0 {
            return;
        }
        while self.reuse_guard.len() >= self.config.reuse_guard_slots {
            self.reuse_guard.pop_front();
        }
        self.reuse_guard.push_back(bp);
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        level: EventLevel,
        op: &'static str,
        event: &'static str,
        bp: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: String,
    ) {
        if self.config.lifecycle_log_capacity == 0 {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        while self.events.len() >= self.config.lifecycle_log_capacity {
            self.events.pop_front();
        }
        self.events.push_back(AllocEvent {
            decision_id,
            level,
            op,
            event,
            block: bp,
            size,
            class,
            outcome,
            details,
            heap_size: self.arena.len(),
            active_count: self.active_count,
        });
    }
}
