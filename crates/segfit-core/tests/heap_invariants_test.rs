//! End-to-end invariant and scenario tests for the allocator.
//!
//! Exercises the public surface only: allocate/release/resize, the block
//! walker, stats, and the consistency checker.

use segfit_core::{AllocatorConfig, SegFitAllocator};

// Small deterministic generator for workload tests; no external RNG needed.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 16
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

fn checked(a: &SegFitAllocator) {
    if let Err(err) = a.check() {
        panic!("heap invariant violated: {err}");
    }
}

#[test]
fn round_trip_restores_single_free_block() {
    for size in [1, 7, 8, 24, 100, 512, 1000, 4000, 20000] {
        let mut a = SegFitAllocator::new().unwrap();
        let bp = a.allocate(size).unwrap();
        a.release(bp);
        let blocks = a.blocks();
        assert_eq!(
            blocks.len(),
            1,
            "after releasing the only allocation of {size} bytes the heap must \
             collapse to one free block, got {blocks:?}"
        );
        assert!(!blocks[0].allocated);
        assert_eq!(a.stats().active_count, 0);
        assert_eq!(a.stats().live_payload_bytes, 0);
        checked(&a);
    }
}

#[test]
fn small_round_trip_leaves_heap_size_unchanged() {
    let mut a = SegFitAllocator::new().unwrap();
    let before = a.heap_size();
    let bp = a.allocate(24).unwrap();
    a.release(bp);
    assert_eq!(a.heap_size(), before);
    assert_eq!(a.blocks(), {
        let fresh = SegFitAllocator::new().unwrap();
        fresh.blocks()
    });
}

#[test]
fn returned_offsets_are_always_aligned() {
    let mut a = SegFitAllocator::new().unwrap();
    let mut rng = Lcg(7);
    let mut live = Vec::new();
    for _ in 0..500 {
        let size = 1 + rng.below(3000);
        if let Some(bp) = a.allocate(size) {
            assert_eq!(bp % 8, 0, "allocate({size}) returned misaligned {bp}");
            live.push(bp);
        }
        if live.len() > 20 {
            let victim = live.swap_remove(rng.below(live.len()));
            a.release(victim);
        }
    }
    checked(&a);
}

#[test]
fn no_adjacent_free_blocks_after_mixed_workload() {
    let mut a = SegFitAllocator::new().unwrap();
    let mut rng = Lcg(42);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for step in 0..2000 {
        match rng.below(10) {
            0..=5 => {
                let size = 1 + rng.below(2048);
                if let Some(bp) = a.allocate(size) {
                    live.push((bp, size));
                }
            }
            6..=8 if !live.is_empty() => {
                let (bp, _) = live.swap_remove(rng.below(live.len()));
                a.release(bp);
            }
            _ if !live.is_empty() => {
                let slot = rng.below(live.len());
                let (bp, _) = live[slot];
                let new_size = 1 + rng.below(4096);
                if let Some(new_bp) = a.resize(bp, new_size) {
                    live[slot] = (new_bp, new_size);
                } else {
                    // Exhaustion leaves the old block live and untouched.
                }
            }
            _ => {}
        }

        if step % 64 == 0 {
            let blocks = a.blocks();
            for pair in blocks.windows(2) {
                assert!(
                    pair[0].allocated || pair[1].allocated,
                    "adjacent free blocks at step {step}: {pair:?}"
                );
            }
        }
    }
    checked(&a);
}

#[test]
fn live_payloads_never_overlap() {
    let mut a = SegFitAllocator::new().unwrap();
    let mut rng = Lcg(1234);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for _ in 0..600 {
        if rng.below(3) < 2 {
            let size = 1 + rng.below(1500);
            if let Some(bp) = a.allocate(size) {
                live.push((bp, size));
            }
        } else if !live.is_empty() {
            let (bp, _) = live.swap_remove(rng.below(live.len()));
            a.release(bp);
        }
    }

    let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(bp, _)| (bp, bp + a.payload(bp).len()))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "payload ranges overlap: {pair:?}"
        );
    }
    checked(&a);
}

#[test]
fn payload_contents_survive_neighboring_traffic() {
    let mut a = SegFitAllocator::new().unwrap();
    let keeper = a.allocate(300).unwrap();
    for (i, byte) in a.payload_mut(keeper).iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }

    let mut rng = Lcg(9);
    let mut live = Vec::new();
    for _ in 0..300 {
        if rng.below(2) == 0 {
            if let Some(bp) = a.allocate(1 + rng.below(600)) {
                live.push(bp);
            }
        } else if !live.is_empty() {
            a.release(live.swap_remove(rng.below(live.len())));
        }
    }

    for (i, &byte) in a.payload(keeper).iter().enumerate() {
        assert_eq!(byte, (i % 251) as u8, "byte {i} of a live payload changed");
    }
    checked(&a);
}

#[test]
fn freed_block_is_reused_before_growing() {
    let mut a = SegFitAllocator::new().unwrap();
    let _first = a.allocate(24).unwrap();
    let middle = a.allocate(40).unwrap();
    let _big = a.allocate(1000).unwrap();

    a.release(middle);
    let heap_before = a.heap_size();
    let reused = a.allocate(32).unwrap();
    assert_eq!(reused, middle, "a fitting just-freed block must be reused");
    assert_eq!(a.heap_size(), heap_before, "no growth was needed");
    checked(&a);
}

#[test]
fn coalescing_keeps_freed_region_whole() {
    let mut a = SegFitAllocator::new().unwrap();
    let big = a.allocate(16384).unwrap();
    a.release(big);

    let heap_before = a.heap_size();
    let first = a.allocate(8000).unwrap();
    let second = a.allocate(8000).unwrap();
    assert_eq!(
        a.heap_size(),
        heap_before,
        "both 8000-byte blocks must fit in the coalesced region"
    );
    assert_ne!(first, second);
    checked(&a);
}

#[test]
fn resize_grows_in_place_when_followed_by_free_space() {
    let mut a = SegFitAllocator::new().unwrap();
    let bp = a.allocate(64).unwrap();
    let spare = a.allocate(8000).unwrap();
    a.release(spare);

    let resized = a.resize(bp, 4096).unwrap();
    assert_eq!(resized, bp, "growth into trailing free space must not move");
    assert!(a.payload(bp).len() >= 4096);
    checked(&a);
}

#[test]
fn resize_grows_in_place_at_heap_end() {
    let mut a = SegFitAllocator::new().unwrap();
    let bp = a.allocate(64).unwrap();
    // Consume the leftover so `bp`'s free successor run ends at the
    // epilogue, then grow: the heap should extend under the block.
    if let Some(rest) = a.allocate(1) {
        a.release(rest);
    }
    let resized = a.resize(bp, 10000).unwrap();
    assert_eq!(resized, bp);
    assert!(a.payload(bp).len() >= 10000);
    checked(&a);
}

#[test]
fn resize_to_zero_behaves_as_release() {
    let mut a = SegFitAllocator::new().unwrap();
    let bp = a.allocate(128).unwrap();
    assert_eq!(a.resize(bp, 0), None);
    assert_eq!(a.stats().active_count, 0);

    let mut b = SegFitAllocator::new().unwrap();
    let bq = b.allocate(128).unwrap();
    b.release(bq);
    assert_eq!(a.blocks(), b.blocks());
    checked(&a);
}

#[test]
fn checker_agrees_with_lists_throughout_a_workload() {
    let mut a = SegFitAllocator::with_config(AllocatorConfig {
        reuse_guard_slots: 2,
        ..AllocatorConfig::default()
    })
    .unwrap();
    let mut rng = Lcg(2024);
    let mut live = Vec::new();

    for step in 0..1500 {
        if rng.below(5) < 3 {
            if let Some(bp) = a.allocate(1 + rng.below(5000)) {
                live.push(bp);
            }
        } else if !live.is_empty() {
            a.release(live.swap_remove(rng.below(live.len())));
        }
        if step % 100 == 0 {
            checked(&a);
            let stats = a.stats();
            let free_in_heap = a.blocks().iter().filter(|b| !b.allocated).count();
            assert_eq!(stats.free_blocks, free_in_heap);
            assert_eq!(stats.active_count, live.len());
        }
    }
    for bp in live {
        a.release(bp);
    }
    checked(&a);
    assert_eq!(a.blocks().len(), 1);
}
