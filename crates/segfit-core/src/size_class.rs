//! Segregated size classes.
//!
//! Block sizes are partitioned into 9 fixed classes:
//! [17,32], [33,64], [65,128], [129,256], [257,512], [513,1024],
//! [1025,4096], [4097,16384], [16385,inf). Each class owns one free list.
//! The boundaries are compile-time constants, not runtime configuration.

/// Number of size classes.
pub const NUM_CLASSES: usize = 9;

/// Inclusive upper bound of every class but the last (which is unbounded).
const UPPER_BOUNDS: [usize; NUM_CLASSES - 1] = [32, 64, 128, 256, 512, 1024, 4096, 16384];

/// Returns the class index whose list is first to try for a block of
/// `size` total bytes. Total and deterministic.
#[must_use]
pub fn class_for(size: usize) -> usize {
    UPPER_BOUNDS
        .iter()
        .position(|&bound| size <= bound)
        .unwrap_or(NUM_CLASSES - 1)
}

/// Returns the next larger class, or `None` past the last one.
#[must_use]
pub fn next_class(class: usize) -> Option<usize> {
    let next = class + 1;
    (next < NUM_CLASSES).then_some(next)
}
