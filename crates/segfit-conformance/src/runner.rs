//! Trace replay against the allocator.
//!
//! Replays an operation list on a fresh [`SegFitAllocator`], filling every
//! allocation with an id-derived byte pattern and verifying it before each
//! free and across resizes, so overlapping or corrupted blocks surface as
//! integrity violations. The heap checker runs every `check_every` ops and
//! once at the end. The report mirrors the original driver's scoring:
//! utilization is peak live payload over final heap size, in permille.

use std::collections::HashMap;

use serde::Serialize;

use segfit_core::{AllocatorConfig, HeapError, SegFitAllocator};

use crate::trace::TraceOp;

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Run the heap checker every this many ops; 0 checks only at the end.
    pub check_every: usize,
    /// Allocator configuration for the run.
    pub allocator: AllocatorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            check_every: 64,
            allocator: AllocatorConfig::default(),
        }
    }
}

/// Outcome of one trace replay.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Operations executed.
    pub ops_executed: usize,
    /// Allocations or resizes refused by heap exhaustion.
    pub alloc_failures: usize,
    /// Payload or trace-shape violations, first few kept verbatim.
    pub integrity_violations: Vec<String>,
    /// First heap-checker failure, if any.
    pub consistency_error: Option<String>,
    /// Peak of summed live request sizes.
    pub peak_live_bytes: usize,
    /// Final heap size in bytes.
    pub final_heap_size: usize,
    /// Peak live payload over final heap size, in permille.
    pub utilization_permille: u16,
    /// Whether the run completed with no violations and a consistent heap.
    pub passed: bool,
}

const MAX_REPORTED_VIOLATIONS: usize = 8;

/// Replays `ops` on a fresh allocator and reports the outcome.
///
/// Fails only if the allocator itself cannot be constructed (the initial
/// growth exceeds the configured heap limit).
pub fn run_ops(ops: &[TraceOp], config: &RunnerConfig) -> Result<RunReport, HeapError> {
    let mut allocator = SegFitAllocator::with_config(config.allocator.clone())?;
    let mut slots: HashMap<u32, (usize, usize)> = HashMap::new();
    let mut report = RunReport {
        ops_executed: 0,
        alloc_failures: 0,
        integrity_violations: Vec::new(),
        consistency_error: None,
        peak_live_bytes: 0,
        final_heap_size: 0,
        utilization_permille: 0,
        passed: false,
    };
    let mut live_bytes = 0usize;

    for (index, &op) in ops.iter().enumerate() {
        match op {
            TraceOp::Alloc { id, size } => {
                if slots.contains_key(&id) {
                    violation(&mut report, format!("op {index}: id {id} allocated twice"));
                    continue;
                }
                match allocator.allocate(size) {
                    Some(bp) => {
                        fill_pattern(&mut allocator, bp, id, size);
                        slots.insert(id, (bp, size));
                        live_bytes += size;
                    }
                    None => report.alloc_failures += 1,
                }
            }
            TraceOp::Resize { id, size } => {
                let Some(&(bp, old_size)) = slots.get(&id) else {
                    violation(&mut report, format!("op {index}: resize of unknown id {id}"));
                    continue;
                };
                if size == 0 {
                    // Same contract as free.
                    verify_pattern(&allocator, &mut report, index, bp, id, old_size);
                    let released = allocator.resize(bp, 0);
                    debug_assert!(released.is_none());
                    slots.remove(&id);
                    live_bytes -= old_size;
                    continue;
                }
                match allocator.resize(bp, size) {
                    Some(new_bp) => {
                        let preserved = old_size.min(size);
                        verify_pattern(&allocator, &mut report, index, new_bp, id, preserved);
                        fill_pattern(&mut allocator, new_bp, id, size);
                        slots.insert(id, (new_bp, size));
                        live_bytes = live_bytes - old_size + size;
                    }
                    None => report.alloc_failures += 1,
                }
            }
            TraceOp::Free { id } => {
                let Some((bp, size)) = slots.remove(&id) else {
                    violation(&mut report, format!("op {index}: free of unknown id {id}"));
                    continue;
                };
                verify_pattern(&allocator, &mut report, index, bp, id, size);
                allocator.release(bp);
                live_bytes -= size;
            }
        }
        report.ops_executed += 1;
        report.peak_live_bytes = report.peak_live_bytes.max(live_bytes);

        if config.check_every != 0
            && report.ops_executed % config.check_every == 0
            && report.consistency_error.is_none()
        {
            if let Err(err) = allocator.check() {
                report.consistency_error = Some(err.to_string());
            }
        }
    }

    if report.consistency_error.is_none() {
        if let Err(err) = allocator.check() {
            report.consistency_error = Some(err.to_string());
        }
    }
    report.final_heap_size = allocator.heap_size();
    report.utilization_permille = if report.final_heap_size == 0 {
        0
    } else {
        ((report.peak_live_bytes.saturating_mul(1000)) / report.final_heap_size) as u16
    };
    report.passed = report.integrity_violations.is_empty() && report.consistency_error.is_none();
    Ok(report)
}

/// Generates a seeded pseudo-random workload and replays it.
pub fn run_stress(
    seed: u64,
    op_count: usize,
    max_size: usize,
    config: &RunnerConfig,
) -> Result<RunReport, HeapError> {
    let ops = stress_ops(seed, op_count, max_size);
    run_ops(&ops, config)
}

/// Builds the seeded workload used by [`run_stress`]: a mix of roughly 60%
/// allocates, 30% frees, and 10% resizes over ids that are live at the time.
#[must_use]
pub fn stress_ops(seed: u64, op_count: usize, max_size: usize) -> Vec<TraceOp> {
    let mut state = seed.wrapping_mul(2).wrapping_add(1);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        state >> 16
    };
    let max_size = max_size.max(1);

    let mut ops = Vec::with_capacity(op_count);
    let mut live: Vec<u32> = Vec::new();
    let mut next_id = 0u32;
    for _ in 0..op_count {
        let roll = next() % 10;
        if roll < 6 || live.is_empty() {
            let size = 1 + (next() as usize) % max_size;
            ops.push(TraceOp::Alloc { id: next_id, size });
            live.push(next_id);
            next_id += 1;
        } else if roll < 9 {
            let slot = (next() as usize) % live.len();
            let id = live.swap_remove(slot);
            ops.push(TraceOp::Free { id });
        } else {
            let slot = (next() as usize) % live.len();
            let size = 1 + (next() as usize) % max_size;
            ops.push(TraceOp::Resize { id: live[slot], size });
        }
    }
    // Release everything so a full-coverage run ends with an empty heap.
    for id in live {
        ops.push(TraceOp::Free { id });
    }
    ops
}

/// Renders a short human-readable summary of a run.
#[must_use]
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("# segfit conformance run\n\n");
    out.push_str(&format!("- ops executed: {}\n", report.ops_executed));
    out.push_str(&format!("- alloc failures: {}\n", report.alloc_failures));
    out.push_str(&format!(
        "- integrity violations: {}\n",
        report.integrity_violations.len()
    ));
    match &report.consistency_error {
        Some(err) => out.push_str(&format!("- heap consistency: FAILED ({err})\n")),
        None => out.push_str("- heap consistency: ok\n"),
    }
    out.push_str(&format!("- peak live bytes: {}\n", report.peak_live_bytes));
    out.push_str(&format!("- final heap size: {}\n", report.final_heap_size));
    out.push_str(&format!(
        "- utilization: {}.{}%\n",
        report.utilization_permille / 10,
        report.utilization_permille % 10
    ));
    out.push_str(&format!(
        "- result: {}\n",
        if report.passed { "PASS" } else { "FAIL" }
    ));
    out
}

fn violation(report: &mut RunReport, detail: String) {
    if report.integrity_violations.len() < MAX_REPORTED_VIOLATIONS {
        report.integrity_violations.push(detail);
    }
}

// Byte pattern derived from the allocation id, so blocks of different ids
// carry different data and stale bytes are distinguishable from fresh fills.
fn pattern_byte(id: u32, index: usize) -> u8 {
    (id.wrapping_mul(2_654_435_761) as usize)
        .wrapping_add(index)
        .wrapping_mul(151) as u8
}

fn fill_pattern(allocator: &mut SegFitAllocator, bp: usize, id: u32, size: usize) {
    for (i, byte) in allocator.payload_mut(bp).iter_mut().take(size).enumerate() {
        *byte = pattern_byte(id, i);
    }
}

fn verify_pattern(
    allocator: &SegFitAllocator,
    report: &mut RunReport,
    op_index: usize,
    bp: usize,
    id: u32,
    size: usize,
) {
    for (i, &byte) in allocator.payload(bp).iter().take(size).enumerate() {
        let expected = pattern_byte(id, i);
        if byte != expected {
            violation(
                report,
                format!(
                    "op {op_index}: id {id} byte {i} is {byte:#04x}, expected {expected:#04x}"
                ),
            );
            return;
        }
    }
}
