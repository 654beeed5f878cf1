//! Conformance tooling for the segfit allocator.
//!
//! Replays allocation traces (or seeded synthetic workloads) against
//! [`segfit_core::SegFitAllocator`], verifying payload integrity and heap
//! consistency along the way, and renders machine- and human-readable run
//! reports.

pub mod runner;
pub mod trace;

pub use runner::{RunReport, RunnerConfig, render_markdown, run_ops, run_stress, stress_ops};
pub use trace::{TraceError, TraceOp, parse_trace};
