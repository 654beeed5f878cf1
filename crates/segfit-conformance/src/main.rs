//! CLI entrypoint for segfit conformance tooling.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use segfit_conformance::{RunnerConfig, parse_trace, render_markdown, run_ops, run_stress};

/// CLI for replaying allocation traces against the segfit allocator.
#[derive(Debug, Parser)]
#[command(name = "segfit-conformance")]
#[command(about = "Conformance tooling for the segfit allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Supported CLI subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a trace file and report the outcome.
    Run {
        /// Trace file in malloc-driver `.rep` format.
        trace: PathBuf,
        /// Optional path for the JSON report.
        #[arg(long)]
        report_json: Option<PathBuf>,
        /// Run the heap checker every N ops (0 = only at the end).
        #[arg(long, default_value_t = 64)]
        check_every: usize,
    },
    /// Replay a seeded synthetic workload.
    Stress {
        /// Number of generated operations.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        /// Workload seed.
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Maximum request size in bytes.
        #[arg(long, default_value_t = 4096)]
        max_size: usize,
        /// Optional path for the JSON report.
        #[arg(long)]
        report_json: Option<PathBuf>,
        /// Run the heap checker every N ops (0 = only at the end).
        #[arg(long, default_value_t = 64)]
        check_every: usize,
    },
}

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let (report, report_json) = match cli.command {
        Command::Run {
            trace,
            report_json,
            check_every,
        } => {
            let body = fs::read_to_string(trace)?;
            let ops = parse_trace(&body).map_err(std::io::Error::other)?;
            let config = RunnerConfig {
                check_every,
                ..RunnerConfig::default()
            };
            let report = run_ops(&ops, &config).map_err(std::io::Error::other)?;
            (report, report_json)
        }
        Command::Stress {
            ops,
            seed,
            max_size,
            report_json,
            check_every,
        } => {
            let config = RunnerConfig {
                check_every,
                ..RunnerConfig::default()
            };
            let report =
                run_stress(seed, ops, max_size, &config).map_err(std::io::Error::other)?;
            (report, report_json)
        }
    };

    print!("{}", render_markdown(&report));
    if let Some(path) = report_json {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }
    if !report.passed {
        return Err(std::io::Error::other("conformance run failed"));
    }
    Ok(())
}
