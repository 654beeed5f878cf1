//! Allocation trace parsing.
//!
//! Traces use the classic malloc-driver `.rep` format: optional comment
//! lines (`#` or `//`), up to a handful of bare-integer header lines
//! (suggested heap size, id count, op count, weight), then one operation per
//! line:
//!
//! ```text
//! a <id> <size>    allocate
//! r <id> <size>    resize
//! f <id>           free
//! ```

use thiserror::Error;

/// One operation in an allocation trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// Allocate `size` bytes under `id`.
    Alloc { id: u32, size: usize },
    /// Resize the allocation under `id` to `size` bytes.
    Resize { id: u32, size: usize },
    /// Free the allocation under `id`.
    Free { id: u32 },
}

/// Trace parse failure, with the 1-based source line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// Operation letter other than `a`, `r`, or `f`.
    #[error("line {line}: unknown operation {op:?}")]
    UnknownOp { line: usize, op: String },
    /// Wrong number of operands or an unparsable integer.
    #[error("line {line}: malformed operands: {detail}")]
    MalformedOperands { line: usize, detail: String },
}

/// Parses a trace body into its operation list.
///
/// Comment lines, blank lines, and bare-integer header lines are skipped;
/// header values are advisory in the original driver and carry no meaning
/// here.
pub fn parse_trace(input: &str) -> Result<Vec<TraceOp>, TraceError> {
    let mut ops = Vec::new();
    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') || text.starts_with("//") {
            continue;
        }
        let mut fields = text.split_whitespace();
        let Some(op) = fields.next() else {
            continue;
        };
        if op.parse::<i64>().is_ok() {
            // Header line.
            continue;
        }
        let parsed = match op {
            "a" => TraceOp::Alloc {
                id: parse_field(fields.next(), line, "id")?,
                size: parse_field(fields.next(), line, "size")?,
            },
            "r" => TraceOp::Resize {
                id: parse_field(fields.next(), line, "id")?,
                size: parse_field(fields.next(), line, "size")?,
            },
            "f" => TraceOp::Free {
                id: parse_field(fields.next(), line, "id")?,
            },
            other => {
                return Err(TraceError::UnknownOp {
                    line,
                    op: other.to_string(),
                });
            }
        };
        if let Some(extra) = fields.next() {
            return Err(TraceError::MalformedOperands {
                line,
                detail: format!("unexpected trailing field {extra:?}"),
            });
        }
        ops.push(parsed);
    }
    Ok(ops)
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&str>,
    line: usize,
    name: &str,
) -> Result<T, TraceError> {
    let Some(text) = field else {
        return Err(TraceError::MalformedOperands {
            line,
            detail: format!("missing {name}"),
        });
    };
    text.parse().map_err(|_| TraceError::MalformedOperands {
        line,
        detail: format!("invalid {name} {text:?}"),
    })
}
