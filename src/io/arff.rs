//! Text parser for `.arff` data files.
//!
//! Expected shape:
//!
//! ```text
//! @RELATION "foobar"
//!
//! @ATTRIBUTE x0 NUMERIC
//! @ATTRIBUTE x1 NUMERIC
//!
//! @DATA
//! 0.2,0.4
//! 1.3,1.6
//! ```
//!
//! `%` comments and blank lines are ignored. Every worker parses the whole
//! text and keeps its own row range, padded under the same rule as the
//! binary format.
use crate::error::{Error, Result};
use crate::scalar::Real;
use std::fs;
use std::path::Path;

fn file_error(path: &Path, reason: impl Into<String>) -> Error {
    Error::DataFile {
        file: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Read this worker's row range. Returns `(rows, dims, values)` with the
/// same contract as [`crate::io::binary::read_rank_rows`].
pub fn read_rank_rows<R: Real>(
    path: &Path,
    rank: usize,
    comm_size: usize,
) -> Result<(usize, usize, Vec<R>)> {
    let text = fs::read_to_string(path).map_err(|e| file_error(path, e.to_string()))?;

    let mut dims = 0usize;
    let mut in_data = false;
    let mut rows: Vec<Vec<R>> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        if !in_data {
            let lowered = line.to_ascii_lowercase();
            if lowered.starts_with("@attribute") {
                dims += 1;
            } else if lowered.starts_with("@data") {
                if dims == 0 {
                    return Err(file_error(path, "no @ATTRIBUTE declarations before @DATA"));
                }
                in_data = true;
            } else if !lowered.starts_with("@relation") {
                return Err(file_error(
                    path,
                    format!("unexpected header line {} '{}'", lineno, line),
                ));
            }
            continue;
        }

        let mut row = Vec::with_capacity(dims);
        for field in line.split(',') {
            let value: f64 = field.trim().parse().map_err(|_| {
                file_error(
                    path,
                    format!("illegal value '{}' in line {}", field.trim(), lineno),
                )
            })?;
            row.push(R::from(value).unwrap_or_else(R::zero));
        }
        if row.len() != dims {
            return Err(file_error(
                path,
                format!(
                    "line {} has {} values but {} attributes were declared",
                    lineno,
                    row.len(),
                    dims
                ),
            ));
        }
        rows.push(row);
    }

    if !in_data || rows.is_empty() {
        return Err(file_error(path, "no data rows"));
    }

    let total = rows.len();
    let rank_rows = (total + comm_size - 1) / comm_size;
    if (comm_size - 1) * rank_rows >= total {
        return Err(Error::Config(format!(
            "{} workers cannot share {} points (the last worker would hold none)",
            comm_size, total
        )));
    }
    let correct_rank_rows = if rank == comm_size - 1 {
        total - (comm_size - 1) * rank_rows
    } else {
        rank_rows
    };

    let begin = rank * rank_rows;
    let mut values = Vec::with_capacity(rank_rows * dims);
    for row in &rows[begin..begin + correct_rank_rows] {
        values.extend_from_slice(row);
    }
    for _ in correct_rank_rows..rank_rows {
        let last = &rows[begin + correct_rank_rows - 1];
        values.extend_from_slice(last);
    }
    Ok((total, dims, values))
}
