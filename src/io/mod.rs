//! Reading the point set and reading/writing neighbor files.
pub mod arff;
pub mod binary;

use crate::error::{Error, Result};
use crate::scalar::{Index, Real};
use crate::shard::DataAttributes;
use std::path::Path;
use std::str::FromStr;

/// The parser used for the input data file. Saved neighbor files and ground
/// truth files are always binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserKind {
    Binary,
    Arff,
}

impl std::fmt::Display for ParserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParserKind::Binary => "binary_parser",
            ParserKind::Arff => "arff_parser",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ParserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary_parser" => Ok(ParserKind::Binary),
            "arff_parser" => Ok(ParserKind::Arff),
            _ => Err(Error::Config(format!(
                "unknown file parser '{}' (expected 'binary_parser' or 'arff_parser')",
                s
            ))),
        }
    }
}

/// Read this worker's shard of the data file: a point-major buffer of
/// `rank_size * dims` values, the last worker's tail padded with copies of
/// its last real point.
pub fn read_points<R: Real, I: Index>(
    path: &Path,
    parser: ParserKind,
    rank: usize,
    comm_size: usize,
) -> Result<(DataAttributes, Vec<R>)> {
    let (total_size, dims, buffer) = match parser {
        ParserKind::Binary => binary::read_rank_rows::<R, I>(path, rank, comm_size)?,
        ParserKind::Arff => arff::read_rank_rows::<R>(path, rank, comm_size)?,
    };
    Ok((DataAttributes::new(total_size, dims, comm_size), buffer))
}
