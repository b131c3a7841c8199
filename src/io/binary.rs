//! The binary file format shared by data files, saved neighbor files and
//! ground truth files.
//!
//! Little-endian, single stream: two index words (`rows`, `cols`) followed
//! by `rows * cols` values in row-major order. Every worker reads only its
//! own byte range; writes go through the master worker, which concatenates
//! the per-worker slices in rank order.
use crate::comm::{Communicator, Tag};
use crate::error::{Error, Result};
use crate::scalar::{to_index, Index, LeBytes};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

fn file_error(path: &Path, reason: impl Into<String>) -> Error {
    Error::DataFile {
        file: path.display().to_string(),
        reason: reason.into(),
    }
}

fn decode<T: LeBytes>(raw: &[u8], out: &mut Vec<T>) {
    for chunk in raw.chunks_exact(T::WIDTH) {
        out.push(T::read_le(chunk));
    }
}

/// Read the `(rows, cols)` header.
pub fn read_header<I: Index>(path: &Path) -> Result<(usize, usize)> {
    let mut file = File::open(path).map_err(|e| file_error(path, e.to_string()))?;
    let mut raw = vec![0u8; 2 * I::WIDTH];
    file.read_exact(&mut raw)
        .map_err(|_| file_error(path, "file too short for the header"))?;
    let rows = crate::scalar::from_index(I::read_le(&raw[..I::WIDTH]));
    let cols = crate::scalar::from_index(I::read_le(&raw[I::WIDTH..]));
    if rows == 0 || cols == 0 {
        return Err(file_error(path, "header describes an empty file"));
    }
    Ok((rows, cols))
}

/// Read this worker's row range. Returns `(rows, cols, values)` where
/// `values` holds `rank_rows * cols` entries in row-major order; the last
/// worker's missing tail rows are filled with copies of its last real row.
pub fn read_rank_rows<T: LeBytes, I: Index>(
    path: &Path,
    rank: usize,
    comm_size: usize,
) -> Result<(usize, usize, Vec<T>)> {
    let (rows, cols) = read_header::<I>(path)?;

    let mut file = File::open(path).map_err(|e| file_error(path, e.to_string()))?;
    let expected = (2 * I::WIDTH + rows * cols * T::WIDTH) as u64;
    let actual = file
        .metadata()
        .map_err(|e| file_error(path, e.to_string()))?
        .len();
    if actual != expected {
        return Err(file_error(
            path,
            format!(
                "file size ({} bytes) doesn't match header information ({} x {} values, {} bytes)",
                actual, rows, cols, expected
            ),
        ));
    }

    let rank_rows = (rows + comm_size - 1) / comm_size;
    if (comm_size - 1) * rank_rows >= rows {
        return Err(Error::Config(format!(
            "{} workers cannot share {} points (the last worker would hold none)",
            comm_size, rows
        )));
    }
    let correct_rank_rows = if rank == comm_size - 1 {
        rows - (comm_size - 1) * rank_rows
    } else {
        rank_rows
    };

    let offset = (2 * I::WIDTH + rank * rank_rows * cols * T::WIDTH) as u64;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| file_error(path, e.to_string()))?;
    let mut raw = vec![0u8; correct_rank_rows * cols * T::WIDTH];
    file.read_exact(&mut raw)
        .map_err(|_| file_error(path, "short read"))?;

    let mut values = Vec::with_capacity(rank_rows * cols);
    decode::<T>(&raw, &mut values);
    // pad the tail with the last real row
    for _ in correct_rank_rows..rank_rows {
        let last = (correct_rank_rows - 1) * cols;
        for col in 0..cols {
            let value = values[last + col];
            values.push(value);
        }
    }
    Ok((rows, cols, values))
}

/// Write a file in rank order: every worker passes its own row-major slice,
/// the master receives them over the communicator and writes header plus
/// payload.
pub fn write_gathered<T, I>(
    path: &Path,
    rows: usize,
    cols: usize,
    local_rows: &[T],
    comm: &Communicator,
) -> Result<()>
where
    T: LeBytes + Serialize + DeserializeOwned + Copy,
    I: Index,
{
    if !comm.is_master() {
        return comm.send(crate::constants::MASTER, Tag::Gather, local_rows);
    }

    let file = File::create(path).map_err(|e| file_error(path, e.to_string()))?;
    let mut out = BufWriter::new(file);
    let mut scratch = [0u8; 16];

    to_index::<I>(rows).write_le(&mut scratch);
    out.write_all(&scratch[..I::WIDTH])?;
    to_index::<I>(cols).write_le(&mut scratch);
    out.write_all(&scratch[..I::WIDTH])?;

    let write_slice = |values: &[T], out: &mut BufWriter<File>| -> Result<()> {
        let mut buf = [0u8; 16];
        for value in values {
            value.write_le(&mut buf);
            out.write_all(&buf[..T::WIDTH])?;
        }
        Ok(())
    };

    write_slice(local_rows, &mut out)?;
    for src in 1..comm.size() {
        let part: Vec<T> = comm.recv(src, Tag::Gather)?;
        write_slice(&part, &mut out)?;
    }
    out.flush()?;
    Ok(())
}
