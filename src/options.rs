//! Runtime hyperparameters of the LSH search and the `key value` options
//! file they can be loaded from / saved to.
use crate::constants::BLOCKING_SIZE;
use crate::error::{Error, Result};
use crate::scalar::{HashWord, Index, Real};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

/// The hash function family used to bucket points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashFamilyKind {
    RandomProjections,
    EntropyBased,
    Mixed,
}

impl fmt::Display for HashFamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashFamilyKind::RandomProjections => "random_projections",
            HashFamilyKind::EntropyBased => "entropy_based",
            HashFamilyKind::Mixed => "mixed",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for HashFamilyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random_projections" => Ok(HashFamilyKind::RandomProjections),
            "entropy_based" => Ok(HashFamilyKind::EntropyBased),
            "mixed" => Ok(HashFamilyKind::Mixed),
            _ => Err(Error::Config(format!(
                "unknown hash functions type '{}' (expected one of 'random_projections', 'entropy_based', 'mixed')",
                s
            ))),
        }
    }
}

/// All runtime hyperparameters. The scalar types and the blocking size are
/// fixed at compile time; an options file recording different ones is
/// rejected on load.
#[derive(Clone, Debug)]
pub struct Options<R = f32, I = u32, H = u32> {
    /// Number of hash functions in the hash pool.
    pub hash_pool_size: usize,
    /// Number of hash functions per hash table.
    pub num_hash_functions: usize,
    /// Number of hash tables.
    pub num_hash_tables: usize,
    /// Size of each hash table.
    pub hash_table_size: usize,
    /// Segment size of the random projections: h(x) = floor((a.x + b) / w).
    pub w: R,
    /// Number of cut-off points of the entropy-based hash functions.
    pub num_cut_off_points: usize,
    /// Number of buckets scanned per hash table and query, the primary
    /// bucket included. Families without a probing rule ignore the extra
    /// probes; values above `num_hash_functions` are rejected.
    pub num_multi_probes: usize,
    /// Seed of the hash family builders. 0 seeds from the OS.
    pub seed: u64,
    /// The hash function family.
    pub hash_family: HashFamilyKind,
    marker: PhantomData<(I, H)>,
}

impl<R: Real, I: Index, H: HashWord> Default for Options<R, I, H> {
    fn default() -> Self {
        Options {
            hash_pool_size: 32,
            num_hash_functions: 12,
            num_hash_tables: 8,
            hash_table_size: 105_613,
            w: R::one(),
            num_cut_off_points: 6,
            num_multi_probes: 1,
            seed: 0,
            hash_family: HashFamilyKind::RandomProjections,
            marker: PhantomData,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str, lineno: usize) -> Result<T> {
    value.parse().map_err(|_| {
        Error::Config(format!(
            "illegal value '{}' for option '{}' in line {}",
            value, key, lineno
        ))
    })
}

impl<R: Real, I: Index, H: HashWord> Options<R, I, H> {
    /// Load options from a `key value` file, starting from the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        Self::default().merged_from_file(path)
    }

    /// Override fields from a `key value` file. Blank lines and lines
    /// starting with `#` are ignored. Unknown keys and compile-time
    /// mismatches are configuration errors.
    pub fn merged_from_file(mut self, path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("can't read options file '{}': {}", path.display(), e))
        })?;

        for (idx, raw) in contents.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(' ').ok_or_else(|| {
                Error::Config(format!(
                    "illegal line {} '{}' in options file '{}'",
                    lineno,
                    line,
                    path.display()
                ))
            })?;
            let value = value.trim();

            match key {
                "real_type" | "index_type" | "hash_value_type" => {
                    let expected = match key {
                        "real_type" => R::NAME,
                        "index_type" => I::NAME,
                        _ => H::NAME,
                    };
                    if value != expected {
                        return Err(Error::Config(format!(
                            "the read {} is '{}', but this build uses '{}'",
                            key, value, expected
                        )));
                    }
                }
                "blocking_size" => {
                    let read: usize = parse_value(key, value, lineno)?;
                    if read != BLOCKING_SIZE {
                        return Err(Error::Config(format!(
                            "the read blocking_size is {}, but this build uses {}",
                            read, BLOCKING_SIZE
                        )));
                    }
                }
                "hash_functions_type" => self.hash_family = value.parse()?,
                "hash_pool_size" => self.hash_pool_size = parse_value(key, value, lineno)?,
                "num_hash_functions" => self.num_hash_functions = parse_value(key, value, lineno)?,
                "num_hash_tables" => self.num_hash_tables = parse_value(key, value, lineno)?,
                "hash_table_size" => self.hash_table_size = parse_value(key, value, lineno)?,
                "w" => {
                    let v: f64 = parse_value(key, value, lineno)?;
                    self.w = R::from(v).ok_or_else(|| {
                        Error::Config(format!("w value {} does not fit the real type", v))
                    })?;
                }
                "num_cut_off_points" => self.num_cut_off_points = parse_value(key, value, lineno)?,
                "num_multi_probes" => self.num_multi_probes = parse_value(key, value, lineno)?,
                "seed" => self.seed = parse_value(key, value, lineno)?,
                _ => {
                    return Err(Error::Config(format!(
                        "invalid option in line {} '{} {}' in options file '{}'",
                        lineno,
                        key,
                        value,
                        path.display()
                    )));
                }
            }
        }
        Ok(self)
    }

    /// Write the effective options. Only the master worker should call this.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, format!("{}", self))
            .map_err(|e| Error::Config(format!("can't write to file '{}': {}", path.display(), e)))
    }

    /// Sanity-check all values.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: usize) -> Result<()> {
            if value == 0 {
                return Err(Error::Config(format!(
                    "illegal {} value (0), must be greater than 0",
                    name
                )));
            }
            Ok(())
        }
        positive("hash_pool_size", self.hash_pool_size)?;
        positive("num_hash_functions", self.num_hash_functions)?;
        positive("num_hash_tables", self.num_hash_tables)?;
        positive("hash_table_size", self.hash_table_size)?;
        if !(self.w > R::zero()) {
            return Err(Error::Config(format!(
                "illegal w value ({}), must be greater than 0",
                self.w
            )));
        }
        if self.num_cut_off_points < 2 {
            return Err(Error::Config(format!(
                "illegal num_cut_off_points value ({}), must be at least 2",
                self.num_cut_off_points
            )));
        }
        if self.num_multi_probes == 0 || self.num_multi_probes > self.num_hash_functions {
            return Err(Error::Config(format!(
                "illegal num_multi_probes value ({}), must be in [1, num_hash_functions ({})]",
                self.num_multi_probes, self.num_hash_functions
            )));
        }
        let max_table_size = H::max_value()
            .to_usize()
            .unwrap_or(usize::MAX);
        if self.hash_table_size > max_table_size {
            return Err(Error::Config(format!(
                "hash_table_size ({}) exceeds the hash value type '{}'",
                self.hash_table_size,
                H::NAME
            )));
        }
        Ok(())
    }
}

impl<R: Real, I: Index, H: HashWord> fmt::Display for Options<R, I, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "real_type {}", R::NAME)?;
        writeln!(f, "index_type {}", I::NAME)?;
        writeln!(f, "hash_value_type {}", H::NAME)?;
        writeln!(f, "blocking_size {}", BLOCKING_SIZE)?;
        writeln!(f, "hash_functions_type {}", self.hash_family)?;
        writeln!(f, "hash_pool_size {}", self.hash_pool_size)?;
        writeln!(f, "num_hash_functions {}", self.num_hash_functions)?;
        writeln!(f, "num_hash_tables {}", self.num_hash_tables)?;
        writeln!(f, "hash_table_size {}", self.hash_table_size)?;
        writeln!(f, "w {}", self.w)?;
        writeln!(f, "num_cut_off_points {}", self.num_cut_off_points)?;
        writeln!(f, "num_multi_probes {}", self.num_multi_probes)?;
        writeln!(f, "seed {}", self.seed)
    }
}
