//! Generic traits for the three scalar types the search is parameterized by:
//! coordinates/distances, point indices and hash values.
use num::traits::WrappingAdd;
use num::{Float, FromPrimitive, PrimInt, ToPrimitive, Unsigned};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::ops::AddAssign;

/// Fixed-width little-endian encoding, used by the binary file formats.
pub trait LeBytes: Sized + Copy {
    const WIDTH: usize;
    fn write_le(self, out: &mut [u8]);
    fn read_le(raw: &[u8]) -> Self;
}

macro_rules! impl_le_bytes {
    ($t:ty) => {
        impl LeBytes for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn write_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(raw: &[u8]) -> Self {
                let mut bytes = [0u8; Self::WIDTH];
                bytes.copy_from_slice(&raw[..Self::WIDTH]);
                Self::from_le_bytes(bytes)
            }
        }
    };
}

impl_le_bytes!(f32);
impl_le_bytes!(f64);
impl_le_bytes!(u32);
impl_le_bytes!(u64);

/// Floating point type of the coordinates, hash coefficients and distances.
pub trait Real:
    Float
    + AddAssign
    + FromPrimitive
    + ToPrimitive
    + Default
    + Debug
    + Display
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + LeBytes
    + 'static
{
    const NAME: &'static str;
}

impl Real for f32 {
    const NAME: &'static str = "f32";
}
impl Real for f64 {
    const NAME: &'static str = "f64";
}

/// Unsigned integral type wide enough to address the whole point set. Point
/// IDs are stored and serialized in this type.
pub trait Index:
    PrimInt
    + Unsigned
    + Hash
    + FromPrimitive
    + ToPrimitive
    + Default
    + Debug
    + Display
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + LeBytes
    + 'static
{
    const NAME: &'static str;
}

impl Index for u32 {
    const NAME: &'static str = "u32";
}
impl Index for u64 {
    const NAME: &'static str = "u64";
}

/// Unsigned type the hash values are computed in. The mixing constants used
/// to fold per-function hashes depend on the width of this type.
pub trait HashWord:
    PrimInt
    + Unsigned
    + WrappingAdd
    + FromPrimitive
    + ToPrimitive
    + Default
    + Debug
    + Display
    + Send
    + Sync
    + 'static
{
    const NAME: &'static str;
    const MIX: Self;
    const SHL: usize;
    const SHR: usize;

    /// Truncating conversion of an already-floored projection value.
    /// Negative values wrap like a two's complement cast.
    fn wrap_floor(v: f64) -> Self;
    /// Truncating conversion from `usize`.
    fn wrap_usize(v: usize) -> Self;
}

impl HashWord for u16 {
    const NAME: &'static str = "u16";
    const MIX: u16 = 0x9e37;
    const SHL: usize = 3;
    const SHR: usize = 1;

    fn wrap_floor(v: f64) -> u16 {
        v as i64 as u16
    }
    fn wrap_usize(v: usize) -> u16 {
        v as u16
    }
}

impl HashWord for u32 {
    const NAME: &'static str = "u32";
    const MIX: u32 = 0x9e37_79b9;
    const SHL: usize = 6;
    const SHR: usize = 2;

    fn wrap_floor(v: f64) -> u32 {
        v as i64 as u32
    }
    fn wrap_usize(v: usize) -> u32 {
        v as u32
    }
}

impl HashWord for u64 {
    const NAME: &'static str = "u64";
    const MIX: u64 = 0x9e37_79b9_7f4a_7c15;
    const SHL: usize = 12;
    const SHR: usize = 4;

    fn wrap_floor(v: f64) -> u64 {
        v as i64 as u64
    }
    fn wrap_usize(v: usize) -> u64 {
        v as u64
    }
}

/// Convert a point index into the stored ID type.
pub fn to_index<I: Index>(v: usize) -> I {
    I::from_usize(v).expect("point index overflows the index type")
}

/// Convert a stored ID back into a point index.
pub fn from_index<I: Index>(v: I) -> usize {
    v.to_usize().expect("point ID does not fit in usize")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_le_bytes_round_trip() {
        let mut buf = [0u8; 8];
        1.5f32.write_le(&mut buf);
        assert_eq!(f32::read_le(&buf), 1.5);

        42u64.write_le(&mut buf);
        assert_eq!(u64::read_le(&buf), 42);
        assert_eq!(&buf[..8], &[42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_wrap_floor_negative() {
        assert_eq!(u32::wrap_floor(-1.0), u32::MAX);
        assert_eq!(u32::wrap_floor(3.0), 3);
        assert_eq!(u16::wrap_floor(-2.0), u16::MAX - 1);
    }
}
