//! Bounds-checked primitives for reading binary records.
//!
//! Every read in this crate goes through these helpers. They take an offset
//! relative to a slice, check it against the slice length with overflow-safe
//! arithmetic, and return `None` instead of panicking when the record does
//! not fit.
//!
//! - Integer reads are endian-aware (`Endian`), backed by `byteorder`
//! - Record reads decode `zerocopy` layouts and byte-swap foreign-order data
//! - C-string reads use `memchr` to find the terminator

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use zerocopy::{FromBytes, Immutable, IntoBytes};

// =============================================================================
// Byte Order
// =============================================================================

/// Byte order of a record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// Byte order of the host.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    /// Byte order of the host.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;

    /// Returns true if records in this order can be read without swapping.
    #[inline]
    pub fn is_native(self) -> bool {
        self == Self::NATIVE
    }

    /// Decodes a u16 from exactly two bytes.
    #[inline(always)]
    pub fn u16(self, bytes: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(bytes),
            Endian::Big => BigEndian::read_u16(bytes),
        }
    }

    /// Decodes a u32 from exactly four bytes.
    #[inline(always)]
    pub fn u32(self, bytes: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        }
    }

    /// Decodes a u64 from exactly eight bytes.
    #[inline(always)]
    pub fn u64(self, bytes: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(bytes),
            Endian::Big => BigEndian::read_u64(bytes),
        }
    }

    /// Encodes a u32 into `out`, which must be at least four bytes long.
    #[inline(always)]
    pub fn write_u32(self, out: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(out, value),
            Endian::Big => BigEndian::write_u32(out, value),
        }
    }
}

// =============================================================================
// Bounds-Checked Reads
// =============================================================================

/// Returns `len` bytes starting at `offset`, or `None` if they do not fit.
#[inline(always)]
pub fn bytes_at(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(len)?)
}

/// Same as [`bytes_at`] with 64-bit offset and length taken from a record.
#[inline]
pub fn bytes_at_u64(data: &[u8], offset: u64, len: u64) -> Option<&[u8]> {
    bytes_at(
        data,
        usize::try_from(offset).ok()?,
        usize::try_from(len).ok()?,
    )
}

/// Reads a u32 at `offset`.
#[inline(always)]
pub fn read_u32_at(data: &[u8], offset: usize, endian: Endian) -> Option<u32> {
    bytes_at(data, offset, 4).map(|b| endian.u32(b))
}

/// Reads a u64 at `offset`.
#[inline(always)]
pub fn read_u64_at(data: &[u8], offset: usize, endian: Endian) -> Option<u64> {
    bytes_at(data, offset, 8).map(|b| endian.u64(b))
}

/// Reads a big-endian u32 at `offset`. Fat headers and code signatures use this.
#[inline(always)]
pub fn read_u32_be_at(data: &[u8], offset: usize) -> Option<u32> {
    read_u32_at(data, offset, Endian::Big)
}

// =============================================================================
// Record Reads
// =============================================================================

/// A fixed-layout record whose integer fields can be byte-swapped in place.
///
/// Implemented for every on-disk structure so that images stored in the
/// foreign byte order decode to the same values as native ones.
pub trait ByteSwap: Sized {
    /// Returns the record with every multi-byte integer field swapped.
    fn swap_bytes(self) -> Self;
}

/// Implements [`ByteSwap`] by swapping the listed integer fields.
macro_rules! impl_byte_swap {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::util::ByteSwap for $ty {
            #[inline]
            fn swap_bytes(mut self) -> Self {
                $(self.$field = self.$field.swap_bytes();)*
                self
            }
        }
    };
}
pub(crate) use impl_byte_swap;

/// Decodes a record at `offset`, normalizing it to host byte order.
#[inline]
pub fn read_record<T: FromBytes + ByteSwap>(data: &[u8], offset: usize, endian: Endian) -> Option<T> {
    let (record, _) = T::read_from_prefix(data.get(offset..)?).ok()?;
    Some(if endian.is_native() {
        record
    } else {
        record.swap_bytes()
    })
}

/// Encodes a host-order record into bytes of the given order.
pub fn encode_record<T: IntoBytes + Immutable + ByteSwap + Copy>(record: T, endian: Endian) -> Vec<u8> {
    let record = if endian.is_native() {
        record
    } else {
        record.swap_bytes()
    };
    record.as_bytes().to_vec()
}

// =============================================================================
// Strings
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Returns `data.len()` if there is none.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Returns the bytes of the NUL-terminated string at `offset`.
///
/// Fails if `offset` is out of range or no terminator occurs before the end
/// of `data`.
#[inline]
pub fn c_bytes_at(data: &[u8], offset: usize) -> Option<&[u8]> {
    let tail = data.get(offset..)?;
    memchr::memchr(0, tail).map(|end| &tail[..end])
}

/// Returns the NUL-terminated UTF-8 string at `offset`.
#[inline]
pub fn c_str_at(data: &[u8], offset: usize) -> Option<&str> {
    c_bytes_at(data, offset).and_then(|b| std::str::from_utf8(b).ok())
}

/// Decodes a fixed-width, NUL-padded name field such as `segname`.
pub fn fixed_name(raw: &[u8]) -> &str {
    let end = memchr_null(raw);
    std::str::from_utf8(&raw[..end]).unwrap_or("")
}

/// Encodes `name` into a fixed-width, NUL-padded field.
pub fn to_fixed_name<const N: usize>(name: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = name.as_bytes();
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

// =============================================================================
// LEB128
// =============================================================================

/// Reads an unsigned LEB128 value with fast paths for common cases.
///
/// Most LEB128 values in Mach-O files (symbol offsets, ordinals, sizes) fit
/// in one or two bytes.
///
/// # Returns
///
/// `(value, bytes_consumed)` or `None` if truncated or wider than 64 bits.
#[inline(always)]
pub fn read_uleb128_fast(data: &[u8]) -> Option<(u64, usize)> {
    let b0 = *data.first()?;
    if b0 < 0x80 {
        return Some((b0 as u64, 1));
    }

    let b1 = *data.get(1)?;
    if b1 < 0x80 {
        let value = ((b0 & 0x7F) as u64) | ((b1 as u64) << 7);
        return Some((value, 2));
    }

    let mut result: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte < 0x80 {
            return Some((result, i + 1));
        }
    }

    None
}

/// Reads a signed LEB128 value.
#[inline(always)]
pub fn read_sleb128_fast(data: &[u8]) -> Option<(i64, usize)> {
    let b0 = *data.first()?;
    if b0 < 0x80 {
        let value = if (b0 & 0x40) != 0 {
            (b0 as i64) | !0x7F_i64
        } else {
            b0 as i64
        };
        return Some((value, 1));
    }

    let mut result: i64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return None;
        }

        result |= ((byte & 0x7F) as i64) << shift;
        shift += 7;

        if byte < 0x80 {
            if shift < 64 && (byte & 0x40) != 0 {
                result |= !0_i64 << shift;
            }
            return Some((result, i + 1));
        }
    }

    None
}

// =============================================================================
// Alignment
// =============================================================================

/// Aligns a value up to the given power-of-two alignment.
///
/// Returns `None` if the result does not fit in a u64.
#[inline(always)]
pub const fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}
