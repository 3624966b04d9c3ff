//! LEB128 varint helpers for compact integer representation.
//!
//! These are the byte-level primitives underneath every length prefix and, under
//! [`IndexEncoding::Varint`](crate::config::IndexEncoding::Varint), every table index and
//! integer payload of a module.
use thiserror::Error;

/// Encode an unsigned 64-bit integer using unsigned LEB128.
///
/// Format:
/// - Split the value into 7-bit chunks (base-128 digits), least-significant first.
/// - Every chunk but the last is pushed with MSB = 1 (continuation).
/// - The last chunk is pushed with MSB = 0.
///
/// Returns the number of bytes emitted.
///
/// Notes:
/// - Value 0 encodes to a single byte `0x00`.
/// - The encoding for 300 is `[0xAC, 0x02]`.
pub fn encode_uleb128<F: FnMut(&[u8])>(mut value: u64, encoder: &mut F) -> u64 {
    let mut size = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        size += 1;
        if value == 0 {
            encoder(&[byte]);
            return size;
        }
        encoder(&[byte | 0x80]);
    }
}

/// Encode a signed 64-bit integer using signed LEB128.
///
/// The sign is carried by bit 6 of the final byte; decoding sign-extends from there.
pub fn encode_sleb128<F: FnMut(&[u8])>(mut value: i64, encoder: &mut F) -> u64 {
    let mut size = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        size += 1;
        let sign_bit_clear = byte & 0x40 == 0;
        if (value == 0 && sign_bit_clear) || (value == -1 && !sign_bit_clear) {
            encoder(&[byte]);
            return size;
        }
        encoder(&[byte | 0x80]);
    }
}

/// Outcome of a failed varint decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// The slice ended before a byte with MSB = 0 was found.
    #[error("varint is truncated")]
    Truncated,
    /// The value does not fit in 64 bits.
    #[error("varint overflows 64 bits")]
    Overflow,
}

/// Decode one unsigned LEB128 integer from the front of `buf`.
///
/// On success the slice is advanced past the consumed bytes. On failure the slice is
/// left untouched so callers can report the offset of the bad varint.
pub fn decode_uleb128(buf: &mut &[u8]) -> Result<u64, VarintError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        let chunk = (byte & 0x7F) as u64;
        if shift == 63 && chunk > 1 {
            return Err(VarintError::Overflow);
        }
        value |= chunk << shift;

        if byte & 0x80 == 0 {
            *buf = &buf[i + 1..];
            return Ok(value);
        }

        shift += 7;
        if shift > 63 {
            return Err(VarintError::Overflow);
        }
    }

    Err(VarintError::Truncated)
}

/// Decode one signed LEB128 integer from the front of `buf`.
pub fn decode_sleb128(buf: &mut &[u8]) -> Result<i64, VarintError> {
    let mut value: i64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(VarintError::Overflow);
        }
        value |= ((byte & 0x7F) as i64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                value |= -1i64 << shift;
            }
            *buf = &buf[i + 1..];
            return Ok(value);
        }
    }

    Err(VarintError::Truncated)
}

/// Number of bytes [`encode_uleb128`] emits for `value`.
pub fn encoded_size_uleb128(value: u64) -> u64 {
    if value == 0 {
        return 1;
    }
    let sig_bits = (64 - value.leading_zeros()) as u64;
    sig_bits.div_ceil(7)
}
