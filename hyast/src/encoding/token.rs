//! Token codec: tag indices, biased references and integer payloads.
//!
//! Reference values are written *biased*: index `i` becomes `i + 1` on the wire and `0`
//! stands for an absent reference, so absence needs no flag byte.
use crate::{
    config::IndexEncoding,
    encoding::io::{ByteReader, ByteWriter},
    error::{DecodeError, EncodeError},
};

impl IndexEncoding {
    fn write_raw(self, out: &mut ByteWriter, table: &str, value: u64) -> Result<(), EncodeError> {
        if value > self.max_token() {
            return Err(EncodeError::IndexOverflow {
                table: table.to_owned(),
                index: value,
                max: self.max_token(),
                width: match self {
                    IndexEncoding::Fixed24 => "24-bit",
                    _ => "32-bit",
                },
            });
        }
        match self {
            IndexEncoding::Varint => out.write_uleb128(value),
            IndexEncoding::Fixed32 => out.write_u32_le(value as u32),
            IndexEncoding::Fixed24 => out.write_u24_le(value as u32),
        }
        Ok(())
    }

    fn read_raw(self, input: &mut ByteReader<'_>) -> Result<u64, DecodeError> {
        match self {
            IndexEncoding::Varint => {
                let offset = input.offset();
                let value = input.read_uleb128()?;
                if value > u32::MAX as u64 {
                    return Err(DecodeError::MalformedVarint { offset });
                }
                Ok(value)
            }
            IndexEncoding::Fixed32 => Ok(input.read_u32_le()? as u64),
            IndexEncoding::Fixed24 => Ok(input.read_u24_le()? as u64),
        }
    }

    /// Write an unbiased index (tag tokens).
    pub fn write_index(
        self,
        out: &mut ByteWriter,
        table: &str,
        index: u32,
    ) -> Result<(), EncodeError> {
        self.write_raw(out, table, index as u64)
    }

    /// Read an unbiased index.
    pub fn read_index(self, input: &mut ByteReader<'_>) -> Result<u32, DecodeError> {
        Ok(self.read_raw(input)? as u32)
    }

    /// Write a reference as `index + 1`, or `0` for [`None`].
    pub fn write_biased(
        self,
        out: &mut ByteWriter,
        table: &str,
        index: Option<u32>,
    ) -> Result<(), EncodeError> {
        let raw = index.map_or(0, |i| i as u64 + 1);
        self.write_raw(out, table, raw)
    }

    /// Read a biased reference: `0` is [`None`], `k > 0` is `Some(k - 1)`.
    pub fn read_biased(self, input: &mut ByteReader<'_>) -> Result<Option<u32>, DecodeError> {
        let raw = self.read_raw(input)?;
        Ok(raw.checked_sub(1).map(|i| i as u32))
    }

    /// Write a 32-bit integer payload.
    pub fn write_integer(self, out: &mut ByteWriter, value: i32) {
        match self {
            IndexEncoding::Varint => out.write_sleb128(value as i64),
            IndexEncoding::Fixed32 | IndexEncoding::Fixed24 => out.write_i32_le(value),
        }
    }

    pub fn read_integer(self, input: &mut ByteReader<'_>) -> Result<i32, DecodeError> {
        match self {
            IndexEncoding::Varint => {
                let offset = input.offset();
                let value = input.read_sleb128()?;
                i32::try_from(value).map_err(|_| DecodeError::IntegerOutOfRange { offset })
            }
            IndexEncoding::Fixed32 | IndexEncoding::Fixed24 => input.read_i32_le(),
        }
    }
}
