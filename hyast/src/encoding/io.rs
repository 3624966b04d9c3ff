//! Sequential byte reader and writer.
//!
//! [`ByteWriter`] grows on demand. [`ByteReader`] is bounds-checked: running out of data is
//! reported as [`DecodeError::UnexpectedEnd`] with the absolute offset in the module, never
//! as a panic.
//!
//! Substreams are composed arena-style: a section is fully written into its own child
//! [`ByteWriter`] and spliced into the parent in one copy, framed by its length on both
//! ends.
use crate::{
    encoding::integer::{
        VarintError, decode_sleb128, decode_uleb128, encode_sleb128, encode_uleb128,
        encoded_size_uleb128,
    },
    error::{DecodeError, EncodeError},
};

/// Growable output buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    #[inline]
    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write the low 24 bits of `value`, little-endian.
    #[inline]
    pub fn write_u24_le(&mut self, value: u32) {
        debug_assert!(value <= 0x00FF_FFFF, "value does not fit in 24 bits");
        self.buf.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    #[inline]
    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_i32_le(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_f64_le(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_uleb128(&mut self, value: u64) {
        encode_uleb128(value, &mut |b| self.buf.extend_from_slice(b));
    }

    #[inline]
    pub fn write_sleb128(&mut self, value: i64) {
        encode_sleb128(value, &mut |b| self.buf.extend_from_slice(b));
    }

    /// Write a ULEB128 byte length followed by the UTF-8 bytes of `value`.
    pub fn write_str(&mut self, value: &str) {
        let len = value.len() as u64;
        self.buf.reserve(encoded_size_uleb128(len) as usize + value.len());
        self.write_uleb128(len);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Write `count` as a fixed 32-bit field, failing if it does not fit.
    pub fn write_count(&mut self, section: &str, count: usize) -> Result<(), EncodeError> {
        let count = u32::try_from(count).map_err(|_| EncodeError::SectionTooLarge {
            section: section.to_owned(),
            len: count,
        })?;
        self.write_u32_le(count);
        Ok(())
    }

    /// Splice `child` into this buffer framed as `len child len`.
    pub fn write_substream(
        &mut self,
        section: &str,
        child: &ByteWriter,
    ) -> Result<(), EncodeError> {
        let len = u32::try_from(child.len()).map_err(|_| EncodeError::SectionTooLarge {
            section: section.to_owned(),
            len: child.len(),
        })?;
        self.buf.reserve(child.len() + 8);
        self.write_u32_le(len);
        self.buf.extend_from_slice(&child.buf);
        self.write_u32_le(len);
        Ok(())
    }
}

/// Forward-only, bounds-checked view over a byte slice.
///
/// `origin` is the absolute offset of `bytes[0]` in the module so that errors raised inside
/// a substream still point at the right place in the file.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    origin: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            origin: 0,
        }
    }

    /// Absolute offset of the next unread byte.
    #[inline]
    pub fn offset(&self) -> usize {
        self.origin + self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos == self.bytes.len()
    }

    #[cold]
    fn unexpected_end(&self, needed: usize) -> DecodeError {
        DecodeError::UnexpectedEnd {
            offset: self.offset(),
            needed,
            available: self.remaining(),
        }
    }

    /// Take the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(self.unexpected_end(len));
        }
        let bytes = self.bytes;
        let out = &bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u24_le(&mut self) -> Result<u32, DecodeError> {
        let [a, b, c] = self.read_array::<3>()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64_le(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    fn varint_error(&self, err: VarintError) -> DecodeError {
        match err {
            VarintError::Truncated => self.unexpected_end(self.remaining() + 1),
            VarintError::Overflow => DecodeError::MalformedVarint {
                offset: self.offset(),
            },
        }
    }

    pub fn read_uleb128(&mut self) -> Result<u64, DecodeError> {
        let mut slice = &self.bytes[self.pos..];
        let before = slice.len();
        let value = decode_uleb128(&mut slice).map_err(|e| self.varint_error(e))?;
        self.pos += before - slice.len();
        Ok(value)
    }

    pub fn read_sleb128(&mut self) -> Result<i64, DecodeError> {
        let mut slice = &self.bytes[self.pos..];
        let before = slice.len();
        let value = decode_sleb128(&mut slice).map_err(|e| self.varint_error(e))?;
        self.pos += before - slice.len();
        Ok(value)
    }

    /// Read a ULEB128 length followed by that many UTF-8 bytes.
    ///
    /// Malformed UTF-8 is rejected, never replaced.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len_offset = self.offset();
        let len = self.read_uleb128()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::MalformedVarint {
            offset: len_offset,
        })?;
        let start = self.offset();
        let bytes = self.read_bytes(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(err) => Err(DecodeError::InvalidUtf8 {
                offset: start + err.valid_up_to(),
                reason: err.to_string(),
            }),
        }
    }

    /// Read a `len bytes len` frame and return a reader over its body.
    pub fn read_substream(&mut self) -> Result<ByteReader<'a>, DecodeError> {
        let offset = self.offset();
        let header = self.read_u32_le()?;
        let origin = self.offset();
        let body = self.read_bytes(header as usize)?;
        let footer = self.read_u32_le()?;
        if header != footer {
            return Err(DecodeError::SubstreamLengthMismatch {
                offset,
                header,
                footer,
            });
        }
        Ok(ByteReader {
            bytes: body,
            pos: 0,
            origin,
        })
    }

    /// Fail unless every byte of this reader has been consumed.
    pub fn expect_end(&self, section: &str) -> Result<(), DecodeError> {
        if self.is_eof() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                section: section.to_owned(),
                offset: self.offset(),
                remaining: self.remaining(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_fields_are_little_endian() {
        let mut w = ByteWriter::new();
        w.write_u32_le(0x0403_0201);
        w.write_u24_le(0x0A_0B0C);
        w.write_i32_le(-2);
        assert_eq!(
            w.as_slice(),
            &[0x01, 0x02, 0x03, 0x04, 0x0C, 0x0B, 0x0A, 0xFE, 0xFF, 0xFF, 0xFF]
        );

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u32_le(), Ok(0x0403_0201));
        assert_eq!(r.read_u24_le(), Ok(0x0A_0B0C));
        assert_eq!(r.read_i32_le(), Ok(-2));
        assert!(r.is_eof());
    }

    #[test]
    fn reading_past_the_end_reports_offset() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        r.read_u8().unwrap();
        let err = r.read_u32_le().unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedEnd {
                offset: 1,
                needed: 4,
                available: 2
            }
        );
        // A failed read consumes nothing.
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn substream_header_equals_footer() {
        let mut child = ByteWriter::new();
        child.write_str("hello");
        let mut parent = ByteWriter::new();
        parent.write_u8(0xEE);
        parent.write_substream("test", &child).unwrap();

        let bytes = parent.as_slice();
        let len = child.len() as u32;
        assert_eq!(&bytes[1..5], &len.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 4..], &len.to_le_bytes());

        let mut r = ByteReader::new(bytes);
        r.read_u8().unwrap();
        let mut sub = r.read_substream().unwrap();
        assert_eq!(sub.offset(), 5);
        assert_eq!(sub.read_str().unwrap(), "hello");
        sub.expect_end("test").unwrap();
        assert!(r.is_eof());
    }

    #[test]
    fn string_prefix_matches_its_encoded_size() {
        let long = "x".repeat(300);
        for value in ["", "hello", long.as_str()] {
            let mut w = ByteWriter::new();
            w.write_str(value);
            let prefix = encoded_size_uleb128(value.len() as u64) as usize;
            assert_eq!(w.len(), prefix + value.len());
            assert_eq!(ByteReader::new(w.as_slice()).read_str().as_deref(), Ok(value));
        }
    }

    #[test]
    fn substream_footer_mismatch_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        let err = ByteReader::new(&bytes).read_substream().unwrap_err();
        assert!(err.is_substream_length_mismatch());
    }

    #[test]
    fn truncated_substream_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&10u32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let err = ByteReader::new(&bytes).read_substream().unwrap_err();
        assert!(err.is_unexpected_end());
    }

    #[test]
    fn invalid_utf8_is_fatal() {
        let mut w = ByteWriter::new();
        w.write_uleb128(3);
        // Overlong encoding of '/'
        w.write_bytes(&[0x41, 0xC0, 0xAF]);
        let err = ByteReader::new(w.as_slice()).read_str().unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidUtf8 {
                offset: 2,
                reason: std::str::from_utf8(&[0x41, 0xC0, 0xAF]).unwrap_err().to_string(),
            }
        );
    }

    #[test]
    fn trailing_bytes_are_reported() {
        let r = ByteReader::new(&[0x00]);
        assert!(r.expect_end("root").unwrap_err().is_trailing_bytes());
    }
}
