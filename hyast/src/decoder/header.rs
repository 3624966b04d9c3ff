//! Module header and table directory.
use crate::{
    config::{IndexEncoding, WireFormat},
    encoding::{
        ByteReader,
        magic::{FORMAT_NAME, HeaderFlags, MAGIC},
    },
    error::DecodeError,
};

/// Read the magic, the format name and the configuration descriptor.
pub fn read_header(input: &mut ByteReader<'_>) -> Result<WireFormat, DecodeError> {
    if input.remaining() < MAGIC.len() || input.read_bytes(MAGIC.len())? != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let name = input.read_str()?;
    if name != FORMAT_NAME {
        return Err(DecodeError::FormatMismatch {
            expected: FORMAT_NAME.to_owned(),
            found: name,
        });
    }

    let index_encoding = IndexEncoding::from_byte(input.read_u8()?)?;
    let raw_flags = input.read_u8()?;
    let flags = HeaderFlags::from_bits(raw_flags).ok_or(DecodeError::UnknownFlags(raw_flags))?;
    Ok(WireFormat {
        index_encoding,
        flags,
    })
}

/// Entry counts of the object tables, as declared by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectDirectory {
    Shared(u32),
    /// `(shape tag index, entry count)` per table, in section order.
    Partitioned(Vec<(u32, u32)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub tags: u32,
    pub strings: u32,
    pub arrays: u32,
    pub objects: ObjectDirectory,
}

impl Directory {
    /// Declared objects across every object table.
    pub fn object_entries(&self) -> u64 {
        match &self.objects {
            ObjectDirectory::Shared(count) => *count as u64,
            ObjectDirectory::Partitioned(tables) => tables.iter().map(|&(_, c)| c as u64).sum(),
        }
    }

    /// Declared objects and arrays, i.e. the nodes a decoder preallocates.
    pub fn node_entries(&self) -> u64 {
        self.object_entries() + self.arrays as u64
    }

    /// Sum of every declared entry count.
    pub fn total_entries(&self) -> u64 {
        self.tags as u64 + self.strings as u64 + self.node_entries()
    }
}

pub fn read_directory(
    input: &mut ByteReader<'_>,
    wire: WireFormat,
) -> Result<Directory, DecodeError> {
    let tags = input.read_u32_le()?;
    let strings = input.read_u32_le()?;
    let arrays = input.read_u32_le()?;
    let objects = if wire.partitioned_tables() {
        let count = input.read_u32_le()?;
        // Every pair takes eight bytes; reject counts the input cannot hold before allocating.
        if count as usize > input.remaining() / 8 {
            return Err(DecodeError::UnexpectedEnd {
                offset: input.offset(),
                needed: count as usize * 8,
                available: input.remaining(),
            });
        }
        let mut tables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tables.push((input.read_u32_le()?, input.read_u32_le()?));
        }
        ObjectDirectory::Partitioned(tables)
    } else {
        ObjectDirectory::Shared(input.read_u32_le()?)
    };
    Ok(Directory {
        tags,
        strings,
        arrays,
        objects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ByteWriter;

    fn header(name: &str, encoding: u8, flags: u8) -> Vec<u8> {
        let mut out = ByteWriter::new();
        out.write_bytes(&MAGIC);
        out.write_str(name);
        out.write_u8(encoding);
        out.write_u8(flags);
        out.into_inner()
    }

    #[test]
    fn reads_descriptor() {
        let bytes = header(FORMAT_NAME, 2, 0b101);
        let wire = read_header(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(wire.index_encoding, IndexEncoding::Fixed24);
        assert!(wire.partitioned_tables());
        assert!(!wire.value_streams());
        assert!(wire.inline_objects());
    }

    #[test]
    fn header_errors() {
        let mut bytes = header(FORMAT_NAME, 0, 0);
        bytes[1] ^= 0xFF;
        assert_eq!(read_header(&mut ByteReader::new(&bytes)), Err(DecodeError::BadMagic));
        assert_eq!(read_header(&mut ByteReader::new(&MAGIC[..4])), Err(DecodeError::BadMagic));

        let bytes = header("hyast-module/0", 0, 0);
        assert!(read_header(&mut ByteReader::new(&bytes)).unwrap_err().is_format_mismatch());

        let bytes = header(FORMAT_NAME, 9, 0);
        assert_eq!(
            read_header(&mut ByteReader::new(&bytes)),
            Err(DecodeError::UnknownIndexEncoding(9))
        );

        let bytes = header(FORMAT_NAME, 0, 0x80);
        assert_eq!(
            read_header(&mut ByteReader::new(&bytes)),
            Err(DecodeError::UnknownFlags(0x80))
        );
    }

    #[test]
    fn partitioned_directory() {
        let mut out = ByteWriter::new();
        for v in [11u32, 2, 1, 2, 11, 5, 12, 1] {
            out.write_u32_le(v);
        }
        let bytes = out.into_inner();
        let wire = WireFormat {
            index_encoding: IndexEncoding::Varint,
            flags: HeaderFlags::PARTITIONED_TABLES,
        };
        let dir = read_directory(&mut ByteReader::new(&bytes), wire).unwrap();
        assert_eq!(dir.objects, ObjectDirectory::Partitioned(vec![(11, 5), (12, 1)]));
        assert_eq!(dir.total_entries(), 11 + 2 + 1 + 6);
    }
}
