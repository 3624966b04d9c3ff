//! Per-tag value streams.
//!
//! With value streams disabled every token lands in the section currently being written.
//! With them enabled a token written under tag `T` lands in the stream of `T` (tag tokens
//! themselves go to the stream of `any`), and the streams are stored as their own
//! substreams ahead of the object tables. Grouping tokens of one kind together helps
//! general-purpose compressors applied on top of a module.
use std::collections::BTreeMap;

use crate::{
    encoding::{
        io::{ByteReader, ByteWriter},
        magic::BuiltinTag,
    },
    error::DecodeError,
    shape::{ShapeId, Tag},
};

/// Tag index of the stream receiving payloads written under `tag`.
///
/// A shape without objects has no tag; null references to it share the `object` stream.
pub fn stream_index(tag: Tag, shape_tag: impl FnOnce(ShapeId) -> Option<u32>) -> u32 {
    match tag {
        Tag::Builtin(builtin) => builtin.seed_index(),
        Tag::Shape(shape) => shape_tag(shape).unwrap_or(BuiltinTag::Object.seed_index()),
    }
}

/// Write side of the value streams.
#[derive(Debug, Default)]
pub struct ValueStreams {
    streams: Option<BTreeMap<u32, ByteWriter>>,
}

impl ValueStreams {
    pub fn new(enabled: bool) -> Self {
        Self {
            streams: enabled.then(BTreeMap::new),
        }
    }

    /// Pick the writer for a token of tag index `tag`.
    #[inline]
    pub fn route<'s>(&'s mut self, section: &'s mut ByteWriter, tag: u32) -> &'s mut ByteWriter {
        match &mut self.streams {
            Some(streams) => streams.entry(tag).or_default(),
            None => section,
        }
    }

    /// Non-empty streams ordered by tag index.
    pub fn into_streams(self) -> impl Iterator<Item = (u32, ByteWriter)> {
        self.streams
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, w)| !w.is_empty())
    }
}

/// Read side of the value streams.
#[derive(Debug, Default)]
pub struct ValueStreamReaders<'a> {
    streams: Option<BTreeMap<u32, ByteReader<'a>>>,
}

impl<'a> ValueStreamReaders<'a> {
    pub fn disabled() -> Self {
        Self { streams: None }
    }

    pub fn enabled() -> Self {
        Self {
            streams: Some(BTreeMap::new()),
        }
    }

    /// Register the stream of `tag`; a tag may own at most one stream.
    pub fn insert(&mut self, tag: u32, reader: ByteReader<'a>) -> Result<(), DecodeError> {
        let streams = self.streams.get_or_insert_with(BTreeMap::new);
        if streams.insert(tag, reader).is_some() {
            return Err(DecodeError::ValueStream {
                tag,
                problem: "declared more than once",
            });
        }
        Ok(())
    }

    /// Pick the reader for a token of tag index `tag`.
    #[inline]
    pub fn route<'s>(
        &'s mut self,
        section: &'s mut ByteReader<'a>,
        tag: u32,
    ) -> Result<&'s mut ByteReader<'a>, DecodeError> {
        match &mut self.streams {
            Some(streams) => streams.get_mut(&tag).ok_or(DecodeError::ValueStream {
                tag,
                problem: "read but never declared",
            }),
            None => Ok(section),
        }
    }

    /// Fail unless every stream was consumed exactly.
    pub fn expect_end(&self) -> Result<(), DecodeError> {
        for (tag, reader) in self.streams.iter().flatten() {
            reader.expect_end(&format!("value stream #{tag}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_without_tags_share_the_object_stream() {
        let shape = Tag::Shape(ShapeId::from_raw(3));
        assert_eq!(stream_index(shape, |_| Some(14)), 14);
        assert_eq!(stream_index(shape, |_| None), BuiltinTag::Object.seed_index());
        assert_eq!(stream_index(Tag::DOUBLE, |_| None), BuiltinTag::Double.seed_index());
    }

    #[test]
    fn disabled_streams_write_to_the_section() {
        let mut streams = ValueStreams::new(false);
        let mut section = ByteWriter::new();
        streams.route(&mut section, 4).write_u8(1);
        streams.route(&mut section, 9).write_u8(2);
        assert_eq!(section.as_slice(), &[1, 2]);
        assert_eq!(streams.into_streams().count(), 0);
    }

    #[test]
    fn enabled_streams_split_by_tag() {
        let mut streams = ValueStreams::new(true);
        let mut section = ByteWriter::new();
        streams.route(&mut section, 4).write_u8(1);
        streams.route(&mut section, 9).write_u8(2);
        streams.route(&mut section, 4).write_u8(3);
        assert!(section.is_empty());

        let collected: Vec<_> = streams
            .into_streams()
            .map(|(tag, w)| (tag, w.into_inner()))
            .collect();
        assert_eq!(collected, vec![(4, vec![1, 3]), (9, vec![2])]);
    }

    #[test]
    fn readers_reject_undeclared_and_duplicate_streams() {
        let data = [7u8];
        let mut readers = ValueStreamReaders::enabled();
        readers.insert(3, ByteReader::new(&data)).unwrap();
        assert!(readers.insert(3, ByteReader::new(&data)).is_err());

        let mut section = ByteReader::new(&[]);
        assert_eq!(readers.route(&mut section, 3).unwrap().read_u8(), Ok(7));
        assert!(readers.route(&mut section, 5).unwrap_err().is_value_stream());
        readers.expect_end().unwrap();
    }
}
