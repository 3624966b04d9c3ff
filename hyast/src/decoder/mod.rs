//! Module to tree decoding.
//!
//! The decoder trusts nothing: every count is checked against the directory, every index
//! against its table, every substream against its footer, and every section must be
//! consumed exactly. Objects and arrays stored in tables are allocated up front from the
//! directory counts, so references may point forward; inlined objects are allocated as
//! they are read. Once everything is read, references into the shared object table are
//! checked against the shapes their fields declare, and the arena must be free of cycles.
use std::collections::HashMap;

use log::{debug, info};
use strum::IntoEnumIterator;

use crate::{
    config::WireFormat,
    encoding::{
        ByteReader,
        magic::BuiltinTag,
        stream::{ValueStreamReaders, stream_index},
    },
    error::{DecodeError, HyResult},
    shape::{FieldCodec, ShapeId, ShapeRegistry, Tag, TypeDecl, tag::ensure_terminal},
    tree::{Node, NodeId, Object, Tree, Value},
};

pub mod header;

use header::{Directory, ObjectDirectory, read_directory, read_header};

/// Decode a module produced by [`encode`](crate::encode) with a matching registry.
pub fn decode(bytes: &[u8], registry: &ShapeRegistry) -> HyResult<Tree> {
    let mut input = ByteReader::new(bytes);
    let wire = read_header(&mut input)?;
    let directory = read_directory(&mut input, wire)?;
    debug!(
        "Decoding module: {} encoding, flags {:?}, {} declared entries.",
        wire.index_encoding,
        wire.flags,
        directory.total_entries()
    );

    let codecs = registry.field_codecs(wire.partitioned_tables());
    let mut decoder = Decoder {
        registry,
        wire,
        codecs: &codecs,
        tags: Vec::new(),
        shape_tags: HashMap::new(),
        strings: Vec::new(),
        tables: Vec::new(),
        table_of_shape: HashMap::new(),
        arrays: Vec::new(),
        tree: Tree::new(),
        streams: ValueStreamReaders::disabled(),
        shape_refs: Vec::new(),
    };
    decoder.read_module(&mut input, &directory)?;
    input.expect_end("module")?;
    decoder.check_shape_refs()?;
    if let Some(node) = decoder.tree.find_cycle() {
        return Err(DecodeError::CyclicReference { node: node.raw() }.into());
    }
    info!("Decoded module: {} node(s).", decoder.tree.len());
    Ok(decoder.tree)
}

/// Preallocated nodes of one object table.
struct ObjectSlots {
    label: String,
    shape: Option<ShapeId>,
    nodes: Vec<NodeId>,
}

/// A reference into the shared object table whose target must carry `shape`.
struct ShapeRef {
    node: NodeId,
    shape: ShapeId,
    index: u32,
}

struct Decoder<'a, 'c> {
    registry: &'c ShapeRegistry,
    wire: WireFormat,
    codecs: &'c [Vec<FieldCodec>],
    tags: Vec<Tag>,
    shape_tags: HashMap<ShapeId, u32>,
    strings: Vec<String>,
    tables: Vec<ObjectSlots>,
    table_of_shape: HashMap<ShapeId, usize>,
    arrays: Vec<NodeId>,
    tree: Tree,
    streams: ValueStreamReaders<'a>,
    shape_refs: Vec<ShapeRef>,
}

impl<'a> Decoder<'a, '_> {
    fn read_module(&mut self, input: &mut ByteReader<'a>, directory: &Directory) -> HyResult<()> {
        self.read_tags(&mut input.read_substream()?, directory.tags)?;
        self.read_strings(&mut input.read_substream()?, directory.strings)?;
        self.allocate(input, directory)?;

        if self.wire.value_streams() {
            let count = input.read_u32_le()?;
            self.streams = ValueStreamReaders::enabled();
            for _ in 0..count {
                let offset = input.offset();
                let tag = input.read_u32_le()?;
                if tag as usize >= self.tags.len() {
                    return Err(DecodeError::IndexOutOfRange {
                        table: "tags".to_owned(),
                        index: tag as u64,
                        len: self.tags.len(),
                        offset,
                    }
                    .into());
                }
                self.streams.insert(tag, input.read_substream()?)?;
            }
            debug!("Read {count} value stream(s).");
        }

        for table in 0..self.tables.len() {
            let mut section = input.read_substream()?;
            self.read_object_table(&mut section, table)?;
        }

        let mut arrays = input.read_substream()?;
        self.read_arrays(&mut arrays)?;

        let mut root = input.read_substream()?;
        let value = self.read_slot(&mut root, &FieldCodec::Tagged(TypeDecl::Any))?;
        root.expect_end("root")?;
        self.tree.set_root(value);

        self.streams.expect_end()?;
        Ok(())
    }

    fn read_count(
        section: &mut ByteReader<'_>,
        label: &str,
        expected: u32,
    ) -> Result<u32, DecodeError> {
        let found = section.read_u32_le()?;
        if found != expected {
            return Err(DecodeError::CountMismatch {
                section: label.to_owned(),
                expected: expected as u64,
                found: found as u64,
            });
        }
        Ok(found)
    }

    fn read_tags(&mut self, section: &mut ByteReader<'_>, expected: u32) -> HyResult<()> {
        let count = Self::read_count(section, "tags", expected)?;
        for index in 0..count {
            let offset = section.offset();
            let name = section.read_str()?;
            let tag = match BuiltinTag::iter().nth(index as usize) {
                Some(builtin) if builtin.as_ref() == name => Tag::Builtin(builtin),
                Some(_) => {
                    return Err(DecodeError::UnexpectedTag {
                        tag: name,
                        offset,
                        context: "builtin tag seed",
                    }
                    .into());
                }
                None => {
                    let shape = self.registry.require(&name)?;
                    self.shape_tags.insert(shape, index);
                    Tag::Shape(shape)
                }
            };
            self.tags.push(tag);
        }
        section.expect_end("tags")?;
        Ok(())
    }

    fn read_strings(&mut self, section: &mut ByteReader<'_>, expected: u32) -> HyResult<()> {
        let count = Self::read_count(section, "strings", expected)?;
        self.strings.reserve(count.min(section.remaining() as u32) as usize);
        for _ in 0..count {
            self.strings.push(section.read_str()?);
        }
        section.expect_end("strings")?;
        Ok(())
    }

    /// Allocate the arena nodes of every table entry.
    fn allocate(&mut self, input: &ByteReader<'_>, directory: &Directory) -> HyResult<()> {
        // Each object or array entry takes at least one byte in the rest of the file.
        if directory.node_entries() > input.remaining() as u64 {
            return Err(DecodeError::UnexpectedEnd {
                offset: input.offset(),
                needed: directory.node_entries() as usize,
                available: input.remaining(),
            }
            .into());
        }

        match &directory.objects {
            ObjectDirectory::Shared(count) => {
                let nodes = (0..*count)
                    .map(|_| self.tree.push_node(Node::Object(Object::new(""))))
                    .collect();
                self.tables.push(ObjectSlots {
                    label: "objects".to_owned(),
                    shape: None,
                    nodes,
                });
            }
            ObjectDirectory::Partitioned(tables) => {
                for &(tag, count) in tables {
                    let shape = match self.tags.get(tag as usize) {
                        Some(Tag::Shape(shape)) => *shape,
                        Some(other) => {
                            return Err(DecodeError::UnexpectedTag {
                                tag: other.name(self.registry).to_owned(),
                                offset: input.offset(),
                                context: "object table directory",
                            }
                            .into());
                        }
                        None => {
                            return Err(DecodeError::IndexOutOfRange {
                                table: "tags".to_owned(),
                                index: tag as u64,
                                len: self.tags.len(),
                                offset: input.offset(),
                            }
                            .into());
                        }
                    };
                    let name = self.registry.shape(shape).name();
                    let nodes = (0..count)
                        .map(|_| self.tree.push_node(Node::Object(Object::new(name))))
                        .collect();
                    self.table_of_shape.insert(shape, self.tables.len());
                    self.tables.push(ObjectSlots {
                        label: format!("objects:{name}"),
                        shape: Some(shape),
                        nodes,
                    });
                }
            }
        }

        self.arrays = (0..directory.arrays)
            .map(|_| self.tree.push_node(Node::Array(Vec::new())))
            .collect();
        Ok(())
    }

    fn read_object_table(&mut self, section: &mut ByteReader<'a>, table: usize) -> HyResult<()> {
        let label = self.tables[table].label.clone();
        let expected = self.tables[table].nodes.len() as u32;
        Self::read_count(section, &label, expected)?;

        for index in 0..expected as usize {
            let offset = section.offset();
            let shape = match (self.read_tag(section)?, self.tables[table].shape) {
                (Tag::Shape(found), Some(shape)) if found != shape => {
                    return Err(DecodeError::ShapeMismatch {
                        table: label,
                        expected: self.registry.shape(shape).name().to_owned(),
                        found: self.registry.shape(found).name().to_owned(),
                        index,
                    }
                    .into());
                }
                (Tag::Shape(found), _) => found,
                (other, _) => {
                    return Err(DecodeError::UnexpectedTag {
                        tag: other.name(self.registry).to_owned(),
                        offset,
                        context: "object table entry",
                    }
                    .into());
                }
            };
            let object = self.read_object_fields(section, shape)?;
            let node = self.tables[table].nodes[index];
            if let Some(slot) = self.tree.node_mut(node) {
                *slot = Node::Object(object);
            }
        }
        section.expect_end(&label)?;
        Ok(())
    }

    fn read_arrays(&mut self, section: &mut ByteReader<'a>) -> HyResult<()> {
        let count = Self::read_count(section, "arrays", self.arrays.len() as u32)?;
        for index in 0..count as usize {
            let offset = section.offset();
            let len = section.read_uleb128()?;
            if len > u32::MAX as u64 {
                return Err(DecodeError::MalformedVarint { offset }.into());
            }

            let mut elements = Vec::with_capacity((len as usize).min(section.remaining() + 1));
            if len > 0 {
                let tag = self.read_tag(section)?;
                let codec = FieldCodec::for_element(tag, self.wire.partitioned_tables());
                for _ in 0..len {
                    elements.push(self.read_slot(section, &codec)?);
                }
            }
            if let Some(slot) = self.tree.node_mut(self.arrays[index]) {
                *slot = Node::Array(elements);
            }
        }
        section.expect_end("arrays")?;
        Ok(())
    }

    fn read_object_fields(
        &mut self,
        section: &mut ByteReader<'a>,
        shape: ShapeId,
    ) -> HyResult<Object> {
        let registry = self.registry;
        let codecs = self.codecs;
        let def = registry.shape(shape);
        let mut object = Object::new(def.name());
        for (field, codec) in def.fields().iter().zip(&codecs[shape.index()]) {
            let value = self.read_slot(section, codec)?;
            object.set(field.name(), value);
        }
        Ok(object)
    }

    fn read_slot(&mut self, section: &mut ByteReader<'a>, codec: &FieldCodec) -> HyResult<Value> {
        match codec {
            FieldCodec::Tagged(decl) => {
                let offset = section.offset();
                let tag = self.read_tag(section)?;
                let tag = ensure_terminal(tag, || format!("byte offset {offset}"))?;
                if !tag.is_terminal() || !decl.accepts(tag) {
                    return Err(DecodeError::UnexpectedTag {
                        tag: tag.name(self.registry).to_owned(),
                        offset,
                        context: "not accepted by the declared type",
                    }
                    .into());
                }
                self.read_under(section, tag, false)
            }
            FieldCodec::Fixed { tag, nullable } => self.read_under(section, *tag, *nullable),
        }
    }

    fn read_under(
        &mut self,
        section: &mut ByteReader<'a>,
        tag: Tag,
        nullable: bool,
    ) -> HyResult<Value> {
        use BuiltinTag as B;
        let enc = self.wire.index_encoding;
        Ok(match tag {
            Tag::Builtin(B::Null) => Value::Null,
            Tag::Builtin(B::True) => Value::Boolean(true),
            Tag::Builtin(B::False) => Value::Boolean(false),
            Tag::Builtin(B::Integer) => {
                Value::Number(enc.read_integer(self.route(section, tag)?)? as f64)
            }
            Tag::Builtin(B::Double) => Value::Number(self.route(section, tag)?.read_f64_le()?),
            Tag::Builtin(B::String) => {
                let input = self.route(section, tag)?;
                let offset = input.offset();
                match enc.read_biased(input)? {
                    Some(index) => Value::String(
                        self.strings
                            .get(index as usize)
                            .cloned()
                            .ok_or_else(|| {
                                out_of_range("strings", index, self.strings.len(), offset)
                            })?,
                    ),
                    None => null_or(nullable, offset, "string")?,
                }
            }
            Tag::Builtin(B::Array) => {
                let input = self.route(section, tag)?;
                let offset = input.offset();
                match enc.read_biased(input)? {
                    Some(index) => Value::Array(
                        self.arrays
                            .get(index as usize)
                            .copied()
                            .ok_or_else(|| {
                                out_of_range("arrays", index, self.arrays.len(), offset)
                            })?,
                    ),
                    None => null_or(nullable, offset, "array")?,
                }
            }
            Tag::Builtin(B::Object) => self.read_object_slot(section, None, nullable)?,
            Tag::Shape(shape) => self.read_object_slot(section, Some(shape), nullable)?,
            Tag::Builtin(B::Any | B::Boolean | B::Number) => {
                return Err(DecodeError::UnexpectedTag {
                    tag: tag.name(self.registry).to_owned(),
                    offset: section.offset(),
                    context: "declared kind used as a value tag",
                }
                .into());
            }
        })
    }

    fn read_object_slot(
        &mut self,
        section: &mut ByteReader<'a>,
        expected: Option<ShapeId>,
        nullable: bool,
    ) -> HyResult<Value> {
        let route_tag = expected.map_or(Tag::OBJECT, Tag::Shape);
        let expected_name = route_tag.name(self.registry).to_owned();
        let enc = self.wire.index_encoding;

        if !self.wire.inline_objects() {
            let input = self.route(section, route_tag)?;
            let offset = input.offset();
            return match enc.read_biased(input)? {
                Some(index) => self.object_ref(expected, index, offset),
                None => null_or(nullable, offset, &expected_name),
            };
        }

        let offset = section.offset();
        match self.read_tag(section)? {
            Tag::Builtin(BuiltinTag::Null) => null_or(nullable, offset, &expected_name),
            Tag::Builtin(BuiltinTag::Object) => {
                let input = self.route(section, route_tag)?;
                let offset = input.offset();
                let index = enc.read_index(input)?;
                self.object_ref(expected, index, offset)
            }
            Tag::Shape(shape) if expected.is_none_or(|e| e == shape) => {
                let object = self.read_object_fields(section, shape)?;
                Ok(Value::Object(self.tree.push_node(Node::Object(object))))
            }
            other => Err(DecodeError::UnexpectedTag {
                tag: other.name(self.registry).to_owned(),
                offset,
                context: "object slot marker",
            }
            .into()),
        }
    }

    /// Resolve a reference into the object table of `expected` (or the shared table).
    fn object_ref(
        &mut self,
        expected: Option<ShapeId>,
        index: u32,
        offset: usize,
    ) -> HyResult<Value> {
        let table = match expected {
            Some(shape) if self.wire.partitioned_tables() => {
                self.table_of_shape.get(&shape).map(|&t| &self.tables[t])
            }
            _ => self.tables.first(),
        };
        let (label, nodes) = match table {
            Some(slots) => (slots.label.as_str(), slots.nodes.as_slice()),
            None => ("objects", &[][..]),
        };
        let node = nodes
            .get(index as usize)
            .copied()
            .ok_or_else(|| out_of_range(label, index, nodes.len(), offset))?;

        // Shared table entries are only filled once every table is read.
        if let Some(shape) = expected.filter(|_| !self.wire.partitioned_tables()) {
            self.shape_refs.push(ShapeRef { node, shape, index });
        }
        Ok(Value::Object(node))
    }

    fn check_shape_refs(&self) -> Result<(), DecodeError> {
        for r in &self.shape_refs {
            let expected = self.registry.shape(r.shape).name();
            let found = self.tree.object(r.node).map_or("", Object::shape);
            if found != expected {
                return Err(DecodeError::ShapeMismatch {
                    table: "objects".to_owned(),
                    expected: expected.to_owned(),
                    found: found.to_owned(),
                    index: r.index as usize,
                });
            }
        }
        Ok(())
    }

    fn read_tag(&mut self, section: &mut ByteReader<'a>) -> HyResult<Tag> {
        let enc = self.wire.index_encoding;
        let input = self.route(section, Tag::ANY)?;
        let offset = input.offset();
        let index = enc.read_index(input)?;
        self.tags
            .get(index as usize)
            .copied()
            .ok_or_else(|| out_of_range("tags", index, self.tags.len(), offset).into())
    }

    fn route<'s>(
        &'s mut self,
        section: &'s mut ByteReader<'a>,
        tag: Tag,
    ) -> Result<&'s mut ByteReader<'a>, DecodeError> {
        let shape_tags = &self.shape_tags;
        let index = stream_index(tag, |shape| shape_tags.get(&shape).copied());
        self.streams.route(section, index)
    }
}

fn out_of_range(table: &str, index: u32, len: usize, offset: usize) -> DecodeError {
    DecodeError::IndexOutOfRange {
        table: table.to_owned(),
        index: index as u64,
        len,
        offset,
    }
}

fn null_or(nullable: bool, offset: usize, expected: &str) -> HyResult<Value> {
    if nullable {
        Ok(Value::Null)
    } else {
        Err(DecodeError::UnexpectedNull {
            offset,
            expected: expected.to_owned(),
        }
        .into())
    }
}
