//! Serialization of a finalized [`Module`].
use log::debug;

use crate::{
    config::WireFormat,
    encoding::{
        ByteWriter,
        magic::{BuiltinTag, FORMAT_NAME, MAGIC},
        stream::{ValueStreams, stream_index},
    },
    error::{EncodeError, HyResult, SchemaError, TableError},
    module::Module,
    shape::{FieldCodec, ShapeId, ShapeRegistry, Tag, TypeDecl, tag::integer_payload},
    table::{Handle, ObjectTable},
    tree::{NodeId, Tree, Value},
};

/// Where a value sits, for error messages.
#[derive(Debug, Clone, Copy)]
enum Site<'s> {
    Root,
    Field { shape: &'s str, field: &'s str },
    Element { array: NodeId },
}

impl Site<'_> {
    fn mismatch(self, expected: &str, found: &str) -> SchemaError {
        let (shape, field) = match self {
            Site::Root => ("<root>".to_owned(), "<root>".to_owned()),
            Site::Field { shape, field } => (shape.to_owned(), field.to_owned()),
            Site::Element { array } => (format!("array #{}", array.raw()), "<element>".to_owned()),
        };
        SchemaError::TypeMismatch {
            shape,
            field,
            expected: expected.to_owned(),
            found: found.to_owned(),
        }
    }
}

struct ModuleWriter<'m> {
    tree: &'m Tree,
    registry: &'m ShapeRegistry,
    module: &'m Module,
    wire: WireFormat,
    codecs: &'m [Vec<FieldCodec>],
    streams: ValueStreams,
}

/// Serialize a finalized module.
pub(crate) fn write_module(
    tree: &Tree,
    registry: &ShapeRegistry,
    module: &Module,
    wire: WireFormat,
) -> HyResult<Vec<u8>> {
    let codecs = registry.field_codecs(wire.partitioned_tables());
    let mut writer = ModuleWriter {
        tree,
        registry,
        module,
        wire,
        codecs: &codecs,
        streams: ValueStreams::new(wire.value_streams()),
    };
    writer.write()
}

impl<'m> ModuleWriter<'m> {
    fn write(&mut self) -> HyResult<Vec<u8>> {
        let module = self.module;
        let mut out = ByteWriter::with_capacity(1024);

        out.write_bytes(&MAGIC);
        out.write_str(FORMAT_NAME);
        out.write_u8(self.wire.index_encoding.to_byte());
        out.write_u8(self.wire.flags.bits());

        // Directory
        out.write_count("tags", module.tags().len())?;
        out.write_count("strings", module.strings().len())?;
        out.write_count("arrays", module.arrays().len())?;
        if self.wire.partitioned_tables() {
            out.write_count("object tables", module.objects().len())?;
            for (shape, table) in module.objects().iter() {
                let tag = shape.map(Tag::Shape).unwrap_or(Tag::OBJECT);
                out.write_u32_le(module.tag_index(tag, self.registry)?);
                out.write_count(table.label(), indexed(table.finalized(), table.label())?.len())?;
            }
        } else {
            let count = match module.objects().iter().next() {
                Some((_, table)) => indexed(table.finalized(), table.label())?.len(),
                None => 0,
            };
            out.write_count("objects", count)?;
        }

        let mut tags = ByteWriter::new();
        let tag_order = indexed(module.tags().finalized(), "tags")?;
        tags.write_count("tags", tag_order.len())?;
        for &handle in tag_order {
            tags.write_str(module.tags().entry(handle).name());
        }
        out.write_substream("tags", &tags)?;

        let mut strings = ByteWriter::new();
        let string_order = indexed(module.strings().finalized(), "strings")?;
        strings.write_count("strings", string_order.len())?;
        for &handle in string_order {
            strings.write_str(module.strings().value(handle));
        }
        out.write_substream("strings", &strings)?;

        // Every section referencing values is produced before the value streams are final.
        let mut tables = Vec::with_capacity(module.objects().len());
        for (_, table) in module.objects().iter() {
            tables.push((table.label(), self.write_object_table(table)?));
        }
        let arrays = self.write_arrays()?;
        let mut root = ByteWriter::new();
        self.write_slot(&mut root, &FieldCodec::Tagged(TypeDecl::Any), module.root(), Site::Root)?;

        if self.wire.value_streams() {
            let streams: Vec<_> = std::mem::take(&mut self.streams).into_streams().collect();
            out.write_count("value streams", streams.len())?;
            for (tag, stream) in &streams {
                out.write_u32_le(*tag);
                out.write_substream(&format!("value stream #{tag}"), stream)?;
            }
            debug!("Wrote {} value stream(s).", streams.len());
        }
        for (label, table) in &tables {
            out.write_substream(label, table)?;
        }
        out.write_substream("arrays", &arrays)?;
        out.write_substream("root", &root)?;

        Ok(out.into_inner())
    }

    fn write_object_table(&mut self, table: &'m ObjectTable) -> HyResult<ByteWriter> {
        let mut section = ByteWriter::new();
        let order = indexed(table.finalized(), table.label())?;
        section.write_count(table.label(), order.len())?;
        for &handle in order {
            let node = *table.value(handle);
            let shape = self.shape_of(node)?;
            self.write_tag(&mut section, Tag::Shape(shape))?;
            self.write_object_fields(&mut section, shape, node)?;
        }
        Ok(section)
    }

    fn write_arrays(&mut self) -> HyResult<ByteWriter> {
        let arrays = self.module.arrays();
        let mut section = ByteWriter::new();
        let order = indexed(arrays.finalized(), "arrays")?;
        section.write_count("arrays", order.len())?;
        for &handle in order {
            let id = *arrays.value(handle);
            let elements = self
                .tree
                .array(id)
                .ok_or(EncodeError::DanglingNode(id.raw() as usize))?;
            section.write_uleb128(elements.len() as u64);
            if elements.is_empty() {
                continue;
            }
            let tag = self
                .module
                .element_tag(id)
                .ok_or(EncodeError::DanglingNode(id.raw() as usize))?;
            self.write_tag(&mut section, tag)?;
            let codec = FieldCodec::for_element(tag, self.wire.partitioned_tables());
            for element in elements {
                self.write_slot(&mut section, &codec, element, Site::Element { array: id })?;
            }
        }
        Ok(section)
    }

    fn write_object_fields(
        &mut self,
        section: &mut ByteWriter,
        shape: ShapeId,
        node: NodeId,
    ) -> HyResult<()> {
        let object = self
            .tree
            .object(node)
            .ok_or(EncodeError::DanglingNode(node.raw() as usize))?;
        let registry = self.registry;
        let codecs = self.codecs;
        let shape_def = registry.shape(shape);
        for (field, codec) in shape_def.fields().iter().zip(&codecs[shape.index()]) {
            let site = Site::Field {
                shape: shape_def.name(),
                field: field.name(),
            };
            self.write_slot(section, codec, object.get_or_null(field.name()), site)?;
        }
        Ok(())
    }

    fn write_slot(
        &mut self,
        section: &mut ByteWriter,
        codec: &FieldCodec,
        value: &'m Value,
        site: Site<'_>,
    ) -> HyResult<()> {
        match codec {
            FieldCodec::Tagged(decl) => {
                let tag = Tag::of(value, self.tree, self.registry)?;
                if !decl.accepts(tag) {
                    let found = tag.name(self.registry);
                    return Err(site.mismatch("declared type", found).into());
                }
                self.write_tag(section, tag)?;
                self.write_under(section, tag, false, value, site)
            }
            FieldCodec::Fixed { tag, nullable } => {
                self.write_under(section, *tag, *nullable, value, site)
            }
        }
    }

    /// Write `value`'s payload under the already known tag `tag`.
    fn write_under(
        &mut self,
        section: &mut ByteWriter,
        tag: Tag,
        nullable: bool,
        value: &'m Value,
        site: Site<'_>,
    ) -> HyResult<()> {
        use BuiltinTag as B;
        let enc = self.wire.index_encoding;
        let module = self.module;
        match (tag, value) {
            (Tag::Builtin(B::Null), Value::Null)
            | (Tag::Builtin(B::True), Value::Boolean(true))
            | (Tag::Builtin(B::False), Value::Boolean(false)) => Ok(()),
            (Tag::Builtin(B::Integer), Value::Number(n)) => {
                let Some(i) = integer_payload(*n) else {
                    return Err(site.mismatch("integer", "double").into());
                };
                enc.write_integer(self.route(section, tag), i);
                Ok(())
            }
            (Tag::Builtin(B::Double), Value::Number(n)) => {
                self.route(section, tag).write_f64_le(*n);
                Ok(())
            }
            (Tag::Builtin(B::String), Value::String(s)) => {
                let strings = module.strings();
                let handle = strings.get_value(s).ok_or_else(|| unknown("strings", s))?;
                let index = strings.get_index(handle)?;
                Ok(enc.write_biased(self.route(section, tag), "strings", Some(index))?)
            }
            (Tag::Builtin(B::Array), Value::Array(id)) => {
                let arrays = module.arrays();
                let handle = arrays.get_value(id).ok_or_else(|| unknown("arrays", id))?;
                let index = arrays.get_index(handle)?;
                Ok(enc.write_biased(self.route(section, tag), "arrays", Some(index))?)
            }
            (Tag::Builtin(B::String), Value::Null) if nullable => {
                Ok(enc.write_biased(self.route(section, tag), "strings", None)?)
            }
            (Tag::Builtin(B::Array), Value::Null) if nullable => {
                Ok(enc.write_biased(self.route(section, tag), "arrays", None)?)
            }
            (Tag::Builtin(B::Object), Value::Object(_) | Value::Null) => {
                self.write_object_slot(section, None, nullable, value, site)
            }
            (Tag::Shape(shape), Value::Object(_) | Value::Null) => {
                self.write_object_slot(section, Some(shape), nullable, value, site)
            }
            _ => {
                let found = Tag::of(value, self.tree, self.registry)?;
                Err(site
                    .mismatch(tag.name(self.registry), found.name(self.registry))
                    .into())
            }
        }
    }

    /// Write an object slot: a biased reference, or with inlining a marker tag followed by
    /// either a reference or the object's fields.
    fn write_object_slot(
        &mut self,
        section: &mut ByteWriter,
        expected: Option<ShapeId>,
        nullable: bool,
        value: &'m Value,
        site: Site<'_>,
    ) -> HyResult<()> {
        let enc = self.wire.index_encoding;
        let route_tag = expected.map_or(Tag::OBJECT, Tag::Shape);
        let expected_name = route_tag.name(self.registry);

        let node = match value {
            Value::Object(id) => Some(*id),
            _ if nullable => None,
            _ => return Err(site.mismatch(expected_name, "null").into()),
        };
        let Some(node) = node else {
            if self.wire.inline_objects() {
                self.write_tag(section, Tag::NULL)?;
            } else {
                let label = self.table_label(expected);
                enc.write_biased(self.route(section, route_tag), &label, None)?;
            }
            return Ok(());
        };

        let shape = self.shape_of(node)?;
        if expected.is_some_and(|e| e != shape) {
            return Err(site
                .mismatch(expected_name, self.registry.shape(shape).name())
                .into());
        }
        let table = self
            .module
            .objects()
            .table(shape)
            .ok_or_else(|| unknown("objects", &node))?;
        let handle = table.get_value(&node).ok_or_else(|| unknown(table.label(), &node))?;
        let entry = table.entry(handle);

        match (self.wire.inline_objects(), entry.index()) {
            (true, Some(index)) => {
                self.write_tag(section, Tag::OBJECT)?;
                Ok(enc.write_index(self.route(section, route_tag), table.label(), index)?)
            }
            (true, None) => {
                self.write_tag(section, Tag::Shape(shape))?;
                self.write_object_fields(section, shape, *entry.value())
            }
            (false, index) => {
                let index = index.ok_or_else(|| TableError::Unindexed {
                    table: table.label().to_owned(),
                    name: format!("{node:?}"),
                })?;
                Ok(enc.write_biased(self.route(section, route_tag), table.label(), Some(index))?)
            }
        }
    }

    /// Write a tag token; tag tokens go to the stream of `any`.
    fn write_tag(&mut self, section: &mut ByteWriter, tag: Tag) -> HyResult<()> {
        let index = self.module.tag_index(tag, self.registry)?;
        let enc = self.wire.index_encoding;
        Ok(enc.write_index(self.route(section, Tag::ANY), "tags", index)?)
    }

    fn route<'s>(&'s mut self, section: &'s mut ByteWriter, tag: Tag) -> &'s mut ByteWriter {
        let index = stream_index(tag, |shape| {
            self.module.tag_index(Tag::Shape(shape), self.registry).ok()
        });
        self.streams.route(section, index)
    }

    fn shape_of(&self, node: NodeId) -> HyResult<ShapeId> {
        let object = self
            .tree
            .object(node)
            .ok_or(EncodeError::DanglingNode(node.raw() as usize))?;
        Ok(self.registry.require(object.shape())?)
    }

    fn table_label(&self, shape: Option<ShapeId>) -> String {
        shape
            .and_then(|s| self.module.objects().table(s))
            .map_or_else(|| "objects".to_owned(), |t| t.label().to_owned())
    }
}

fn indexed<'t>(order: Option<&'t [Handle]>, table: &str) -> Result<&'t [Handle], TableError> {
    order.ok_or_else(|| not_finalized(table))
}

fn not_finalized(table: &str) -> TableError {
    TableError::NotFinalized {
        table: table.to_owned(),
    }
}

fn unknown(table: &str, name: &impl std::fmt::Debug) -> TableError {
    TableError::UnknownName {
        table: table.to_owned(),
        name: format!("{name:?}"),
    }
}
