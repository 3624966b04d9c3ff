//! Tree to module encoding.
//!
//! Encoding runs in three steps:
//! 1. a walk over the tree registers every string, object and array in the [`Module`],
//!    checks field values against their shapes and infers array element tags;
//! 2. optional structural deduplication merges equal subtrees, then every table is
//!    finalized (inlined objects stay unindexed);
//! 3. the finalized module is written section by section.
use log::{debug, info};

use crate::{
    config::{EncodingConfig, WireFormat},
    error::{EncodeError, HyResult, SchemaError},
    module::Module,
    shape::{Field, Shape, ShapeRegistry, Tag, tag::unify_element_tags},
    table::TableOrdering,
    tree::{NodeId, Tree, Value},
};

mod dedup;
mod writer;

/// Encode `tree` into a module.
pub fn encode(
    tree: &Tree,
    registry: &ShapeRegistry,
    config: &EncodingConfig,
) -> HyResult<Vec<u8>> {
    Encoder::new(tree, registry, config)?.encode()
}

/// Build and finalize the module of `tree` without serializing it.
pub fn build_module(
    tree: &Tree,
    registry: &ShapeRegistry,
    config: &EncodingConfig,
) -> HyResult<Module> {
    Encoder::new(tree, registry, config)?.build()
}

pub struct Encoder<'a> {
    tree: &'a Tree,
    registry: &'a ShapeRegistry,
    config: &'a EncodingConfig,
    module: Module,
    /// Objects and arrays in post-order of their first visit.
    post_order: Vec<NodeId>,
}

impl<'a> Encoder<'a> {
    pub fn new(
        tree: &'a Tree,
        registry: &'a ShapeRegistry,
        config: &'a EncodingConfig,
    ) -> HyResult<Self> {
        Ok(Self {
            tree,
            registry,
            config,
            module: Module::new(config)?,
            post_order: Vec::with_capacity(tree.len()),
        })
    }

    /// Walk, deduplicate and finalize.
    pub fn build(mut self) -> HyResult<Module> {
        let root = self.tree.root();
        self.visit(root)?;
        self.module.set_root(root.clone());
        debug!(
            "Walked {} node(s): {} string(s), {} array(s).",
            self.post_order.len(),
            self.module.strings().len(),
            self.module.arrays().len()
        );

        if self.config.dedupe {
            let merged = dedup::dedupe(
                self.tree,
                self.registry,
                &mut self.module,
                &self.post_order,
                self.config.dedupe_min_uses,
            )?;
            info!("Structural deduplication merged {merged} node(s).");
        }

        let ordering = if self.config.order_by_hit_count {
            TableOrdering::HitCountDescending
        } else {
            TableOrdering::Insertion
        };
        let inline = self.config.inline_objects.then_some(self.config.inline_threshold);
        self.module.finalize(ordering, inline);
        Ok(self.module)
    }

    pub fn encode(self) -> HyResult<Vec<u8>> {
        let tree = self.tree;
        let registry = self.registry;
        let wire = WireFormat::from(self.config);
        let module = self.build()?;
        let bytes = writer::write_module(tree, registry, &module, wire)?;
        info!("Encoded module: {} byte(s).", bytes.len());
        Ok(bytes)
    }

    fn visit(&mut self, value: &'a Value) -> HyResult<()> {
        match value {
            Value::String(s) => {
                self.module.intern_string(s)?;
            }
            Value::Array(id) => self.visit_array(*id)?,
            Value::Object(id) => self.visit_object(*id)?,
            Value::Null | Value::Boolean(_) | Value::Number(_) => {}
        }
        Ok(())
    }

    fn visit_array(&mut self, id: NodeId) -> HyResult<()> {
        let elements = self
            .tree
            .array(id)
            .ok_or(EncodeError::DanglingNode(id.raw() as usize))?;
        if !self.module.register_array(id)? {
            return Ok(());
        }

        let mut tags = Vec::with_capacity(elements.len());
        for element in elements {
            self.visit(element)?;
            tags.push(Tag::of(element, self.tree, self.registry)?);
        }

        let tag = match unify_element_tags(tags.iter().copied()) {
            Some(tag) => tag,
            None if self.config.any_array_fallback => Tag::ANY,
            None => {
                tags.sort();
                tags.dedup();
                let names: Vec<_> = tags.iter().map(|t| t.name(self.registry)).collect();
                return Err(EncodeError::HeterogeneousArray {
                    array: id.raw() as usize,
                    tags: names.join(", "),
                }
                .into());
            }
        };
        self.module.set_element_tag(id, tag);
        self.post_order.push(id);
        Ok(())
    }

    fn visit_object(&mut self, id: NodeId) -> HyResult<()> {
        let object = self
            .tree
            .object(id)
            .ok_or(EncodeError::DanglingNode(id.raw() as usize))?;
        let shape_id = self.registry.require(object.shape())?;
        if !self.module.register_object(shape_id, id, self.registry)? {
            return Ok(());
        }

        let shape = self.registry.shape(shape_id);
        if !self.config.ignore_unknown_fields {
            if let Some((name, _)) = object.fields().find(|(name, _)| shape.field(name).is_none()) {
                return Err(SchemaError::UnknownField {
                    shape: shape.name().to_owned(),
                    field: name.to_owned(),
                }
                .into());
            }
        }

        for field in shape.fields() {
            let value = object.get_or_null(field.name());
            self.check_field(shape, field, value)?;
            self.visit(value)?;
        }
        self.post_order.push(id);
        Ok(())
    }

    fn check_field(&self, shape: &Shape, field: &Field, value: &Value) -> HyResult<()> {
        let tag = Tag::of(value, self.tree, self.registry)?;
        if !field.decl().accepts(tag) {
            return Err(self.type_mismatch(shape, field, field.name().to_owned(), tag).into());
        }
        if let (Value::Array(id), Some(element)) = (value, field.decl().element()) {
            let elements = self
                .tree
                .array(*id)
                .ok_or(EncodeError::DanglingNode(id.raw() as usize))?;
            for (i, e) in elements.iter().enumerate() {
                let tag = Tag::of(e, self.tree, self.registry)?;
                if !element.accepts(tag) {
                    let at = format!("{}[{i}]", field.name());
                    return Err(self.type_mismatch(shape, field, at, tag).into());
                }
            }
        }
        Ok(())
    }

    fn type_mismatch(&self, shape: &Shape, field: &Field, at: String, found: Tag) -> SchemaError {
        SchemaError::TypeMismatch {
            shape: shape.name().to_owned(),
            field: at,
            expected: field.source().to_owned(),
            found: found.name(self.registry).to_owned(),
        }
    }
}
