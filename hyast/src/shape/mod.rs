//! Shapes: the per-type field lists that drive the codec.
//!
//! A [`ShapeRegistry`] maps type names to [`Shape`]s. Encoder and decoder must be given
//! matching registries; the module stores tags by name, so registries that agree on every
//! shape used by a module are interchangeable.
//!
//! Registries are built with [`ShapeRegistry::builder`] or loaded from TOML:
//!
//! ```
//! use hyast::shape::ShapeRegistry;
//!
//! let registry = ShapeRegistry::from_toml_str(r#"
//!     type_key = "type"
//!
//!     [[shape]]
//!     name = "Literal"
//!     fields = [{ name = "value", type = "integer" }]
//!
//!     [[shape]]
//!     name = "Call"
//!     fields = [
//!         { name = "callee", type = "string" },
//!         { name = "arguments", type = "Literal[]" },
//!     ]
//! "#).unwrap();
//!
//! assert_eq!(registry.len(), 2);
//! assert!(registry.lookup("Call").is_some());
//! ```
use std::{collections::HashMap, path::Path, str::FromStr};

use log::debug;
use serde::Deserialize;

use crate::{
    encoding::magic::BuiltinTag,
    error::{Error, HyResult, SchemaError},
};

pub mod decl;
pub mod tag;

pub use decl::TypeDecl;
pub use tag::{FieldCodec, Tag};

/// Default name of the JSON property carrying an object's shape.
pub const DEFAULT_TYPE_KEY: &str = "type";

/// Index of a shape in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId(u32);

impl ShapeId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    decl: TypeDecl,
    source: String,
}

impl Field {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn decl(&self) -> &TypeDecl {
        &self.decl
    }

    /// The declaration as written, for diagnostics.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    name: String,
    fields: Vec<Field>,
}

impl Shape {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    type_key: String,
    shapes: Vec<Shape>,
    by_name: HashMap<String, ShapeId>,
}

impl ShapeRegistry {
    pub fn builder() -> ShapeRegistryBuilder {
        ShapeRegistryBuilder::default()
    }

    /// Load a registry from its TOML description.
    pub fn from_toml_str(text: &str) -> HyResult<Self> {
        let def: RegistryDef = toml::from_str(text).map_err(|source| Error::Toml {
            what: "shape registry",
            source,
        })?;
        let mut builder = Self::builder().type_key(def.type_key);
        for shape in def.shapes {
            builder = builder.shape(shape.name, shape.fields.into_iter().map(|f| (f.name, f.decl)));
        }
        Ok(builder.build()?)
    }

    pub fn load(path: impl AsRef<Path>) -> HyResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Name of the property that carries an object's shape in JSON trees.
    #[inline]
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<ShapeId> {
        self.by_name.get(name).copied()
    }

    /// Like [`lookup`](Self::lookup) but failing with [`SchemaError::UnknownShape`].
    pub fn require(&self, name: &str) -> Result<ShapeId, SchemaError> {
        self.lookup(name)
            .ok_or_else(|| SchemaError::UnknownShape(name.to_owned()))
    }

    /// # Panics
    /// If `id` was not produced by this registry.
    #[inline]
    pub fn shape(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.index()]
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShapeId, &Shape)> {
        self.shapes
            .iter()
            .enumerate()
            .map(|(i, s)| (ShapeId(i as u32), s))
    }

    /// Field codecs of every shape, indexed by [`ShapeId`] then by field position.
    pub fn field_codecs(&self, partitioned: bool) -> Vec<Vec<FieldCodec>> {
        self.shapes
            .iter()
            .map(|shape| {
                shape
                    .fields
                    .iter()
                    .map(|f| FieldCodec::for_decl(&f.decl, partitioned))
                    .collect()
            })
            .collect()
    }
}

/// Collects shapes; all validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistryBuilder {
    type_key: Option<String>,
    shapes: Vec<(String, Vec<(String, String)>)>,
}

impl ShapeRegistryBuilder {
    pub fn type_key(mut self, key: impl Into<String>) -> Self {
        self.type_key = Some(key.into());
        self
    }

    /// Declare a shape from `(field name, declared type)` pairs.
    pub fn shape<N, D>(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (N, D)>,
    ) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        let fields = fields.into_iter().map(|(n, d)| (n.into(), d.into())).collect();
        self.shapes.push((name.into(), fields));
        self
    }

    pub fn build(self) -> Result<ShapeRegistry, SchemaError> {
        let type_key = self.type_key.unwrap_or_else(|| DEFAULT_TYPE_KEY.to_owned());

        let mut by_name = HashMap::with_capacity(self.shapes.len());
        for (i, (name, _)) in self.shapes.iter().enumerate() {
            if BuiltinTag::from_str(name).is_ok() {
                return Err(SchemaError::ReservedShapeName(name.clone()));
            }
            if by_name.insert(name.clone(), ShapeId(i as u32)).is_some() {
                return Err(SchemaError::DuplicateShape(name.clone()));
            }
        }

        let lookup = |name: &str| by_name.get(name).copied();
        let mut shapes = Vec::with_capacity(self.shapes.len());
        for (name, raw_fields) in self.shapes {
            let mut fields: Vec<Field> = Vec::with_capacity(raw_fields.len());
            for (field, source) in raw_fields {
                if field == type_key {
                    return Err(SchemaError::TypeKeyCollision {
                        shape: name,
                        key: field,
                    });
                }
                if fields.iter().any(|f| f.name == field) {
                    return Err(SchemaError::DuplicateField { shape: name, field });
                }
                let decl = TypeDecl::parse(&source, lookup).map_err(|reason| {
                    SchemaError::InvalidDeclaration {
                        shape: name.clone(),
                        field: field.clone(),
                        decl: source.clone(),
                        reason,
                    }
                })?;
                fields.push(Field {
                    name: field,
                    decl,
                    source,
                });
            }
            debug!("Registered shape `{}` with {} field(s)", name, fields.len());
            shapes.push(Shape { name, fields });
        }

        Ok(ShapeRegistry {
            type_key,
            shapes,
            by_name,
        })
    }
}

fn default_type_key() -> String {
    DEFAULT_TYPE_KEY.to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryDef {
    #[serde(default = "default_type_key")]
    type_key: String,
    #[serde(rename = "shape", default)]
    shapes: Vec<ShapeDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShapeDef {
    name: String,
    #[serde(default)]
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    decl: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> [(&'static str, &'static str); 0] {
        []
    }

    #[test]
    fn builder_resolves_forward_references() {
        let registry = ShapeRegistry::builder()
            .shape("Block", [("body", "Stmt[]")])
            .shape("Stmt", [("label", "string?")])
            .build()
            .unwrap();
        let block = registry.shape(registry.lookup("Block").unwrap());
        let stmt = registry.lookup("Stmt").unwrap();
        assert_eq!(
            block.field("body").unwrap().decl(),
            &TypeDecl::Array(Some(Box::new(TypeDecl::Shape(stmt))))
        );
        assert_eq!(registry.type_key(), DEFAULT_TYPE_KEY);
        assert_eq!(registry.get(stmt).map(Shape::name), Some("Stmt"));
        assert!(registry.get(ShapeId::from_raw(2)).is_none());
    }

    #[test]
    fn validation_errors() {
        let dup = ShapeRegistry::builder()
            .shape("A", empty())
            .shape("A", empty())
            .build();
        assert_eq!(dup.unwrap_err(), SchemaError::DuplicateShape("A".into()));

        let reserved = ShapeRegistry::builder().shape("string", empty()).build();
        assert!(reserved.unwrap_err().is_reserved_shape_name());

        let field = ShapeRegistry::builder()
            .shape("A", [("x", "integer"), ("x", "double")])
            .build();
        assert!(field.unwrap_err().is_duplicate_field());

        let key = ShapeRegistry::builder()
            .type_key("kind")
            .shape("A", [("kind", "string")])
            .build();
        assert!(key.unwrap_err().is_type_key_collision());

        let unknown = ShapeRegistry::builder().shape("A", [("x", "B")]).build();
        assert!(unknown.unwrap_err().is_invalid_declaration());
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        let err =
            ShapeRegistry::from_toml_str("[[shape]]\nname = \"A\"\nfieldz = []\n").unwrap_err();
        assert!(err.is_toml());
    }

    #[test]
    fn toml_custom_type_key() {
        let registry = ShapeRegistry::from_toml_str(
            "type_key = \"kind\"\n[[shape]]\nname = \"Empty\"\n",
        )
        .unwrap();
        assert_eq!(registry.type_key(), "kind");
        assert!(registry.shape(registry.require("Empty").unwrap()).fields().is_empty());
        assert!(registry.require("Other").unwrap_err().is_unknown_shape());
    }
}
