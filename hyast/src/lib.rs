//! Hyast: compact binary modules for abstract syntax trees.
//!
//! A syntax tree is made of a small closed vocabulary of values: null, booleans, numbers,
//! strings, arrays and *shaped objects* (objects whose type name selects a declared field
//! list). Hyast turns such a tree into a self-validating binary module and back.
//!
//! Module shape
//!  - Every string, object and array is interned once in a table and referenced by index.
//!  - Shapes let fields be written as bare typed tokens: a field declared `string` is one
//!    string index, a field declared `Expr?` is one object index (0 meaning null). Only
//!    polymorphic fields pay for a tag.
//!  - Sections are length-framed substreams whose footer repeats the length, so truncation
//!    and splicing are detected.
//!
//! Strategies
//!  - index width (LEB128 varints, 24-bit or 32-bit fixed fields),
//!  - one shared object table or one table per shape,
//!  - per-tag value streams,
//!  - structural deduplication and inlining of rarely referenced objects,
//!  - hit-count ordering of tables.
//!
//! See [`config::EncodingConfig`]. The layout-changing strategies are recorded in the header.
//!
//! Example
//! ```
//! use hyast::prelude::*;
//!
//! let registry = ShapeRegistry::builder()
//!     .shape("Literal", [("value", "integer")])
//!     .shape("Add", [("left", "Literal"), ("right", "Literal")])
//!     .build()
//!     .unwrap();
//!
//! let mut tree = Tree::new();
//! let left = tree.push_object(Object::new("Literal").with_field("value", 1));
//! let right = tree.push_object(Object::new("Literal").with_field("value", 2));
//! let add = tree.push_object(Object::new("Add").with_field("left", left).with_field("right", right));
//! tree.set_root(add);
//!
//! let config = EncodingConfig::default().with_dedupe(1);
//! let bytes = hyast::encode(&tree, &registry, &config).unwrap();
//! let decoded = hyast::decode(&bytes, &registry).unwrap();
//! assert!(decoded.structural_eq(&tree));
//! ```

/// Encoder configuration and the on-wire strategies it selects.
pub mod config;
/// Module to tree decoding.
pub mod decoder;
/// Tree to module encoding.
pub mod encoder;
/// Byte-level codecs and framing.
pub mod encoding;
pub mod error;
/// Header and directory inspection.
pub mod inspect;
/// The in-memory module built by the encoder.
pub mod module;
/// Shapes, declared types and tags.
pub mod shape;
/// Interning tables.
pub mod table;
/// Syntax tree arena.
pub mod tree;

pub use decoder::decode;
pub use encoder::encode;
pub use error::{Error, HyResult};
pub use inspect::{ModuleSummary, inspect};

pub mod prelude {
    //! Convenient re-exports for end users.
    pub use crate::config::{EncodingConfig, IndexEncoding};
    pub use crate::error::{DecodeError, EncodeError, Error, HyResult, SchemaError, TableError};
    pub use crate::shape::{ShapeRegistry, Tag};
    pub use crate::tree::{NodeId, Object, Tree, Value};
    pub use crate::{decode, encode, inspect};
}
