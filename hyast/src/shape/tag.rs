//! Runtime tags, element-tag inference and field codecs.
use std::collections::BTreeSet;

use crate::{
    encoding::magic::BuiltinTag,
    error::{EncodeError, HyResult, SchemaError},
    shape::{ShapeId, ShapeRegistry, decl::TypeDecl},
    tree::{Tree, Value},
};

/// A tag: either one of the seeded builtins or a registered shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    Builtin(BuiltinTag),
    Shape(ShapeId),
}

impl Tag {
    pub const ANY: Tag = Tag::Builtin(BuiltinTag::Any);
    pub const ARRAY: Tag = Tag::Builtin(BuiltinTag::Array);
    pub const OBJECT: Tag = Tag::Builtin(BuiltinTag::Object);
    pub const BOOLEAN: Tag = Tag::Builtin(BuiltinTag::Boolean);
    pub const STRING: Tag = Tag::Builtin(BuiltinTag::String);
    pub const INTEGER: Tag = Tag::Builtin(BuiltinTag::Integer);
    pub const NUMBER: Tag = Tag::Builtin(BuiltinTag::Number);
    pub const NULL: Tag = Tag::Builtin(BuiltinTag::Null);
    pub const TRUE: Tag = Tag::Builtin(BuiltinTag::True);
    pub const FALSE: Tag = Tag::Builtin(BuiltinTag::False);
    pub const DOUBLE: Tag = Tag::Builtin(BuiltinTag::Double);

    /// Runtime tag of `value`.
    pub fn of(value: &Value, tree: &Tree, registry: &ShapeRegistry) -> HyResult<Tag> {
        Ok(match value {
            Value::Null => Tag::NULL,
            Value::Boolean(true) => Tag::TRUE,
            Value::Boolean(false) => Tag::FALSE,
            Value::Number(n) => match integer_payload(*n) {
                Some(_) => Tag::INTEGER,
                None => Tag::DOUBLE,
            },
            Value::String(_) => Tag::STRING,
            Value::Array(_) => Tag::ARRAY,
            Value::Object(id) => {
                let object = tree
                    .object(*id)
                    .ok_or(EncodeError::DanglingNode(id.raw() as usize))?;
                Tag::Shape(registry.require(object.shape())?)
            }
        })
    }

    /// Whether a value can carry this tag, as opposed to declared kinds such as `boolean`.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            Tag::Builtin(
                BuiltinTag::Any | BuiltinTag::Boolean | BuiltinTag::Number | BuiltinTag::Object
            )
        )
    }

    /// Whether values of this tag are stored as biased table references.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            Tag::Shape(_)
                | Tag::Builtin(BuiltinTag::String | BuiltinTag::Array | BuiltinTag::Object)
        )
    }

    pub fn name(self, registry: &ShapeRegistry) -> &str {
        match self {
            Tag::Builtin(builtin) => builtin.into(),
            Tag::Shape(id) => registry.shape(id).name(),
        }
    }
}

/// The 32-bit integer a number is written as under the `integer` tag, if any.
///
/// Negative zero is a `double`: writing it as an integer would lose its sign.
pub fn integer_payload(n: f64) -> Option<i32> {
    let fits = n.is_finite()
        && n.fract() == 0.0
        && n >= i32::MIN as f64
        && n <= i32::MAX as f64
        && !(n == 0.0 && n.is_sign_negative());
    fits.then_some(n as i32)
}

/// Infer the common element tag of an array from its elements' runtime tags.
///
/// Returns [`None`] when the only common tag is `any`. Empty arrays yield `any`; no element
/// tag is written for them. `object` unifies shapes only, because its elements are object
/// table references; strings and nested arrays keep their own reference tags.
pub fn unify_element_tags(tags: impl IntoIterator<Item = Tag>) -> Option<Tag> {
    let mut has_null = false;
    let mut distinct = BTreeSet::new();
    for tag in tags {
        if tag == Tag::NULL {
            has_null = true;
        } else {
            distinct.insert(tag);
        }
    }

    let all = |pred: fn(&Tag) -> bool| distinct.iter().all(pred);
    match distinct.len() {
        0 if has_null => Some(Tag::NULL),
        0 => Some(Tag::ANY),
        1 => {
            let only = *distinct.first()?;
            (!has_null || only.is_reference()).then_some(only)
        }
        _ if has_null => all(|t| matches!(t, Tag::Shape(_))).then_some(Tag::OBJECT),
        _ if all(|t| matches!(*t, Tag::TRUE | Tag::FALSE)) => Some(Tag::BOOLEAN),
        _ if all(|t| matches!(*t, Tag::INTEGER | Tag::DOUBLE)) => Some(Tag::NUMBER),
        _ if all(|t| matches!(t, Tag::Shape(_))) => Some(Tag::OBJECT),
        _ => None,
    }
}

/// How one slot (a field or an array element) is laid out on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldCodec {
    /// A tag token first, then the value under that tag. The declaration lists the tags
    /// accepted when reading.
    Tagged(TypeDecl),
    /// No tag: the value is written under `tag`. Nullable reference kinds write null as
    /// the biased index 0.
    Fixed { tag: Tag, nullable: bool },
}

impl FieldCodec {
    /// Codec of a field declared as `decl`.
    ///
    /// With partitioned tables the `object` wildcard needs a tag, since the reader must
    /// know which table to index.
    pub fn for_decl(decl: &TypeDecl, partitioned: bool) -> Self {
        let (inner, nullable) = decl.split_nullable();
        let fixed = |tag| FieldCodec::Fixed { tag, nullable };
        match inner {
            TypeDecl::String => fixed(Tag::STRING),
            TypeDecl::Array(_) => fixed(Tag::ARRAY),
            TypeDecl::Shape(id) => fixed(Tag::Shape(*id)),
            TypeDecl::Object if !partitioned => fixed(Tag::OBJECT),
            TypeDecl::Integer if !nullable => fixed(Tag::INTEGER),
            TypeDecl::Double if !nullable => fixed(Tag::DOUBLE),
            TypeDecl::Null => fixed(Tag::NULL),
            _ => FieldCodec::Tagged(decl.clone()),
        }
    }

    /// Codec of the elements of an array whose inferred element tag is `tag`.
    pub fn for_element(tag: Tag, partitioned: bool) -> Self {
        use BuiltinTag as B;
        let decl = match tag {
            Tag::Builtin(B::True | B::False) => return FieldCodec::Fixed { tag, nullable: false },
            Tag::Builtin(B::Any) => TypeDecl::Any,
            Tag::Builtin(B::Null) => TypeDecl::Null,
            Tag::Builtin(B::Boolean) => TypeDecl::Boolean,
            Tag::Builtin(B::Number) => TypeDecl::Number,
            Tag::Builtin(B::Integer) => TypeDecl::Integer,
            Tag::Builtin(B::Double) => TypeDecl::Double,
            Tag::Builtin(B::String) => TypeDecl::String.nullable(),
            Tag::Builtin(B::Array) => TypeDecl::Array(None).nullable(),
            Tag::Builtin(B::Object) => TypeDecl::Object.nullable(),
            Tag::Shape(id) => TypeDecl::Shape(id).nullable(),
        };
        Self::for_decl(&decl, partitioned)
    }

    /// Whether this codec reads and writes a tag token.
    pub fn is_tagged(&self) -> bool {
        matches!(self, FieldCodec::Tagged(_))
    }
}

/// Rejects `any` as the resolved tag of a value.
pub(crate) fn ensure_terminal(
    tag: Tag,
    context: impl FnOnce() -> String,
) -> Result<Tag, SchemaError> {
    if tag == Tag::ANY {
        Err(SchemaError::AnyAsTerminal { context: context() })
    } else {
        Ok(tag)
    }
}
