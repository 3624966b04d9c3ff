//! Declared field types.
//!
//! Declaration grammar:
//!
//! ```text
//! decl   := member ( '|' member )*
//! member := name ( '[]' | '?' )*
//! name   := builtin kind | shape name
//! ```
//!
//! Suffixes apply left to right, so `Expr?[]` is an array of nullable expressions while
//! `Expr[]?` is a nullable array of expressions.
use crate::{
    encoding::magic::BuiltinTag,
    shape::{ShapeId, tag::Tag},
};

/// A parsed field type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDecl {
    Any,
    Null,
    Boolean,
    Integer,
    Double,
    Number,
    String,
    /// Untyped object wildcard: any shape.
    Object,
    /// `array` (no element constraint) or `X[]`.
    Array(Option<Box<TypeDecl>>),
    Shape(ShapeId),
    Nullable(Box<TypeDecl>),
    Union(Vec<TypeDecl>),
}

impl TypeDecl {
    /// Parse `text`, resolving shape names through `lookup`.
    ///
    /// Errors are returned as a human readable reason; the caller attaches the shape and
    /// field being declared.
    pub fn parse(text: &str, lookup: impl Fn(&str) -> Option<ShapeId>) -> Result<Self, String> {
        let mut parser = Parser {
            text,
            pos: 0,
            lookup: &lookup,
        };
        let decl = parser.union()?;
        parser.skip_ws();
        if parser.pos != text.len() {
            return Err(format!("unexpected `{}`", &text[parser.pos..]));
        }
        Ok(decl)
    }

    /// Wrap in [`TypeDecl::Nullable`] unless the type already admits null.
    pub fn nullable(self) -> Self {
        match self {
            TypeDecl::Any | TypeDecl::Null | TypeDecl::Nullable(_) => self,
            other => TypeDecl::Nullable(Box::new(other)),
        }
    }

    /// Strip one level of nullability.
    pub fn split_nullable(&self) -> (&TypeDecl, bool) {
        match self {
            TypeDecl::Nullable(inner) => (inner, true),
            other => (other, false),
        }
    }

    /// Whether a value whose runtime tag is `tag` conforms to this type.
    ///
    /// Array element constraints are not looked at here; see [`TypeDecl::element`].
    pub fn accepts(&self, tag: Tag) -> bool {
        use BuiltinTag as B;
        match (self, tag) {
            (TypeDecl::Any, _) => true,
            (TypeDecl::Null, Tag::Builtin(B::Null)) => true,
            (TypeDecl::Boolean, Tag::Builtin(B::True | B::False)) => true,
            (TypeDecl::Integer, Tag::Builtin(B::Integer)) => true,
            (TypeDecl::Double | TypeDecl::Number, Tag::Builtin(B::Integer | B::Double)) => true,
            (TypeDecl::String, Tag::Builtin(B::String)) => true,
            (TypeDecl::Object, Tag::Shape(_)) => true,
            (TypeDecl::Array(_), Tag::Builtin(B::Array)) => true,
            (TypeDecl::Shape(expected), Tag::Shape(found)) => *expected == found,
            (TypeDecl::Nullable(inner), tag) => tag == Tag::NULL || inner.accepts(tag),
            (TypeDecl::Union(members), tag) => members.iter().any(|m| m.accepts(tag)),
            _ => false,
        }
    }

    /// Element constraint of an array value conforming to this type, if any.
    ///
    /// For unions the first array member with a constraint wins.
    pub fn element(&self) -> Option<&TypeDecl> {
        match self {
            TypeDecl::Array(element) => element.as_deref(),
            TypeDecl::Nullable(inner) => inner.element(),
            TypeDecl::Union(members) => members.iter().find_map(|m| m.element()),
            _ => None,
        }
    }
}

struct Parser<'t, 'l> {
    text: &'t str,
    pos: usize,
    lookup: &'l dyn Fn(&str) -> Option<ShapeId>,
}

impl Parser<'_, '_> {
    fn skip_ws(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.text[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn union(&mut self) -> Result<TypeDecl, String> {
        let mut members = vec![self.member()?];
        while self.eat("|") {
            members.push(self.member()?);
        }
        Ok(if members.len() == 1 {
            members.remove(0)
        } else {
            TypeDecl::Union(members)
        })
    }

    fn member(&mut self) -> Result<TypeDecl, String> {
        let mut decl = self.name()?;
        loop {
            if self.eat("[]") {
                decl = TypeDecl::Array(Some(Box::new(decl)));
            } else if self.eat("?") {
                decl = decl.nullable();
            } else {
                return Ok(decl);
            }
        }
    }

    fn name(&mut self) -> Result<TypeDecl, String> {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '|' | '?' | '[' | ']'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(match rest.chars().next() {
                Some(c) => format!("expected a type name, found `{c}`"),
                None => "expected a type name".to_owned(),
            });
        }
        let name = &rest[..len];
        self.pos += len;

        Ok(match name {
            "any" => TypeDecl::Any,
            "null" => TypeDecl::Null,
            "boolean" => TypeDecl::Boolean,
            "integer" => TypeDecl::Integer,
            "double" => TypeDecl::Double,
            "number" => TypeDecl::Number,
            "string" => TypeDecl::String,
            "object" => TypeDecl::Object,
            "array" => TypeDecl::Array(None),
            "true" | "false" => return Err(format!("`{name}` is a value, not a type")),
            shape => TypeDecl::Shape(
                (self.lookup)(shape).ok_or_else(|| format!("unknown shape `{shape}`"))?,
            ),
        })
    }
}
