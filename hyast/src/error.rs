//! Error types of the encoder, decoder and their building blocks.
//!
//! Every failure is fatal to the encode or decode call that raised it; callers must discard
//! any partially built module or buffer.
use strum::EnumIs;
use thiserror::Error;

pub use crate::table::TableError;

/// Errors raised while reading a module.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs, Error)]
pub enum DecodeError {
    /// The file does not start with [`MAGIC`](crate::encoding::magic::MAGIC).
    #[error("Not a hyast module: the magic bytes do not match.")]
    BadMagic,

    /// The format name differs from the one this crate writes.
    #[error("Unsupported module format `{found}`, expected `{expected}`.")]
    FormatMismatch { expected: String, found: String },

    /// The configuration descriptor names an index encoding this crate does not know.
    #[error("Unknown index encoding 0x{0:02x} in the module header.")]
    UnknownIndexEncoding(u8),

    /// The configuration descriptor carries flag bits this crate does not know.
    #[error("Unknown header flags 0b{0:08b} in the module header.")]
    UnknownFlags(u8),

    /// A fixed-size or declared-length read ran past the end of its section.
    #[error(
        "Unexpected end of data at byte offset {offset}: needed {needed} byte(s) but only {available} remain."
    )]
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A varint was unterminated or did not fit its target width.
    #[error("Malformed varint at byte offset {offset}.")]
    MalformedVarint { offset: usize },

    /// A substream's length footer does not repeat its header.
    #[error(
        "Substream starting at byte offset {offset} declares {header} byte(s) but its footer says {footer}."
    )]
    SubstreamLengthMismatch {
        offset: usize,
        header: u32,
        footer: u32,
    },

    /// A section was not consumed exactly.
    #[error("Section `{section}` has {remaining} unread byte(s) at offset {offset}.")]
    TrailingBytes {
        section: String,
        offset: usize,
        remaining: usize,
    },

    /// A stored string is not valid UTF-8 (overlong, truncated, surrogate, ...).
    #[error("Invalid UTF-8 in string at byte offset {offset}: {reason}")]
    InvalidUtf8 { offset: usize, reason: String },

    /// A table index lies outside `[0, len)`.
    #[error(
        "Index {index} is out of range for table `{table}` of length {len} (byte offset {offset})."
    )]
    IndexOutOfRange {
        table: String,
        index: u64,
        len: usize,
        offset: usize,
    },

    /// A section count disagrees with the directory.
    #[error("Section `{section}` holds {found} entries but the directory declares {expected}.")]
    CountMismatch {
        section: String,
        expected: u64,
        found: u64,
    },

    /// An object does not carry the shape required by its partitioned table or by the
    /// field referencing it.
    #[error(
        "Entry {index} of object table `{table}` has shape `{found}` where `{expected}` is required."
    )]
    ShapeMismatch {
        table: String,
        expected: String,
        found: String,
        index: usize,
    },

    /// A tag appeared where it cannot be used.
    #[error("Tag `{tag}` is not valid at byte offset {offset} ({context}).")]
    UnexpectedTag {
        tag: String,
        offset: usize,
        context: &'static str,
    },

    /// A null reference was read where the schema forbids it.
    #[error("Null reference at byte offset {offset} where `{expected}` is required.")]
    UnexpectedNull { offset: usize, expected: String },

    /// An integer payload does not fit in 32 bits.
    #[error("Integer payload at byte offset {offset} does not fit in 32 bits.")]
    IntegerOutOfRange { offset: usize },

    /// A reference leads back to the node holding it; modules store trees.
    #[error("Node #{node} is reachable from itself.")]
    CyclicReference { node: u32 },

    /// A value stream is declared twice or read but never declared.
    #[error("Value stream for tag index {tag} is {problem}.")]
    ValueStream { tag: u32, problem: &'static str },
}

/// Errors raised while building or serializing a module.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs, Error)]
pub enum EncodeError {
    /// Array elements share no common tag and the `any` fallback is disabled.
    #[error(
        "Array #{array} mixes incompatible element tags ({tags}) and the `any` fallback is disabled."
    )]
    HeterogeneousArray { array: usize, tags: String },

    /// An index does not fit in the configured fixed width.
    #[error("Index {index} of table `{table}` exceeds the {width} index limit of {max}.")]
    IndexOverflow {
        table: String,
        index: u64,
        max: u64,
        width: &'static str,
    },

    /// A value refers to a node that is not part of the tree arena.
    #[error("Value refers to node #{0} which does not exist in the tree.")]
    DanglingNode(usize),

    /// A section or count exceeds 32 bits.
    #[error("Section `{section}` is too large to be described by a 32-bit length ({len}).")]
    SectionTooLarge { section: String, len: usize },
}

/// Errors raised by shape validation and by values that do not conform to their shape.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs, Error)]
pub enum SchemaError {
    /// No shape is registered under this type name.
    #[error("No shape is registered for type `{0}`.")]
    UnknownShape(String),

    /// An object carries a field its shape does not declare.
    #[error("Field `{field}` is not declared by shape `{shape}`.")]
    UnknownField { shape: String, field: String },

    /// The runtime tag of a value is not accepted by the field's declared type.
    #[error("Field `{field}` of `{shape}` is declared `{expected}` but holds a `{found}` value.")]
    TypeMismatch {
        shape: String,
        field: String,
        expected: String,
        found: String,
    },

    /// `any` resolved as the final tag of a value.
    #[error("Tag `any` cannot be the resolved type of a value ({context}).")]
    AnyAsTerminal { context: String },

    /// A declared type could not be parsed.
    #[error("Invalid declared type `{decl}` for field `{field}` of `{shape}`: {reason}")]
    InvalidDeclaration {
        shape: String,
        field: String,
        decl: String,
        reason: String,
    },

    /// Two shapes share a type name.
    #[error("Shape `{0}` is registered more than once.")]
    DuplicateShape(String),

    /// Two fields of one shape share a name.
    #[error("Field `{field}` appears more than once in shape `{shape}`.")]
    DuplicateField { shape: String, field: String },

    /// A shape uses the name of a builtin tag.
    #[error("Shape name `{0}` is reserved for a builtin tag.")]
    ReservedShapeName(String),

    /// A shape declares a field named like the registry's type key.
    #[error("Shape `{shape}` declares field `{key}`, which is the registry's type key.")]
    TypeKeyCollision { shape: String, key: String },

    /// A value outside the supported vocabulary was found in a JSON tree.
    #[error("Unsupported value at `{path}`: {reason}")]
    UnsupportedValue { path: String, reason: String },
}

/// Crate-level error.
#[derive(Debug, EnumIs, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("Failed to parse {what}: {source}")]
    Toml {
        what: &'static str,
        source: toml::de::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HyResult<T> = Result<T, Error>;
