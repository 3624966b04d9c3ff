//! Magic constants of the module layout.
//!
//! Layout, in order:
//! - `MAGIC` (11 bytes), then `FORMAT_NAME` as a length-prefixed string;
//! - the configuration descriptor: one index-encoding byte and one [`HeaderFlags`] byte;
//! - the table directory (fixed 32-bit counts);
//! - the tags and strings substreams, optional per-tag value streams, object tables,
//!   arrays and finally the root value, each wrapped as a substream.
use bitflags::bitflags;
use strum::{AsRefStr, EnumIter, EnumString, IntoStaticStr};

/// File signature, laid out like the PNG signature: a non-ASCII first byte, then CR LF,
/// SUB and LF.
pub const MAGIC: [u8; 11] = [
    0x89, 0x57, 0x65, 0x62, 0x41, 0x53, 0x4D, 0x0D, 0x0A, 0x1A, 0x0A,
];

/// Format identifier. The version lives inside the string; any change to the layout
/// bumps it.
pub const FORMAT_NAME: &str = "hyast-module/1";

// Index encoding bytes of the configuration descriptor
pub const INDEX_VARINT: u8 = 0x00;
pub const INDEX_FIXED32: u8 = 0x01;
pub const INDEX_FIXED24: u8 = 0x02;

/// Largest index representable by the 3-byte fixed encoding.
pub const FIXED24_MAX: u32 = 0x00FF_FFFF;

bitflags! {
    /// Wire strategies recorded in the header so a decoder never has to be told them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u8 {
        const PARTITIONED_TABLES = 0b0000_0001;
        const VALUE_STREAMS = 0b0000_0010;
        const INLINE_OBJECTS = 0b0000_0100;
    }
}

/// Tags every module's tag table starts with, in this order.
///
/// `any` through `number` name declared kinds; `null`, `true`, `false` and `double`
/// complete the runtime vocabulary so that every value has a tag that can be written in
/// front of it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    AsRefStr,
    IntoStaticStr,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinTag {
    Any,
    Array,
    Object,
    Boolean,
    String,
    Integer,
    Number,
    Null,
    True,
    False,
    Double,
}

impl BuiltinTag {
    /// Number of builtin tags; shape tags start at this index.
    pub const COUNT: usize = 11;

    /// Index of this tag in a freshly seeded tag table.
    #[inline]
    pub const fn seed_index(self) -> u32 {
        self as u32
    }
}
