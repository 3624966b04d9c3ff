//! Encoder configuration.
//!
//! A configuration selects among mutually exclusive wire strategies. The strategies that
//! change the byte layout ([`IndexEncoding`], partitioned tables, value streams and
//! inlining) are recorded in the module header, so decoding never needs the
//! configuration; the remaining switches only change what the encoder chooses to write.
//!
//! Configurations can be built in code or loaded from TOML:
//!
//! ```
//! use hyast::config::{EncodingConfig, IndexEncoding};
//!
//! let config = EncodingConfig::from_toml_str(
//!     r#"
//!     index_encoding = "fixed32"
//!     partitioned_tables = true
//!     dedupe = true
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.index_encoding, IndexEncoding::Fixed32);
//! assert!(config.partitioned_tables);
//! assert!(!config.value_streams);
//! ```
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs};

use crate::{
    encoding::magic::{FIXED24_MAX, HeaderFlags, INDEX_FIXED24, INDEX_FIXED32, INDEX_VARINT},
    error::{DecodeError, Error, HyResult},
};

/// How table indices, tag tokens and integer payloads are written.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIs,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IndexEncoding {
    /// LEB128: unsigned for indices, signed for integers.
    #[default]
    Varint,
    /// 4-byte little-endian fields.
    Fixed32,
    /// 3-byte little-endian indices; integers stay 4 bytes.
    Fixed24,
}

impl IndexEncoding {
    /// Descriptor byte stored in the module header.
    pub fn to_byte(self) -> u8 {
        match self {
            IndexEncoding::Varint => INDEX_VARINT,
            IndexEncoding::Fixed32 => INDEX_FIXED32,
            IndexEncoding::Fixed24 => INDEX_FIXED24,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            INDEX_VARINT => Ok(IndexEncoding::Varint),
            INDEX_FIXED32 => Ok(IndexEncoding::Fixed32),
            INDEX_FIXED24 => Ok(IndexEncoding::Fixed24),
            other => Err(DecodeError::UnknownIndexEncoding(other)),
        }
    }

    /// Largest raw token value this encoding can carry.
    pub fn max_token(self) -> u64 {
        match self {
            IndexEncoding::Varint | IndexEncoding::Fixed32 => u32::MAX as u64,
            IndexEncoding::Fixed24 => FIXED24_MAX as u64,
        }
    }
}

/// Switches selecting the wire strategies of an encode operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub index_encoding: IndexEncoding,
    /// One object table per shape instead of a single shared table.
    pub partitioned_tables: bool,
    /// One byte stream per tag instead of one stream per section.
    pub value_streams: bool,
    /// Write rarely referenced objects in place instead of through their table.
    pub inline_objects: bool,
    /// Objects referenced at most this many times are inlined.
    pub inline_threshold: u32,
    /// Collapse structurally identical objects and arrays into one table entry.
    pub dedupe: bool,
    /// A structural class is collapsed only once its members are used this many times in total.
    pub dedupe_min_uses: u32,
    /// Give the most referenced entries the smallest indices.
    pub order_by_hit_count: bool,
    /// Allow arrays with no common element tag to fall back to `any`.
    pub any_array_fallback: bool,
    /// Reject re-adding a name to a table with a different value.
    pub check_divergence: bool,
    /// Drop object fields the shape does not declare instead of failing.
    pub ignore_unknown_fields: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            index_encoding: IndexEncoding::Varint,
            partitioned_tables: false,
            value_streams: false,
            inline_objects: false,
            inline_threshold: 1,
            dedupe: false,
            dedupe_min_uses: 1,
            order_by_hit_count: false,
            any_array_fallback: true,
            check_divergence: true,
            ignore_unknown_fields: false,
        }
    }
}

impl EncodingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> HyResult<Self> {
        toml::from_str(text).map_err(|source| Error::Toml {
            what: "encoding configuration",
            source,
        })
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> HyResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_index_encoding(mut self, encoding: IndexEncoding) -> Self {
        self.index_encoding = encoding;
        self
    }

    pub fn with_partitioned_tables(mut self, enabled: bool) -> Self {
        self.partitioned_tables = enabled;
        self
    }

    pub fn with_value_streams(mut self, enabled: bool) -> Self {
        self.value_streams = enabled;
        self
    }

    /// Enable inlining of objects referenced at most `threshold` times.
    pub fn with_inlining(mut self, threshold: u32) -> Self {
        self.inline_objects = true;
        self.inline_threshold = threshold;
        self
    }

    /// Enable structural deduplication of classes used at least `min_uses` times.
    pub fn with_dedupe(mut self, min_uses: u32) -> Self {
        self.dedupe = true;
        self.dedupe_min_uses = min_uses;
        self
    }

    pub fn with_hit_count_ordering(mut self, enabled: bool) -> Self {
        self.order_by_hit_count = enabled;
        self
    }

    pub fn with_any_array_fallback(mut self, enabled: bool) -> Self {
        self.any_array_fallback = enabled;
        self
    }

    pub fn with_ignore_unknown_fields(mut self, enabled: bool) -> Self {
        self.ignore_unknown_fields = enabled;
        self
    }

    /// Header flags describing the layout-affecting switches.
    pub fn header_flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::PARTITIONED_TABLES, self.partitioned_tables);
        flags.set(HeaderFlags::VALUE_STREAMS, self.value_streams);
        flags.set(HeaderFlags::INLINE_OBJECTS, self.inline_objects);
        flags
    }
}

/// The part of a configuration a decoder needs, as read back from a module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub index_encoding: IndexEncoding,
    pub flags: HeaderFlags,
}

impl WireFormat {
    #[inline]
    pub fn partitioned_tables(&self) -> bool {
        self.flags.contains(HeaderFlags::PARTITIONED_TABLES)
    }

    #[inline]
    pub fn value_streams(&self) -> bool {
        self.flags.contains(HeaderFlags::VALUE_STREAMS)
    }

    #[inline]
    pub fn inline_objects(&self) -> bool {
        self.flags.contains(HeaderFlags::INLINE_OBJECTS)
    }
}

impl From<&EncodingConfig> for WireFormat {
    fn from(config: &EncodingConfig) -> Self {
        Self {
            index_encoding: config.index_encoding,
            flags: config.header_flags(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        assert_eq!(EncodingConfig::from_toml_str("").unwrap(), EncodingConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EncodingConfig::from_toml_str("compress = true").unwrap_err();
        assert!(err.is_toml());
    }

    #[test]
    fn index_encoding_bytes_roundtrip() {
        for encoding in [IndexEncoding::Varint, IndexEncoding::Fixed32, IndexEncoding::Fixed24] {
            assert_eq!(IndexEncoding::from_byte(encoding.to_byte()), Ok(encoding));
        }
        assert_eq!(
            IndexEncoding::from_byte(7),
            Err(DecodeError::UnknownIndexEncoding(7))
        );
    }

    #[test]
    fn wire_format_mirrors_switches() {
        let config = EncodingConfig::new()
            .with_value_streams(true)
            .with_inlining(2)
            .with_dedupe(3);
        let wire = WireFormat::from(&config);
        assert!(wire.value_streams());
        assert!(wire.inline_objects());
        assert!(!wire.partitioned_tables());
        assert_eq!(config.inline_threshold, 2);
        assert_eq!(config.dedupe_min_uses, 3);
    }
}
