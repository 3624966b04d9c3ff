//! Byte-level building blocks shared by the encoder and the decoder.
//!
//! - [`integer`]: LEB128 varints.
//! - [`io`]: bounds-checked reader, growable writer and substream framing.
//! - [`token`]: tag tokens, biased references and integer payloads per
//!   [`IndexEncoding`](crate::config::IndexEncoding).
//! - [`stream`]: routing of tokens into per-tag value streams.
//! - [`magic`]: layout constants.
pub mod integer;
pub mod io;
pub mod magic;
pub mod stream;
pub mod token;

pub use io::{ByteReader, ByteWriter};
