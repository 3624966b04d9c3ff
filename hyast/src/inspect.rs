//! Cheap module inspection.
//!
//! [`inspect`] reads the header and the directory, then walks the substream frames to
//! report their sizes. No table content is decoded and no registry is needed.
use std::fmt;

use crate::{
    config::WireFormat,
    decoder::header::{ObjectDirectory, read_directory, read_header},
    encoding::ByteReader,
    error::HyResult,
};

/// Object-table entry of a [`ModuleSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// Tag index of the table's shape, for partitioned modules.
    pub shape_tag: Option<u32>,
    pub count: u32,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    pub wire: WireFormat,
    pub tags: u32,
    pub strings: u32,
    pub arrays: u32,
    pub object_tables: Vec<TableSummary>,
    /// `(tag index, body bytes)` of every value stream.
    pub value_streams: Vec<(u32, usize)>,
    /// Body bytes of the fixed sections, by name.
    pub sections: Vec<(&'static str, usize)>,
    pub total_bytes: usize,
}

impl ModuleSummary {
    /// Objects stored across every table; inlined objects are not counted.
    pub fn objects(&self) -> u64 {
        self.object_tables.iter().map(|t| t.count as u64).sum()
    }
}

/// Summarize a module without decoding it.
pub fn inspect(bytes: &[u8]) -> HyResult<ModuleSummary> {
    let mut input = ByteReader::new(bytes);
    let wire = read_header(&mut input)?;
    let directory = read_directory(&mut input, wire)?;

    let mut sections = Vec::with_capacity(4);
    sections.push(("tags", input.read_substream()?.remaining()));
    sections.push(("strings", input.read_substream()?.remaining()));

    let mut value_streams = Vec::new();
    if wire.value_streams() {
        let count = input.read_u32_le()?;
        for _ in 0..count {
            let tag = input.read_u32_le()?;
            value_streams.push((tag, input.read_substream()?.remaining()));
        }
    }

    let declared: Vec<(Option<u32>, u32)> = match directory.objects {
        ObjectDirectory::Shared(count) => vec![(None, count)],
        ObjectDirectory::Partitioned(tables) => {
            tables.into_iter().map(|(tag, count)| (Some(tag), count)).collect()
        }
    };
    let mut object_tables = Vec::with_capacity(declared.len());
    for (shape_tag, count) in declared {
        object_tables.push(TableSummary {
            shape_tag,
            count,
            bytes: input.read_substream()?.remaining(),
        });
    }

    sections.push(("arrays", input.read_substream()?.remaining()));
    sections.push(("root", input.read_substream()?.remaining()));
    input.expect_end("module")?;

    Ok(ModuleSummary {
        wire,
        tags: directory.tags,
        strings: directory.strings,
        arrays: directory.arrays,
        object_tables,
        value_streams,
        sections,
        total_bytes: bytes.len(),
    })
}

impl fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module: {} bytes", self.total_bytes)?;
        writeln!(f, "  index encoding: {}", self.wire.index_encoding)?;
        writeln!(
            f,
            "  partitioned tables: {}, value streams: {}, inline objects: {}",
            self.wire.partitioned_tables(),
            self.wire.value_streams(),
            self.wire.inline_objects()
        )?;
        writeln!(
            f,
            "  tags: {}, strings: {}, arrays: {}, objects: {}",
            self.tags,
            self.strings,
            self.arrays,
            self.objects()
        )?;
        for (name, bytes) in &self.sections {
            writeln!(f, "  section {name}: {bytes} bytes")?;
        }
        for table in &self.object_tables {
            match table.shape_tag {
                Some(tag) => writeln!(
                    f,
                    "  object table (tag #{tag}): {} entries, {} bytes",
                    table.count, table.bytes
                )?,
                None => writeln!(
                    f,
                    "  object table: {} entries, {} bytes",
                    table.count, table.bytes
                )?,
            }
        }
        for (tag, bytes) in &self.value_streams {
            writeln!(f, "  value stream (tag #{tag}): {bytes} bytes")?;
        }
        Ok(())
    }
}
