//! The in-memory module: every table a serialized module is made of.
//!
//! A [`Module`] is filled by the encoder's walk, optionally deduplicated, then finalized
//! as a whole. Only a finalized module has indices, so nothing can be written before every
//! table is complete; this is what makes hit-count ordering safe.
use std::collections::HashMap;

use log::debug;
use strum::IntoEnumIterator;

use crate::{
    config::EncodingConfig,
    encoding::magic::BuiltinTag,
    error::{HyResult, TableError},
    shape::{ShapeId, ShapeRegistry, Tag},
    table::{Handle, NamedTable, ObjectTable, StringTable, TableOrdering},
    tree::{NodeId, Value},
};

/// Object tables: one shared table, or one table per shape in order of first use.
#[derive(Debug, Clone)]
pub struct ObjectTables {
    partitioned: bool,
    check_divergence: bool,
    tables: Vec<(Option<ShapeId>, ObjectTable)>,
    by_shape: HashMap<ShapeId, usize>,
}

impl ObjectTables {
    fn new(partitioned: bool, check_divergence: bool) -> Self {
        let tables = if partitioned {
            Vec::new()
        } else {
            vec![(None, ObjectTable::new("objects").with_divergence_check(check_divergence))]
        };
        Self {
            partitioned,
            check_divergence,
            tables,
            by_shape: HashMap::new(),
        }
    }

    #[inline]
    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    /// Table holding objects of `shape`, creating it on first use.
    fn table_mut(&mut self, shape: ShapeId, registry: &ShapeRegistry) -> &mut ObjectTable {
        if !self.partitioned {
            return &mut self.tables[0].1;
        }
        let slot = match self.by_shape.get(&shape) {
            Some(&slot) => slot,
            None => {
                let label = format!("objects:{}", registry.shape(shape).name());
                self.tables.push((
                    Some(shape),
                    ObjectTable::new(label).with_divergence_check(self.check_divergence),
                ));
                self.by_shape.insert(shape, self.tables.len() - 1);
                self.tables.len() - 1
            }
        };
        &mut self.tables[slot].1
    }

    /// Table holding objects of `shape`, if any object of that shape was registered.
    pub fn table(&self, shape: ShapeId) -> Option<&ObjectTable> {
        if !self.partitioned {
            return self.tables.first().map(|(_, t)| t);
        }
        self.by_shape.get(&shape).map(|&slot| &self.tables[slot].1)
    }

    /// Tables in directory order, with their shape when partitioned.
    pub fn iter(&self) -> impl Iterator<Item = (Option<ShapeId>, &ObjectTable)> {
        self.tables.iter().map(|(shape, table)| (*shape, table))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    tags: NamedTable<String, Tag>,
    strings: StringTable,
    objects: ObjectTables,
    arrays: ObjectTable,
    element_tags: HashMap<NodeId, Tag>,
    root: Value,
    shape_tags: Vec<Option<u32>>,
}

impl Module {
    /// Empty module with the builtin tags seeded.
    pub fn new(config: &EncodingConfig) -> HyResult<Self> {
        let check = config.check_divergence;
        let mut tags = NamedTable::new("tags").with_divergence_check(check);
        for builtin in BuiltinTag::iter() {
            tags.add(builtin.as_ref().to_owned(), Tag::Builtin(builtin))?;
        }
        Ok(Self {
            tags,
            strings: StringTable::new("strings").with_divergence_check(check),
            objects: ObjectTables::new(config.partitioned_tables, check),
            arrays: ObjectTable::new("arrays").with_divergence_check(check),
            element_tags: HashMap::new(),
            root: Value::Null,
            shape_tags: Vec::new(),
        })
    }

    #[inline]
    pub fn tags(&self) -> &NamedTable<String, Tag> {
        &self.tags
    }

    #[inline]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    #[inline]
    pub fn objects(&self) -> &ObjectTables {
        &self.objects
    }

    #[inline]
    pub fn arrays(&self) -> &ObjectTable {
        &self.arrays
    }

    #[inline]
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub(crate) fn set_root(&mut self, root: Value) {
        self.root = root;
    }

    /// Element tag inferred for `array`.
    pub fn element_tag(&self, array: NodeId) -> Option<Tag> {
        self.element_tags.get(&array).copied()
    }

    pub(crate) fn set_element_tag(&mut self, array: NodeId, tag: Tag) {
        self.element_tags.insert(array, tag);
    }

    pub(crate) fn intern_tag(
        &mut self,
        tag: Tag,
        registry: &ShapeRegistry,
    ) -> Result<Handle, TableError> {
        self.tags.add(tag.name(registry).to_owned(), tag)
    }

    pub(crate) fn intern_string(&mut self, value: &str) -> Result<Handle, TableError> {
        self.strings.add(value.to_owned())
    }

    /// Register an object; returns `true` the first time `id` is seen.
    pub(crate) fn register_object(
        &mut self,
        shape: ShapeId,
        id: NodeId,
        registry: &ShapeRegistry,
    ) -> Result<bool, TableError> {
        self.intern_tag(Tag::Shape(shape), registry)?;
        let table = self.objects.table_mut(shape, registry);
        let first = table.get_value(&id).is_none();
        table.add(id)?;
        Ok(first)
    }

    /// Register an array; returns `true` the first time `id` is seen.
    pub(crate) fn register_array(&mut self, id: NodeId) -> Result<bool, TableError> {
        let first = self.arrays.get_value(&id).is_none();
        self.arrays.add(id)?;
        Ok(first)
    }

    pub(crate) fn dedupe_object(
        &mut self,
        shape: ShapeId,
        source: NodeId,
        target: NodeId,
        registry: &ShapeRegistry,
    ) -> Result<(), TableError> {
        self.objects.table_mut(shape, registry).dedupe(&source, &target)
    }

    pub(crate) fn dedupe_array(
        &mut self,
        source: NodeId,
        target: NodeId,
    ) -> Result<(), TableError> {
        self.arrays.dedupe(&source, &target)
    }

    /// Assign indices to every table.
    ///
    /// `ordering` applies to strings, objects and arrays; tags always keep insertion order
    /// so that builtins sit at their seed indices. Objects whose hit count does not exceed
    /// `inline_threshold` are left unindexed and get written in place.
    pub fn finalize(&mut self, ordering: TableOrdering, inline_threshold: Option<u32>) {
        self.tags.finalize(TableOrdering::Insertion);
        self.strings.finalize(ordering);
        self.arrays.finalize(ordering);
        for (_, table) in &mut self.objects.tables {
            match inline_threshold {
                Some(threshold) => {
                    table.finalize_filtered(ordering, |e| e.hit_count() > threshold);
                }
                None => {
                    table.finalize(ordering);
                }
            }
        }

        let max_shape = self
            .tags
            .iter()
            .filter_map(|(_, e)| match e.value() {
                Tag::Shape(id) => Some(id.index() + 1),
                Tag::Builtin(_) => None,
            })
            .max()
            .unwrap_or(0);
        self.shape_tags = vec![None; max_shape];
        for (_, entry) in self.tags.iter() {
            if let (Tag::Shape(id), Some(index)) = (entry.value(), entry.index()) {
                self.shape_tags[id.index()] = Some(index);
            }
        }

        debug!(
            "Module finalized: {} tag(s), {} string(s), {} object table(s), {} array(s).",
            self.tags.len(),
            self.strings.len(),
            self.objects.len(),
            self.arrays.len()
        );
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.tags.is_finalized()
    }

    /// Index of `tag` in the finalized tag table.
    pub fn tag_index(&self, tag: Tag, registry: &ShapeRegistry) -> Result<u32, TableError> {
        match tag {
            Tag::Builtin(builtin) => Ok(builtin.seed_index()),
            Tag::Shape(id) => match self.shape_tags.get(id.index()).copied().flatten() {
                Some(index) => Ok(index),
                None => self.tags.index_of(&tag.name(registry).to_owned()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ShapeRegistry {
        ShapeRegistry::builder()
            .shape("A", [("x", "integer")])
            .shape("B", [("y", "integer")])
            .build()
            .unwrap()
    }

    #[test]
    fn builtins_are_seeded_in_order() {
        let module = Module::new(&EncodingConfig::default()).unwrap();
        assert_eq!(module.tags().len(), BuiltinTag::COUNT);
        for builtin in BuiltinTag::iter() {
            let handle = module.tags().get(&builtin.as_ref().to_owned()).unwrap();
            assert_eq!(handle.slot() as u32, builtin.seed_index());
        }
    }

    #[test]
    fn shape_tags_follow_builtins_in_encounter_order() {
        let registry = registry();
        let b = registry.lookup("B").unwrap();
        let a = registry.lookup("A").unwrap();
        let mut module = Module::new(&EncodingConfig::default()).unwrap();
        assert!(module.register_object(b, NodeId::from_raw(0), &registry).unwrap());
        assert!(module.register_object(a, NodeId::from_raw(1), &registry).unwrap());
        assert!(!module.register_object(b, NodeId::from_raw(0), &registry).unwrap());
        module.finalize(TableOrdering::HitCountDescending, None);

        assert_eq!(module.tag_index(Tag::Shape(b), &registry), Ok(BuiltinTag::COUNT as u32));
        assert_eq!(module.tag_index(Tag::Shape(a), &registry), Ok(BuiltinTag::COUNT as u32 + 1));
        assert_eq!(module.tag_index(Tag::NULL, &registry), Ok(7));
    }

    #[test]
    fn partitioned_tables_are_created_per_shape() {
        let registry = registry();
        let a = registry.lookup("A").unwrap();
        let b = registry.lookup("B").unwrap();
        let config = EncodingConfig::default().with_partitioned_tables(true);
        let mut module = Module::new(&config).unwrap();
        assert!(module.objects().is_partitioned());
        assert!(module.objects().is_empty());

        module.register_object(b, NodeId::from_raw(0), &registry).unwrap();
        module.register_object(a, NodeId::from_raw(1), &registry).unwrap();
        module.register_object(a, NodeId::from_raw(2), &registry).unwrap();

        let shapes: Vec<_> = module.objects().iter().map(|(s, t)| (s, t.len())).collect();
        assert_eq!(shapes, vec![(Some(b), 1), (Some(a), 2)]);
    }

    #[test]
    fn inline_threshold_leaves_entries_unindexed() {
        let registry = registry();
        let a = registry.lookup("A").unwrap();
        let mut module = Module::new(&EncodingConfig::default()).unwrap();
        module.register_object(a, NodeId::from_raw(0), &registry).unwrap();
        module.register_object(a, NodeId::from_raw(1), &registry).unwrap();
        module.register_object(a, NodeId::from_raw(1), &registry).unwrap();
        module.finalize(TableOrdering::Insertion, Some(1));

        let table = module.objects().table(a).unwrap();
        let once = table.get_value(&NodeId::from_raw(0)).unwrap();
        let twice = table.get_value(&NodeId::from_raw(1)).unwrap();
        assert_eq!(table.entry(once).index(), None);
        assert_eq!(table.entry(twice).index(), Some(0));
    }
}
