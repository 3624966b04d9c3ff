//! Interning tables.
//!
//! A table maps names to values and, once finalized, assigns every live entry a dense
//! index. It is the building block of every section of a module: tags, strings, objects
//! and arrays.
//!
//! Lifecycle
//! - `Building`: entries may be added. Re-adding a name is idempotent and bumps its hit
//!   count; re-adding it with a *different* value is an error unless divergence checking
//!   is disabled.
//! - `Finalized`: indices `0..len` are assigned in the chosen [`TableOrdering`] and the
//!   table is frozen; further insertion fails with [`TableError::Finalized`].
//!
//! Deduplication
//! - [`NamedTable::dedupe`] merges a source entry into a target entry. Entries live in an
//!   index-addressed arena and every [`Handle`] is an arena index; merged entries keep a
//!   redirect link, and resolving a handle follows links to a fixed point (union-find
//!   without path compression). Handles and name lookups that reached the source, directly
//!   or through earlier merges, therefore reach the target.
//!
//! Example
//! ```
//! use hyast::table::{NamedTable, TableOrdering};
//!
//! let mut table = NamedTable::new("literals");
//! let a = table.add("a", 1).unwrap();
//! let b = table.add("b", 1).unwrap();
//! assert_eq!(table.add("a", 1).unwrap(), a);
//! assert_eq!(table.entry(a).hit_count(), 2);
//!
//! table.dedupe(&"b", &"a").unwrap();
//! assert_eq!(table.resolve(b), a);
//! assert_eq!(table.len(), 1);
//!
//! let order = table.finalize(TableOrdering::Insertion).to_vec();
//! assert_eq!(order, vec![a]);
//! assert_eq!(table.get_index(b), Ok(0));
//! ```
use std::{collections::HashMap, fmt::Debug, hash::Hash};

use log::{debug, trace};
use strum::EnumIs;
use thiserror::Error;

mod unique;

pub use unique::{ObjectTable, StringTable, UniqueKey, UniqueTable};

/// Errors raised by table operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, Error)]
pub enum TableError {
    /// A name was re-added with a value different from the interned one.
    #[error("Table `{table}` already holds a different value under name {name}.")]
    Divergent { table: String, name: String },

    /// The table was mutated after finalization.
    #[error("Table `{table}` is finalized and cannot be modified.")]
    Finalized { table: String },

    /// Indices were requested before finalization.
    #[error("Table `{table}` has not been finalized yet; indices are not assigned.")]
    NotFinalized { table: String },

    /// A merged-away entry was dereferenced or chosen as a redirect target.
    #[error("Entry #{entry} of table `{table}` was deduplicated away and cannot be used.")]
    Invalidated { table: String, entry: u32 },

    /// A name is not present in the table.
    #[error("Table `{table}` has no entry named {name}.")]
    UnknownName { table: String, name: String },

    /// Source and target of a merge are the same entry.
    #[error("Cannot deduplicate {name} of table `{table}` into itself.")]
    SelfDedupe { table: String, name: String },

    /// A live entry was left out of finalization and has no index.
    #[error("Entry {name} of table `{table}` has no index (it is written in place).")]
    Unindexed { table: String, name: String },
}

/// Indirect reference to a table entry.
///
/// Handles stay valid across deduplication: they are resolved through redirect links to the
/// surviving entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    /// Position of the referenced entry in insertion order (not its table index).
    #[inline]
    pub fn slot(self) -> usize {
        self.0 as usize
    }
}

/// One table slot.
#[derive(Debug, Clone)]
pub struct Entry<K, V> {
    name: K,
    value: V,
    index: Option<u32>,
    hit_count: u32,
    redirect: Option<u32>,
}

impl<K, V> Entry<K, V> {
    #[inline]
    pub fn name(&self) -> &K {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Index assigned at finalization; `None` before, or for entries left out of it.
    #[inline]
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Number of times the name was added, including the first insertion. Merged entries
    /// add their count to their target.
    #[inline]
    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    #[inline]
    pub fn is_invalidated(&self) -> bool {
        self.redirect.is_some()
    }
}

/// Order in which finalization hands out indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIs)]
pub enum TableOrdering {
    /// Insertion order.
    #[default]
    Insertion,
    /// Most referenced first; ties keep insertion order. Frequent entries get the shortest
    /// varints. Only sound when no index has been written before finalization.
    HitCountDescending,
}

#[derive(Debug, Clone)]
enum TableState {
    Building,
    Finalized(Vec<Handle>),
}

/// Insertion-ordered interning table with explicit names.
#[derive(Debug, Clone)]
pub struct NamedTable<K, V> {
    label: String,
    entries: Vec<Entry<K, V>>,
    by_name: HashMap<K, Handle>,
    live: usize,
    check_divergence: bool,
    state: TableState,
}

impl<K, V> NamedTable<K, V>
where
    K: Clone + Eq + Hash + Debug,
    V: PartialEq,
{
    /// Create an empty, divergence-checked table. `label` names the table in errors and logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
            by_name: HashMap::new(),
            live: 0,
            check_divergence: true,
            state: TableState::Building,
        }
    }

    /// Enable or disable divergence checking on re-insertion.
    pub fn with_divergence_check(mut self, enabled: bool) -> Self {
        self.check_divergence = enabled;
        self
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of live (non-merged) entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        matches!(self.state, TableState::Finalized(_))
    }

    fn ensure_building(&self) -> Result<(), TableError> {
        match self.state {
            TableState::Building => Ok(()),
            TableState::Finalized(_) => Err(TableError::Finalized {
                table: self.label.clone(),
            }),
        }
    }

    /// Intern `value` under `name` and return its handle.
    pub fn add(&mut self, name: K, value: V) -> Result<Handle, TableError> {
        self.ensure_building()?;

        if let Some(&handle) = self.by_name.get(&name) {
            let handle = self.resolve(handle);
            let check_divergence = self.check_divergence;
            let entry = &mut self.entries[handle.slot()];
            if check_divergence && entry.value != value {
                return Err(TableError::Divergent {
                    table: self.label.clone(),
                    name: format!("{name:?}"),
                });
            }
            entry.hit_count += 1;
            return Ok(handle);
        }

        let handle = Handle(self.entries.len() as u32);
        trace!("Table `{}`: interned {:?} as entry #{}.", self.label, name, handle.0);
        self.entries.push(Entry {
            name: name.clone(),
            value,
            index: None,
            hit_count: 1,
            redirect: None,
        });
        self.by_name.insert(name, handle);
        self.live += 1;
        Ok(handle)
    }

    /// Look up the (resolved) handle of `name`.
    pub fn get(&self, name: &K) -> Option<Handle> {
        self.by_name.get(name).map(|&h| self.resolve(h))
    }

    /// Follow redirect links to the surviving entry.
    pub fn resolve(&self, mut handle: Handle) -> Handle {
        while let Some(next) = self.entries[handle.slot()].redirect {
            handle = Handle(next);
        }
        handle
    }

    /// Entry reached by `handle`, following redirects.
    pub fn entry(&self, handle: Handle) -> &Entry<K, V> {
        &self.entries[self.resolve(handle).slot()]
    }

    #[inline]
    pub fn value(&self, handle: Handle) -> &V {
        self.entry(handle).value()
    }

    /// Entry stored at `handle` itself, without following redirects.
    ///
    /// Fails with [`TableError::Invalidated`] if the entry was merged away.
    pub fn raw_entry(&self, handle: Handle) -> Result<&Entry<K, V>, TableError> {
        let entry = &self.entries[handle.slot()];
        if entry.is_invalidated() {
            return Err(TableError::Invalidated {
                table: self.label.clone(),
                entry: handle.0,
            });
        }
        Ok(entry)
    }

    pub fn hit_count(&self, handle: Handle) -> u32 {
        self.entry(handle).hit_count
    }

    /// Final index of the entry reached by `handle`.
    pub fn get_index(&self, handle: Handle) -> Result<u32, TableError> {
        if !self.is_finalized() {
            return Err(TableError::NotFinalized {
                table: self.label.clone(),
            });
        }
        let entry = self.entry(handle);
        entry.index.ok_or_else(|| TableError::Unindexed {
            table: self.label.clone(),
            name: format!("{:?}", entry.name),
        })
    }

    /// Final index of the entry named `name`.
    pub fn index_of(&self, name: &K) -> Result<u32, TableError> {
        let handle = self.get(name).ok_or_else(|| TableError::UnknownName {
            table: self.label.clone(),
            name: format!("{name:?}"),
        })?;
        self.get_index(handle)
    }

    /// Live entries in insertion order, skipping merged remnants.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Entry<K, V>)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_invalidated())
            .map(|(i, e)| (Handle(i as u32), e))
    }

    /// Visit live entries in insertion order.
    pub fn for_each(&self, mut visit: impl FnMut(Handle, &Entry<K, V>)) {
        for (handle, entry) in self.iter() {
            visit(handle, entry);
        }
    }

    /// Merge the entry named `source` into the entry named `target`.
    pub fn dedupe(&mut self, source: &K, target: &K) -> Result<(), TableError> {
        let unknown = |name: &K| TableError::UnknownName {
            table: self.label.clone(),
            name: format!("{name:?}"),
        };
        let source_handle = self.get(source).ok_or_else(|| unknown(source))?;
        let target_handle = self.get(target).ok_or_else(|| unknown(target))?;
        self.dedupe_handles(source_handle, target_handle)
    }

    /// Merge the entry reached by `source` into the entry reached by `target`.
    ///
    /// After the merge the source entry is invalidated, the live count drops by one, the
    /// source's hit count is credited to the target, and every handle or name that reached
    /// the source reaches the target.
    pub fn dedupe_handles(&mut self, source: Handle, target: Handle) -> Result<(), TableError> {
        self.ensure_building()?;
        let source = self.resolve(source);
        let target = self.resolve(target);
        if source == target {
            return Err(TableError::SelfDedupe {
                table: self.label.clone(),
                name: format!("{:?}", self.entries[source.slot()].name),
            });
        }
        self.redirect(source, target)
    }

    fn redirect(&mut self, source: Handle, target: Handle) -> Result<(), TableError> {
        if self.entries[target.slot()].is_invalidated() {
            return Err(TableError::Invalidated {
                table: self.label.clone(),
                entry: target.0,
            });
        }

        let hits = self.entries[source.slot()].hit_count;
        self.entries[source.slot()].redirect = Some(target.0);
        self.entries[target.slot()].hit_count += hits;
        self.live -= 1;

        debug!(
            "Table `{}`: merged entry {:?} into {:?} ({} live).",
            self.label,
            self.entries[source.slot()].name,
            self.entries[target.slot()].name,
            self.live
        );
        Ok(())
    }

    /// Assign indices to every live entry and freeze the table.
    ///
    /// Idempotent: finalizing again returns the original order.
    pub fn finalize(&mut self, ordering: TableOrdering) -> &[Handle] {
        self.finalize_filtered(ordering, |_| true)
    }

    /// Assign indices to the live entries accepted by `keep` and freeze the table.
    ///
    /// Rejected entries stay live but unindexed; asking for their index fails with
    /// [`TableError::Unindexed`].
    pub fn finalize_filtered(
        &mut self,
        ordering: TableOrdering,
        mut keep: impl FnMut(&Entry<K, V>) -> bool,
    ) -> &[Handle] {
        if let TableState::Building = self.state {
            let mut order: Vec<Handle> = self
                .iter()
                .filter(|&(_, e)| keep(e))
                .map(|(h, _)| h)
                .collect();
            if ordering.is_hit_count_descending() {
                // Stable: ties keep insertion order
                order.sort_by_key(|h| std::cmp::Reverse(self.entries[h.slot()].hit_count));
            }
            for (index, handle) in order.iter().enumerate() {
                self.entries[handle.slot()].index = Some(index as u32);
            }
            debug!(
                "Table `{}` finalized: {} indexed of {} live entries.",
                self.label,
                order.len(),
                self.live
            );
            self.state = TableState::Finalized(order);
        }

        match &self.state {
            TableState::Finalized(order) => order,
            TableState::Building => unreachable!("table state set above"),
        }
    }

    /// Handles in index order, if finalized.
    pub fn finalized(&self) -> Option<&[Handle]> {
        match &self.state {
            TableState::Finalized(order) => Some(order),
            TableState::Building => None,
        }
    }
}
