use std::{fmt::Debug, hash::Hash, ops::Deref};

use crate::table::{Entry, Handle, NamedTable, TableError, TableOrdering};

/// Values that carry their own table name.
///
/// Strings are named by their contents. Tree nodes are named by their arena id, so two
/// structurally equal nodes are distinct entries until they are explicitly deduplicated.
pub trait UniqueKey {
    type Key: Clone + Eq + Hash + Debug;

    fn unique_key(&self) -> Self::Key;
}

impl UniqueKey for String {
    type Key = String;

    #[inline]
    fn unique_key(&self) -> String {
        self.clone()
    }
}

/// A [`NamedTable`] whose names are derived from the values.
///
/// Read access goes through `Deref`; mutation is limited to operations that cannot
/// desynchronize names from values.
#[derive(Debug, Clone)]
pub struct UniqueTable<V: UniqueKey> {
    inner: NamedTable<V::Key, V>,
}

/// Strings interned by content.
pub type StringTable = UniqueTable<String>;

/// Objects (or arrays) interned by node identity.
pub type ObjectTable = UniqueTable<crate::tree::NodeId>;

impl<V> UniqueTable<V>
where
    V: UniqueKey + PartialEq,
{
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: NamedTable::new(label),
        }
    }

    pub fn with_divergence_check(self, enabled: bool) -> Self {
        Self {
            inner: self.inner.with_divergence_check(enabled),
        }
    }

    /// Intern `value` under its derived name.
    pub fn add(&mut self, value: V) -> Result<Handle, TableError> {
        self.inner.add(value.unique_key(), value)
    }

    /// Look up the handle of a value by its derived name.
    pub fn get_value(&self, value: &V) -> Option<Handle> {
        self.inner.get(&value.unique_key())
    }

    pub fn dedupe(&mut self, source: &V::Key, target: &V::Key) -> Result<(), TableError> {
        self.inner.dedupe(source, target)
    }

    pub fn dedupe_handles(&mut self, source: Handle, target: Handle) -> Result<(), TableError> {
        self.inner.dedupe_handles(source, target)
    }

    pub fn finalize(&mut self, ordering: TableOrdering) -> &[Handle] {
        self.inner.finalize(ordering)
    }

    pub fn finalize_filtered(
        &mut self,
        ordering: TableOrdering,
        keep: impl FnMut(&Entry<V::Key, V>) -> bool,
    ) -> &[Handle] {
        self.inner.finalize_filtered(ordering, keep)
    }
}

impl<V: UniqueKey> Deref for UniqueTable<V> {
    type Target = NamedTable<V::Key, V>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeId;

    #[test]
    fn strings_are_interned_by_content() {
        let mut table = StringTable::new("strings");
        let a = table.add("x".to_owned()).unwrap();
        let b = table.add("y".to_owned()).unwrap();
        assert_eq!(table.add("x".to_owned()), Ok(a));
        assert_ne!(a, b);
        assert_eq!(table.get_value(&"y".to_owned()), Some(b));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn nodes_are_interned_by_identity() {
        let mut table = ObjectTable::new("objects");
        let a = table.add(NodeId::from_raw(3)).unwrap();
        let b = table.add(NodeId::from_raw(4)).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.add(NodeId::from_raw(3)), Ok(a));

        table.dedupe(&NodeId::from_raw(4), &NodeId::from_raw(3)).unwrap();
        assert_eq!(table.get_value(&NodeId::from_raw(4)), Some(a));
        assert_eq!(table.hit_count(a), 3);
    }
}
