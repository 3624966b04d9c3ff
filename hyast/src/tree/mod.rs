//! In-memory syntax trees.
//!
//! A [`Tree`] is an arena of nodes addressed by [`NodeId`]. Only arrays and objects are
//! nodes; scalars and strings are stored inline in [`Value`]. Node ids are assigned at
//! creation and never reused, which is what the encoder's identity interning keys on.
//!
//! ```
//! use hyast::tree::{Object, Tree, Value};
//!
//! let mut tree = Tree::new();
//! let one = tree.push_object(Object::new("Literal").with_field("value", 1));
//! let two = tree.push_object(Object::new("Literal").with_field("value", 2));
//! let list = tree.push_array(vec![one, two]);
//! tree.set_root(list);
//!
//! assert_eq!(tree.len(), 3);
//! assert!(tree.structural_eq(&tree.clone()));
//! ```
use std::collections::HashSet;

use smallvec::SmallVec;

use crate::table::UniqueKey;

#[cfg(feature = "json")]
pub mod json;

/// Stable identity of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    fn slot(self) -> usize {
        self.0 as usize
    }
}

impl UniqueKey for NodeId {
    type Key = NodeId;

    #[inline]
    fn unique_key(&self) -> NodeId {
        *self
    }
}

/// A value of the supported vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(NodeId),
    Object(NodeId),
}

pub(crate) static NULL: Value = Value::Null;

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Node referenced by this value, if it is an array or an object.
    #[inline]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Value::Array(id) | Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A shaped object: a type name and its fields, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    shape: String,
    fields: SmallVec<[(String, Value); 4]>,
}

impl Object {
    pub fn new(shape: impl Into<String>) -> Self {
        Self {
            shape: shape.into(),
            fields: SmallVec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    #[inline]
    pub fn shape(&self) -> &str {
        &self.shape
    }

    /// Set a field, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field value, with missing fields reading as null.
    pub fn get_or_null(&self, name: &str) -> &Value {
        self.get(name).unwrap_or(&NULL)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Array(Vec<Value>),
    Object(Object),
}

impl Node {
    /// The `index`-th child value, in element or field order.
    fn child(&self, index: usize) -> Option<&Value> {
        match self {
            Node::Array(elements) => elements.get(index),
            Node::Object(object) => object.fields.get(index).map(|(_, v)| v),
        }
    }
}

/// Arena of nodes plus a root value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: Value,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: Value::Null,
        }
    }

    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(nodes),
            root: Value::Null,
        }
    }

    /// Number of nodes in the arena.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn set_root(&mut self, root: impl Into<Value>) {
        self.root = root.into();
    }

    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Append an array node and return a value referencing it.
    pub fn push_array(&mut self, elements: Vec<Value>) -> Value {
        Value::Array(self.push_node(Node::Array(elements)))
    }

    /// Append an object node and return a value referencing it.
    pub fn push_object(&mut self, object: Object) -> Value {
        Value::Object(self.push_node(Node::Object(object)))
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.slot())
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.slot())
    }

    pub fn array(&self, id: NodeId) -> Option<&[Value]> {
        match self.node(id)? {
            Node::Array(elements) => Some(elements),
            Node::Object(_) => None,
        }
    }

    pub fn object(&self, id: NodeId) -> Option<&Object> {
        match self.node(id)? {
            Node::Object(object) => Some(object),
            Node::Array(_) => None,
        }
    }

    /// A node that is reachable from itself, if the arena has a reference cycle.
    ///
    /// Shared nodes are not cycles. Values pointing outside the arena are skipped.
    pub fn find_cycle(&self) -> Option<NodeId> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unseen,
            Open,
            Closed,
        }

        let mut marks = vec![Mark::Unseen; self.nodes.len()];
        let mut stack: SmallVec<[(usize, usize); 32]> = SmallVec::new();
        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unseen {
                continue;
            }
            marks[start] = Mark::Open;
            stack.push((start, 0));

            while let Some(top) = stack.last_mut() {
                let (slot, index) = *top;
                let Some(child) = self.nodes[slot].child(index) else {
                    marks[slot] = Mark::Closed;
                    stack.pop();
                    continue;
                };
                top.1 += 1;

                let Some(id) = child.node() else { continue };
                match marks.get_mut(id.slot()) {
                    Some(Mark::Open) => return Some(id),
                    Some(mark @ Mark::Unseen) => {
                        *mark = Mark::Open;
                        stack.push((id.slot(), 0));
                    }
                    Some(Mark::Closed) | None => {}
                }
            }
        }
        None
    }

    /// Deep structural equality of the two roots.
    ///
    /// Node identities are ignored (a shared node equals two equal copies), numbers are
    /// compared bit for bit, and missing object fields compare equal to null. A pair of
    /// nodes already under comparison is assumed equal, so cyclic arenas terminate.
    pub fn structural_eq(&self, other: &Tree) -> bool {
        self.values_eq(&self.root, other, &other.root)
    }

    /// Deep structural equality of `value` in this tree and `other_value` in `other`.
    pub fn values_eq(&self, value: &Value, other: &Tree, other_value: &Value) -> bool {
        let mut proven = HashSet::new();
        Self::values_eq_inner(self, value, other, other_value, &mut proven)
    }

    fn values_eq_inner(
        a: &Tree,
        va: &Value,
        b: &Tree,
        vb: &Value,
        proven: &mut HashSet<(NodeId, NodeId)>,
    ) -> bool {
        match (va, vb) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x.to_bits() == y.to_bits(),
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Array(x), Value::Array(y)) | (Value::Object(x), Value::Object(y)) => {
                if !proven.insert((*x, *y)) {
                    return true;
                }
                let equal = match (a.node(*x), b.node(*y)) {
                    (Some(Node::Array(ea)), Some(Node::Array(eb))) => {
                        ea.len() == eb.len()
                            && ea
                                .iter()
                                .zip(eb)
                                .all(|(p, q)| Self::values_eq_inner(a, p, b, q, proven))
                    }
                    (Some(Node::Object(oa)), Some(Node::Object(ob))) => {
                        oa.shape == ob.shape
                            && oa.fields().chain(ob.fields()).all(|(name, _)| {
                                Self::values_eq_inner(
                                    a,
                                    oa.get_or_null(name),
                                    b,
                                    ob.get_or_null(name),
                                    proven,
                                )
                            })
                    }
                    _ => false,
                };
                equal
            }
            _ => false,
        }
    }
}
