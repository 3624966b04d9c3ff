//! Structural deduplication.
//!
//! Every registered object and array is assigned a structural class, bottom-up: two nodes
//! share a class when they have the same shape (or element tag) and their children are
//! equal scalars or belong to the same classes. Classes are then collapsed onto their first
//! member through the tables' redirects, so every reference to a merged node resolves to
//! the surviving one.
use std::collections::HashMap;

use log::trace;

use crate::{
    error::{EncodeError, HyResult},
    module::Module,
    shape::{ShapeId, ShapeRegistry, Tag},
    tree::{Node, NodeId, Tree, Value},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Atom<'a> {
    Null,
    Boolean(bool),
    Number(u64),
    String(&'a str),
    Array(u32),
    Object(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ClassKey<'a> {
    Object(ShapeId, Vec<Atom<'a>>),
    Array(Tag, Vec<Atom<'a>>),
}

struct Member {
    node: NodeId,
    shape: Option<ShapeId>,
}

/// Merge structurally equal nodes; returns the number of nodes merged away.
///
/// `post_order` must list every registered node after all of its children. A class is
/// collapsed when it has at least two members and their hit counts add up to `min_uses`.
pub(crate) fn dedupe<'t>(
    tree: &'t Tree,
    registry: &ShapeRegistry,
    module: &mut Module,
    post_order: &[NodeId],
    min_uses: u32,
) -> HyResult<usize> {
    let mut classes: HashMap<ClassKey<'t>, u32> = HashMap::new();
    let mut class_of: HashMap<NodeId, u32> = HashMap::with_capacity(post_order.len());
    let mut members: Vec<Vec<Member>> = Vec::new();

    for &id in post_order {
        let dangling = || EncodeError::DanglingNode(id.raw() as usize);
        let (key, shape) = match tree.node(id).ok_or_else(dangling)? {
            Node::Array(elements) => {
                let tag = module.element_tag(id).ok_or_else(dangling)?;
                let atoms = elements
                    .iter()
                    .map(|e| atom(e, &class_of))
                    .collect::<Result<Vec<_>, _>>()?;
                (ClassKey::Array(tag, atoms), None)
            }
            Node::Object(object) => {
                let shape = registry.require(object.shape())?;
                let atoms = registry
                    .shape(shape)
                    .fields()
                    .iter()
                    .map(|f| atom(object.get_or_null(f.name()), &class_of))
                    .collect::<Result<Vec<_>, _>>()?;
                (ClassKey::Object(shape, atoms), Some(shape))
            }
        };

        let next = members.len() as u32;
        let class = *classes.entry(key).or_insert(next);
        if class == next {
            members.push(Vec::new());
        }
        members[class as usize].push(Member { node: id, shape });
        class_of.insert(id, class);
    }

    let mut merged = 0;
    for class in members.iter().filter(|m| m.len() >= 2) {
        let uses: u64 = class
            .iter()
            .map(|m| u64::from(hit_count(module, m)))
            .sum();
        if uses < u64::from(min_uses) {
            continue;
        }

        let target = &class[0];
        for source in &class[1..] {
            trace!("Merging node #{} into #{}.", source.node.raw(), target.node.raw());
            match source.shape {
                Some(shape) => module.dedupe_object(shape, source.node, target.node, registry)?,
                None => module.dedupe_array(source.node, target.node)?,
            }
            merged += 1;
        }
    }
    Ok(merged)
}

fn atom<'t>(value: &'t Value, class_of: &HashMap<NodeId, u32>) -> Result<Atom<'t>, EncodeError> {
    let class = |child: &NodeId| {
        class_of
            .get(child)
            .copied()
            .ok_or(EncodeError::DanglingNode(child.raw() as usize))
    };
    Ok(match value {
        Value::Null => Atom::Null,
        Value::Boolean(b) => Atom::Boolean(*b),
        Value::Number(n) => Atom::Number(n.to_bits()),
        Value::String(s) => Atom::String(s),
        Value::Array(child) => Atom::Array(class(child)?),
        Value::Object(child) => Atom::Object(class(child)?),
    })
}

fn hit_count(module: &Module, member: &Member) -> u32 {
    let table = match member.shape {
        Some(shape) => module.objects().table(shape),
        None => Some(module.arrays()),
    };
    table
        .and_then(|t| t.get_value(&member.node).map(|h| t.hit_count(h)))
        .unwrap_or(0)
}
