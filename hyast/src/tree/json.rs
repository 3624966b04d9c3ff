//! JSON interchange.
//!
//! JSON objects become shaped objects through the registry's type key: `{"type": "Literal",
//! "value": 1}` is an object of shape `Literal` with one field. Declared fields come first,
//! in declaration order; other properties follow in document order and are left for the
//! encoder to accept or reject. Shared nodes are written out once per reference.
use serde_json::{Map, Number};

use crate::{
    error::SchemaError,
    shape::{ShapeRegistry, tag::integer_payload},
    tree::{Node, Object, Tree, Value},
};

impl Tree {
    /// Build a tree from a JSON document.
    pub fn from_json(
        json: &serde_json::Value,
        registry: &ShapeRegistry,
    ) -> Result<Tree, SchemaError> {
        let mut tree = Tree::new();
        let root = tree.value_from_json(json, registry, &mut String::from("$"))?;
        tree.set_root(root);
        Ok(tree)
    }

    fn value_from_json(
        &mut self,
        json: &serde_json::Value,
        registry: &ShapeRegistry,
        path: &mut String,
    ) -> Result<Value, SchemaError> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(n) => Value::Number(n),
                None => {
                    return Err(SchemaError::UnsupportedValue {
                        path: path.clone(),
                        reason: format!("number {n} is not representable as a double"),
                    });
                }
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("[{i}]"));
                    elements.push(self.value_from_json(item, registry, path)?);
                    path.truncate(len);
                }
                self.push_array(elements)
            }
            serde_json::Value::Object(map) => {
                let shape_name = match map.get(registry.type_key()) {
                    Some(serde_json::Value::String(name)) => name,
                    _ => {
                        return Err(SchemaError::UnsupportedValue {
                            path: path.clone(),
                            reason: format!(
                                "object without a string `{}` property",
                                registry.type_key()
                            ),
                        });
                    }
                };
                let shape = registry.shape(registry.require(shape_name)?);

                let mut object = Object::new(shape_name.as_str());
                let declared = shape.fields().iter().map(|f| f.name());
                let extra = map
                    .keys()
                    .map(String::as_str)
                    .filter(|k| *k != registry.type_key() && shape.field(k).is_none());
                for name in declared.chain(extra) {
                    let Some(field) = map.get(name) else {
                        continue;
                    };
                    let len = path.len();
                    path.push('.');
                    path.push_str(name);
                    let value = self.value_from_json(field, registry, path)?;
                    path.truncate(len);
                    object.set(name, value);
                }
                self.push_object(object)
            }
        })
    }

    /// Render the tree as a JSON document.
    ///
    /// Shared nodes are written out at every reference. The tree must be free of cycles, as
    /// every decoded tree is (see [`Tree::find_cycle`]).
    ///
    /// Integral doubles come out as JSON integers. Non-finite numbers have no JSON form and
    /// are written as `null`.
    pub fn to_json(&self, registry: &ShapeRegistry) -> serde_json::Value {
        self.value_to_json(&self.root, registry)
    }

    fn value_to_json(&self, value: &Value, registry: &ShapeRegistry) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(id) | Value::Object(id) => match self.node(*id) {
                Some(Node::Array(elements)) => serde_json::Value::Array(
                    elements
                        .iter()
                        .map(|e| self.value_to_json(e, registry))
                        .collect(),
                ),
                Some(Node::Object(object)) => {
                    let mut map = Map::new();
                    map.insert(
                        registry.type_key().to_owned(),
                        serde_json::Value::String(object.shape().to_owned()),
                    );
                    for (name, field) in object.fields() {
                        map.insert(name.to_owned(), self.value_to_json(field, registry));
                    }
                    serde_json::Value::Object(map)
                }
                None => serde_json::Value::Null,
            },
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    match integer_payload(n) {
        Some(i) => serde_json::Value::Number(i.into()),
        None if n.fract() == 0.0 && n.abs() < 9.0e15 && !(n == 0.0 && n.is_sign_negative()) => {
            serde_json::Value::Number((n as i64).into())
        }
        None => Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number),
    }
}
