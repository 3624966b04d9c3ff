use hyast::{
    encoder::build_module,
    encoding::{
        ByteReader,
        magic::{BuiltinTag, FORMAT_NAME},
    },
    prelude::*,
};
use serde_json::json;

fn literal_registry() -> ShapeRegistry {
    ShapeRegistry::builder()
        .shape("Literal", [("value", "integer")])
        .shape("Pair", [("left", "Literal"), ("right", "Literal")])
        .shape("Call", [("callee", "string"), ("arguments", "Literal[]")])
        .build()
        .unwrap()
}

fn literal(tree: &mut Tree, value: i32) -> Value {
    tree.push_object(Object::new("Literal").with_field("value", value))
}

fn pair(tree: &mut Tree, left: Value, right: Value) -> Tree {
    let pair = tree.push_object(
        Object::new("Pair")
            .with_field("left", left)
            .with_field("right", right),
    );
    tree.set_root(pair);
    tree.clone()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn root_object(tree: &Tree) -> &Object {
    let id = tree.root().node().unwrap();
    tree.object(id).unwrap()
}

#[test]
fn single_literal_is_one_table_entry_with_a_raw_integer() {
    let registry = literal_registry();
    let doc = json!({"type": "Literal", "value": 42});
    let tree = Tree::from_json(&doc, &registry).unwrap();

    // count, tag `Literal` (first shape tag, index 11), value 42
    let fixed = EncodingConfig::new().with_index_encoding(IndexEncoding::Fixed32);
    let bytes = hyast::encode(&tree, &registry, &fixed).unwrap();
    assert!(contains(&bytes, &[1, 0, 0, 0, 11, 0, 0, 0, 42, 0, 0, 0]));
    assert_eq!(hyast::decode(&bytes, &registry).unwrap().to_json(&registry), doc);

    let varint = EncodingConfig::new();
    let bytes = hyast::encode(&tree, &registry, &varint).unwrap();
    assert!(contains(&bytes, &[1, 0, 0, 0, 0x0B, 0x2A]));
    assert_eq!(hyast::decode(&bytes, &registry).unwrap().to_json(&registry), doc);

    let summary = hyast::inspect(&bytes).unwrap();
    assert_eq!(summary.objects(), 1);
    assert_eq!(summary.tags, 12);
    assert_eq!(summary.strings, 0);
}

#[test]
fn deduplication_collapses_identical_literals() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let left = literal(&mut tree, 7);
    let right = literal(&mut tree, 7);
    let tree = pair(&mut tree, left, right);

    let deduped = hyast::encode(&tree, &registry, &EncodingConfig::new().with_dedupe(1)).unwrap();
    assert_eq!(hyast::inspect(&deduped).unwrap().objects(), 2);
    let decoded = hyast::decode(&deduped, &registry).unwrap();
    let root = root_object(&decoded);
    assert_eq!(root.get("left").unwrap().node(), root.get("right").unwrap().node());
    assert!(decoded.structural_eq(&tree));

    let plain = hyast::encode(&tree, &registry, &EncodingConfig::new()).unwrap();
    assert_eq!(hyast::inspect(&plain).unwrap().objects(), 3);
    let decoded = hyast::decode(&plain, &registry).unwrap();
    let root = root_object(&decoded);
    assert_ne!(root.get("left").unwrap().node(), root.get("right").unwrap().node());
    assert!(decoded.structural_eq(&tree));
}

#[test]
fn deduplication_respects_min_uses() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let left = literal(&mut tree, 7);
    let right = literal(&mut tree, 7);
    let tree = pair(&mut tree, left, right);

    // Two members used once each: 2 uses in total.
    let config = EncodingConfig::new().with_dedupe(3);
    let bytes = hyast::encode(&tree, &registry, &config).unwrap();
    assert_eq!(hyast::inspect(&bytes).unwrap().objects(), 3);

    let config = EncodingConfig::new().with_dedupe(2);
    let bytes = hyast::encode(&tree, &registry, &config).unwrap();
    assert_eq!(hyast::inspect(&bytes).unwrap().objects(), 2);
}

#[test]
fn wrong_format_name_fails_before_any_table() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let root = literal(&mut tree, 1);
    tree.set_root(root);
    let mut bytes = hyast::encode(&tree, &registry, &EncodingConfig::new()).unwrap();

    // Magic (11 bytes), then the name's length byte, then the name itself.
    let last = 12 + FORMAT_NAME.len() - 1;
    assert_eq!(bytes[last], b'1');
    bytes[last] = b'9';

    let expected = DecodeError::FormatMismatch {
        expected: FORMAT_NAME.to_owned(),
        found: "hyast-module/9".to_owned(),
    };
    match hyast::decode(&bytes, &registry) {
        Err(Error::Decode(err)) => assert_eq!(err, expected),
        other => panic!("unexpected result: {other:?}"),
    }
    // Nothing past the header is needed to reject the module.
    match hyast::decode(&bytes[..last + 1], &registry) {
        Err(Error::Decode(err)) => assert_eq!(err, expected),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(hyast::inspect(&bytes).is_err());
}

#[test]
fn bad_magic_is_rejected() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let root = literal(&mut tree, 1);
    tree.set_root(root);
    let mut bytes = hyast::encode(&tree, &registry, &EncodingConfig::new()).unwrap();
    bytes[0] = 0;
    assert!(matches!(
        hyast::decode(&bytes, &registry),
        Err(Error::Decode(DecodeError::BadMagic))
    ));
    assert!(matches!(
        hyast::decode(&[], &registry),
        Err(Error::Decode(DecodeError::BadMagic))
    ));
}

/// Two literals in a root array, shared table, varint indices.
fn two_object_module(registry: &ShapeRegistry) -> Vec<u8> {
    let mut tree = Tree::new();
    let a = literal(&mut tree, 1);
    let b = literal(&mut tree, 2);
    let root = tree.push_array(vec![a, b]);
    tree.set_root(root);
    hyast::encode(&tree, registry, &EncodingConfig::new()).unwrap()
}

// Header: magic (11) + name (1 + 14) + descriptor (2). Directory: tags, strings, arrays,
// objects as 32-bit counts.
const OBJECT_COUNT_OFFSET: usize = 40;
const TAGS_OFFSET: usize = 44;

fn patch_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn overstated_object_count_is_detected() {
    let registry = literal_registry();
    let bytes = two_object_module(&registry);
    assert_eq!(&bytes[OBJECT_COUNT_OFFSET..TAGS_OFFSET], &2u32.to_le_bytes());

    // Directory says 3, the table says 2.
    let mut patched = bytes.clone();
    patch_u32(&mut patched, OBJECT_COUNT_OFFSET, 3);
    match hyast::decode(&patched, &registry) {
        Err(Error::Decode(DecodeError::CountMismatch {
            section,
            expected,
            found,
        })) => {
            assert_eq!(section, "objects");
            assert_eq!((expected, found), (3, 2));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // Both say 3 but only two objects follow: the third read runs off the section.
    let mut input = ByteReader::new(&bytes);
    input.read_bytes(TAGS_OFFSET).unwrap();
    input.read_substream().unwrap();
    input.read_substream().unwrap();
    let table_body = input.offset() + 4;
    assert_eq!(&bytes[table_body..table_body + 4], &2u32.to_le_bytes());
    patch_u32(&mut patched, table_body, 3);
    match hyast::decode(&patched, &registry) {
        Err(Error::Decode(DecodeError::UnexpectedEnd { .. })) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn corrupted_framing_is_detected() {
    let registry = literal_registry();
    let bytes = two_object_module(&registry);
    assert!(hyast::decode(&bytes, &registry).is_ok());

    for len in 0..bytes.len() {
        assert!(hyast::decode(&bytes[..len], &registry).is_err(), "prefix of {len} bytes");
    }

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(matches!(
        hyast::decode(&trailing, &registry),
        Err(Error::Decode(DecodeError::TrailingBytes { .. }))
    ));

    let mut footer = bytes.clone();
    let last = footer.len() - 1;
    footer[last] ^= 0x40;
    assert!(matches!(
        hyast::decode(&footer, &registry),
        Err(Error::Decode(DecodeError::SubstreamLengthMismatch { .. }))
    ));
}

#[test]
fn references_back_to_their_holder_are_rejected() {
    let fixed = EncodingConfig::new().with_index_encoding(IndexEncoding::Fixed32);

    let registry = ShapeRegistry::builder()
        .shape("Node", [("next", "Node?")])
        .build()
        .unwrap();
    let mut tree = Tree::new();
    let root = tree.push_object(Object::new("Node").with_field("next", Value::Null));
    tree.set_root(root);
    let mut bytes = hyast::encode(&tree, &registry, &fixed).unwrap();
    assert!(hyast::decode(&bytes, &registry).is_ok());

    // count 1, tag `Node`, `next` = null; point `next` at entry 0 itself.
    let at = position(&bytes, &[1, 0, 0, 0, 11, 0, 0, 0, 0, 0, 0, 0]).unwrap();
    patch_u32(&mut bytes, at + 8, 1);
    assert!(matches!(
        hyast::decode(&bytes, &registry),
        Err(Error::Decode(DecodeError::CyclicReference { node: 0 }))
    ));

    let registry = ShapeRegistry::builder()
        .shape("Box", [("items", "array")])
        .build()
        .unwrap();
    let mut tree = Tree::new();
    let inner = tree.push_array(Vec::new());
    let outer = tree.push_array(vec![inner]);
    let root = tree.push_object(Object::new("Box").with_field("items", outer));
    tree.set_root(root);
    let mut bytes = hyast::encode(&tree, &registry, &fixed).unwrap();
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));

    // count 2; outer: one element tagged `array` referencing entry 1; inner: empty.
    // Point the outer array at itself.
    let at = position(&bytes, &[2, 0, 0, 0, 1, 1, 0, 0, 0, 2, 0, 0, 0, 0]).unwrap();
    patch_u32(&mut bytes, at + 9, 1);
    assert!(matches!(
        hyast::decode(&bytes, &registry),
        Err(Error::Decode(DecodeError::CyclicReference { .. }))
    ));
}

#[test]
fn shared_table_references_must_match_the_declared_shape() {
    let registry = ShapeRegistry::builder()
        .shape("A", [("x", "integer")])
        .shape("B", [("y", "integer")])
        .shape("W", [("a", "A"), ("b", "B")])
        .build()
        .unwrap();
    let mut tree = Tree::new();
    let a = tree.push_object(Object::new("A").with_field("x", 1));
    let b = tree.push_object(Object::new("B").with_field("y", 2));
    let root = tree.push_object(Object::new("W").with_field("a", a).with_field("b", b));
    tree.set_root(root);

    let fixed = EncodingConfig::new().with_index_encoding(IndexEncoding::Fixed32);
    let mut bytes = hyast::encode(&tree, &registry, &fixed).unwrap();
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));

    // `W` (tag 11) is entry 0 and references `A` as 2 and `B` as 3; retarget `a` at `B`.
    let at = position(&bytes, &[11, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]).unwrap();
    patch_u32(&mut bytes, at + 4, 3);
    match hyast::decode(&bytes, &registry) {
        Err(Error::Decode(DecodeError::ShapeMismatch {
            expected,
            found,
            index,
            ..
        })) => {
            assert_eq!((expected.as_str(), found.as_str(), index), ("A", "B", 2));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn decoding_needs_every_shape_of_the_module() {
    let registry = literal_registry();
    let bytes = two_object_module(&registry);
    let other = ShapeRegistry::builder()
        .shape("Identifier", [("name", "string")])
        .build()
        .unwrap();
    assert!(matches!(
        hyast::decode(&bytes, &other),
        Err(Error::Schema(SchemaError::UnknownShape(name))) if name == "Literal"
    ));
}

#[test]
fn schema_violations_fail_encoding() {
    let registry = literal_registry();
    let config = EncodingConfig::new();

    let mut tree = Tree::new();
    let root = tree.push_object(Object::new("Literal").with_field("value", "x"));
    tree.set_root(root);
    match hyast::encode(&tree, &registry, &config) {
        Err(Error::Schema(SchemaError::TypeMismatch {
            shape,
            field,
            expected,
            found,
        })) => {
            assert_eq!((shape.as_str(), field.as_str()), ("Literal", "value"));
            assert_eq!((expected.as_str(), found.as_str()), ("integer", "string"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // Doubles are not integers.
    let mut tree = Tree::new();
    let root = tree.push_object(Object::new("Literal").with_field("value", 0.5));
    tree.set_root(root);
    assert!(matches!(
        hyast::encode(&tree, &registry, &config),
        Err(Error::Schema(SchemaError::TypeMismatch { .. }))
    ));

    // Required references cannot be null.
    let mut tree = Tree::new();
    let left = literal(&mut tree, 1);
    let tree = pair(&mut tree, left, Value::Null);
    assert!(matches!(
        hyast::encode(&tree, &registry, &config),
        Err(Error::Schema(SchemaError::TypeMismatch { field, found, .. }))
            if field == "right" && found == "null"
    ));

    // Array elements are checked against the element type.
    let mut tree = Tree::new();
    let inner = literal(&mut tree, 1);
    let wrong = tree.push_object(
        Object::new("Pair")
            .with_field("left", inner.clone())
            .with_field("right", inner),
    );
    let arguments = tree.push_array(vec![wrong]);
    let call = tree.push_object(
        Object::new("Call")
            .with_field("callee", "f")
            .with_field("arguments", arguments),
    );
    tree.set_root(call);
    assert!(matches!(
        hyast::encode(&tree, &registry, &config),
        Err(Error::Schema(SchemaError::TypeMismatch { field, found, .. }))
            if field == "arguments[0]" && found == "Pair"
    ));

    let mut tree = Tree::new();
    let root = tree.push_object(Object::new("Nope"));
    tree.set_root(root);
    assert!(matches!(
        hyast::encode(&tree, &registry, &config),
        Err(Error::Schema(SchemaError::UnknownShape(name))) if name == "Nope"
    ));
}

#[test]
fn unknown_fields_are_rejected_or_dropped() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let root = tree.push_object(
        Object::new("Literal")
            .with_field("value", 3)
            .with_field("note", "extra"),
    );
    tree.set_root(root);

    assert!(matches!(
        hyast::encode(&tree, &registry, &EncodingConfig::new()),
        Err(Error::Schema(SchemaError::UnknownField { shape, field }))
            if shape == "Literal" && field == "note"
    ));

    let config = EncodingConfig::new().with_ignore_unknown_fields(true);
    let bytes = hyast::encode(&tree, &registry, &config).unwrap();
    let decoded = hyast::decode(&bytes, &registry).unwrap();
    let root = root_object(&decoded);
    assert_eq!(root.get("note"), None);
    assert_eq!(root.get("value"), Some(&Value::Number(3.0)));
}

#[test]
fn heterogeneous_arrays_need_the_any_fallback() {
    let registry = ShapeRegistry::builder()
        .shape("Holder", [("items", "array")])
        .build()
        .unwrap();
    let mut tree = Tree::new();
    let items = tree.push_array(vec![Value::from(1), Value::from("a"), Value::from(2)]);
    let root = tree.push_object(Object::new("Holder").with_field("items", items));
    tree.set_root(root);

    let bytes = hyast::encode(&tree, &registry, &EncodingConfig::new()).unwrap();
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));

    let strict = EncodingConfig::new().with_any_array_fallback(false);
    match hyast::encode(&tree, &registry, &strict) {
        Err(Error::Encode(EncodeError::HeterogeneousArray { tags, .. })) => {
            assert_eq!(tags, "string, integer");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // Numbers and nullable references still unify without the fallback.
    let mut tree = Tree::new();
    let numbers = tree.push_array(vec![Value::from(1), Value::from(2.5)]);
    let strings = tree.push_array(vec![Value::from("a"), Value::Null]);
    let items = tree.push_array(vec![numbers, strings, Value::Null]);
    let root = tree.push_object(Object::new("Holder").with_field("items", items));
    tree.set_root(root);
    let bytes = hyast::encode(&tree, &registry, &strict).unwrap();
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));

    // Nested arrays are array references; `object` only ever unifies shapes.
    let mut tree = Tree::new();
    let first = tree.push_array(vec![Value::from(1)]);
    let second = tree.push_array(vec![Value::from("a")]);
    let items = tree.push_array(vec![first, second]);
    let root = tree.push_object(Object::new("Holder").with_field("items", items.clone()));
    tree.set_root(root);
    let module = build_module(&tree, &registry, &strict).unwrap();
    assert_eq!(module.element_tag(items.node().unwrap()), Some(Tag::ARRAY));
    let bytes = hyast::encode(&tree, &registry, &strict).unwrap();
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));
}

#[test]
fn rarely_referenced_objects_are_inlined() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let shared = literal(&mut tree, 5);
    let tree = pair(&mut tree, shared.clone(), shared);

    let plain = hyast::encode(&tree, &registry, &EncodingConfig::new()).unwrap();
    assert_eq!(hyast::inspect(&plain).unwrap().objects(), 2);

    // The pair is used once and goes inline; the literal is used twice and stays.
    let once = hyast::encode(&tree, &registry, &EncodingConfig::new().with_inlining(1)).unwrap();
    let summary = hyast::inspect(&once).unwrap();
    assert!(summary.wire.inline_objects());
    assert_eq!(summary.objects(), 1);
    let decoded = hyast::decode(&once, &registry).unwrap();
    assert!(decoded.structural_eq(&tree));
    let root = root_object(&decoded);
    assert_eq!(root.get("left").unwrap().node(), root.get("right").unwrap().node());

    let twice = hyast::encode(&tree, &registry, &EncodingConfig::new().with_inlining(2)).unwrap();
    assert_eq!(hyast::inspect(&twice).unwrap().objects(), 0);
    assert!(hyast::decode(&twice, &registry).unwrap().structural_eq(&tree));
}

#[test]
fn value_streams_group_tokens_by_tag() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let arguments = (0..10).map(|i| literal(&mut tree, i * 1000)).collect();
    let arguments = tree.push_array(arguments);
    let call = tree.push_object(
        Object::new("Call")
            .with_field("callee", "sum")
            .with_field("arguments", arguments),
    );
    tree.set_root(call);

    let config = EncodingConfig::new().with_value_streams(true);
    let bytes = hyast::encode(&tree, &registry, &config).unwrap();
    let summary = hyast::inspect(&bytes).unwrap();
    let streams: Vec<u32> = summary.value_streams.iter().map(|&(tag, _)| tag).collect();
    for builtin in [BuiltinTag::Any, BuiltinTag::Array, BuiltinTag::String, BuiltinTag::Integer] {
        assert!(streams.contains(&builtin.seed_index()), "{builtin:?} in {streams:?}");
    }
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));
}

#[test]
fn partitioned_modules_have_one_table_per_shape() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let left = literal(&mut tree, 1);
    let right = literal(&mut tree, 2);
    let tree = pair(&mut tree, left, right);

    let config = EncodingConfig::new().with_partitioned_tables(true);
    let bytes = hyast::encode(&tree, &registry, &config).unwrap();
    let summary = hyast::inspect(&bytes).unwrap();
    let tables: Vec<_> = summary
        .object_tables
        .iter()
        .map(|t| (t.shape_tag, t.count))
        .collect();
    // Tags are assigned on first visit: the root pair, then the literals.
    assert_eq!(tables, vec![(Some(11), 1), (Some(12), 2)]);
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));
}

#[test]
fn hit_count_ordering_gives_frequent_strings_small_indices() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    let mut calls = Vec::new();
    for callee in ["rare", "common", "common", "common"] {
        let arguments = tree.push_array(Vec::new());
        calls.push(tree.push_object(
            Object::new("Call")
                .with_field("callee", callee)
                .with_field("arguments", arguments),
        ));
    }
    let root = tree.push_array(calls);
    tree.set_root(root);

    let ordered = EncodingConfig::new().with_hit_count_ordering(true);
    let module = build_module(&tree, &registry, &ordered).unwrap();
    assert!(module.is_finalized());
    assert_eq!(module.strings().index_of(&"common".to_owned()), Ok(0));
    assert_eq!(module.strings().index_of(&"rare".to_owned()), Ok(1));

    let module = build_module(&tree, &registry, &EncodingConfig::new()).unwrap();
    assert_eq!(module.strings().index_of(&"rare".to_owned()), Ok(0));

    let bytes = hyast::encode(&tree, &registry, &ordered).unwrap();
    assert!(hyast::decode(&bytes, &registry).unwrap().structural_eq(&tree));
}

#[test]
fn builtin_tags_seed_every_module() {
    let registry = literal_registry();
    let mut tree = Tree::new();
    tree.set_root(Value::Null);
    let module = build_module(&tree, &registry, &EncodingConfig::new()).unwrap();
    assert_eq!(module.tags().len(), 11);
    assert_eq!(module.tag_index(Tag::DOUBLE, &registry), Ok(10));

    let bytes = hyast::encode(&tree, &registry, &EncodingConfig::new()).unwrap();
    let decoded = hyast::decode(&bytes, &registry).unwrap();
    assert!(decoded.root().is_null());
    assert!(decoded.is_empty());
}
