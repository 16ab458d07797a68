//! The [`Node`] data model.
//!
//! A node is a scalar, an ordered sequence, a string-keyed mapping, or a
//! symbolic [`Node::Reference`] to another path. Composite children sit
//! behind `Arc`, so cloning a tree is cheap and persistent updates only copy
//! the spine from the root to the modified location.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::error::TypeError;
use crate::path::{is_reference, unreference, KeyPath, REF_MARKER};

/// A value reachable by a key path.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Node {
    /// JSON `null`.
    #[default]
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// A numeric scalar.
    Number(Number),
    /// A literal string. Never interpreted as a reference.
    String(String),
    /// An ordered sequence, addressed by decimal index segments.
    Sequence(Arc<Vec<Node>>),
    /// A string-keyed mapping.
    Mapping(Arc<BTreeMap<String, Node>>),
    /// "This location's value is found at that other path."
    Reference(KeyPath),
}

impl Node {
    /// An empty mapping.
    pub fn empty_mapping() -> Self {
        Node::Mapping(Arc::new(BTreeMap::new()))
    }

    /// Build a mapping from `(key, node)` pairs.
    pub fn mapping<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Node)>,
        K: Into<String>,
    {
        Node::Mapping(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Build a sequence from nodes.
    pub fn sequence<I: IntoIterator<Item = Node>>(items: I) -> Self {
        Node::Sequence(Arc::new(items.into_iter().collect()))
    }

    /// A reference to `path`. A marker prefix on `path` is stripped first.
    pub fn reference(path: &str) -> Self {
        Node::Reference(KeyPath::parse(&unreference(path)))
    }

    // ---- Inspection ----

    /// Returns `true` for sequences and mappings.
    pub fn is_composite(&self) -> bool {
        matches!(self, Node::Sequence(_) | Node::Mapping(_))
    }

    /// Returns `true` for [`Node::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// The target path if this node is a reference.
    pub fn as_reference(&self) -> Option<&KeyPath> {
        match self {
            Node::Reference(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Node::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Returns `true` if both nodes are the same shared composite allocation.
    /// Scalars never compare pointer-equal.
    pub fn ptr_eq(a: &Node, b: &Node) -> bool {
        match (a, b) {
            (Node::Mapping(x), Node::Mapping(y)) => Arc::ptr_eq(x, y),
            (Node::Sequence(x), Node::Sequence(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    // ---- Raw navigation (no reference resolution) ----

    /// The direct child addressed by `segment`.
    pub fn child(&self, segment: &str) -> Option<&Node> {
        match self {
            Node::Mapping(map) => map.get(segment),
            Node::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Walk `path` literally from this node. References along the way are
    /// not followed.
    pub fn get_path(&self, path: &KeyPath) -> Option<&Node> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Returns `true` if this node directly contains `segment`.
    pub fn contains(&self, segment: &str) -> bool {
        self.child(segment).is_some()
    }

    // ---- Updates ----

    /// Persistent update: return a new tree in which `path` holds `value`
    /// (`None` deletes the key). Every node off the spine is shared with
    /// `self`; intermediate mappings are created as needed.
    pub fn with_value_at(&self, path: &KeyPath, value: Option<Node>) -> Result<Node, TypeError> {
        let updated = assign_persistent(Some(self), path, 0, value)?;
        Ok(updated.unwrap_or_else(Node::empty_mapping))
    }

    /// In-place update through `Arc::make_mut`. Subtrees still shared with
    /// another owner are copied before being written, so previously handed
    /// out clones never observe the change.
    pub fn set_in_place(&mut self, path: &KeyPath, value: Option<Node>) -> Result<(), TypeError> {
        if path.is_root() {
            *self = value.unwrap_or_else(Node::empty_mapping);
            return Ok(());
        }
        assign_in_place(self, path, 0, value)
    }

    // ---- JSON boundary ----

    /// Convert from JSON. Strings carrying [`REF_MARKER`] become references.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) if is_reference(&s) => Node::reference(&s),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::sequence(items.into_iter().map(Node::from_json)),
            Value::Object(map) => {
                Node::mapping(map.into_iter().map(|(k, v)| (k, Node::from_json(v))))
            }
        }
    }

    /// Convert to JSON. References render as marker strings.
    pub fn to_json(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Sequence(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
            Node::Reference(path) => Value::String(format!("{REF_MARKER}{path}")),
        }
    }
}

fn parse_index(path: &KeyPath, segment: &str) -> Result<usize, TypeError> {
    segment.parse::<usize>().map_err(|_| TypeError::InvalidIndex {
        path: path.to_string(),
        segment: segment.to_string(),
    })
}

/// Writable slot for `segment` in a sequence of `len` items. Writes may
/// replace an item or append one; anything past the end is rejected.
fn writable_index(path: &KeyPath, segment: &str, len: usize) -> Result<usize, TypeError> {
    let index = parse_index(path, segment)?;
    if index > len {
        return Err(TypeError::InvalidIndex {
            path: path.to_string(),
            segment: segment.to_string(),
        });
    }
    Ok(index)
}

fn not_traversable(path: &KeyPath, segment: &str) -> TypeError {
    TypeError::NotTraversable {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

fn assign_persistent(
    node: Option<&Node>,
    path: &KeyPath,
    depth: usize,
    value: Option<Node>,
) -> Result<Option<Node>, TypeError> {
    let Some(segment) = path.segments().get(depth) else {
        return Ok(value);
    };

    match node {
        None | Some(Node::Null) => {
            if value.is_none() {
                return Ok(node.cloned());
            }
            let child = assign_persistent(None, path, depth + 1, value)?;
            let mut map = BTreeMap::new();
            if let Some(child) = child {
                map.insert(segment.clone(), child);
            }
            Ok(Some(Node::Mapping(Arc::new(map))))
        }
        Some(Node::Mapping(map)) => {
            let child = assign_persistent(map.get(segment), path, depth + 1, value)?;
            let mut copy = (**map).clone();
            match child {
                Some(child) => copy.insert(segment.clone(), child),
                None => copy.remove(segment),
            };
            Ok(Some(Node::Mapping(Arc::new(copy))))
        }
        Some(Node::Sequence(items)) => {
            if value.is_none() && parse_index(path, segment)? >= items.len() {
                return Ok(node.cloned());
            }
            let index = writable_index(path, segment, items.len())?;
            let child = assign_persistent(items.get(index), path, depth + 1, value)?;
            let mut copy = (**items).clone();
            let child = child.unwrap_or(Node::Null);
            if index == copy.len() {
                copy.push(child);
            } else {
                copy[index] = child;
            }
            Ok(Some(Node::Sequence(Arc::new(copy))))
        }
        Some(_) => Err(not_traversable(path, segment)),
    }
}

fn assign_in_place(
    node: &mut Node,
    path: &KeyPath,
    depth: usize,
    value: Option<Node>,
) -> Result<(), TypeError> {
    let segments = path.segments();
    let segment = &segments[depth];
    let terminal = depth + 1 == segments.len();

    if node.is_null() {
        if value.is_none() {
            return Ok(());
        }
        *node = Node::empty_mapping();
    }

    match node {
        Node::Mapping(map) => {
            if terminal {
                match value {
                    Some(value) => {
                        Arc::make_mut(map).insert(segment.clone(), value);
                    }
                    None => {
                        if map.contains_key(segment) {
                            Arc::make_mut(map).remove(segment);
                        }
                    }
                }
                return Ok(());
            }
            if value.is_none() && !map.contains_key(segment) {
                return Ok(());
            }
            let child = Arc::make_mut(map)
                .entry(segment.clone())
                .or_insert(Node::Null);
            assign_in_place(child, path, depth + 1, value)
        }
        Node::Sequence(items) => {
            if value.is_none() && parse_index(path, segment)? >= items.len() {
                return Ok(());
            }
            let index = writable_index(path, segment, items.len())?;
            let items = Arc::make_mut(items);
            if index == items.len() {
                items.push(Node::Null);
            }
            if terminal {
                items[index] = value.unwrap_or(Node::Null);
                return Ok(());
            }
            assign_in_place(&mut items[index], path, depth + 1, value)
        }
        _ => Err(not_traversable(path, segment)),
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::from_json(value)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n.into())
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::Number(n.into())
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::Sequence(Arc::new(items))
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Node::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Node {
        Node::from_json(json!({
            "foo": { "bar": "foo", "boo": "__ref:boo" },
            "boo": { "bar": "foo" },
            "list": [1, 2, 3]
        }))
    }

    #[test]
    fn marker_strings_become_references() {
        let tree = sample();
        let boo = tree.get_path(&KeyPath::parse("foo/boo")).unwrap();
        assert_eq!(boo.as_reference(), Some(&KeyPath::parse("boo")));
        assert_eq!(tree.to_json()["foo"]["boo"], json!("__ref:boo"));
    }

    #[test]
    fn literal_string_is_not_a_reference() {
        let node = Node::from("__ref:boo");
        assert!(node.as_reference().is_none());
    }

    #[test]
    fn sequence_children_by_index() {
        let tree = sample();
        assert_eq!(tree.get_path(&KeyPath::parse("list/1")), Some(&Node::from(2u64)));
        assert!(tree.get_path(&KeyPath::parse("list/x")).is_none());
        assert!(tree.get_path(&KeyPath::parse("list/9")).is_none());
    }

    #[test]
    fn persistent_update_shares_untouched_subtrees() {
        let tree = sample();
        let updated = tree
            .with_value_at(&KeyPath::parse("foo/bar"), Some(Node::from("baz")))
            .unwrap();

        assert!(!Node::ptr_eq(&tree, &updated));
        let old_boo = tree.child("boo").unwrap();
        let new_boo = updated.child("boo").unwrap();
        assert!(Node::ptr_eq(old_boo, new_boo));
        assert_eq!(tree.to_json()["foo"]["bar"], json!("foo"));
        assert_eq!(updated.to_json()["foo"]["bar"], json!("baz"));
    }

    #[test]
    fn persistent_update_creates_intermediates() {
        let tree = Node::empty_mapping();
        let updated = tree
            .with_value_at(&KeyPath::parse("a/b/c"), Some(Node::from(true)))
            .unwrap();
        assert_eq!(updated.to_json(), json!({ "a": { "b": { "c": true } } }));
    }

    #[test]
    fn persistent_delete() {
        let tree = sample();
        let updated = tree.with_value_at(&KeyPath::parse("foo/bar"), None).unwrap();
        assert!(!updated.child("foo").unwrap().contains("bar"));
        assert!(tree.child("foo").unwrap().contains("bar"));
    }

    #[test]
    fn in_place_update_copies_shared_subtrees() {
        let mut tree = sample();
        let snapshot = tree.clone();
        tree.set_in_place(&KeyPath::parse("boo/bar"), Some(Node::from("changed")))
            .unwrap();
        assert_eq!(tree.to_json()["boo"]["bar"], json!("changed"));
        assert_eq!(snapshot.to_json()["boo"]["bar"], json!("foo"));
    }

    #[test]
    fn in_place_sequence_appends_at_end() {
        let mut tree = sample();
        tree.set_in_place(&KeyPath::parse("list/3"), Some(Node::from(4u64)))
            .unwrap();
        assert_eq!(tree.to_json()["list"], json!([1, 2, 3, 4]));
        tree.set_in_place(&KeyPath::parse("list/4/x"), Some(Node::from(5u64)))
            .unwrap();
        assert_eq!(tree.to_json()["list"], json!([1, 2, 3, 4, { "x": 5 }]));
    }

    #[test]
    fn persistent_sequence_appends_at_end() {
        let tree = sample();
        let updated = tree
            .with_value_at(&KeyPath::parse("list/3"), Some(Node::from(4u64)))
            .unwrap();
        assert_eq!(updated.to_json()["list"], json!([1, 2, 3, 4]));
        assert_eq!(tree.to_json()["list"], json!([1, 2, 3]));
    }

    #[test]
    fn in_place_index_past_end_is_rejected() {
        for segment in ["5", "10000000000", "18446744073709551615"] {
            let mut tree = sample();
            let path = KeyPath::parse(&format!("list/{segment}"));
            let err = tree.set_in_place(&path, Some(Node::from(1u64))).unwrap_err();
            assert!(matches!(err, TypeError::InvalidIndex { .. }), "{segment}");
            assert_eq!(tree.to_json()["list"], json!([1, 2, 3]));
        }
    }

    #[test]
    fn persistent_index_past_end_is_rejected() {
        let tree = sample();
        for segment in ["5", "10000000000", "18446744073709551615"] {
            let path = KeyPath::parse(&format!("list/{segment}/deep"));
            let err = tree.with_value_at(&path, Some(Node::from(1u64))).unwrap_err();
            assert!(matches!(err, TypeError::InvalidIndex { .. }), "{segment}");
        }
    }

    #[test]
    fn deleting_past_end_is_noop() {
        let mut tree = sample();
        let path = KeyPath::parse("list/18446744073709551615");
        assert_eq!(tree.with_value_at(&path, None).unwrap(), tree);
        tree.set_in_place(&path, None).unwrap();
        assert_eq!(tree.to_json()["list"], json!([1, 2, 3]));
    }

    #[test]
    fn in_place_remove_missing_is_noop() {
        let mut tree = sample();
        let before = tree.clone();
        tree.set_in_place(&KeyPath::parse("nope/deeper"), None).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn descending_into_scalar_fails() {
        let mut tree = sample();
        let err = tree
            .set_in_place(&KeyPath::parse("foo/bar/x"), Some(Node::Null))
            .unwrap_err();
        assert!(matches!(err, TypeError::NotTraversable { .. }));
    }

    #[test]
    fn invalid_sequence_index() {
        let tree = sample();
        let err = tree
            .with_value_at(&KeyPath::parse("list/first"), Some(Node::Null))
            .unwrap_err();
        assert!(matches!(err, TypeError::InvalidIndex { .. }));
    }

    #[test]
    fn serde_round_trip_through_json() {
        let tree = sample();
        let text = serde_json::to_string(&tree).unwrap();
        let back: Node = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
    }
}
