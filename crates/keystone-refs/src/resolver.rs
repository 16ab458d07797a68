//! The [`ReferenceResolver`]: canonical paths and depth-limited expansion.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use keystone_types::{KeyPath, Node};
use tracing::debug;

use crate::error::{RefError, Result};

/// Default bound on reference hops before a path is declared cyclic.
pub const DEFAULT_MAX_HOPS: usize = 32;

/// Rewrites paths that pass through references into canonical paths.
///
/// The resolver is stateless apart from its hop bound; every call takes the
/// tree it should resolve against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceResolver {
    max_hops: usize,
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl ReferenceResolver {
    /// Create a resolver that gives up after `max_hops` references.
    pub fn new(max_hops: usize) -> Self {
        Self {
            max_hops: max_hops.max(1),
        }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Resolve every segment of `path`, including the last one.
    ///
    /// Walking left to right, whenever the prefix consumed so far addresses
    /// a reference, the reference's target segments are spliced in its place
    /// and the walk restarts from the root. The result contains no
    /// references; a plain path resolves to itself.
    ///
    /// ```
    /// use keystone_refs::ReferenceResolver;
    /// use keystone_types::{KeyPath, Node};
    ///
    /// let tree = Node::from(serde_json::json!({
    ///     "alias": "__ref:real",
    ///     "real": { "name": "x" }
    /// }));
    /// let resolver = ReferenceResolver::default();
    /// let path = resolver.resolve_ref_key(&tree, &KeyPath::parse("alias/name")).unwrap();
    /// assert_eq!(path.to_string(), "real/name");
    /// ```
    pub fn resolve_ref_key(&self, root: &Node, path: &KeyPath) -> Result<KeyPath> {
        let mut pending: VecDeque<String> = path.segments().iter().cloned().collect();
        let mut resolved: Vec<String> = Vec::with_capacity(pending.len());
        let mut cursor: Option<&Node> = Some(root);
        let mut hops = 0usize;

        while let Some(segment) = pending.pop_front() {
            let next = cursor.and_then(|node| node.child(&segment));
            match next {
                Some(Node::Reference(target)) => {
                    hops += 1;
                    if hops > self.max_hops {
                        return Err(RefError::CyclicReference {
                            path: path.to_string(),
                            hops,
                        });
                    }
                    for segment in target.segments().iter().rev() {
                        pending.push_front(segment.clone());
                    }
                    resolved.clear();
                    cursor = Some(root);
                }
                other => {
                    resolved.push(segment);
                    cursor = other;
                }
            }
        }

        if hops > 0 {
            debug!(%path, hops, "resolved reference path");
        }
        Ok(KeyPath::from_segments(resolved))
    }

    /// Resolve all but the last segment; the last segment is appended as-is.
    ///
    /// Used where a reference stored *at* the terminal location must be
    /// observed rather than followed.
    pub fn resolve_parent(&self, root: &Node, path: &KeyPath) -> Result<KeyPath> {
        match path.last() {
            None => Ok(KeyPath::root()),
            Some(last) => {
                let parent = self.resolve_ref_key(root, &path.parent())?;
                Ok(parent.join(&KeyPath::from_segments([last])))
            }
        }
    }

    /// Element-wise [`Self::resolve_ref_key`], preserving order and length.
    pub fn resolve_all(&self, root: &Node, paths: &[KeyPath]) -> Result<Vec<KeyPath>> {
        paths
            .iter()
            .map(|path| self.resolve_ref_key(root, path))
            .collect()
    }

    /// The node at the canonical form of `path`, if any.
    pub fn lookup<'a>(&self, root: &'a Node, path: &KeyPath) -> Result<Option<&'a Node>> {
        let canonical = self.resolve_ref_key(root, path)?;
        Ok(root.get_path(&canonical))
    }

    /// Expand references inside `node` up to `depth` levels.
    ///
    /// Depth 0 leaves references untouched. Each reference followed costs one
    /// level, and references found inside the target are expanded with what
    /// remains. Dangling references expand to [`Node::Null`]. Subtrees that
    /// contain nothing to expand are shared with the input, everything on the
    /// way to an expanded reference is a fresh copy.
    ///
    /// Following a reference whose target is already being expanded further
    /// up the same chain fails with [`RefError::CyclicReference`], whatever
    /// depth remains.
    pub fn expand(&self, root: &Node, node: &Node, depth: u32) -> Result<Node> {
        let mut chain = Vec::new();
        Ok(self
            .expand_node(root, node, depth, &mut chain)?
            .unwrap_or_else(|| node.clone()))
    }

    /// `chain` holds the canonical targets currently being expanded, outermost
    /// first.
    fn expand_node(
        &self,
        root: &Node,
        node: &Node,
        depth: u32,
        chain: &mut Vec<KeyPath>,
    ) -> Result<Option<Node>> {
        if depth == 0 {
            return Ok(None);
        }

        match node {
            Node::Reference(target) => {
                let canonical = self.resolve_parent(root, target)?;
                if chain.len() >= self.max_hops || chain.contains(&canonical) {
                    debug!(
                        target = %canonical,
                        hops = chain.len() + 1,
                        "reference cycle during expansion"
                    );
                    return Err(RefError::CyclicReference {
                        path: canonical.to_string(),
                        hops: chain.len() + 1,
                    });
                }
                let found = root.get_path(&canonical).cloned().unwrap_or_default();
                chain.push(canonical);
                let expanded = self.expand_node(root, &found, depth - 1, chain);
                chain.pop();
                Ok(Some(expanded?.unwrap_or(found)))
            }
            Node::Mapping(map) => {
                let mut copy: Option<BTreeMap<String, Node>> = None;
                for (key, child) in map.iter() {
                    if let Some(expanded) = self.expand_node(root, child, depth, chain)? {
                        copy.get_or_insert_with(|| (**map).clone())
                            .insert(key.clone(), expanded);
                    }
                }
                Ok(copy.map(|m| Node::Mapping(Arc::new(m))))
            }
            Node::Sequence(items) => {
                let mut copy: Option<Vec<Node>> = None;
                for (index, child) in items.iter().enumerate() {
                    if let Some(expanded) = self.expand_node(root, child, depth, chain)? {
                        copy.get_or_insert_with(|| (**items).clone())[index] = expanded;
                    }
                }
                Ok(copy.map(|v| Node::Sequence(Arc::new(v))))
            }
            _ => Ok(None),
        }
    }
}
