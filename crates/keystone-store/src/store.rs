use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, info};

use keystone_refs::ReferenceResolver;
use keystone_types::{unreference, KeyPath, Node, EXPIRY_KEY, REF_MARKER};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::options::{GetOptions, SetOptions};

type ReadCache = HashMap<(KeyPath, u32), Option<Node>>;

/// Hierarchical, reference-aware, in-memory data store.
///
/// The store owns a single [`Node`] tree. Reads resolve references in the
/// requested path and expand references inside the result up to a depth;
/// writes resolve the path fully and then either mutate in place or build a
/// new tree sharing every untouched subtree.
///
/// While the store is not writeable, `get` results are memoised per
/// `(path, depth)`. Re-enabling writes clears that cache.
pub struct Store {
    root: Node,
    resolver: ReferenceResolver,
    config: StoreConfig,
    writeable: bool,
    destroyed: bool,
    changed: bool,
    unserialisable: BTreeSet<KeyPath>,
    read_cache: Mutex<ReadCache>,
}

impl Store {
    /// Reference marker prefix used at the JSON boundary.
    pub const REF_MARKER: &'static str = REF_MARKER;
    /// Reserved child key that holds expiry records of cached entries.
    pub const EXPIRY_KEY: &'static str = EXPIRY_KEY;

    /// Create an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_data(Node::empty_mapping(), config)
    }

    /// Create a store seeded with `root`. A non-composite seed is replaced
    /// by an empty mapping.
    pub fn with_data(root: Node, config: StoreConfig) -> Self {
        let root = if root.is_composite() {
            root
        } else {
            Node::empty_mapping()
        };
        Self {
            root,
            resolver: ReferenceResolver::new(config.max_reference_hops),
            writeable: config.writeable,
            config,
            destroyed: false,
            changed: false,
            unserialisable: BTreeSet::new(),
            read_cache: Mutex::new(HashMap::new()),
        }
    }

    // ---- Accessors ----

    /// The current root. Cheap to clone; composites are shared.
    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Whether an immutable write has replaced the root since the last
    /// [`Self::mark_unchanged`]. In-place writes do not touch this flag.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_unchanged(&mut self) {
        self.changed = false;
    }

    /// Number of memoised reads.
    pub fn cached_reads(&self) -> usize {
        self.cache().map(|c| c.len()).unwrap_or(0)
    }

    // ---- Paths & references ----

    /// Canonical form of `path`: every reference along it, including one
    /// stored at the last segment, is followed.
    pub fn resolve_ref_key(&self, path: &str) -> StoreResult<KeyPath> {
        let path = KeyPath::parse(&unreference(path));
        Ok(self.resolver.resolve_ref_key(&self.root, &path)?)
    }

    /// Element-wise [`Self::resolve_ref_key`].
    pub fn resolve_ref_keys<S: AsRef<str>>(&self, paths: &[S]) -> StoreResult<Vec<KeyPath>> {
        paths.iter().map(|p| self.resolve_ref_key(p.as_ref())).collect()
    }

    /// A reference node pointing at `path`.
    ///
    /// When `path` itself holds a reference, that stored reference is
    /// returned instead, so referencing an alias yields the alias's own
    /// target rather than a reference to a reference.
    pub fn reference(&self, path: &str) -> StoreResult<Node> {
        let plain = KeyPath::parse(&unreference(path));
        let at = self.resolver.resolve_parent(&self.root, &plain)?;
        if let Some(Node::Reference(target)) = self.root.get_path(&at) {
            return Ok(Node::Reference(target.clone()));
        }
        Ok(Node::Reference(plain))
    }

    /// Element-wise [`Self::reference`].
    pub fn references<S: AsRef<str>>(&self, paths: &[S]) -> StoreResult<Vec<Node>> {
        paths.iter().map(|p| self.reference(p.as_ref())).collect()
    }

    /// The path a reference string points at.
    pub fn unreference(path: &str) -> String {
        unreference(path)
    }

    // ---- Reads ----

    /// Read the value at `path` (the whole tree when `None`), expanding
    /// references inside it up to `options.reference_depth` levels.
    ///
    /// Returns `Ok(None)` for missing paths and on a destroyed store.
    pub fn get(&self, path: Option<&str>, options: &GetOptions) -> StoreResult<Option<Node>> {
        if self.destroyed {
            return Ok(None);
        }
        let depth = options
            .reference_depth
            .unwrap_or(self.config.default_reference_depth);
        let path = KeyPath::parse(&unreference(path.unwrap_or_default()));

        if !self.writeable {
            if let Some(hit) = self.cache()?.get(&(path.clone(), depth)) {
                return Ok(hit.clone());
            }
        }

        let at = self.resolver.resolve_parent(&self.root, &path)?;
        let value = match self.root.get_path(&at) {
            Some(node) => Some(self.resolver.expand(&self.root, node, depth)?),
            None => None,
        };

        if !self.writeable {
            self.cache()?.insert((path, depth), value.clone());
        }
        Ok(value)
    }

    /// Element-wise `get` with default options, preserving order.
    pub fn get_all<S: AsRef<str>>(&self, paths: &[S]) -> StoreResult<Vec<Option<Node>>> {
        let options = GetOptions::default();
        paths
            .iter()
            .map(|p| self.get(Some(p.as_ref()), &options))
            .collect()
    }

    // ---- Writes ----

    /// Write `value` at the canonical form of `path`; `None` deletes it.
    ///
    /// An empty path, or one that resolves to the root through a reference,
    /// is a no-op. Fails with [`StoreError::NotWritable`] while writes are
    /// disabled.
    pub fn set(
        &mut self,
        path: &str,
        value: Option<Node>,
        options: &SetOptions,
    ) -> StoreResult<()> {
        if self.destroyed {
            return Err(StoreError::Destroyed);
        }
        let path = KeyPath::parse(&unreference(path));
        if path.is_root() {
            return Ok(());
        }
        if !self.writeable {
            return Err(StoreError::NotWritable {
                path: path.to_string(),
            });
        }

        let canonical = self.resolver.resolve_ref_key(&self.root, &path)?;
        if canonical.is_root() {
            debug!(%path, "set through a root reference ignored");
            return Ok(());
        }
        let immutable = options.immutable.unwrap_or(self.config.immutable);

        if immutable {
            if self.root.get_path(&canonical) == value.as_ref() {
                debug!(path = %canonical, "immutable set left value unchanged");
                return Ok(());
            }
            self.root = self.root.with_value_at(&canonical, value)?;
            self.changed = true;
        } else {
            self.root.set_in_place(&canonical, value)?;
        }

        self.clear_read_cache();
        debug!(path = %canonical, immutable, "set");
        Ok(())
    }

    /// Apply `set` once per entry, in order, with the same options.
    pub fn set_all<I, S>(&mut self, entries: I, options: &SetOptions) -> StoreResult<()>
    where
        I: IntoIterator<Item = (S, Option<Node>)>,
        S: AsRef<str>,
    {
        for (path, value) in entries {
            self.set(path.as_ref(), value, options)?;
        }
        Ok(())
    }

    /// Delete the value at `path`. Removing a key its parent does not
    /// contain, or a path that resolves to the root, is a silent no-op.
    pub fn remove(&mut self, path: &str, options: &SetOptions) -> StoreResult<()> {
        if self.destroyed {
            return Err(StoreError::Destroyed);
        }
        let canonical = self.resolve_ref_key(path)?;
        let Some(last) = canonical.last() else {
            return Ok(());
        };
        let present = self
            .root
            .get_path(&canonical.parent())
            .is_some_and(|parent| parent.contains(last));
        if !present {
            return Ok(());
        }
        self.set(&canonical.to_string(), None, options)
    }

    /// Toggle writeability. Either transition discards memoised reads.
    pub fn set_writeable(&mut self, writeable: bool) {
        if self.writeable != writeable {
            debug!(writeable, "writeability changed");
        }
        self.writeable = writeable;
        self.clear_read_cache();
    }

    // ---- Serialisability ----

    /// Include (`true`) or exclude (`false`) `path` from [`Self::to_json`].
    /// Paths are matched literally against tree locations.
    pub fn set_serialisability_of_key(&mut self, path: &str, serialisable: bool) {
        let path = KeyPath::parse(&unreference(path));
        if serialisable {
            self.unserialisable.remove(&path);
        } else {
            self.unserialisable.insert(path);
        }
    }

    /// Batch form of [`Self::set_serialisability_of_key`].
    pub fn set_serialisability_of_keys<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        for (path, serialisable) in keys {
            self.set_serialisability_of_key(path.as_ref(), serialisable);
        }
    }

    /// Returns `true` unless `path` was marked unserialisable.
    pub fn is_serialisable(&self, path: &str) -> bool {
        !self
            .unserialisable
            .contains(&KeyPath::parse(&unreference(path)))
    }

    /// Fully reference-resolved snapshot of the whole tree, ignoring
    /// serialisability marks.
    pub fn dump(&self) -> StoreResult<Value> {
        let depth = u32::try_from(self.resolver.max_hops()).unwrap_or(u32::MAX);
        Ok(self.resolver.expand(&self.root, &self.root, depth)?.to_json())
    }

    /// [`Self::dump`] rendered as a JSON string.
    pub fn dump_string(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(&self.dump()?)?)
    }

    /// Snapshot honouring serialisability marks, with references expanded
    /// one level, rooted at `path` (or the whole tree).
    pub fn to_json(&self, path: Option<&str>) -> StoreResult<Value> {
        let path = KeyPath::parse(&unreference(path.unwrap_or_default()));
        let at = self.resolver.resolve_parent(&self.root, &path)?;
        match self.root.get_path(&at) {
            Some(node) if !self.unserialisable.contains(&at) => self.serialise(node, &at, 1),
            _ => Ok(Value::Null),
        }
    }

    fn serialise(&self, node: &Node, at: &KeyPath, depth: u32) -> StoreResult<Value> {
        match node {
            Node::Mapping(map) => {
                let mut out = Map::new();
                for (key, child) in map.iter() {
                    let child_at = at.join(&KeyPath::from_segments([key.as_str()]));
                    if self.unserialisable.contains(&child_at) {
                        continue;
                    }
                    out.insert(key.clone(), self.serialise(child, &child_at, depth)?);
                }
                Ok(Value::Object(out))
            }
            Node::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, child) in items.iter().enumerate() {
                    let child_at = at.join(&KeyPath::from_segments([index.to_string()]));
                    if self.unserialisable.contains(&child_at) {
                        out.push(Value::Null);
                        continue;
                    }
                    out.push(self.serialise(child, &child_at, depth)?);
                }
                Ok(Value::Array(out))
            }
            Node::Reference(target) if depth > 0 => {
                let target_at = self.resolver.resolve_parent(&self.root, target)?;
                match self.root.get_path(&target_at) {
                    Some(found) => self.serialise(found, &target_at, depth - 1),
                    None => Ok(Value::Null),
                }
            }
            other => Ok(other.to_json()),
        }
    }

    // ---- Lifecycle ----

    /// Drop all data and marks. Reads return `None` and writes fail from now
    /// on.
    pub fn destroy(&mut self) {
        self.root = Node::empty_mapping();
        self.unserialisable.clear();
        self.clear_read_cache();
        self.destroyed = true;
        info!("store destroyed");
    }

    fn cache(&self) -> StoreResult<MutexGuard<'_, ReadCache>> {
        self.read_cache
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn clear_read_cache(&mut self) {
        match self.read_cache.get_mut() {
            Ok(cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// Generic serialization goes through [`Store::to_json`], so serialisability
/// marks always apply.
impl Serialize for Store {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json(None)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("writeable", &self.writeable)
            .field("destroyed", &self.destroyed)
            .field("immutable", &self.config.immutable)
            .field("cached_reads", &self.cached_reads())
            .finish()
    }
}
