//! Tree engine: insertion, rehash cascade and the write-back overlay
//!
//! Nodes live in an arena keyed by hash. Every cross-node reference is a hash
//! lookup, so a node whose hash changes must be re-keyed and have the
//! pointers to it repaired in both directions.

use super::HangingNodes;
use crate::model::{leaf_hash, Hash, Node};
use crate::store::{Column, TreeBackend, WriteBatch};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const KEY_ROOT_HASH: &str = "rootHash";
pub const KEY_NUM_LEAVES: &str = "numLeaves";
pub const KEY_DEPTH: &str = "depth";
pub const HANGING_NODE_PREFIX: &str = "hangingNode";

/// Leaf counts are u64, so no tree is deeper than this
const MAX_DEPTH: usize = 64;

fn hanging_node_key(level: usize) -> String {
    format!("{}{}", HANGING_NODE_PREFIX, level)
}

/// Scalar state restored when a mutation fails half way
struct Checkpoint {
    root_hash: Option<Hash>,
    num_leaves: u64,
    depth: usize,
    hanging: HangingNodes,
}

/// Prior cache contents of a touched hash: `(hash, node, was_stale)`
type JournalEntry = (Hash, Option<Node>, bool);

/// The mutable state of one tree: persisted metadata plus an in-memory
/// overlay of unflushed nodes and key data.
///
/// Not synchronized; [`MerkleTree`](crate::MerkleTree) wraps it in a lock.
pub struct TreeState {
    backend: Arc<dyn TreeBackend>,
    root_hash: Option<Hash>,
    num_leaves: u64,
    depth: usize,
    hanging: HangingNodes,
    /// Overlay of nodes changed since the last flush
    nodes: HashMap<Hash, Node>,
    /// Overlay of key data changed since the last flush
    key_data: HashMap<Vec<u8>, Vec<u8>>,
    /// Hashes rehashed away this session; their persisted copies are stale
    stale: HashSet<Hash>,
    journal: Option<Vec<JournalEntry>>,
    dirty: bool,
}

impl TreeState {
    /// Load tree metadata from the backend
    pub fn load(backend: Arc<dyn TreeBackend>) -> Result<Self> {
        let mut state = TreeState {
            backend,
            root_hash: None,
            num_leaves: 0,
            depth: 0,
            hanging: HangingNodes::new(),
            nodes: HashMap::new(),
            key_data: HashMap::new(),
            stale: HashSet::new(),
            journal: None,
            dirty: false,
        };
        state.load_metadata()?;
        Ok(state)
    }

    fn load_metadata(&mut self) -> Result<()> {
        self.root_hash = self.read_hash(KEY_ROOT_HASH)?;
        self.num_leaves = self.read_u64(KEY_NUM_LEAVES)?.unwrap_or(0);
        let depth = self.read_u64(KEY_DEPTH)?.unwrap_or(0);
        self.depth = usize::try_from(depth)
            .ok()
            .filter(|depth| *depth <= MAX_DEPTH)
            .ok_or_else(|| {
                Error::Corruption(format!("depth {} exceeds {}", depth, MAX_DEPTH))
            })?;

        self.hanging = HangingNodes::with_depth(self.depth);
        for level in 0..=self.depth {
            if let Some(hash) = self.read_hash(&hanging_node_key(level))? {
                self.hanging.set(level, hash)?;
            }
        }

        if self.root_hash.is_none() != (self.num_leaves == 0) {
            return Err(Error::Corruption(format!(
                "root hash {:?} inconsistent with {} leaves",
                self.root_hash, self.num_leaves
            )));
        }
        Ok(())
    }

    fn read_hash(&self, key: &str) -> Result<Option<Hash>> {
        match self.backend.get(Column::Metadata, key)? {
            Some(bytes) => Hash::from_slice(&bytes)
                .map(Some)
                .ok_or_else(|| Error::Corruption(format!("metadata {} is not a hash", key))),
            None => Ok(None),
        }
    }

    fn read_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.backend.get(Column::Metadata, key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Corruption(format!("metadata {} is {} bytes", key, bytes.len()))
                })?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    // === Read API ===

    pub fn root_hash(&self) -> Option<Hash> {
        self.root_hash
    }

    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn hanging_nodes(&self) -> Vec<(usize, Hash)> {
        self.hanging.iter().collect()
    }

    pub fn root_hash_on_disk(&self) -> Result<Option<Hash>> {
        self.read_hash(KEY_ROOT_HASH)
    }

    pub fn get_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        if let Some(data) = self.key_data.get(key) {
            return Ok(Some(data.clone()));
        }
        self.backend.get(Column::KeyData, &hex::encode(key))
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        validate_key(key)?;
        if self.key_data.contains_key(key) {
            return Ok(true);
        }
        Ok(self.backend.get(Column::KeyData, &hex::encode(key))?.is_some())
    }

    /// Look up a node, cache first
    pub fn get_node(&self, hash: Hash) -> Result<Option<Node>> {
        if let Some(node) = self.nodes.get(&hash) {
            return Ok(Some(node.clone()));
        }
        if self.stale.contains(&hash) {
            return Ok(None);
        }

        match self.backend.get(Column::Nodes, &hash.to_hex())? {
            Some(bytes) => {
                let node = Node::decode(&bytes)?;
                if node.hash != hash {
                    return Err(Error::Corruption(format!(
                        "node stored under {} has hash {}",
                        hash.short(),
                        node.hash.short()
                    )));
                }
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    // === Mutation ===

    /// Insert a new key or change an existing key's data.
    ///
    /// Writing the data a key already holds is a no-op. On error the tree is
    /// left exactly as it was before the call.
    pub fn add_or_update(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        validate_key(key)?;
        if data.is_empty() {
            return Err(Error::InvalidArgument("data cannot be empty".into()));
        }

        let new_leaf_hash = leaf_hash(key, data);
        let existing = self.get_data(key)?;
        if let Some(old) = &existing {
            if leaf_hash(key, old) == new_leaf_hash {
                return Ok(());
            }
        }

        let checkpoint = Checkpoint {
            root_hash: self.root_hash,
            num_leaves: self.num_leaves,
            depth: self.depth,
            hanging: self.hanging.clone(),
        };
        self.journal = Some(Vec::new());

        let result = match existing {
            None => self.add_leaf(Node::with_hash(new_leaf_hash)),
            Some(old) => self.update_leaf(leaf_hash(key, &old), new_leaf_hash),
        };

        let journal = self.journal.take().unwrap_or_default();
        if let Err(e) = result {
            self.rollback(checkpoint, journal);
            return Err(e);
        }

        self.key_data.insert(key.to_vec(), data.to_vec());
        self.dirty = true;
        Ok(())
    }

    fn rollback(&mut self, checkpoint: Checkpoint, journal: Vec<JournalEntry>) {
        log::debug!("Rolling back {} node changes", journal.len());
        for (hash, previous, was_stale) in journal.into_iter().rev() {
            match previous {
                Some(node) => self.nodes.insert(hash, node),
                None => self.nodes.remove(&hash),
            };
            if was_stale {
                self.stale.insert(hash);
            } else {
                self.stale.remove(&hash);
            }
        }
        self.root_hash = checkpoint.root_hash;
        self.num_leaves = checkpoint.num_leaves;
        self.depth = checkpoint.depth;
        self.hanging = checkpoint.hanging;
    }

    fn record(&mut self, hash: Hash) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push((hash, self.nodes.get(&hash).cloned(), self.stale.contains(&hash)));
        }
    }

    fn put(&mut self, node: Node) {
        self.record(node.hash);
        self.stale.remove(&node.hash);
        self.nodes.insert(node.hash, node);
    }

    fn evict(&mut self, hash: Hash) {
        self.record(hash);
        self.nodes.remove(&hash);
        self.stale.insert(hash);
    }

    /// A node the tree structure says must exist
    fn fetch(&self, hash: Hash) -> Result<Node> {
        self.get_node(hash)?.ok_or_else(|| {
            Error::IllegalState(format!("node {} is missing from storage", hash))
        })
    }

    fn set_depth(&mut self, level: usize) {
        if level > self.depth {
            self.depth = level;
            self.hanging.grow_to(level);
        }
    }

    /// Carry-propagating insertion of a brand-new leaf
    fn add_leaf(&mut self, mut leaf: Node) -> Result<()> {
        if self.num_leaves == 0 {
            self.hanging.set(0, leaf.hash)?;
            self.root_hash = Some(leaf.hash);
            self.put(leaf);
        } else if let Some(hanging_hash) = self.hanging.get(0) {
            let mut hanging = self.fetch(hanging_hash)?;
            match hanging.parent {
                None => {
                    // The hanging leaf is the root
                    let parent = Node::internal(Some(hanging.hash), Some(leaf.hash))?;
                    hanging.parent = Some(parent.hash);
                    leaf.parent = Some(parent.hash);
                    self.put(hanging);
                    self.put(leaf);
                    self.hanging.remove(0);
                    self.add_node(1, parent)?;
                }
                Some(parent_hash) => {
                    let mut parent = self.fetch(parent_hash)?;
                    leaf.parent = Some(parent_hash);
                    parent.attach_child(leaf.hash)?;
                    self.put(leaf);
                    self.hanging.remove(0);
                    let new_hash = parent.compute_hash()?;
                    self.update_node_hash(parent, new_hash)?;
                }
            }
        } else {
            self.hanging.set(0, leaf.hash)?;
            let parent = Node::internal(Some(leaf.hash), None)?;
            leaf.parent = Some(parent.hash);
            self.put(leaf);
            self.add_node(1, parent)?;
        }

        self.num_leaves += 1;
        Ok(())
    }

    /// Place an internal node at `level`, merging with that level's hanging
    /// node when there is one
    fn add_node(&mut self, level: usize, mut node: Node) -> Result<()> {
        self.set_depth(level);

        let hanging_hash = match self.hanging.get(level) {
            Some(hash) => hash,
            None => {
                self.hanging.set(level, node.hash)?;
                if level >= self.depth {
                    self.root_hash = Some(node.hash);
                    self.put(node);
                    return Ok(());
                }
                let parent = Node::internal(Some(node.hash), None)?;
                node.parent = Some(parent.hash);
                self.put(node);
                return self.add_node(level + 1, parent);
            }
        };

        let mut hanging = self.fetch(hanging_hash)?;
        match hanging.parent {
            None => {
                let parent = Node::internal(Some(hanging.hash), Some(node.hash))?;
                hanging.parent = Some(parent.hash);
                node.parent = Some(parent.hash);
                self.put(hanging);
                self.put(node);
                self.hanging.remove(level);
                self.add_node(level + 1, parent)
            }
            Some(parent_hash) => {
                let mut parent = self.fetch(parent_hash)?;
                node.parent = Some(parent_hash);
                parent.attach_child(node.hash)?;
                self.put(node);
                self.hanging.remove(level);
                let new_hash = parent.compute_hash()?;
                self.update_node_hash(parent, new_hash)
            }
        }
    }

    fn update_leaf(&mut self, old_leaf_hash: Hash, new_leaf_hash: Hash) -> Result<()> {
        let leaf = self.get_node(old_leaf_hash)?.ok_or_else(|| {
            Error::IllegalState(format!("leaf {} not found", old_leaf_hash))
        })?;
        self.update_node_hash(leaf, new_leaf_hash)
    }

    /// Re-key `node` under `new_hash` and cascade the change to the root
    fn update_node_hash(&mut self, mut node: Node, new_hash: Hash) -> Result<()> {
        let old_hash = node.hash;
        if node.pending_removal.is_none() {
            node.pending_removal = Some(old_hash);
        }
        node.hash = new_hash;

        let parent_hash = node.parent;
        let children: Vec<Hash> = node.children().collect();
        self.evict(old_hash);
        self.hanging.replace(old_hash, new_hash);
        self.put(node);

        // Top-down: children refer to this node by hash
        for child_hash in children {
            let mut child = self.fetch(child_hash)?;
            child.parent = Some(new_hash);
            self.put(child);
        }

        // Bottom-up: the parent's hash covers this one
        match parent_hash {
            None => {
                self.root_hash = Some(new_hash);
                Ok(())
            }
            Some(parent_hash) => {
                let mut parent = self.fetch(parent_hash)?;
                parent.replace_child(old_hash, new_hash)?;
                let recomputed = parent.compute_hash()?;
                self.update_node_hash(parent, recomputed)
            }
        }
    }

    // === Persistence ===

    /// Commit the overlay to the backend in one atomic batch
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        for node in self.nodes.values() {
            if let Some(old) = node.pending_removal {
                if !self.nodes.contains_key(&old) {
                    batch.delete(Column::Nodes, old.to_hex());
                }
            }
        }
        for node in self.nodes.values() {
            batch.put(Column::Nodes, node.hash.to_hex(), node.encode());
        }
        for (key, data) in &self.key_data {
            batch.put(Column::KeyData, hex::encode(key), data.clone());
        }
        self.write_metadata(&mut batch);

        let (nodes, keys) = (self.nodes.len(), self.key_data.len());
        self.backend.write(batch)?;

        self.nodes.clear();
        self.key_data.clear();
        self.stale.clear();
        self.dirty = false;
        log::debug!("Flushed {} nodes and {} keys", nodes, keys);
        Ok(())
    }

    fn write_metadata(&self, batch: &mut WriteBatch) {
        match self.root_hash {
            Some(root) => batch.put(Column::Metadata, KEY_ROOT_HASH, root.as_bytes().to_vec()),
            None => batch.delete(Column::Metadata, KEY_ROOT_HASH),
        }
        batch.put(
            Column::Metadata,
            KEY_NUM_LEAVES,
            self.num_leaves.to_le_bytes().to_vec(),
        );
        batch.put(
            Column::Metadata,
            KEY_DEPTH,
            (self.depth as u64).to_le_bytes().to_vec(),
        );
        for level in 0..self.hanging.len() {
            match self.hanging.get(level) {
                Some(hash) => batch.put(
                    Column::Metadata,
                    hanging_node_key(level),
                    hash.as_bytes().to_vec(),
                ),
                None => batch.delete(Column::Metadata, hanging_node_key(level)),
            }
        }
    }

    /// Drop the overlay and reload metadata from the backend
    pub fn revert(&mut self) -> Result<()> {
        self.nodes.clear();
        self.key_data.clear();
        self.stale.clear();
        self.load_metadata()?;
        self.dirty = false;
        Ok(())
    }

    /// Erase all persisted and in-memory state
    pub fn clear(&mut self) -> Result<()> {
        self.backend.clear()?;
        self.nodes.clear();
        self.key_data.clear();
        self.stale.clear();
        self.root_hash = None;
        self.num_leaves = 0;
        self.depth = 0;
        self.hanging = HangingNodes::new();
        self.dirty = false;
        Ok(())
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key cannot be empty".into()));
    }
    Ok(())
}
