//! High-level tree API
//!
//! This module provides the main entry point for interacting with merkle_state.

use crate::config::{validate_tree_name, Config};
use crate::model::{Hash, Node};
use crate::registry::TreeRegistry;
use crate::store::{FileStore, TreeBackend};
use crate::tree::TreeState;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// A named, persistent merkle tree over key/value data
///
/// Reads take a shared lock and may run concurrently; every mutation takes
/// the exclusive lock, so each public method is one atomic critical section.
/// Changes stay in memory until [`MerkleTree::flush_to_disk`].
pub struct MerkleTree {
    name: String,
    registry: Arc<TreeRegistry>,
    inner: RwLock<Inner>,
}

struct Inner {
    state: TreeState,
    closed: bool,
}

impl MerkleTree {
    /// Open (or create) the named tree under `config.data_dir`
    pub fn open(name: &str, config: &Config, registry: Arc<TreeRegistry>) -> Result<Self> {
        let dir = config.tree_dir(name)?;
        if !registry.try_open(name) {
            return Err(Error::AlreadyOpen(name.to_string()));
        }

        let backend = match FileStore::open(&dir, config) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                registry.release(name);
                return Err(e);
            }
        };
        Self::open_registered(name, backend, registry)
    }

    /// Open the named tree over an existing backend
    pub fn with_backend(
        name: &str,
        backend: Arc<dyn TreeBackend>,
        registry: Arc<TreeRegistry>,
    ) -> Result<Self> {
        validate_tree_name(name)?;
        if !registry.try_open(name) {
            return Err(Error::AlreadyOpen(name.to_string()));
        }
        Self::open_registered(name, backend, registry)
    }

    // The name is already claimed; release it if loading fails
    fn open_registered(
        name: &str,
        backend: Arc<dyn TreeBackend>,
        registry: Arc<TreeRegistry>,
    ) -> Result<Self> {
        let state = match TreeState::load(backend) {
            Ok(state) => state,
            Err(e) => {
                registry.release(name);
                return Err(e);
            }
        };

        log::info!(
            "Opened tree '{}' ({} leaves, depth {})",
            name,
            state.num_leaves(),
            state.depth()
        );

        Ok(MerkleTree {
            name: name.to_string(),
            registry,
            inner: RwLock::new(Inner {
                state,
                closed: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read<T>(&self, f: impl FnOnce(&TreeState) -> Result<T>) -> Result<T> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(Error::Closed(self.name.clone()));
        }
        f(&inner.state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut TreeState) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed(self.name.clone()));
        }
        f(&mut inner.state)
    }

    // === Read Operations ===

    /// Current root hash, including unflushed changes. `None` for an empty tree.
    pub fn get_root_hash(&self) -> Result<Option<Hash>> {
        self.read(|state| Ok(state.root_hash()))
    }

    /// Root hash as of the last flush
    pub fn get_root_hash_saved_on_disk(&self) -> Result<Option<Hash>> {
        self.read(|state| state.root_hash_on_disk())
    }

    pub fn get_num_leaves(&self) -> Result<u64> {
        self.read(|state| Ok(state.num_leaves()))
    }

    pub fn get_depth(&self) -> Result<usize> {
        self.read(|state| Ok(state.depth()))
    }

    pub fn get_data(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|state| state.get_data(key))
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.read(|state| state.contains_key(key))
    }

    /// Whether there are changes not yet flushed
    pub fn has_unsaved_changes(&self) -> Result<bool> {
        self.read(|state| Ok(state.is_dirty()))
    }

    /// The unpaired node at each level, lowest level first
    pub fn hanging_nodes(&self) -> Result<Vec<(usize, Hash)>> {
        self.read(|state| Ok(state.hanging_nodes()))
    }

    /// Look up a node by hash
    pub fn get_node(&self, hash: Hash) -> Result<Option<Node>> {
        self.read(|state| state.get_node(hash))
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    // === Write Operations ===

    /// Insert `key` or replace its data
    pub fn add_or_update_data(&self, key: &[u8], data: &[u8]) -> Result<()> {
        self.write(|state| state.add_or_update(key, data))
    }

    /// Persist all unsaved changes atomically. A failed flush keeps the
    /// changes in memory so it can be retried.
    pub fn flush_to_disk(&self) -> Result<()> {
        self.write(|state| state.flush())
    }

    /// Discard unsaved changes and reload the last flushed state
    pub fn revert_unsaved_changes(&self) -> Result<()> {
        self.write(|state| {
            state.revert()?;
            log::debug!("Reverted unsaved changes");
            Ok(())
        })
    }

    /// Erase the tree, including its persisted data
    pub fn clear(&self) -> Result<()> {
        self.write(|state| {
            state.clear()?;
            log::info!("Cleared tree '{}'", self.name);
            Ok(())
        })
    }

    /// Flush and release the tree's name.
    ///
    /// The name is released even when the flush fails; the flush error is
    /// still returned. Closing an already closed tree does nothing.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }

        let flushed = inner.state.flush();
        inner.closed = true;
        self.registry.release(&self.name);
        log::info!("Closed tree '{}'", self.name);
        flushed
    }
}

impl Drop for MerkleTree {
    fn drop(&mut self) {
        // Best-effort close on drop
        if let Err(e) = self.close() {
            log::warn!("Failed to flush tree '{}' on drop: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::leaf_hash;
    use crate::store::{Column, MemoryStore, WriteBatch};
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Memory backend whose writes can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl TreeBackend for FlakyStore {
        fn get(&self, column: Column, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(column, key)
        }

        fn write(&self, batch: WriteBatch) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
                return Err(Error::storage("appending batch record", io));
            }
            self.inner.write(batch)
        }

        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::with_data_dir(dir);
        config.sync_writes = false;
        config
    }

    #[test]
    fn test_open_flush_reopen() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Arc::new(TreeRegistry::new());

        let root;
        {
            let tree = MerkleTree::open("state", &config, registry.clone()).unwrap();
            tree.add_or_update_data(b"a", b"1").unwrap();
            tree.add_or_update_data(b"b", b"2").unwrap();
            assert_eq!(tree.get_root_hash_saved_on_disk().unwrap(), None);
            tree.flush_to_disk().unwrap();
            root = tree.get_root_hash().unwrap();
            assert_eq!(tree.get_root_hash_saved_on_disk().unwrap(), root);
            tree.close().unwrap();
        }

        let tree = MerkleTree::open("state", &config, registry).unwrap();
        assert_eq!(tree.get_root_hash().unwrap(), root);
        assert_eq!(tree.get_num_leaves().unwrap(), 2);
        assert_eq!(tree.get_depth().unwrap(), 1);
        assert_eq!(tree.get_data(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_close_flushes_pending_changes() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Arc::new(TreeRegistry::new());

        let tree = MerkleTree::open("t", &config, registry.clone()).unwrap();
        tree.add_or_update_data(b"k", b"v").unwrap();
        tree.close().unwrap();
        assert!(tree.is_closed());
        assert!(!registry.is_open("t"));

        let tree = MerkleTree::open("t", &config, registry).unwrap();
        assert_eq!(tree.get_root_hash().unwrap(), Some(leaf_hash(b"k", b"v")));
    }

    #[test]
    fn test_drop_releases_name() {
        let registry = Arc::new(TreeRegistry::new());
        {
            let _tree =
                MerkleTree::with_backend("t", Arc::new(MemoryStore::new()), registry.clone())
                    .unwrap();
            assert!(registry.is_open("t"));
        }
        assert!(!registry.is_open("t"));
    }

    #[test]
    fn test_second_open_is_rejected() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Arc::new(TreeRegistry::new());

        let first = MerkleTree::open("t1", &config, registry.clone()).unwrap();
        let err = MerkleTree::open("t1", &config, registry.clone()).err().unwrap();
        assert!(matches!(err, Error::AlreadyOpen(_)));
        assert_eq!(err.kind(), ErrorKind::IllegalState);

        first.close().unwrap();
        assert!(MerkleTree::open("t1", &config, registry).is_ok());
    }

    #[test]
    fn test_closed_tree_rejects_operations() {
        let registry = Arc::new(TreeRegistry::new());
        let tree =
            MerkleTree::with_backend("t", Arc::new(MemoryStore::new()), registry).unwrap();
        tree.close().unwrap();
        tree.close().unwrap();

        assert!(matches!(tree.get_root_hash(), Err(Error::Closed(_))));
        assert!(matches!(
            tree.add_or_update_data(b"k", b"v"),
            Err(Error::Closed(_))
        ));
        assert!(matches!(tree.flush_to_disk(), Err(Error::Closed(_))));
    }

    #[test]
    fn test_invalid_name() {
        let registry = Arc::new(TreeRegistry::new());
        let result = MerkleTree::with_backend("", Arc::new(MemoryStore::new()), registry.clone());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(registry.open_trees().is_empty());
    }

    #[test]
    fn test_failed_load_releases_name() {
        let store = Arc::new(MemoryStore::new());
        let mut batch = WriteBatch::new();
        batch.put(Column::Metadata, "rootHash", vec![1, 2, 3]);
        store.write(batch).unwrap();

        let registry = Arc::new(TreeRegistry::new());
        let result = MerkleTree::with_backend("t", store, registry.clone());
        assert!(matches!(result, Err(Error::Corruption(_))));
        assert!(!registry.is_open("t"));
    }

    #[test]
    fn test_corrupt_depth_is_rejected() {
        let registry = Arc::new(TreeRegistry::new());
        for depth in [u64::MAX, 1_000_000_000, 65] {
            let store = Arc::new(MemoryStore::new());
            let mut batch = WriteBatch::new();
            batch.put(Column::Metadata, "rootHash", vec![7; 32]);
            batch.put(Column::Metadata, "numLeaves", 1u64.to_le_bytes().to_vec());
            batch.put(Column::Metadata, "depth", depth.to_le_bytes().to_vec());
            store.write(batch).unwrap();

            let err = MerkleTree::with_backend("t", store, registry.clone())
                .err()
                .unwrap();
            assert!(matches!(err, Error::Corruption(_)), "depth {}", depth);
            assert_eq!(err.kind(), ErrorKind::IllegalState);
            assert!(!registry.is_open("t"));
        }
    }

    #[test]
    fn test_failed_flush_keeps_changes() {
        let store = Arc::new(FlakyStore::default());
        let registry = Arc::new(TreeRegistry::new());
        let tree = MerkleTree::with_backend("t", store.clone(), registry).unwrap();

        tree.add_or_update_data(b"a", b"1").unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);

        let err = tree.flush_to_disk().unwrap_err();
        assert!(err.is_retryable());
        assert!(tree.has_unsaved_changes().unwrap());
        assert_eq!(tree.get_data(b"a").unwrap(), Some(b"1".to_vec()));

        store.fail_writes.store(false, Ordering::SeqCst);
        tree.flush_to_disk().unwrap();
        assert!(!tree.has_unsaved_changes().unwrap());
        assert_eq!(
            tree.get_root_hash_saved_on_disk().unwrap(),
            Some(leaf_hash(b"a", b"1"))
        );
    }

    #[test]
    fn test_close_releases_name_even_if_flush_fails() {
        let store = Arc::new(FlakyStore::default());
        let registry = Arc::new(TreeRegistry::new());
        let tree = MerkleTree::with_backend("t", store.clone(), registry.clone()).unwrap();

        tree.add_or_update_data(b"a", b"1").unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);

        assert!(tree.close().is_err());
        assert!(tree.is_closed());
        assert!(!registry.is_open("t"));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let registry = Arc::new(TreeRegistry::new());
        let tree = Arc::new(
            MerkleTree::with_backend("t", Arc::new(MemoryStore::new()), registry).unwrap(),
        );

        let writer = {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    tree.add_or_update_data(&i.to_be_bytes(), b"v").unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let tree = Arc::clone(&tree);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        // Leaves only grow, so a root seen first implies leaves after
                        let root = tree.get_root_hash().unwrap();
                        let leaves = tree.get_num_leaves().unwrap();
                        assert!(root.is_none() || leaves > 0);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(tree.get_num_leaves().unwrap(), 200);
    }
}
