//! Registry of open tree names
//!
//! At most one [`MerkleTree`](crate::MerkleTree) may manage a given tree name
//! at a time. The registry is an explicit object shared through an `Arc`, so
//! independent registries (e.g. one per test) never interfere.

use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TreeRegistry {
    open: Mutex<HashSet<String>>,
}

impl TreeRegistry {
    pub fn new() -> Self {
        TreeRegistry::default()
    }

    /// Claim `name`. Returns false if it is already claimed.
    pub fn try_open(&self, name: &str) -> bool {
        self.open.lock().insert(name.to_string())
    }

    /// Release `name`. Returns false if it was not claimed.
    pub fn release(&self, name: &str) -> bool {
        self.open.lock().remove(name)
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.lock().contains(name)
    }

    /// Names currently claimed, sorted
    pub fn open_trees(&self) -> Vec<String> {
        let mut names: Vec<String> = self.open.lock().iter().cloned().collect();
        names.sort();
        names
    }
}
