//! In-memory backend with no persistent copy

use super::backend::{BatchOp, Column, TreeBackend, WriteBatch};
use crate::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps the three collections in hash maps. Useful for ephemeral trees and
/// tests; contents are lost when the store is dropped.
#[derive(Default)]
pub struct MemoryStore {
    columns: RwLock<HashMap<Column, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of entries in a collection
    pub fn len(&self, column: Column) -> usize {
        self.columns.read().get(&column).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.read().values().all(HashMap::is_empty)
    }
}

impl TreeBackend for MemoryStore {
    fn get(&self, column: Column, key: &str) -> Result<Option<Vec<u8>>> {
        let columns = self.columns.read();
        Ok(columns.get(&column).and_then(|c| c.get(key)).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut columns = self.columns.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { column, key, value } => {
                    columns.entry(column).or_default().insert(key, value);
                }
                BatchOp::Delete { column, key } => {
                    if let Some(c) = columns.get_mut(&column) {
                        c.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.columns.write().clear();
        Ok(())
    }
}
