//! Storage backend abstraction
//!
//! A backend holds three independent keyed collections. The tree engine only
//! needs find-by-key and an atomic batch of upserts/deletes.

use crate::Result;
use serde::{Deserialize, Serialize};

/// One of the three collections a tree persists
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    /// hex(node hash) → encoded node
    Nodes,
    /// hex(key) → raw value
    KeyData,
    /// fixed name → scalar
    Metadata,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::Nodes => "nodes",
            Column::KeyData => "key_data",
            Column::Metadata => "metadata",
        }
    }
}

/// A single buffered mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        column: Column,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        column: Column,
        key: String,
    },
}

/// An ordered set of mutations applied all-or-nothing
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put {
            column,
            key: key.into(),
            value,
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete {
            column,
            key: key.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Persistent storage for one tree.
///
/// `write` must be atomic: after an error, either every operation in the
/// batch is durable or none is.
pub trait TreeBackend: Send + Sync {
    /// Find a value by key
    fn get(&self, column: Column, key: &str) -> Result<Option<Vec<u8>>>;

    /// Apply a batch of upserts and deletes, in order
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Erase all three collections
    fn clear(&self) -> Result<()>;
}
