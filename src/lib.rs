//! # merkle_state
//!
//! A persistent, content-addressed, incrementally-updatable Merkle tree for
//! verifiable local state.
//!
//! Each leaf commits to a `(key, data)` pair. Leaves are added in insertion
//! order and paired level by level, so the root hash is a deterministic
//! function of the sequence of writes. Updating a key rehashes the path from
//! its leaf to the root.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Keyed by their own Keccak-256 hash
//! - **Hanging nodes**: The one unpaired node at each level
//! - **Write-back cache**: Changes live in memory until flushed in one batch
//! - **Registry**: At most one open handle per tree name
//!
//! ## Example
//!
//! ```ignore
//! use merkle_state::{Config, MerkleTree, TreeRegistry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(TreeRegistry::new());
//! let tree = MerkleTree::open("accounts", &Config::default(), registry)?;
//! tree.add_or_update_data(b"alice", b"100")?;
//! tree.flush_to_disk()?;
//! println!("{}", tree.get_root_hash()?.unwrap());
//! ```

pub mod config;
pub mod model;
pub mod registry;
pub mod store;
pub mod tree;

mod error;
mod merkle_tree;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use merkle_tree::MerkleTree;
pub use model::{leaf_hash, Hash, Node};
pub use registry::TreeRegistry;
pub use store::{Column, FileStore, MemoryStore, TreeBackend, WriteBatch};

/// Storage format version
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"MRKLTREE";
