//! Persistent storage for trees
//!
//! Each tree persists three keyed collections (nodes, key data, metadata)
//! through a [`TreeBackend`]. [`FileStore`] keeps them in one append-only log
//! file per tree directory; [`MemoryStore`] keeps them in memory.

mod backend;
mod file_store;
mod memory;
mod value;

pub use backend::{BatchOp, Column, TreeBackend, WriteBatch};
pub use file_store::FileStore;
pub use memory::MemoryStore;
