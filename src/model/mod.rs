//! Core data model types for merkle_state

mod hash;
mod node;

pub use hash::{Hash, HASH_LEN};
pub use node::{internal_hash, leaf_hash, Node, MIN_ENCODED_LEN};
