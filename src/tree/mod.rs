//! Incrementally-built merkle tree
//!
//! Leaves are appended with carry propagation, like incrementing a binary
//! counter: each level keeps at most one unpaired ("hanging") node, and a new
//! node at a level merges with it and carries the result one level up.
//!
//! The resulting root depends on insertion order, not only on the key set.
//! A lone child is hashed as `H(x, x)`, so it cannot be told apart from a
//! node with two equal children; this is kept for compatibility with
//! existing trees.
//!
//! A leaf hash is `H(key || data)` with no length prefix, so `("a", "bc")`
//! and `("ab", "c")` hash to the same leaf. Keys must stay unambiguous
//! under concatenation with their data.

mod hanging;
mod state;

pub use hanging::HangingNodes;
pub use state::{TreeState, HANGING_NODE_PREFIX, KEY_DEPTH, KEY_NUM_LEAVES, KEY_ROOT_HASH};
