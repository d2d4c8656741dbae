//! Tree node type and its storage encoding
//!
//! Encoded layout:
//! ```text
//! [hash: 32 bytes]
//! [has_left: 1][has_right: 1][has_parent: 1]
//! [left: 32 bytes, if present]
//! [right: 32 bytes, if present]
//! [parent: 32 bytes, if present]
//! ```

use super::hash::{Hash, HASH_LEN};
use crate::{Error, Result};

const FLAGS_LEN: usize = 3;

/// Minimum encoded size: hash plus the three presence flags
pub const MIN_ENCODED_LEN: usize = HASH_LEN + FLAGS_LEN;

/// A node in the merkle tree
///
/// A node's hash is also its storage key, so every reference to another node
/// (children, parent) is a hash that must be looked up in the node store.
/// `parent` is a back-reference only; ownership runs parent → child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub hash: Hash,
    pub left: Option<Hash>,
    pub right: Option<Hash>,
    pub parent: Option<Hash>,
    /// The hash this node had before its first rehash in the current
    /// unflushed session. Never encoded.
    pub pending_removal: Option<Hash>,
}

/// Leaf hash: `H(key || data)`
pub fn leaf_hash(key: &[u8], data: &[u8]) -> Hash {
    Hash::digest_pair(key, data)
}

/// Internal node hash.
///
/// A lone child is folded with itself, so `(x, None)` hashes like `(x, x)`.
pub fn internal_hash(left: Option<Hash>, right: Option<Hash>) -> Result<Hash> {
    match (left.or(right), right.or(left)) {
        (Some(l), Some(r)) => Ok(Hash::digest_pair(l.as_bytes(), r.as_bytes())),
        _ => Err(Error::InvalidArgument(
            "node has neither left nor right child".into(),
        )),
    }
}

impl Node {
    /// Create a leaf node for a key/data pair
    pub fn leaf(key: &[u8], data: &[u8]) -> Self {
        Node::with_hash(leaf_hash(key, data))
    }

    /// Create a parentless, childless node with the given hash
    pub fn with_hash(hash: Hash) -> Self {
        Node {
            hash,
            left: None,
            right: None,
            parent: None,
            pending_removal: None,
        }
    }

    /// Create an internal node, deriving its hash from its children
    pub fn internal(left: Option<Hash>, right: Option<Hash>) -> Result<Self> {
        let hash = internal_hash(left, right)?;
        Ok(Node {
            hash,
            left,
            right,
            parent: None,
            pending_removal: None,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Recompute this node's hash from its children
    pub fn compute_hash(&self) -> Result<Hash> {
        internal_hash(self.left, self.right)
    }

    /// Attach a child in the first free slot (left, then right)
    pub fn attach_child(&mut self, child: Hash) -> Result<()> {
        if self.left.is_none() {
            self.left = Some(child);
        } else if self.right.is_none() {
            self.right = Some(child);
        } else {
            return Err(Error::IllegalState(format!(
                "node {} already has two children",
                self.hash.short()
            )));
        }
        Ok(())
    }

    /// Swap whichever child reference equals `old` for `new`
    pub fn replace_child(&mut self, old: Hash, new: Hash) -> Result<()> {
        if self.left == Some(old) {
            self.left = Some(new);
        } else if self.right == Some(old) {
            self.right = Some(new);
        } else {
            return Err(Error::InvalidArgument(format!(
                "node {} has no child {}",
                self.hash.short(),
                old.short()
            )));
        }
        Ok(())
    }

    /// Children that are present, left first
    pub fn children(&self) -> impl Iterator<Item = Hash> {
        self.left.into_iter().chain(self.right)
    }

    pub fn encode(&self) -> Vec<u8> {
        let fields = [self.left, self.right, self.parent];
        let present = fields.iter().filter(|f| f.is_some()).count();

        let mut out = Vec::with_capacity(MIN_ENCODED_LEN + present * HASH_LEN);
        out.extend_from_slice(self.hash.as_bytes());
        for field in &fields {
            out.push(field.is_some() as u8);
        }
        for field in fields.iter().flatten() {
            out.extend_from_slice(field.as_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_ENCODED_LEN {
            return Err(Error::Decode(format!(
                "encoded node is {} bytes, need at least {}",
                data.len(),
                MIN_ENCODED_LEN
            )));
        }

        // Length already checked
        let hash = Hash::from_slice(&data[..HASH_LEN]).ok_or_else(|| {
            Error::Decode("truncated node hash".into())
        })?;
        let flags = &data[HASH_LEN..MIN_ENCODED_LEN];

        let mut offset = MIN_ENCODED_LEN;
        let mut fields = [None; FLAGS_LEN];
        for (field, flag) in fields.iter_mut().zip(flags) {
            match flag {
                0 => {}
                1 => {
                    let end = offset + HASH_LEN;
                    let bytes = data.get(offset..end).ok_or_else(|| {
                        Error::Decode(format!(
                            "field at offset {} overruns {} byte buffer",
                            offset,
                            data.len()
                        ))
                    })?;
                    *field = Hash::from_slice(bytes);
                    offset = end;
                }
                other => {
                    return Err(Error::Decode(format!("invalid presence flag {}", other)));
                }
            }
        }

        let [left, right, parent] = fields;
        Ok(Node {
            hash,
            left,
            right,
            parent,
            pending_removal: None,
        })
    }
}
