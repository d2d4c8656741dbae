//! Per-level table of unpaired nodes

use crate::model::Hash;
use crate::{Error, Result};

/// The single unpaired node at each level, indexed by level.
///
/// The table always has exactly `depth + 1` slots. Growing it is an explicit
/// step taken when the tree gets deeper; writing past the end is an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HangingNodes {
    levels: Vec<Option<Hash>>,
}

impl HangingNodes {
    /// Table for an empty tree (depth 0)
    pub fn new() -> Self {
        HangingNodes { levels: vec![None] }
    }

    pub fn with_depth(depth: usize) -> Self {
        HangingNodes {
            levels: vec![None; depth + 1],
        }
    }

    /// Number of slots (`depth + 1`)
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Option::is_none)
    }

    /// Make room for `level`. Returns true if the table grew.
    pub fn grow_to(&mut self, level: usize) -> bool {
        if level < self.levels.len() {
            return false;
        }
        self.levels.resize(level + 1, None);
        true
    }

    pub fn get(&self, level: usize) -> Option<Hash> {
        self.levels.get(level).copied().flatten()
    }

    pub fn set(&mut self, level: usize, hash: Hash) -> Result<()> {
        let len = self.levels.len();
        let slot = self.levels.get_mut(level).ok_or_else(|| {
            Error::IllegalState(format!(
                "hanging node level {} is beyond depth {}",
                level,
                len - 1
            ))
        })?;
        *slot = Some(hash);
        Ok(())
    }

    pub fn remove(&mut self, level: usize) -> Option<Hash> {
        self.levels.get_mut(level).and_then(Option::take)
    }

    /// Point the slot holding `old` (if any) at `new`
    pub fn replace(&mut self, old: Hash, new: Hash) -> bool {
        match self.levels.iter_mut().find(|slot| **slot == Some(old)) {
            Some(slot) => {
                *slot = Some(new);
                true
            }
            None => false,
        }
    }

    /// Occupied slots as `(level, hash)`, lowest level first
    pub fn iter(&self) -> impl Iterator<Item = (usize, Hash)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(level, slot)| slot.map(|hash| (level, hash)))
    }
}

impl Default for HangingNodes {
    fn default() -> Self {
        HangingNodes::new()
    }
}
