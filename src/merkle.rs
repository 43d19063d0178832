// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Static binary Merkle tree over link hashes.
//!
//! # Construction
//! - Leaves are given in order (callers sort link hashes first)
//! - `parent = SHA-256(left || right)`
//! - An odd trailing node is promoted unchanged to the next level
//!
//! # Paths
//! A path is the list of `{left, right, parent}` triplets met while walking
//! from a leaf to the root. Levels where the node was promoted contribute no
//! triplet, so a single-leaf tree has an empty path and `root == leaf`.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::types::Hash32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashTriplet {
    pub left: Hash32,
    pub right: Hash32,
    pub parent: Hash32,
}

impl HashTriplet {
    pub fn new(left: Hash32, right: Hash32) -> Self {
        HashTriplet {
            left,
            right,
            parent: hash_pair(&left, &right),
        }
    }

    pub fn is_consistent(&self) -> bool {
        hash_pair(&self.left, &self.right) == self.parent
    }
}

pub type MerklePath = Vec<HashTriplet>;

pub fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    Hash32::digest_concat(&[left.as_ref(), right.as_ref()])
}

#[derive(Clone, Debug)]
pub struct StaticTree {
    /// `levels[0]` are the leaves, the last level holds the root alone.
    levels: Vec<Vec<Hash32>>,
}

impl StaticTree {
    pub fn new(leaves: &[Hash32]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(KernelError::Merkle("tree should have at least one leaf".into()));
        }

        let mut levels = vec![leaves.to_vec()];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                match pair {
                    [left, right] => next.push(hash_pair(left, right)),
                    _ => next.push(pair[0]),
                }
            }
            levels.push(next);
        }

        Ok(StaticTree { levels })
    }

    pub fn root(&self) -> Hash32 {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaves_len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaf(&self, index: usize) -> Option<&Hash32> {
        self.levels[0].get(index)
    }

    pub fn index_of(&self, leaf: &Hash32) -> Option<usize> {
        self.levels[0].iter().position(|l| l == leaf)
    }

    /// Inclusion path of the leaf at `index`.
    pub fn path(&self, index: usize) -> Result<MerklePath> {
        if index >= self.leaves_len() {
            return Err(KernelError::Merkle(format!(
                "leaf index {} out of range ({} leaves)",
                index,
                self.leaves_len()
            )));
        }

        let mut path = Vec::new();
        let mut i = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if i % 2 == 0 { i + 1 } else { i - 1 };
            if sibling < level.len() {
                let (left, right) = if i % 2 == 0 {
                    (level[i], level[sibling])
                } else {
                    (level[sibling], level[i])
                };
                path.push(HashTriplet::new(left, right));
            }
            i /= 2;
        }
        Ok(path)
    }
}

/// Root of the tree built over `leaves`, `None` when there are none.
pub fn root_of(leaves: &[Hash32]) -> Option<Hash32> {
    StaticTree::new(leaves).ok().map(|t| t.root())
}

/// Checks that every triplet hashes correctly and feeds the next one.
pub fn validate_path(path: &[HashTriplet]) -> Result<()> {
    for (i, triplet) in path.iter().enumerate() {
        if !triplet.is_consistent() {
            return Err(KernelError::Merkle(format!("triplet {i}: parent does not hash its children")));
        }
        if let Some(next) = path.get(i + 1) {
            if triplet.parent != next.left && triplet.parent != next.right {
                return Err(KernelError::Merkle(format!("triplet {i}: parent is not a child of triplet {}", i + 1)));
            }
        }
    }
    Ok(())
}

/// Proves that `leaf` is included under `root`.
pub fn verify_inclusion(leaf: &Hash32, root: &Hash32, path: &[HashTriplet]) -> Result<()> {
    match (path.first(), path.last()) {
        (None, _) | (_, None) => {
            if leaf != root {
                return Err(KernelError::Merkle("empty path but leaf is not the root".into()));
            }
            Ok(())
        }
        (Some(first), Some(last)) => {
            if first.left != *leaf && first.right != *leaf {
                return Err(KernelError::Merkle("path does not start at the leaf".into()));
            }
            if last.parent != *root {
                return Err(KernelError::Merkle("path does not end at the root".into()));
            }
            validate_path(path)
        }
    }
}
