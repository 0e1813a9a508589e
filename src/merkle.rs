//! Streaming Merkle commitment over label content hashes.
//!
//! Inner nodes are `SHA-256(left || right)`.  A level with an odd number of
//! nodes carries its last node up unchanged, so that node contributes no
//! path element at that level.
//!
//! [`MerkleCommitment`] never holds more than one completed subtree per
//! height: leaves are pushed onto a stack and equal-height neighbours are
//! merged as soon as both exist.  Inclusion paths are collected during the
//! same pass for a set of target leaves known up front, which is how the
//! prover opens a handful of indices out of billions of leaves without
//! keeping the tree resident.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::label::{Digest, Label};

/// Combines two child hashes into their parent.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Describes a sibling hash encountered while walking a Merkle tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    /// Sibling digest that must be paired with the running hash.
    #[serde(with = "crate::shared::hex_digest")]
    pub sibling: Digest,
    /// `true` if the sibling is on the left-hand side of the pair.
    pub left: bool,
}

/// Sibling hashes from a leaf up to the root.
pub type MerklePath = Vec<PathNode>;

/// Failures raised while building or combining streaming commitments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// A root was requested before any leaf was appended.
    #[error("merkle tree has no leaves")]
    Empty,
    /// An absorbed subtree does not start on a multiple of its own size.
    #[error("subtree of height {height} cannot start at leaf {offset}")]
    Misaligned {
        /// Leaf position the subtree would start at.
        offset: u64,
        /// Height of the offending subtree.
        height: u32,
    },
    /// An absorbed chunk does not continue where the tree currently ends.
    #[error("chunk starts at leaf {chunk} but the tree ends at leaf {expected}")]
    OffsetMismatch {
        /// Next leaf position of the receiving tree.
        expected: u64,
        /// First leaf position of the chunk.
        chunk: u64,
    },
    /// A requested opening lies beyond the committed leaves.
    #[error("leaf {index} was requested but only {leaf_count} leaves were committed")]
    TargetOutOfRange {
        /// Requested leaf.
        index: u64,
        /// Leaves committed when the tree was finished.
        leaf_count: u64,
    },
}

#[derive(Debug, Clone)]
struct Subtree {
    height: u32,
    hash: Digest,
    // Target leaves below this node whose paths are still growing.
    targets: Vec<u64>,
}

/// Root and collected inclusion paths of a finished commitment.
#[derive(Debug, Clone)]
pub struct Committed {
    /// Root digest over every appended leaf.
    pub root: Digest,
    /// Number of committed leaves.
    pub leaf_count: u64,
    /// Inclusion path per requested target leaf.
    pub paths: BTreeMap<u64, MerklePath>,
}

/// Streaming binary hash tree with `O(log n)` working memory.
#[derive(Debug, Clone)]
pub struct MerkleCommitment {
    offset: u64,
    next: u64,
    stack: Vec<Subtree>,
    targets: Vec<u64>,
    cursor: usize,
    paths: BTreeMap<u64, MerklePath>,
}

impl Default for MerkleCommitment {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleCommitment {
    /// Empty commitment that only tracks the root.
    pub fn new() -> Self {
        Self::starting_at(0, &[])
    }

    /// Empty commitment that records inclusion paths for `targets`.
    pub fn with_targets(targets: &[u64]) -> Self {
        Self::starting_at(0, targets)
    }

    /// Commitment over a chunk whose first leaf sits at `offset`.
    ///
    /// Chunks are built independently and later merged with
    /// [`MerkleCommitment::absorb`]; targets below `offset` are ignored.
    pub fn starting_at(offset: u64, targets: &[u64]) -> Self {
        let mut targets = targets.to_vec();
        targets.sort_unstable();
        targets.dedup();
        let cursor = targets.partition_point(|&t| t < offset);
        Self {
            offset,
            next: offset,
            stack: Vec::new(),
            targets,
            cursor,
            paths: BTreeMap::new(),
        }
    }

    /// First leaf position covered by this commitment.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Position the next appended leaf will occupy.
    pub fn next_position(&self) -> u64 {
        self.next
    }

    /// Number of leaves appended so far.
    pub fn leaf_count(&self) -> u64 {
        self.next - self.offset
    }

    /// Appends a label as the next leaf.
    pub fn append(&mut self, label: &Label) {
        self.append_leaf(label.content_hash());
    }

    /// Appends a precomputed leaf hash as the next leaf.
    pub fn append_leaf(&mut self, hash: Digest) {
        let position = self.next;
        let mut targets = Vec::new();
        if self.targets.get(self.cursor) == Some(&position) {
            self.cursor += 1;
            self.paths.insert(position, Vec::new());
            targets.push(position);
        }
        self.next += 1;
        self.push(Subtree {
            height: 0,
            hash,
            targets,
        });
    }

    /// Merges an independently built chunk that continues this tree.
    ///
    /// Every completed subtree of the chunk must start at a multiple of its
    /// own size; chunks cut on power-of-two boundaries always satisfy this.
    pub fn absorb(&mut self, chunk: MerkleCommitment) -> Result<(), MerkleError> {
        if chunk.offset != self.next {
            return Err(MerkleError::OffsetMismatch {
                expected: self.next,
                chunk: chunk.offset,
            });
        }
        let mut position = self.next;
        for node in &chunk.stack {
            if position % (1u64 << node.height) != 0 {
                return Err(MerkleError::Misaligned {
                    offset: position,
                    height: node.height,
                });
            }
            position += 1u64 << node.height;
        }

        self.paths.extend(chunk.paths);
        for node in chunk.stack {
            self.push(node);
        }
        self.next = chunk.next;
        self.cursor = self.targets.partition_point(|&t| t < self.next);
        Ok(())
    }

    /// Root over the leaves appended so far.
    pub fn root(&self) -> Result<Digest, MerkleError> {
        let mut nodes = self.stack.iter().rev();
        let last = nodes.next().ok_or(MerkleError::Empty)?;
        Ok(nodes.fold(last.hash, |acc, node| hash_pair(&node.hash, &acc)))
    }

    /// Closes the tree and returns its root together with the target paths.
    pub fn finish(mut self) -> Result<Committed, MerkleError> {
        let mut node = self.stack.pop().ok_or(MerkleError::Empty)?;
        while let Some(left) = self.stack.pop() {
            node = self.merge(left, node);
        }
        let leaf_count = self.leaf_count();
        if let Some(&index) = self
            .targets
            .iter()
            .find(|index| !self.paths.contains_key(*index))
        {
            return Err(MerkleError::TargetOutOfRange { index, leaf_count });
        }
        Ok(Committed {
            root: node.hash,
            leaf_count,
            paths: self.paths,
        })
    }

    fn push(&mut self, mut node: Subtree) {
        while self
            .stack
            .last()
            .map_or(false, |top| top.height == node.height)
        {
            let Some(left) = self.stack.pop() else { break };
            node = self.merge(left, node);
        }
        self.stack.push(node);
    }

    fn merge(&mut self, left: Subtree, right: Subtree) -> Subtree {
        for target in &left.targets {
            if let Some(path) = self.paths.get_mut(target) {
                path.push(PathNode {
                    sibling: right.hash,
                    left: false,
                });
            }
        }
        for target in &right.targets {
            if let Some(path) = self.paths.get_mut(target) {
                path.push(PathNode {
                    sibling: left.hash,
                    left: true,
                });
            }
        }
        let mut targets = left.targets;
        targets.extend(right.targets);
        Subtree {
            height: left.height.max(right.height) + 1,
            hash: hash_pair(&left.hash, &right.hash),
            targets,
        }
    }
}

/// Sibling positions (`true` = left) a valid path for `index` must declare
/// in a tree of `leaf_count` leaves, or `None` if the index is out of range.
pub fn path_positions(leaf_count: u64, index: u64) -> Option<Vec<bool>> {
    if index >= leaf_count {
        return None;
    }
    let mut positions = Vec::new();
    let mut width = leaf_count;
    let mut idx = index;
    while width > 1 {
        if idx % 2 == 1 {
            positions.push(true);
        } else if idx + 1 < width {
            positions.push(false);
        }
        idx /= 2;
        width = (width + 1) / 2;
    }
    Some(positions)
}

/// Folds `path` onto `leaf_hash` following the declared sibling positions.
pub fn recombine(leaf_hash: &Digest, path: &[PathNode]) -> Digest {
    let mut hash = *leaf_hash;
    for node in path {
        hash = if node.left {
            hash_pair(&node.sibling, &hash)
        } else {
            hash_pair(&hash, &node.sibling)
        };
    }
    hash
}

/// Checks that `path` opens `leaf_hash` at `index` under `root`.
pub fn verify_inclusion(
    root: &Digest,
    leaf_count: u64,
    index: u64,
    leaf_hash: &Digest,
    path: &[PathNode],
) -> bool {
    let Some(positions) = path_positions(leaf_count, index) else {
        return false;
    };
    if positions.len() != path.len()
        || positions
            .iter()
            .zip(path)
            .any(|(left, node)| *left != node.left)
    {
        return false;
    }
    recombine(leaf_hash, path) == *root
}

/// Computes the Merkle root of an in-memory leaf list level by level.
#[cfg(test)]
pub(crate) fn merkle_root(leaves: &[Digest]) -> Option<Digest> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    Some(level[0])
}

/// Constructs an inclusion path for `index` within an in-memory leaf list.
#[cfg(test)]
pub(crate) fn build_path(leaves: &[Digest], index: usize) -> Option<MerklePath> {
    if leaves.is_empty() || index >= leaves.len() {
        return None;
    }
    let mut layer = leaves.to_vec();
    let mut idx = index;
    let mut path = Vec::new();
    while layer.len() > 1 {
        if idx % 2 == 0 {
            if idx + 1 < layer.len() {
                path.push(PathNode {
                    sibling: layer[idx + 1],
                    left: false,
                });
            }
        } else {
            path.push(PathNode {
                sibling: layer[idx - 1],
                left: true,
            });
        }
        layer = next_level(&layer);
        idx /= 2;
    }
    Some(path)
}

#[cfg(test)]
fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|chunk| match chunk {
            [left, right] => hash_pair(left, right),
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}
