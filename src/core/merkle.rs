use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

/// Binary hash tree committing to an ordered list of leaf hashes.
///
/// Odd node counts are handled differently per level: on the bottom level a
/// trailing leaf is paired with itself, on every level above a trailing node
/// is promoted with its hash unchanged. A single leaf is its own root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_hashes: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct MerkleNode {
    hash: Vec<u8>,
    left: Option<Box<MerkleNode>>,
    right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(hash: &[u8]) -> MerkleNode {
        MerkleNode {
            hash: hash.to_vec(),
            left: None,
            right: None,
        }
    }

    fn parent(left: MerkleNode, right: MerkleNode) -> MerkleNode {
        MerkleNode {
            hash: MerkleTree::hash_pair(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }
}

impl MerkleTree {
    pub fn new(leaf_hashes: &[Vec<u8>]) -> Result<Self> {
        if leaf_hashes.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty hash list".to_string(),
            ));
        }

        let root = if leaf_hashes.len() == 1 {
            MerkleNode::leaf(&leaf_hashes[0])
        } else {
            let mut level = Self::bottom_level(leaf_hashes);
            while level.len() > 1 {
                level = Self::internal_level(level);
            }
            level
                .pop()
                .ok_or_else(|| BlockchainError::InvalidBlock("Merkle tree has no root".to_string()))?
        };

        Ok(MerkleTree {
            root,
            leaf_hashes: leaf_hashes.to_vec(),
        })
    }

    /// Root hash without keeping the tree around.
    pub fn calculate_merkle_root(leaf_hashes: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::new(leaf_hashes)?.root.hash)
    }

    pub fn get_root_hash(&self) -> &[u8] {
        &self.root.hash
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_hashes.len()
    }

    pub fn leaf_hashes(&self) -> &[Vec<u8>] {
        &self.leaf_hashes
    }

    /// Depth of the tree, counting the root level.
    pub fn height(&self) -> usize {
        fn depth(node: &MerkleNode) -> usize {
            let left = node.left.as_deref().map_or(0, depth);
            let right = node.right.as_deref().map_or(0, depth);
            1 + left.max(right)
        }
        depth(&self.root)
    }

    fn bottom_level(leaf_hashes: &[Vec<u8>]) -> Vec<MerkleNode> {
        let mut parents = Vec::with_capacity(leaf_hashes.len() / 2 + 1);
        let mut leaves = leaf_hashes.iter();
        while let Some(left) = leaves.next() {
            // an unpaired trailing leaf is paired with itself
            let right = leaves.next().unwrap_or(left);
            parents.push(MerkleNode::parent(
                MerkleNode::leaf(left),
                MerkleNode::leaf(right),
            ));
        }
        parents
    }

    fn internal_level(children: Vec<MerkleNode>) -> Vec<MerkleNode> {
        let mut parents = Vec::with_capacity(children.len() / 2 + 1);
        let mut children = children.into_iter();
        while let Some(left) = children.next() {
            match children.next() {
                Some(right) => parents.push(MerkleNode::parent(left, right)),
                // promoted as-is, not self-paired
                None => parents.push(left),
            }
        }
        parents
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: u8) -> Vec<u8> {
        sha256_digest(&[seed])
    }

    #[test]
    fn test_single_leaf_is_its_own_root() {
        let leaf = h(1);
        let root = MerkleTree::calculate_merkle_root(&[leaf.clone()]).unwrap();
        assert_eq!(root, leaf);
    }

    #[test]
    fn test_empty_leaf_list() {
        let hashes: Vec<Vec<u8>> = vec![];
        assert!(MerkleTree::new(&hashes).is_err());
    }

    #[test]
    fn test_two_leaves() {
        let root = MerkleTree::calculate_merkle_root(&[h(1), h(2)]).unwrap();
        assert_eq!(root, MerkleTree::hash_pair(&h(1), &h(2)));
    }

    #[test]
    fn test_three_leaves_duplicate_last_on_bottom_level() {
        let root = MerkleTree::calculate_merkle_root(&[h(1), h(2), h(3)]).unwrap();

        let left = MerkleTree::hash_pair(&h(1), &h(2));
        let right = MerkleTree::hash_pair(&h(3), &h(3));
        assert_eq!(root, MerkleTree::hash_pair(&left, &right));
    }

    #[test]
    fn test_five_leaves_promote_odd_internal_node() {
        let leaves: Vec<Vec<u8>> = (1..=5).map(h).collect();
        let tree = MerkleTree::new(&leaves).unwrap();

        let p1 = MerkleTree::hash_pair(&h(1), &h(2));
        let p2 = MerkleTree::hash_pair(&h(3), &h(4));
        let p3 = MerkleTree::hash_pair(&h(5), &h(5));
        let q1 = MerkleTree::hash_pair(&p1, &p2);
        // p3 climbs unchanged to the level below the root
        let expected = MerkleTree::hash_pair(&q1, &p3);

        assert_eq!(tree.get_root_hash(), expected.as_slice());
        assert_eq!(tree.leaf_count(), 5);
        assert_eq!(tree.height(), 4);
    }

    #[test]
    fn test_leaf_order_matters() {
        let forward = MerkleTree::calculate_merkle_root(&[h(1), h(2)]).unwrap();
        let backward = MerkleTree::calculate_merkle_root(&[h(2), h(1)]).unwrap();
        assert_ne!(forward, backward);
    }
}
