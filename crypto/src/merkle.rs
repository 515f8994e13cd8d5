//! Merkle roots over double-SHA256 hashes.
//!
//! Levels pair adjacent nodes and duplicate the last node when a level has
//! an odd count. An empty leaf set hashes to a single zero leaf.

use ps_types::Hash256;

use crate::hash::sha256d_multi;

/// Root of the merkle tree built over `hashes` (internal byte order).
pub fn calc_merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::ZERO;
    }
    let mut level: Vec<Hash256> = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        level = level
            .chunks_exact(2)
            .map(|pair| sha256d_multi(&[pair[0].as_bytes(), pair[1].as_bytes()]))
            .collect();
    }
    level[0]
}

/// Roll a leaf up a merkle branch.
///
/// Bit `i` of `index` selects whether the leaf side is the right (1) or the
/// left (0) child at depth `i`.
pub fn hash_merkle_branch(branch: &[Hash256], leaf: Hash256, index: u32) -> Hash256 {
    let mut h = leaf;
    for (i, item) in branch.iter().enumerate() {
        h = if (index >> i) & 1 == 1 {
            sha256d_multi(&[item.as_bytes(), h.as_bytes()])
        } else {
            sha256d_multi(&[h.as_bytes(), item.as_bytes()])
        };
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256d;

    fn h(n: u8) -> Hash256 {
        sha256d(&[n])
    }

    #[test]
    fn empty_is_zero_leaf() {
        assert_eq!(calc_merkle_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn single_leaf_is_itself() {
        assert_eq!(calc_merkle_root(&[h(1)]), h(1));
    }

    #[test]
    fn odd_level_duplicates_last() {
        let three = calc_merkle_root(&[h(1), h(2), h(3)]);
        let four = calc_merkle_root(&[h(1), h(2), h(3), h(3)]);
        assert_eq!(three, four);
    }

    #[test]
    fn two_leaves() {
        let expected = sha256d_multi(&[h(1).as_bytes(), h(2).as_bytes()]);
        assert_eq!(calc_merkle_root(&[h(1), h(2)]), expected);
    }

    #[test]
    fn branch_for_first_leaf_matches_root() {
        let leaves = [h(1), h(2), h(3), h(4)];
        let root = calc_merkle_root(&leaves);
        let right = sha256d_multi(&[h(3).as_bytes(), h(4).as_bytes()]);
        assert_eq!(hash_merkle_branch(&[h(2), right], h(1), 0), root);
    }

    #[test]
    fn branch_for_last_leaf_uses_index_bits() {
        let leaves = [h(1), h(2), h(3), h(4)];
        let root = calc_merkle_root(&leaves);
        let left = sha256d_multi(&[h(1).as_bytes(), h(2).as_bytes()]);
        assert_eq!(hash_merkle_branch(&[h(3), left], h(4), 3), root);
    }
}
