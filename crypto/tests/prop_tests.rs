use proptest::prelude::*;

use ps_crypto::{calc_merkle_root, hash_merkle_branch, sha256d, sha256d_multi};
use ps_types::Hash256;

fn leaves(n: usize) -> Vec<Hash256> {
    (0..n as u32).map(|i| sha256d(&i.to_le_bytes())).collect()
}

/// Branch for leaf 0 built the slow way: sibling at each level.
fn first_leaf_branch(hashes: &[Hash256]) -> Vec<Hash256> {
    let mut branch = Vec::new();
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        branch.push(level[1]);
        level = level
            .chunks(2)
            .map(|p| sha256d_multi(&[p[0].as_bytes(), p[1].as_bytes()]))
            .collect();
    }
    branch
}

proptest! {
    /// Odd leaf counts behave exactly like duplicating the last leaf by hand.
    #[test]
    fn odd_count_equals_manual_duplicate(n in 1usize..64) {
        let mut hs = leaves(n);
        let root = calc_merkle_root(&hs);
        if n % 2 == 1 && n > 1 {
            let last = *hs.last().unwrap();
            hs.push(last);
            prop_assert_eq!(calc_merkle_root(&hs), root);
        }
    }

    /// Rolling the first leaf up its branch reproduces the root.
    #[test]
    fn first_leaf_branch_reaches_root(n in 1usize..128) {
        let hs = leaves(n);
        let branch = first_leaf_branch(&hs);
        prop_assert_eq!(hash_merkle_branch(&branch, hs[0], 0), calc_merkle_root(&hs));
    }

    /// Changing any leaf changes the root.
    #[test]
    fn root_commits_to_every_leaf(n in 2usize..40, idx in 0usize..40) {
        let mut hs = leaves(n);
        let root = calc_merkle_root(&hs);
        let i = idx % n;
        hs[i] = sha256d(b"tampered");
        prop_assert_ne!(calc_merkle_root(&hs), root);
    }
}
