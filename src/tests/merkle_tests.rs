// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::merkle::{hash_pair, root_of, validate_path, verify_inclusion, StaticTree};
use crate::types::Hash32;

fn leaves(n: usize) -> Vec<Hash32> {
    let mut out: Vec<Hash32> = (0..n).map(|i| Hash32::digest(format!("leaf-{i}").as_bytes())).collect();
    out.sort();
    out
}

#[test]
fn test_empty_tree_is_rejected() {
    assert!(StaticTree::new(&[]).is_err());
    assert!(root_of(&[]).is_none());
}

#[test]
fn test_single_leaf_is_root() {
    let l = leaves(1);
    let tree = StaticTree::new(&l).unwrap();
    assert_eq!(tree.root(), l[0]);
    let path = tree.path(0).unwrap();
    assert!(path.is_empty());
    verify_inclusion(&l[0], &tree.root(), &path).unwrap();
}

#[test]
fn test_two_leaves() {
    let l = leaves(2);
    let tree = StaticTree::new(&l).unwrap();
    assert_eq!(tree.root(), hash_pair(&l[0], &l[1]));
    for i in 0..2 {
        let path = tree.path(i).unwrap();
        assert_eq!(path.len(), 1);
        verify_inclusion(&l[i], &tree.root(), &path).unwrap();
    }
}

#[test]
fn test_odd_leaf_is_promoted() {
    let l = leaves(3);
    let tree = StaticTree::new(&l).unwrap();
    let expected = hash_pair(&hash_pair(&l[0], &l[1]), &l[2]);
    assert_eq!(tree.root(), expected);

    // The orphan only meets a sibling at the second level.
    let path = tree.path(2).unwrap();
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].right, l[2]);
    verify_inclusion(&l[2], &tree.root(), &path).unwrap();
}

#[test]
fn test_every_leaf_verifies() {
    for n in 1..=17 {
        let l = leaves(n);
        let tree = StaticTree::new(&l).unwrap();
        for (i, leaf) in l.iter().enumerate() {
            let path = tree.path(i).unwrap();
            validate_path(&path).unwrap();
            verify_inclusion(leaf, &tree.root(), &path).unwrap();
        }
    }
}

#[test]
fn test_wrong_leaf_or_root_fails() {
    let l = leaves(5);
    let tree = StaticTree::new(&l).unwrap();
    let path = tree.path(1).unwrap();
    let stranger = Hash32::digest(b"stranger");
    assert!(verify_inclusion(&stranger, &tree.root(), &path).is_err());
    assert!(verify_inclusion(&l[1], &stranger, &path).is_err());
    assert!(tree.path(5).is_err());
}

#[test]
fn test_tampered_path_fails() {
    let l = leaves(8);
    let tree = StaticTree::new(&l).unwrap();
    let mut path = tree.path(3).unwrap();
    path[1].parent = Hash32::digest(b"forged");
    assert!(validate_path(&path).is_err());
}
