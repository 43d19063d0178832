// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::block::{compute_app_hash, Header};
use crate::config::EVIDENCE_BACKEND;
use crate::merkle::StaticTree;
use crate::proof::BlockProof;
use crate::types::{EvidenceState, Hash32, Link};

/// Builds the proof the engine would emit for `links[index]` committed at height 7.
fn prove(links: &[Link], index: usize) -> (Hash32, BlockProof) {
    let mut hashes: Vec<Hash32> = links.iter().map(|l| l.hash().unwrap()).collect();
    hashes.sort();
    let target = links[index].hash().unwrap();

    let tree = StaticTree::new(&hashes).unwrap();
    let validators = Hash32::digest(b"validators");
    let header = Header {
        chain_id: "test-chain".into(),
        height: 7,
        time: 1_700_000_000,
        app_hash: Hash32::digest(b"app hash of block 6"),
    };
    let app_hash = compute_app_hash(&header.app_hash, Some(&validators), Some(&tree.root()));
    let next_header = Header {
        chain_id: "test-chain".into(),
        height: 8,
        time: 1_700_000_005,
        app_hash,
    };

    let proof = BlockProof {
        block_height: 7,
        root: tree.root(),
        path: tree.path(tree.index_of(&target).unwrap()).unwrap(),
        validators_hash: Some(validators),
        header,
        next_header,
    };
    (target, proof)
}

fn links() -> Vec<Link> {
    (0..5).map(|i| Link::new("p", format!("m{i}"), "init")).collect()
}

#[test]
fn test_valid_proof_verifies() {
    let links = links();
    for i in 0..links.len() {
        let (hash, proof) = prove(&links, i);
        proof.verify(&hash).unwrap();
    }
}

#[test]
fn test_app_hash_mismatch_is_detected() {
    let (hash, mut proof) = prove(&links(), 0);
    proof.next_header.app_hash = Hash32::digest(b"something else");
    assert!(proof.verify(&hash).is_err());
}

#[test]
fn test_validators_hash_is_bound() {
    let (hash, mut proof) = prove(&links(), 2);
    proof.validators_hash = None;
    assert!(proof.verify(&hash).is_err());
}

#[test]
fn test_foreign_link_is_rejected() {
    let (_, proof) = prove(&links(), 1);
    let other = Link::new("p", "elsewhere", "init").hash().unwrap();
    assert!(proof.verify(&other).is_err());
}

#[test]
fn test_height_chain_is_checked() {
    let (hash, mut proof) = prove(&links(), 1);
    proof.next_header.height = 10;
    assert!(proof.verify(&hash).is_err());
}

#[test]
fn test_evidence_round_trip_keeps_wire_names() {
    let (hash, proof) = prove(&links(), 3);
    let evidence = proof.clone().into_evidence("test-chain").unwrap();
    assert_eq!(evidence.backend, EVIDENCE_BACKEND);
    assert_eq!(evidence.provider, "test-chain");
    assert_eq!(evidence.state, EvidenceState::Complete);
    assert_eq!(evidence.proof["blockHeight"], serde_json::json!(7));
    assert!(evidence.proof.get("root").is_some());
    assert!(evidence.proof.get("path").is_some());

    let back = BlockProof::from_evidence(&evidence).unwrap();
    assert_eq!(back, proof);
    back.verify(&hash).unwrap();
}

#[test]
fn test_empty_block_app_hash_uses_zeroes() {
    let prev = Hash32::digest(b"prev");
    let a = compute_app_hash(&prev, None, None);
    let b = compute_app_hash(&prev, Some(&Hash32::ZERO), Some(&Hash32::ZERO));
    assert_eq!(a, b);
}
