// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use popstore_kernel::config::EVIDENCE_BACKEND;
use popstore_kernel::proof::BlockProof;
use popstore_kernel::types::{EvidenceState, Segment};

/// Recomputes a segment's link hash and checks every consensus evidence it carries.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a segment JSON document (as returned by GetSegment).
    segment: PathBuf,

    /// Fail when the segment carries no complete consensus evidence.
    #[arg(long)]
    require_evidence: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let raw = fs::read(&args.segment).with_context(|| format!("failed to read {}", args.segment.display()))?;
    let segment: Segment = serde_json::from_slice(&raw).context("not a segment document")?;

    segment.check().context("segment does not match its link hash")?;
    let link_hash = segment.link_hash();
    println!("link hash     {link_hash}");

    let mut verified = 0usize;
    for evidence in segment.meta.evidences.iter() {
        if evidence.backend != EVIDENCE_BACKEND {
            println!("skipped       {} evidence from {}", evidence.backend, evidence.provider);
            continue;
        }
        if evidence.state != EvidenceState::Complete {
            println!("pending       {} evidence from {}", evidence.backend, evidence.provider);
            continue;
        }
        let proof = BlockProof::from_evidence(evidence)
            .with_context(|| format!("malformed proof from {}", evidence.provider))?;
        proof
            .verify(link_hash)
            .with_context(|| format!("proof from {} does not verify", evidence.provider))?;
        println!(
            "verified      block {} on {} (root {})",
            proof.block_height, evidence.provider, proof.root
        );
        verified += 1;
    }

    if args.require_evidence && verified == 0 {
        bail!("no complete {EVIDENCE_BACKEND} evidence found");
    }
    println!("ok            {verified} evidence(s) verified");
    Ok(())
}
