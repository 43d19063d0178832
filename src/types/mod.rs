// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod evidence;
pub mod hash;
pub mod link;
pub mod segment;

pub use evidence::{Evidence, EvidenceMerge, EvidenceState, Evidences};
pub use hash::{Hash32, LinkHash};
pub use link::{Link, LinkMeta, LinkReference, Signature};
pub use segment::{Segment, SegmentMeta};
