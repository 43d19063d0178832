// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Protocol constants shared by every backend and by the replicated engine.

/// Page size used when a filter does not specify a limit.
pub const DEFAULT_LIMIT: usize = 20;

/// Largest page a single query may request.
pub const MAX_LIMIT: usize = 200;

/// Reserved process under which validation rules are versioned.
pub const GOVERNANCE_PROCESS: &str = "_governance";

/// Tag carried by every governance link, next to the governed process name.
pub const VALIDATORS_TAG: &str = "validators";

/// `backend` field of the evidences produced by the replicated engine.
pub const EVIDENCE_BACKEND: &str = "TMPop";

/// Key/value entry holding the last committed block.
pub const LAST_BLOCK_KEY: &str = "lastBlock";
