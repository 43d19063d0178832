// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! popstore-kernel: the data model of a process-aware, content-addressed ledger.
//!
//! Links, segments and evidences, their canonical encoding and fingerprints,
//! query filters, and the Merkle and app-hash machinery behind consensus
//! evidences. Everything here is synchronous and free of I/O.

pub mod block;
pub mod canonical;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod merkle;
pub mod proof;
pub mod types;

pub use error::{KernelError, Result};

#[cfg(test)]
pub mod tests;
