// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Store event fan-out.
//!
//! # Architecture
//! - `EventBus` = subscriber list + emission sequencer, shared by a backend and its clones
//! - `PendingEvents` = bounded queue drained by the `PendingEvents` query
//!
//! # Guarantees
//! - Every subscriber sees every event emitted after it registered
//! - A subscriber observes events in commit order
//! - A full subscriber channel blocks the producer (back-pressure)

pub mod bus;
pub mod pending;

pub use bus::{EmitPermit, EventBus};
pub use pending::{PendingEvents, DEFAULT_CONSUMER};
