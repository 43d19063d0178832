// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod abci;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod producer;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod validation;
