// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer: outcome store implementations, database pool and
//! the engine event bus

pub mod db;
pub mod event_bus;
pub mod memory_store;
pub mod postgres_store;

pub use db::Database;
pub use event_bus::{EventBus, EventBusError};
pub use memory_store::InMemoryOutcomeStore;
pub use postgres_store::PostgresOutcomeStore;
