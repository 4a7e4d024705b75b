// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the SAFLA CLI

pub mod config;
pub mod consolidate;
pub mod predict;
pub mod serve;
pub mod simulate;

pub use self::config::ConfigCommand;
pub use self::predict::PredictCommand;
pub use self::simulate::SimulateArgs;
