// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SAFLA adaptive strategy-learning engine
//!
//! Records the outcome of every automated action, infers which conditions
//! predict success, mutates versioned strategies accordingly and periodically
//! consolidates experience into durable knowledge.
//!
//! # Architecture
//!
//! - **Layer:** Learning Layer
//! - **Purpose:** Feedback loop shared by portal navigation, document parsing
//!   and proposal generation

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::engine::LearningEngine;
pub use domain::*;
