// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Adapters for the swarm domain's ports.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Persist swarm session state

pub mod in_memory_repository;

pub use in_memory_repository::InMemorySwarmRepository;
