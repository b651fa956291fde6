// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ShoalFS Client
//!
//! A long-lived, multiplexed TCP connection per daemon: requests are tagged
//! with correlation ids from a bounded slot ring, a dedicated receive
//! thread dispatches completions by id, and callers wait on their slot with
//! a timeout. The `Client` facade maps each path to its daemon (single
//! shard today) and exposes the filesystem operations the bridge adapter
//! consumes.

pub mod client;
pub mod connection;
pub mod slots;

pub use client::Client;
pub use connection::Connection;
pub use slots::{Reply, SlotTable, CALL_TIMEOUT, SLOT_COUNT};
