// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ShoalFS Daemon — framed TCP sessions over the shared metadata engine
//!
//! One session per accepted connection: a receive loop reads whole request
//! frames off the socket and fans each one out to a worker thread, which
//! runs the engine operation and serializes the response under the
//! session's send lock. Engine failures become negative statuses; framing
//! violations close the connection.

pub mod session;

pub use session::{serve, Session};
