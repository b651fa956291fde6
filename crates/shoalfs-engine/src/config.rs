// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Database name of the attribute namespace (path -> type tag).
pub const ATTR_DB_NAME: &str = "testdb";

/// Database name of the directory namespace (path -> packed children).
pub const DIR_DB_NAME: &str = "testdirdb";

/// Database name of the location namespace (path -> opaque local name).
pub const LOC_DB_NAME: &str = "testfiledb";

/// Where the engine keeps its databases and its opaque file tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the three metadata databases.
    pub database_path: PathBuf,
    /// Directory under which opaque file storage lives.
    pub storage_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("."),
            storage_path: PathBuf::from("."),
        }
    }
}
