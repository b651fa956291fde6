// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the ShoalFS metadata engine

use std::io;

/// Engine error type. `errno()` gives the negative POSIX status the wire
/// protocol speaks.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("path is malformed")]
    InvalidPath,
    #[error("offset is negative")]
    InvalidOffset,
    #[error("file location record missing")]
    MissingLocation,
    #[error("store error: {0}")]
    Store(#[from] rocksdb::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Negative errno carried in a response status.
    pub fn errno(&self) -> i32 {
        match self {
            EngineError::AlreadyExists => -libc::EEXIST,
            EngineError::NotFound => -libc::ENOENT,
            EngineError::NotADirectory => -libc::ENOTDIR,
            EngineError::IsADirectory => -libc::EISDIR,
            EngineError::InvalidPath
            | EngineError::InvalidOffset
            | EngineError::MissingLocation
            | EngineError::Store(_)
            | EngineError::Io(_) => -libc::EIO,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
