// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The metadata engine proper
//!
//! Three RocksDB namespaces keyed by path: `attr` (type tag `f`/`d`), `dir`
//! (packed child list) and `loc` (opaque local name). File bytes live in
//! host files under `storage_path/<seg>/<seg>` where both segments are 16
//! random lowercase letters. Opening the engine wipes all three namespaces
//! and seeds the root directory.
//!
//! Point gets and puts rely on RocksDB's own atomicity. The one compound
//! mutation, appending a child to its parent's packed list, is serialized
//! through a per-directory lock table so concurrent creates under the same
//! parent cannot lose entries.

use std::collections::HashMap;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::Rng;
use rocksdb::{Options, DB};
use tracing::{debug, info};

use shoalfs_proto::{DirList, FileAttrPayload};

use crate::config::{EngineConfig, ATTR_DB_NAME, DIR_DB_NAME, LOC_DB_NAME};
use crate::error::{EngineError, EngineResult};

const FILE_TAG: &[u8] = b"f";
const DIR_TAG: &[u8] = b"d";

pub struct Engine {
    attr: DB,
    dir: DB,
    loc: DB,
    storage_root: PathBuf,
    dir_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
    /// Open the engine, wiping any previous state and installing the root
    /// directory.
    pub fn open(config: &EngineConfig) -> EngineResult<Self> {
        fs::create_dir_all(&config.database_path)?;
        fs::create_dir_all(&config.storage_path)?;

        let attr = open_wiped(&config.database_path.join(ATTR_DB_NAME))?;
        let dir = open_wiped(&config.database_path.join(DIR_DB_NAME))?;
        let loc = open_wiped(&config.database_path.join(LOC_DB_NAME))?;

        attr.put(b"/", DIR_TAG)?;
        dir.put(b"/", DirList::with_dot_entries().as_bytes())?;
        loc.put(b"/", b"")?;

        info!(
            database_path = %config.database_path.display(),
            storage_path = %config.storage_path.display(),
            "engine opened with fresh namespaces"
        );

        Ok(Self {
            attr,
            dir,
            loc,
            storage_root: config.storage_path.clone(),
            dir_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn create_file(&self, path: &str, mode: u32) -> EngineResult<()> {
        if path.ends_with('/') {
            return Err(EngineError::IsADirectory);
        }
        if self.attr.get(path.as_bytes())?.is_some() {
            return Err(EngineError::AlreadyExists);
        }
        let (parent, leaf) = split_parent(path).ok_or(EngineError::InvalidPath)?;

        let lock = self.dir_lock(parent);
        let _guard = lock.lock().unwrap();
        if self.attr.get(path.as_bytes())?.is_some() {
            return Err(EngineError::AlreadyExists);
        }
        self.append_child(parent, leaf)?;
        self.attr.put(path.as_bytes(), FILE_TAG)?;

        let local = generate_local_name();
        self.loc.put(path.as_bytes(), local.as_bytes())?;
        self.create_backing_file(&local, mode)?;
        debug!(path, local, "created file");
        Ok(())
    }

    pub fn create_dir(&self, path: &str, _mode: u32) -> EngineResult<()> {
        if !path.ends_with('/') {
            return Err(EngineError::InvalidPath);
        }
        if self.attr.get(path.as_bytes())?.is_some() {
            return Err(EngineError::AlreadyExists);
        }
        let (parent, leaf) = split_parent(path).ok_or(EngineError::InvalidPath)?;

        let lock = self.dir_lock(parent);
        let _guard = lock.lock().unwrap();
        if self.attr.get(path.as_bytes())?.is_some() {
            return Err(EngineError::AlreadyExists);
        }
        self.append_child(parent, leaf)?;
        self.attr.put(path.as_bytes(), DIR_TAG)?;
        self.dir
            .put(path.as_bytes(), DirList::with_dot_entries().as_bytes())?;
        debug!(path, "created directory");
        Ok(())
    }

    pub fn get_file_attr(&self, path: &str) -> EngineResult<FileAttrPayload> {
        let Some(tag) = self.attr.get(path.as_bytes())? else {
            return Err(EngineError::NotFound);
        };
        match tag.as_slice() {
            t if t == FILE_TAG => Ok(FileAttrPayload::file()),
            t if t == DIR_TAG => Ok(FileAttrPayload::directory()),
            _ => Err(EngineError::NotFound),
        }
    }

    /// The packed child list, verbatim as stored.
    pub fn read_dir(&self, path: &str) -> EngineResult<Vec<u8>> {
        let Some(tag) = self.attr.get(path.as_bytes())? else {
            return Err(EngineError::NotFound);
        };
        match tag.as_slice() {
            t if t == DIR_TAG => self
                .dir
                .get(path.as_bytes())?
                .ok_or(EngineError::NotFound),
            t if t == FILE_TAG => Err(EngineError::NotADirectory),
            _ => Err(EngineError::NotFound),
        }
    }

    /// Type check only; no server-side handle state is allocated.
    pub fn open_file(&self, path: &str, _flags: i32) -> EngineResult<()> {
        let Some(tag) = self.attr.get(path.as_bytes())? else {
            return Err(EngineError::NotFound);
        };
        match tag.as_slice() {
            t if t == FILE_TAG => Ok(()),
            t if t == DIR_TAG => Err(EngineError::IsADirectory),
            _ => Err(EngineError::NotFound),
        }
    }

    /// Positional read of up to `size` bytes at `offset`.
    pub fn read_file(&self, path: &str, size: u32, offset: i64) -> EngineResult<Vec<u8>> {
        let offset = checked_offset(offset)?;
        let file = self.open_backing(path, false)?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Positional write; returns the number of bytes written.
    pub fn write_file(&self, path: &str, data: &[u8], offset: i64) -> EngineResult<u32> {
        let offset = checked_offset(offset)?;
        let file = self.open_backing(path, true)?;
        file.write_all_at(data, offset)?;
        Ok(data.len() as u32)
    }

    fn dir_lock(&self, parent: &str) -> Arc<Mutex<()>> {
        let mut locks = self.dir_locks.lock().unwrap();
        locks.entry(parent.to_owned()).or_default().clone()
    }

    /// Read-modify-write of the parent's packed list. Caller holds the
    /// parent's directory lock.
    fn append_child(&self, parent: &str, leaf: &str) -> EngineResult<()> {
        let packed = self
            .dir
            .get(parent.as_bytes())?
            .ok_or(EngineError::NotFound)?;
        let mut children = DirList::from_bytes(packed);
        children
            .push(leaf)
            .map_err(|_| EngineError::InvalidPath)?;
        self.dir.put(parent.as_bytes(), children.as_bytes())?;
        Ok(())
    }

    fn create_backing_file(&self, local: &str, mode: u32) -> EngineResult<()> {
        let full = self.storage_root.join(local);
        if let Some(host_dir) = full.parent() {
            match DirBuilder::new().mode(0o777).create(host_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(mode & 0o7777)
            .open(&full)?;
        drop(file);
        Ok(())
    }

    fn open_backing(&self, path: &str, write: bool) -> EngineResult<File> {
        let Some(tag) = self.attr.get(path.as_bytes())? else {
            return Err(EngineError::NotFound);
        };
        match tag.as_slice() {
            t if t == FILE_TAG => {}
            t if t == DIR_TAG => return Err(EngineError::IsADirectory),
            _ => return Err(EngineError::NotFound),
        }
        let local = self
            .loc
            .get(path.as_bytes())?
            .ok_or(EngineError::MissingLocation)?;
        let local = String::from_utf8(local).map_err(|_| EngineError::MissingLocation)?;
        let full = self.storage_root.join(&local);
        let file = if write {
            OpenOptions::new().write(true).open(&full)?
        } else {
            File::open(&full)?
        };
        Ok(file)
    }
}

/// Split a path into its parent directory key (longest prefix ending in
/// `/`) and the remaining single-segment leaf. A directory path keeps its
/// trailing `/` on the leaf. Returns `None` when no parent exists (the root
/// itself, or a path with no `/`-terminated prefix).
fn split_parent(path: &str) -> Option<(&str, &str)> {
    let stem = path.strip_suffix('/').unwrap_or(path);
    let idx = stem.rfind('/')?;
    let parent = &path[..idx + 1];
    let leaf = &path[idx + 1..];
    if leaf.is_empty() || leaf == "/" {
        return None;
    }
    Some((parent, leaf))
}

/// Offsets arrive over the wire as `i64`; a negative one is a malformed
/// request, not a position.
fn checked_offset(offset: i64) -> EngineResult<u64> {
    u64::try_from(offset).map_err(|_| EngineError::InvalidOffset)
}

fn open_wiped(path: &Path) -> Result<DB, rocksdb::Error> {
    let _ = DB::destroy(&Options::default(), path);
    let mut opts = Options::default();
    opts.create_if_missing(true);
    DB::open(&opts, path)
}

/// Two independent 16-letter lowercase segments separated by `/`. The first
/// names the host directory, the second the host file.
fn generate_local_name() -> String {
    let mut rng = rand::thread_rng();
    let mut name = String::with_capacity(33);
    for _ in 0..16 {
        name.push(rng.gen_range(b'a'..=b'z') as char);
    }
    name.push('/');
    for _ in 0..16 {
        name.push(rng.gen_range(b'a'..=b'z') as char);
    }
    name
}
