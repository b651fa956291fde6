// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ShoalFS FUSE adapter
//!
//! Translates kernel filesystem callbacks into client facade calls. The
//! protocol is path-keyed while FUSE speaks inodes, so the adapter keeps a
//! bidirectional inode↔path table seeded with `1 ↔ /`. Directory paths are
//! stored in their canonical trailing-`/` form; `lookup` probes the file
//! form first and falls back to the directory form.
//!
//! Every open replies with `FOPEN_DIRECT_IO` so the kernel page cache never
//! answers a read or buffers a write; all file data traverses the protocol.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use tracing::debug;

use shoalfs_client::Client;
use shoalfs_proto::{DirList, FileAttrPayload};

/// Kernel attribute cache TTL.
const TTL: Duration = Duration::from_secs(1);

pub struct ShoalFuse {
    client: Client,
    inodes: Mutex<InodeTable>,
    fd_counter: AtomicU64,
}

struct InodeTable {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            next: FUSE_ROOT_ID + 1,
        };
        table.by_ino.insert(FUSE_ROOT_ID, "/".to_owned());
        table.by_path.insert("/".to_owned(), FUSE_ROOT_ID);
        table
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).cloned()
    }

    /// The inode for a canonical path, allocating one on first sight.
    fn assign(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.by_path.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, path.to_owned());
        self.by_path.insert(path.to_owned(), ino);
        ino
    }
}

impl ShoalFuse {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            inodes: Mutex::new(InodeTable::new()),
            fd_counter: AtomicU64::new(1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().unwrap().path_of(ino)
    }

    fn assign(&self, path: &str) -> u64 {
        self.inodes.lock().unwrap().assign(path)
    }

    fn next_fd(&self) -> u64 {
        self.fd_counter.fetch_add(1, Ordering::AcqRel)
    }

    /// Resolve a child against the attribute namespace: the file form
    /// first, then the trailing-`/` directory form.
    fn resolve_child(&self, parent_path: &str, name: &OsStr) -> Result<(String, FileAttrPayload), i32> {
        let file_form = join_child(parent_path, name).ok_or(libc::ENOENT)?;
        match self.client.get_file_attr(&file_form) {
            Ok(attr) => Ok((file_form, attr)),
            Err(errno) if errno == libc::ENOENT => {
                let dir_form = format!("{file_form}/");
                let attr = self.client.get_file_attr(&dir_form)?;
                Ok((dir_form, attr))
            }
            Err(errno) => Err(errno),
        }
    }
}

impl Filesystem for ShoalFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.resolve_child(&parent_path, name) {
            Ok((path, attr)) => {
                let ino = self.assign(&path);
                reply.entry(&TTL, &file_attr(ino, &attr), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.client.get_file_attr(&path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(ino, &attr)),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let packed = match self.client.read_dir(&path) {
            Ok(packed) => packed,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let names = match DirList::from_bytes(packed).names() {
            Ok(names) => names,
            Err(_) => {
                reply.error(libc::EIO);
                return;
            }
        };
        debug!(path, entries = names.len(), "listing directory");
        for (index, name) in names.iter().enumerate().skip(offset as usize) {
            let next_offset = (index + 1) as i64;
            let entry_ino = if name == "." {
                ino
            } else if name == ".." {
                self.assign(&parent_of(&path))
            } else {
                self.assign(&format!("{path}{name}"))
            };
            let kind = if name == "." || name == ".." || name.ends_with('/') {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            if reply.add(entry_ino, next_offset, kind, name.trim_end_matches('/')) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.client.open_file(&path, flags) {
            Ok(()) => reply.opened(self.next_fd(), FOPEN_DIRECT_IO),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.client.read_file(&path, size, offset) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.client.write_file(&path, data, offset) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(path) = join_child(&parent_path, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.client.create_file(&path, mode) {
            Ok(()) => {
                let ino = self.assign(&path);
                let attr = file_attr(ino, &FileAttrPayload::file());
                reply.created(&TTL, &attr, 0, self.next_fd(), FOPEN_DIRECT_IO);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(file_form) = join_child(&parent_path, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = format!("{file_form}/");
        match self.client.create_dir(&path, mode) {
            Ok(()) => {
                let ino = self.assign(&path);
                reply.entry(&TTL, &file_attr(ino, &FileAttrPayload::directory()), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    // Everything below is outside the supported surface.

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(libc::EPERM);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EPERM);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EPERM);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EPERM);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EPERM);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EPERM);
    }
}

/// Join a child name onto its parent's canonical (trailing-`/`) path.
fn join_child(parent_path: &str, name: &OsStr) -> Option<String> {
    let name = name.to_str()?;
    if parent_path.ends_with('/') {
        Some(format!("{parent_path}{name}"))
    } else {
        Some(format!("{parent_path}/{name}"))
    }
}

/// Parent directory of a canonical path, itself in canonical form.
fn parent_of(path: &str) -> String {
    let stem = path.strip_suffix('/').unwrap_or(path);
    match stem.rfind('/') {
        Some(idx) => stem[..=idx].to_owned(),
        None => "/".to_owned(),
    }
}

fn file_attr(ino: u64, payload: &FileAttrPayload) -> FileAttr {
    let kind = if payload.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino,
        size: payload.size,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind,
        perm: (payload.mode & 0o7777) as u16,
        nlink: payload.nlink,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_table_seeds_the_root() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(FUSE_ROOT_ID).as_deref(), Some("/"));
    }

    #[test]
    fn inode_assignment_is_stable() {
        let mut table = InodeTable::new();
        let a = table.assign("/foo/");
        let b = table.assign("/foo/bar");
        assert_ne!(a, b);
        assert_eq!(table.assign("/foo/"), a);
        assert_eq!(table.path_of(b).as_deref(), Some("/foo/bar"));
    }

    #[test]
    fn join_child_respects_canonical_parents() {
        assert_eq!(join_child("/", OsStr::new("foo")).as_deref(), Some("/foo"));
        assert_eq!(
            join_child("/foo/", OsStr::new("bar")).as_deref(),
            Some("/foo/bar")
        );
    }

    #[test]
    fn parent_of_canonical_paths() {
        assert_eq!(parent_of("/foo/"), "/");
        assert_eq!(parent_of("/foo/bar/"), "/foo/");
        assert_eq!(parent_of("/"), "/");
    }

    #[test]
    fn attrs_synthesize_posix_modes() {
        let file = file_attr(5, &FileAttrPayload::file());
        assert_eq!(file.kind, FileType::RegularFile);
        assert_eq!(file.perm, 0o777);
        assert_eq!(file.nlink, 1);

        let dir = file_attr(6, &FileAttrPayload::directory());
        assert_eq!(dir.kind, FileType::Directory);
        assert_eq!(dir.nlink, 2);
        assert_eq!(dir.size, 4096);
    }
}
