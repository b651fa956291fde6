// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client facade: maps each path to a daemon and forwards the operation
//!
//! Holds the shard table (shard index to endpoint); a node owns at most one
//! live connection, created on first use and reconnected lazily after a
//! teardown. `map_path` is the deterministic shard selector, a single-shard
//! placeholder today; the path-to-shard-index interface is the contract a
//! real resolver (e.g. consistent hashing over the directory prefix) would
//! slot into.
//!
//! Operations return `Err` with a positive errno, ready for the bridge to
//! hand to the kernel.

use std::sync::{Arc, Mutex};

use tracing::debug;

use shoalfs_proto::{FileAttrPayload, Request, MAX_FRAME_BODY};

use crate::connection::Connection;
use crate::slots::Reply;

/// Receive-buffer bound for a stat blob.
const ATTR_META_CAPACITY: usize = 64;

pub struct Client {
    nodes: Vec<Node>,
}

struct Node {
    address: String,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl Node {
    fn connection(&self) -> Arc<Connection> {
        let mut guard = self.connection.lock().unwrap();
        match guard.as_ref() {
            Some(connection) => Arc::clone(connection),
            None => {
                let connection = Arc::new(Connection::new(self.address.clone()));
                *guard = Some(Arc::clone(&connection));
                connection
            }
        }
    }
}

impl Client {
    /// A client backed by a single daemon endpoint.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node {
                address: address.into(),
                connection: Mutex::new(None),
            }],
        }
    }

    /// Deterministic shard selector. Always 0 for now; the sharding policy
    /// behind this interface is future work.
    pub fn map_path(&self, _path: &str) -> usize {
        0
    }

    pub fn create_file(&self, path: &str, mode: u32) -> Result<(), i32> {
        let reply = self.call(
            path,
            &Request::CreateFile {
                path: path.to_owned(),
                mode,
            },
            0,
            0,
        )?;
        ok_status(&reply)
    }

    pub fn create_dir(&self, path: &str, mode: u32) -> Result<(), i32> {
        let reply = self.call(
            path,
            &Request::CreateDir {
                path: path.to_owned(),
                mode,
            },
            0,
            0,
        )?;
        ok_status(&reply)
    }

    pub fn get_file_attr(&self, path: &str) -> Result<FileAttrPayload, i32> {
        let reply = self.call(
            path,
            &Request::GetFileAttr {
                path: path.to_owned(),
            },
            ATTR_META_CAPACITY,
            0,
        )?;
        ok_status(&reply)?;
        bincode::deserialize(&reply.meta).map_err(|_| libc::EIO)
    }

    /// The packed directory listing, verbatim from the daemon.
    pub fn read_dir(&self, path: &str) -> Result<Vec<u8>, i32> {
        let reply = self.call(
            path,
            &Request::ReadDir {
                path: path.to_owned(),
            },
            0,
            MAX_FRAME_BODY,
        )?;
        ok_status(&reply)?;
        Ok(reply.data)
    }

    pub fn open_file(&self, path: &str, flags: i32) -> Result<(), i32> {
        let reply = self.call(
            path,
            &Request::OpenFile {
                path: path.to_owned(),
                flags,
            },
            0,
            0,
        )?;
        ok_status(&reply)
    }

    pub fn read_file(&self, path: &str, size: u32, offset: i64) -> Result<Vec<u8>, i32> {
        let size = size.min(MAX_FRAME_BODY as u32);
        let reply = self.call(
            path,
            &Request::ReadFile {
                path: path.to_owned(),
                size,
                offset,
            },
            0,
            size as usize,
        )?;
        ok_status(&reply)?;
        Ok(reply.data)
    }

    /// Whole-frame write: a zero status means every byte landed.
    pub fn write_file(&self, path: &str, data: &[u8], offset: i64) -> Result<u32, i32> {
        let reply = self.call(
            path,
            &Request::WriteFile {
                path: path.to_owned(),
                offset,
                data: data.to_vec(),
            },
            0,
            0,
        )?;
        ok_status(&reply)?;
        Ok(data.len() as u32)
    }

    fn call(
        &self,
        path: &str,
        request: &Request,
        meta_capacity: usize,
        data_capacity: usize,
    ) -> Result<Reply, i32> {
        let shard = self.map_path(path);
        debug!(path, shard, op = ?request.op(), "forwarding operation");
        self.nodes[shard].connection().call(request, meta_capacity, data_capacity)
    }
}

fn ok_status(reply: &Reply) -> Result<(), i32> {
    if reply.status < 0 {
        return Err(-reply.status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_path_is_single_shard() {
        let client = Client::new("127.0.0.1:8888");
        assert_eq!(client.map_path("/"), 0);
        assert_eq!(client.map_path("/deeply/nested/file"), 0);
    }

    #[test]
    fn unreachable_endpoint_is_eio() {
        // port 1 is essentially never listening
        let client = Client::new("127.0.0.1:1");
        assert_eq!(client.get_file_attr("/"), Err(libc::EIO));
    }
}
