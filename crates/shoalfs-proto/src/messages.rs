// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frame layout and operation payload types for the ShoalFS wire protocol
//!
//! Request frame:
//!
//! ```text
//! | id | op | flags | total_length | path_length | path | meta_length | meta | data_length | data |
//! | 4B | 4B |  4B   |      4B      |     4B      |  0~  |     4B      |  0~  |     4B      |  0~  |
//! ```
//!
//! Response frame:
//!
//! ```text
//! | id | status | flags | total_length | meta_length | meta | data_length | data |
//! | 4B |   4B   |  4B   |      4B      |     4B      |  0~  |     4B      |  0~  |
//! ```
//!
//! `total_length` counts everything after the 16-byte header, including the
//! embedded length fields.

use serde::{Deserialize, Serialize};

use crate::validation::ProtoError;

/// Default daemon listen port.
pub const DEFAULT_PORT: u16 = 8888;

/// Fixed size of a request header on the wire.
pub const REQUEST_HEADER_SIZE: usize = 16;

/// Fixed size of a response header on the wire.
pub const RESPONSE_HEADER_SIZE: usize = 16;

/// Width of every embedded length field.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Maximum frame body, i.e. maximum legal `total_length`.
pub const MAX_FRAME_BODY: usize = 65535;

/// Operation tags carried in the request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    CreateFile = 1,
    CreateDir = 2,
    GetFileAttr = 3,
    ReadDir = 4,
    OpenFile = 5,
    ReadFile = 6,
    WriteFile = 7,
}

impl TryFrom<u32> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u32) -> Result<Self, ProtoError> {
        match value {
            1 => Ok(OpCode::CreateFile),
            2 => Ok(OpCode::CreateDir),
            3 => Ok(OpCode::GetFileAttr),
            4 => Ok(OpCode::ReadDir),
            5 => Ok(OpCode::OpenFile),
            6 => Ok(OpCode::ReadFile),
            7 => Ok(OpCode::WriteFile),
            other => Err(ProtoError::UnknownOp(other)),
        }
    }
}

/// Parsed request header. `op` is kept raw here; [`crate::validation`]
/// turns it into an [`OpCode`] or rejects the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub id: u32,
    pub op: u32,
    pub flags: u32,
    pub total_length: u32,
}

impl RequestHeader {
    pub fn parse(bytes: &[u8; REQUEST_HEADER_SIZE]) -> Self {
        Self {
            id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            op: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            flags: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            total_length: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}

/// Parsed response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub id: u32,
    pub status: i32,
    pub flags: u32,
    pub total_length: u32,
}

impl ResponseHeader {
    pub fn parse(bytes: &[u8; RESPONSE_HEADER_SIZE]) -> Self {
        Self {
            id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            status: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            flags: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            total_length: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}

/// Meta payload of a `CreateFile` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFileMeta {
    pub mode: u32,
}

/// Meta payload of a `CreateDir` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDirMeta {
    pub mode: u32,
}

/// Meta payload of an `OpenFile` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileMeta {
    pub flags: i32,
}

/// Meta payload of a `ReadFile` request: how much to read and where from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileMeta {
    pub size: u32,
    pub offset: i64,
}

/// Meta payload of a `WriteFile` request; `size` mirrors the data section
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileMeta {
    pub size: u32,
    pub offset: i64,
}

/// Stat blob returned in the meta section of a `GetFileAttr` response.
///
/// Surface attributes are synthesized: files are `S_IFREG | 0777` with one
/// link, directories `S_IFDIR | 0777` with two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrPayload {
    pub size: u64,
    pub kind: u8,
    pub mode: u32,
    pub nlink: u32,
}

impl FileAttrPayload {
    pub fn file() -> Self {
        Self {
            size: 0,
            kind: b'f',
            mode: libc::S_IFREG as u32 | 0o777,
            nlink: 1,
        }
    }

    pub fn directory() -> Self {
        Self {
            size: 4096,
            kind: b'd',
            mode: libc::S_IFDIR as u32 | 0o777,
            nlink: 2,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == b'd'
    }
}

/// A request with its operation-specific payload. Unknown tags never reach
/// this type; they are rejected while validating the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateFile { path: String, mode: u32 },
    CreateDir { path: String, mode: u32 },
    GetFileAttr { path: String },
    ReadDir { path: String },
    OpenFile { path: String, flags: i32 },
    ReadFile { path: String, size: u32, offset: i64 },
    WriteFile { path: String, offset: i64, data: Vec<u8> },
}

impl Request {
    pub fn op(&self) -> OpCode {
        match self {
            Request::CreateFile { .. } => OpCode::CreateFile,
            Request::CreateDir { .. } => OpCode::CreateDir,
            Request::GetFileAttr { .. } => OpCode::GetFileAttr,
            Request::ReadDir { .. } => OpCode::ReadDir,
            Request::OpenFile { .. } => OpCode::OpenFile,
            Request::ReadFile { .. } => OpCode::ReadFile,
            Request::WriteFile { .. } => OpCode::WriteFile,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Request::CreateFile { path, .. }
            | Request::CreateDir { path, .. }
            | Request::GetFileAttr { path }
            | Request::ReadDir { path }
            | Request::OpenFile { path, .. }
            | Request::ReadFile { path, .. }
            | Request::WriteFile { path, .. } => path,
        }
    }

    /// Serialize the complete request frame, header included.
    pub fn encode_frame(&self, id: u32, flags: u32) -> Result<Vec<u8>, ProtoError> {
        let meta;
        let data: &[u8] = match self {
            Request::CreateFile { mode, .. } => {
                meta = bincode::serialize(&CreateFileMeta { mode: *mode })?;
                &[]
            }
            Request::CreateDir { mode, .. } => {
                meta = bincode::serialize(&CreateDirMeta { mode: *mode })?;
                &[]
            }
            Request::GetFileAttr { .. } | Request::ReadDir { .. } => {
                meta = Vec::new();
                &[]
            }
            Request::OpenFile { flags, .. } => {
                meta = bincode::serialize(&OpenFileMeta { flags: *flags })?;
                &[]
            }
            Request::ReadFile { size, offset, .. } => {
                meta = bincode::serialize(&ReadFileMeta {
                    size: *size,
                    offset: *offset,
                })?;
                &[]
            }
            Request::WriteFile { offset, data, .. } => {
                meta = bincode::serialize(&WriteFileMeta {
                    size: data.len() as u32,
                    offset: *offset,
                })?;
                data
            }
        };

        let path = self.path().as_bytes();
        let total = 3 * LENGTH_FIELD_SIZE + path.len() + meta.len() + data.len();
        if total > MAX_FRAME_BODY {
            return Err(ProtoError::FrameTooLarge(total));
        }

        let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + total);
        frame.extend_from_slice(&id.to_le_bytes());
        frame.extend_from_slice(&(self.op() as u32).to_le_bytes());
        frame.extend_from_slice(&flags.to_le_bytes());
        frame.extend_from_slice(&(total as u32).to_le_bytes());
        frame.extend_from_slice(&(path.len() as u32).to_le_bytes());
        frame.extend_from_slice(path);
        frame.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        frame.extend_from_slice(&meta);
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(data);
        Ok(frame)
    }

    /// Decode a request body (everything after the header) for a validated
    /// operation tag.
    pub fn decode_body(op: OpCode, body: &[u8]) -> Result<Self, ProtoError> {
        let mut reader = BodyReader::new(body);
        let path = std::str::from_utf8(reader.section()?)?.to_owned();
        let meta = reader.section()?;
        let data = reader.section()?;
        reader.finish()?;

        match op {
            OpCode::CreateFile => {
                let m: CreateFileMeta = bincode::deserialize(meta)?;
                Ok(Request::CreateFile { path, mode: m.mode })
            }
            OpCode::CreateDir => {
                let m: CreateDirMeta = bincode::deserialize(meta)?;
                Ok(Request::CreateDir { path, mode: m.mode })
            }
            OpCode::GetFileAttr => Ok(Request::GetFileAttr { path }),
            OpCode::ReadDir => Ok(Request::ReadDir { path }),
            OpCode::OpenFile => {
                let m: OpenFileMeta = bincode::deserialize(meta)?;
                Ok(Request::OpenFile {
                    path,
                    flags: m.flags,
                })
            }
            OpCode::ReadFile => {
                let m: ReadFileMeta = bincode::deserialize(meta)?;
                Ok(Request::ReadFile {
                    path,
                    size: m.size,
                    offset: m.offset,
                })
            }
            OpCode::WriteFile => {
                let m: WriteFileMeta = bincode::deserialize(meta)?;
                Ok(Request::WriteFile {
                    path,
                    offset: m.offset,
                    data: data.to_vec(),
                })
            }
        }
    }
}

/// Serialize a complete response frame, header included.
pub fn encode_response(id: u32, status: i32, flags: u32, meta: &[u8], data: &[u8]) -> Vec<u8> {
    let total = 2 * LENGTH_FIELD_SIZE + meta.len() + data.len();
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_SIZE + total);
    frame.extend_from_slice(&id.to_le_bytes());
    frame.extend_from_slice(&status.to_le_bytes());
    frame.extend_from_slice(&flags.to_le_bytes());
    frame.extend_from_slice(&(total as u32).to_le_bytes());
    frame.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    frame.extend_from_slice(meta);
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Packed directory listing: a byte sequence of `(len: u8, name[len])`
/// entries, stored verbatim as the directory record and shipped verbatim as
/// the `ReadDir` response data. Directory children keep their trailing `/`;
/// the `.` and `..` entries do not carry one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirList {
    bytes: Vec<u8>,
}

impl DirList {
    /// A fresh directory record containing exactly `.` and `..`.
    pub fn with_dot_entries() -> Self {
        Self {
            bytes: vec![1, b'.', 2, b'.', b'.'],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn push(&mut self, name: &str) -> Result<(), ProtoError> {
        if name.is_empty() {
            return Err(ProtoError::EmptyName);
        }
        if name.len() > u8::MAX as usize {
            return Err(ProtoError::NameTooLong);
        }
        self.bytes.push(name.len() as u8);
        self.bytes.extend_from_slice(name.as_bytes());
        Ok(())
    }

    /// Decode every entry, rejecting truncated or empty names.
    pub fn names(&self) -> Result<Vec<String>, ProtoError> {
        let mut names = Vec::new();
        let mut at = 0;
        while at < self.bytes.len() {
            let len = self.bytes[at] as usize;
            at += 1;
            if len == 0 {
                return Err(ProtoError::EmptyName);
            }
            if at + len > self.bytes.len() {
                return Err(ProtoError::Truncated);
            }
            names.push(std::str::from_utf8(&self.bytes[at..at + len])?.to_owned());
            at += len;
        }
        Ok(names)
    }
}

struct BodyReader<'a> {
    body: &'a [u8],
    at: usize,
}

impl<'a> BodyReader<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { body, at: 0 }
    }

    fn section(&mut self) -> Result<&'a [u8], ProtoError> {
        if self.at + LENGTH_FIELD_SIZE > self.body.len() {
            return Err(ProtoError::Truncated);
        }
        let len = u32::from_le_bytes(
            self.body[self.at..self.at + LENGTH_FIELD_SIZE]
                .try_into()
                .expect("length field width"),
        ) as usize;
        let start = self.at + LENGTH_FIELD_SIZE;
        if len > self.body.len() - start {
            return Err(ProtoError::SectionOutOfBounds {
                length: len,
                body: self.body.len(),
            });
        }
        self.at = start + len;
        Ok(&self.body[start..start + len])
    }

    fn finish(self) -> Result<(), ProtoError> {
        if self.at != self.body.len() {
            return Err(ProtoError::TrailingBytes(self.body.len() - self.at));
        }
        Ok(())
    }
}
