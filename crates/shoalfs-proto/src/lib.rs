// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ShoalFS Protocol — wire frame codec and operation types
//!
//! This crate defines the framed request/response contract spoken between
//! the ShoalFS client and daemon: fixed 16-byte headers, length-prefixed
//! path/meta/data sections, the tagged operation variants, and header
//! validation. Integers on the wire are fixed-width little-endian.

pub mod messages;
pub mod validation;

pub use messages::{
    CreateDirMeta, CreateFileMeta, DirList, FileAttrPayload, OpCode, OpenFileMeta,
    ReadFileMeta, Request, RequestHeader, ResponseHeader, WriteFileMeta, encode_response,
    DEFAULT_PORT, LENGTH_FIELD_SIZE, MAX_FRAME_BODY, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
pub use validation::{
    validate_request_header, validate_response_header, validate_section_length, ProtoError,
};
