// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frame validation for the ShoalFS wire protocol
//!
//! A violation here is never answered with a status; both sides close the
//! connection on the spot.

use thiserror::Error;

use crate::messages::{OpCode, RequestHeader, ResponseHeader, MAX_FRAME_BODY};

/// Protocol-level error. Any of these tears the connection down.
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("unknown operation tag {0}")]
    UnknownOp(u32),
    #[error("frame body of {0} bytes exceeds the protocol maximum")]
    FrameTooLarge(usize),
    #[error("section length {length} overruns frame body of {body} bytes")]
    SectionOutOfBounds { length: usize, body: usize },
    #[error("frame body truncated")]
    Truncated,
    #[error("frame body has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("path is not valid utf-8")]
    BadPath(#[from] std::str::Utf8Error),
    #[error("directory entry name exceeds 255 bytes")]
    NameTooLong,
    #[error("directory entry name is empty")]
    EmptyName,
    #[error("meta payload: {0}")]
    Meta(#[from] bincode::Error),
}

/// Check a request header before its body is read off the stream. Returns
/// the validated operation tag.
pub fn validate_request_header(header: &RequestHeader) -> Result<OpCode, ProtoError> {
    if header.total_length as usize > MAX_FRAME_BODY {
        return Err(ProtoError::FrameTooLarge(header.total_length as usize));
    }
    OpCode::try_from(header.op)
}

/// Check a response header before its body is read off the stream.
pub fn validate_response_header(header: &ResponseHeader) -> Result<(), ProtoError> {
    if header.total_length as usize > MAX_FRAME_BODY {
        return Err(ProtoError::FrameTooLarge(header.total_length as usize));
    }
    Ok(())
}

/// Check one embedded length field against the bytes still unread in the
/// frame body.
pub fn validate_section_length(length: usize, remaining: usize) -> Result<(), ProtoError> {
    if length > remaining {
        return Err(ProtoError::SectionOutOfBounds {
            length,
            body: remaining,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_bounds() {
        let good = RequestHeader {
            id: 0,
            op: 3,
            flags: 0,
            total_length: 64,
        };
        assert_eq!(validate_request_header(&good).unwrap(), OpCode::GetFileAttr);

        let oversized = RequestHeader {
            total_length: MAX_FRAME_BODY as u32 + 1,
            ..good
        };
        assert!(matches!(
            validate_request_header(&oversized),
            Err(ProtoError::FrameTooLarge(_))
        ));

        let unknown = RequestHeader { op: 99, ..good };
        assert!(matches!(
            validate_request_header(&unknown),
            Err(ProtoError::UnknownOp(99))
        ));
    }

    #[test]
    fn response_header_bounds() {
        let header = ResponseHeader {
            id: 1,
            status: 0,
            flags: 0,
            total_length: MAX_FRAME_BODY as u32,
        };
        assert!(validate_response_header(&header).is_ok());

        let oversized = ResponseHeader {
            total_length: MAX_FRAME_BODY as u32 + 1,
            ..header
        };
        assert!(validate_response_header(&oversized).is_err());
    }

    #[test]
    fn section_length_bounds() {
        assert!(validate_section_length(10, 10).is_ok());
        assert!(validate_section_length(11, 10).is_err());
    }
}
