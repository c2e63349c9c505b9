// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::plugin::AuthMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    InvalidArgument,
    Unauthenticated,
    Unimplemented,
    Internal,
    Unavailable,
}

/// Failure reported by the server for one call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

/// `/<service>/<method>`
pub fn method_path(service: &str, method: &str) -> String {
    format!("/{}/{}", service, method)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub path: String,
    pub metadata: AuthMetadata,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub outcome: Result<Vec<u8>, Status>,
}

impl RequestFrame {
    pub fn encode(&self) -> Result<Bytes, bincode::Error> {
        bincode::serialize(self).map(Bytes::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

impl ResponseFrame {
    pub fn encode(&self) -> Result<Bytes, bincode::Error> {
        bincode::serialize(self).map(Bytes::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_keeps_metadata_order() {
        let frame = RequestFrame {
            id: 9,
            path: method_path("test", "UnaryUnary"),
            metadata: AuthMetadata::new().with("b", "2").with("a", "1"),
            payload: b"0000".to_vec(),
        };
        let decoded = RequestFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.path, "/test/UnaryUnary");
        let keys: Vec<_> = decoded.metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_error_response_carries_status() {
        let frame = ResponseFrame {
            id: 1,
            outcome: Err(Status::unauthenticated("missing authorization")),
        };
        let decoded = ResponseFrame::decode(&frame.encode().unwrap()).unwrap();
        let status = decoded.outcome.unwrap_err();
        assert_eq!(status.code, StatusCode::Unauthenticated);
        assert_eq!(status.to_string(), "Unauthenticated: missing authorization");
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let bytes = ResponseFrame {
            id: 1,
            outcome: Ok(b"0000".to_vec()),
        }
        .encode()
        .unwrap();
        assert!(ResponseFrame::decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
