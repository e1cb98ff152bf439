// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Abstract error taxonomy for service boundaries (spec §6-7).
//!
//! A small closed enum with an HTTP status and a machine-readable code, so
//! every transport (HTTP, WS, gRPC) maps the same taxonomy instead of
//! inventing its own per surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Boundary error codes (spec §6). Maps 1:1 onto gRPC status codes in the
/// `router` crate and onto HTTP status codes in the `gateway` crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    /// Malformed input: empty `msg_id`, unknown conversation type.
    InvalidArgument,
    /// Recipient unknown, or no active session and nothing stored.
    NotFound,
    /// Rate limit or device-cap exceeded.
    ResourceExhausted,
    /// Transient backend failure; client should retry with the same `msg_id`.
    Unavailable,
    /// Non-retryable server bug.
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::NotFound => 404,
            Self::ResourceExhausted => 429,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ApiError {}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}
