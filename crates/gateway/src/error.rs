// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps the abstract `imcore::ApiError` taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::Json;

use imcore::{ApiError, ErrorResponse};

pub fn to_http_response(err: ApiError, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse { error: err.to_error_body(message) };
    (status, Json(body))
}
