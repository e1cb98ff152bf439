// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry-specific errors (spec §4.1).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("user {user} already has {max} registered devices")]
    DeviceCapExceeded { user: String, max: usize },
    #[error("handle for {user}/{device} is stale: lease renewed or released under it")]
    StaleHandle { user: String, device: String },
    #[error("lease for {user}/{device} already expired")]
    Expired { user: String, device: String },
    #[error("no such device {user}/{device}")]
    NotFound { user: String, device: String },
}

impl From<RegistryError> for imcore::ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DeviceCapExceeded { .. } => imcore::ApiError::ResourceExhausted,
            RegistryError::StaleHandle { .. } => imcore::ApiError::InvalidArgument,
            RegistryError::Expired { .. } => imcore::ApiError::NotFound,
            RegistryError::NotFound { .. } => imcore::ApiError::NotFound,
        }
    }
}
