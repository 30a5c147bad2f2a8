//
// Copyright (c) 2025 rustmailer.com (https://rustmailer.com)
//
// This file is part of the Groundwork Mail Sync Project
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fmt::Formatter;

use code::ErrorCode;
use poem::http::StatusCode;
use poem_openapi::{payload::Json, ApiResponse, Object};
use snafu::{Location, Snafu};

pub mod code;
pub mod handler;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GroundworkError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
    /// Upstream throttling; `retry_after` is the provider hint in seconds, if any.
    #[snafu(display("{message} (retry after {retry_after:?}s)"))]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
        #[snafu(implicit)]
        location: Location,
    },
    IoError {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type GroundworkResult<T, E = GroundworkError> = std::result::Result<T, E>;

impl GroundworkError {
    pub fn rate_limited(message: String, retry_after: Option<u64>) -> Self {
        GroundworkError::RateLimited {
            message,
            retry_after,
            location: snafu::location!(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GroundworkError::Generic { code, .. } => *code,
            GroundworkError::RateLimited { .. } => ErrorCode::RateLimited,
            GroundworkError::IoError { .. } => ErrorCode::IoError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GroundworkError::Generic { message, .. } => message.clone(),
            GroundworkError::RateLimited { message, .. } => message.clone(),
            GroundworkError::IoError { source, .. } => source.to_string(),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GroundworkError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<std::io::Error> for GroundworkError {
    fn from(source: std::io::Error) -> Self {
        Self::IoError {
            source,
            location: Location::default(),
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct ApiError {
    pub message: String,
    pub code: u32,
}

impl From<GroundworkError> for ApiErrorResponse {
    fn from(error: GroundworkError) -> Self {
        let code = error.code();
        match &error {
            GroundworkError::Generic { location, .. }
            | GroundworkError::RateLimited { location, .. } => {
                tracing::error!(
                    "API error occurred: [{:#?}] {} at {:?}",
                    code,
                    error,
                    location
                );
            }
            GroundworkError::IoError { source, location } => {
                tracing::error!("I/O error occurred: {} at {:?}", source, location);
            }
        }
        let api_error = ApiError {
            message: error.message(),
            code: code as u32,
        };
        ApiErrorResponse::Generic(code.status(), Json(api_error))
    }
}

impl ApiError {
    pub fn new(message: String, code: u32) -> Self {
        Self { message, code }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error({}): {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone, ApiResponse)]
pub enum ApiErrorResponse {
    Generic(StatusCode, Json<ApiError>),
}
