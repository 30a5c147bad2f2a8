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

use poem::http::StatusCode;
use poem_openapi::Enum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Enum, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    // Client-side errors (10000–10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10020,
    RequestTimeout = 10080,
    MethodNotAllowed = 10090,

    // Authentication and authorization errors (20000–20999)
    PermissionDenied = 20000,
    Forbidden = 20020,
    AuthExpired = 20030,
    DecryptionFailure = 20040,
    MissingRefreshToken = 20060,

    // Resource errors (30000–30999)
    ResourceNotFound = 30000,
    AlreadyExists = 30010,

    // Upstream provider errors (40000–40999)
    RateLimited = 40000,
    Transient = 40010,
    ValidationFailure = 40020,
    HttpResponseError = 40030,
    SyncTimeout = 40040,

    // Document pipeline errors (50000–50999)
    UnsupportedType = 50000,
    StorageFailure = 50010,
    ExtractionFailed = 50020,

    // Internal system errors (70000–70999)
    InternalError = 70000,
    UnhandledPoemError = 70010,
    IoError = 70020,
}

/// What the sync pipeline does when an operation fails with a given code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Disposition {
    /// Retry with bounded backoff; escalates to `AbortAccount` once attempts run out.
    Retry,
    /// Skip the item and continue with the rest of the cycle.
    Skip,
    /// Stop the current account's cycle and record the error.
    AbortAccount,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidParameter
            | ErrorCode::MissingConfiguration
            | ErrorCode::ValidationFailure
            | ErrorCode::UnsupportedType => StatusCode::BAD_REQUEST,
            ErrorCode::PermissionDenied
            | ErrorCode::AuthExpired
            | ErrorCode::DecryptionFailure
            | ErrorCode::MissingRefreshToken => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists => StatusCode::CONFLICT,
            ErrorCode::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Transient | ErrorCode::HttpResponseError => StatusCode::BAD_GATEWAY,
            ErrorCode::SyncTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError
            | ErrorCode::StorageFailure
            | ErrorCode::ExtractionFailed
            | ErrorCode::UnhandledPoemError
            | ErrorCode::IoError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ErrorCode::RateLimited | ErrorCode::Transient => Disposition::Retry,
            ErrorCode::UnsupportedType
            | ErrorCode::ValidationFailure
            | ErrorCode::ResourceNotFound
            | ErrorCode::StorageFailure
            | ErrorCode::ExtractionFailed => Disposition::Skip,
            _ => Disposition::AbortAccount,
        }
    }

    /// Credential problems the user has to fix by reconnecting the mailbox.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            ErrorCode::AuthExpired | ErrorCode::DecryptionFailure | ErrorCode::MissingRefreshToken
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table() {
        assert_eq!(ErrorCode::RateLimited.disposition(), Disposition::Retry);
        assert_eq!(ErrorCode::Transient.disposition(), Disposition::Retry);
        assert_eq!(ErrorCode::UnsupportedType.disposition(), Disposition::Skip);
        assert_eq!(ErrorCode::ValidationFailure.disposition(), Disposition::Skip);
        assert_eq!(ErrorCode::StorageFailure.disposition(), Disposition::Skip);
        assert_eq!(ErrorCode::AuthExpired.disposition(), Disposition::AbortAccount);
        assert_eq!(
            ErrorCode::DecryptionFailure.disposition(),
            Disposition::AbortAccount
        );
        assert!(ErrorCode::DecryptionFailure.requires_reauth());
        assert!(!ErrorCode::Transient.requires_reauth());
    }
}
