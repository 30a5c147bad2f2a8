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

use poem::{http::StatusCode, Body, IntoResponse, Response};
use tracing::warn;

use super::code::ErrorCode;

/// Turns poem routing/extractor errors into the same `{code, message}` body the API uses.
pub async fn error_handler(err: poem::Error) -> Response {
    if err.is::<poem::error::NotFoundError>() {
        return json_error(
            StatusCode::NOT_FOUND,
            ErrorCode::ResourceNotFound,
            "Resource not found",
        );
    }
    if err.is::<poem::error::MethodNotAllowedError>() {
        return json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::MethodNotAllowed,
            "Method not allowed",
        );
    }
    if err.has_source() {
        return err.into_response();
    }
    let status = err.status();
    warn!(status = %status, "Unhandled poem error: {}", err);
    json_error(status, ErrorCode::UnhandledPoemError, &err.to_string())
}

fn json_error(status: StatusCode, code: ErrorCode, message: &str) -> Response {
    let body = serde_json::json!({
        "code": code as u32,
        "message": message,
    });
    Response::builder()
        .status(status)
        .content_type("application/json")
        .body(Body::from_string(body.to_string()))
}
