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

use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::{GroundworkError, GroundworkResult};
use crate::{groundwork_version, raise_error};

pub static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent(format!("groundwork/{}", groundwork_version!()))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Seconds to wait from a `Retry-After` header, either delta-seconds or an
/// HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.timestamp() - chrono::Utc::now().timestamp();
    Some(delta.max(0) as u64)
}

/// Maps a non-success upstream response to the error taxonomy.
pub fn status_error(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
    context: &str,
) -> GroundworkError {
    let message = format!("{} failed with HTTP {}: {}", context, status, truncate(body, 300));
    match status {
        StatusCode::UNAUTHORIZED => raise_error!(message, ErrorCode::AuthExpired),
        StatusCode::NOT_FOUND => raise_error!(message, ErrorCode::ResourceNotFound),
        StatusCode::TOO_MANY_REQUESTS => GroundworkError::rate_limited(message, retry_after),
        StatusCode::FORBIDDEN
            if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") =>
        {
            GroundworkError::rate_limited(message, retry_after)
        }
        StatusCode::FORBIDDEN => raise_error!(message, ErrorCode::Forbidden),
        StatusCode::REQUEST_TIMEOUT => raise_error!(message, ErrorCode::Transient),
        s if s.is_server_error() => raise_error!(message, ErrorCode::Transient),
        _ => raise_error!(message, ErrorCode::HttpResponseError),
    }
}

pub fn transport_error(error: reqwest::Error, context: &str) -> GroundworkError {
    if error.is_decode() {
        raise_error!(
            format!("{}: undecodable response: {}", context, error),
            ErrorCode::ValidationFailure
        )
    } else {
        raise_error!(format!("{}: {}", context, error), ErrorCode::Transient)
    }
}

/// Sends the request and turns every non-2xx response into an error.
pub async fn send(request: RequestBuilder, context: &str) -> GroundworkResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(e, context))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    debug!(context, %status, "Upstream error body: {}", truncate(&body, 1000));
    Err(status_error(status, retry_after, &body, context))
}

pub async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    context: &str,
) -> GroundworkResult<T> {
    let bytes = send_bytes(request, context).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        raise_error!(
            format!("{}: undecodable response: {}", context, e),
            ErrorCode::ValidationFailure
        )
    })
}

pub async fn send_bytes(request: RequestBuilder, context: &str) -> GroundworkResult<Bytes> {
    send(request, context)
        .await?
        .bytes()
        .await
        .map_err(|e| transport_error(e, context))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn maps_statuses_to_taxonomy() {
        let code = |status, body| status_error(status, None, body, "list").code();
        assert_eq!(code(StatusCode::UNAUTHORIZED, ""), ErrorCode::AuthExpired);
        assert_eq!(code(StatusCode::NOT_FOUND, ""), ErrorCode::ResourceNotFound);
        assert_eq!(code(StatusCode::TOO_MANY_REQUESTS, ""), ErrorCode::RateLimited);
        assert_eq!(
            code(
                StatusCode::FORBIDDEN,
                r#"{"error":{"errors":[{"reason":"rateLimitExceeded"}]}}"#
            ),
            ErrorCode::RateLimited
        );
        assert_eq!(code(StatusCode::FORBIDDEN, "insufficientPermissions"), ErrorCode::Forbidden);
        assert_eq!(code(StatusCode::BAD_GATEWAY, ""), ErrorCode::Transient);
        assert_eq!(code(StatusCode::BAD_REQUEST, ""), ErrorCode::HttpResponseError);
    }

    #[test]
    fn carries_retry_after_hint() {
        let error = status_error(StatusCode::TOO_MANY_REQUESTS, Some(12), "", "download");
        assert_eq!(error.retry_after(), Some(12));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(30));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(0));
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }
}
