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

use crate::modules::{error::code::ErrorCode, settings::cli::SETTINGS};
use poem::{
    web::headers::{authorization::Bearer, Authorization, HeaderMapExt},
    Endpoint, FromRequest, Middleware, Request, RequestBody, Result,
};
use subtle::ConstantTimeEq;

use super::create_api_error_response;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const COMPANY_ID_HEADER: &str = "X-Company-Id";

/// Equal length and equal bytes, compared without early exit.
pub fn secret_matches(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    provided.len() == expected.len() && provided.ct_eq(expected).unwrap_u8() == 1
}

/// Rejects requests without the configured bearer API key. A no-op when no
/// key is configured.
pub struct ApiGuard;

pub struct ApiGuardEndpoint<E> {
    ep: E,
}

impl<E: Endpoint> Middleware<E> for ApiGuard {
    type Output = ApiGuardEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        ApiGuardEndpoint { ep }
    }
}

impl<E: Endpoint> Endpoint for ApiGuardEndpoint<E> {
    type Output = E::Output;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        authorize_access(&req, SETTINGS.groundwork_api_key.as_deref())?;
        self.ep.call(req).await
    }
}

pub fn authorize_access(req: &Request, api_key: Option<&str>) -> Result<()> {
    let Some(expected) = api_key else {
        return Ok(());
    };
    let token = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.0.token().to_string())
        .ok_or_else(|| {
            create_api_error_response("Valid access token not found", ErrorCode::PermissionDenied)
        })?;
    if !secret_matches(&token, expected) {
        return Err(create_api_error_response(
            "Invalid access token",
            ErrorCode::PermissionDenied,
        ));
    }
    Ok(())
}

/// Caller identity forwarded by the upstream gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientContext {
    pub user_id: u64,
    pub company_id: Option<u64>,
}

impl<'a> FromRequest<'a> for ClientContext {
    async fn from_request(req: &'a Request, _body: &mut RequestBody) -> Result<Self> {
        extract_client_context(req)
    }
}

fn header_id(req: &Request, name: &str) -> Result<Option<u64>> {
    match req.headers().get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or_else(|| {
                create_api_error_response(
                    &format!("Header '{}' must be a numeric id", name),
                    ErrorCode::InvalidParameter,
                )
            }),
    }
}

pub fn extract_client_context(req: &Request) -> Result<ClientContext> {
    let user_id = header_id(req, USER_ID_HEADER)?.ok_or_else(|| {
        create_api_error_response(
            &format!("Missing '{}' header", USER_ID_HEADER),
            ErrorCode::PermissionDenied,
        )
    })?;
    Ok(ClientContext {
        user_id,
        company_id: header_id(req, COMPANY_ID_HEADER)?,
    })
}

impl ClientContext {
    /// Accounts are private to the user who connected them.
    pub fn require_owner(&self, owner_id: u64) -> crate::modules::error::GroundworkResult<()> {
        if self.user_id == owner_id {
            Ok(())
        } else {
            Err(crate::raise_error!(
                "Access denied: the account belongs to another user.".into(),
                ErrorCode::Forbidden
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poem::http::StatusCode;

    #[test]
    fn secrets_compare_exactly() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3cret", "s3cre"));
        assert!(!secret_matches("S3cret", "s3cret"));
        assert!(!secret_matches("", "s3cret"));
    }

    #[test]
    fn bearer_key_is_required_when_configured() {
        let ok = Request::builder()
            .header("Authorization", "Bearer key-1")
            .finish();
        assert!(authorize_access(&ok, Some("key-1")).is_ok());
        assert!(authorize_access(&ok, None).is_ok());

        let wrong = Request::builder()
            .header("Authorization", "Bearer key-2")
            .finish();
        let err = authorize_access(&wrong, Some("key-1")).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let missing = Request::builder().finish();
        assert!(authorize_access(&missing, Some("key-1")).is_err());
    }

    #[test]
    fn client_context_comes_from_headers() {
        let req = Request::builder()
            .header(USER_ID_HEADER, "42")
            .header(COMPANY_ID_HEADER, "7")
            .finish();
        let context = extract_client_context(&req).unwrap();
        assert_eq!(
            context,
            ClientContext {
                user_id: 42,
                company_id: Some(7)
            }
        );
        assert!(context.require_owner(42).is_ok());
        assert!(context.require_owner(43).is_err());

        let bad = Request::builder().header(USER_ID_HEADER, "abc").finish();
        assert!(extract_client_context(&bad).is_err());
        assert!(extract_client_context(&Request::builder().finish()).is_err());
    }
}
