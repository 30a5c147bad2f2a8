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

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use tracing::warn;
use url::Url;

use crate::modules::account::ProviderKind;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{GroundworkError, GroundworkResult};
use crate::modules::provider::TokenSet;
use crate::modules::settings::cli::SETTINGS;
use crate::{raise_error, utc_now};

type ProviderClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Token endpoints must not follow redirects.
static OAUTH_HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Registered OAuth application for one provider.
#[derive(Clone, Debug)]
pub struct OAuthApp {
    pub kind: ProviderKind,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_url: String,
}

impl OAuthApp {
    pub fn from_settings(kind: ProviderKind) -> GroundworkResult<Self> {
        let (client_id, client_secret) = match kind {
            ProviderKind::Gmail => (
                &SETTINGS.groundwork_gmail_client_id,
                &SETTINGS.groundwork_gmail_client_secret,
            ),
            ProviderKind::Outlook => (
                &SETTINGS.groundwork_outlook_client_id,
                &SETTINGS.groundwork_outlook_client_secret,
            ),
        };
        let client_id = client_id.clone().ok_or_else(|| {
            raise_error!(
                format!("OAuth client id for provider '{}' is not configured", kind),
                ErrorCode::MissingConfiguration
            )
        })?;
        Ok(Self::new(kind, client_id, client_secret.clone()))
    }

    pub fn new(kind: ProviderKind, client_id: String, client_secret: Option<String>) -> Self {
        let (auth_url, token_url, scopes) = match kind {
            ProviderKind::Gmail => (
                "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                "https://oauth2.googleapis.com/token".to_string(),
                vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
            ),
            ProviderKind::Outlook => {
                let tenant = &SETTINGS.groundwork_outlook_tenant;
                (
                    format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize"),
                    format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"),
                    vec![
                        "offline_access".to_string(),
                        "https://graph.microsoft.com/Mail.Read".to_string(),
                        "https://graph.microsoft.com/User.Read".to_string(),
                    ],
                )
            }
        };
        Self {
            kind,
            client_id,
            client_secret,
            auth_url,
            token_url,
            scopes,
            redirect_url: SETTINGS.oauth_redirect_url(),
        }
    }

    fn client(&self) -> GroundworkResult<ProviderClient> {
        let invalid =
            |e: url::ParseError| raise_error!(format!("{:#?}", e), ErrorCode::MissingConfiguration);
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_auth_uri(AuthUrl::new(self.auth_url.clone()).map_err(invalid)?)
            .set_token_uri(TokenUrl::new(self.token_url.clone()).map_err(invalid)?)
            .set_redirect_uri(RedirectUrl::new(self.redirect_url.clone()).map_err(invalid)?);
        Ok(match &self.client_secret {
            Some(secret) => client.set_client_secret(ClientSecret::new(secret.clone())),
            None => client,
        })
    }

    /// Authorization URL bound to `state` and the PKCE challenge derived from
    /// `pkce_verifier`.
    pub fn authorize_url(&self, state: &str, pkce_verifier: &str) -> GroundworkResult<Url> {
        let challenge = PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
            pkce_verifier.to_string(),
        ));
        let client = self.client()?;
        let state = state.to_string();
        let mut request = client
            .authorize_url(move || CsrfToken::new(state))
            .set_pkce_challenge(challenge);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        if self.kind == ProviderKind::Gmail {
            // Google only issues a refresh token for offline access with consent.
            request = request
                .add_extra_param("access_type", "offline")
                .add_extra_param("prompt", "consent");
        }
        let (url, _) = request.url();
        Ok(url)
    }

    pub async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> GroundworkResult<TokenSet> {
        let response = self
            .client()?
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&*OAUTH_HTTP_CLIENT)
            .await
            .map_err(|e| token_error(e, "code exchange"))?;
        Ok(token_set(&response))
    }

    pub async fn refresh(&self, refresh_token: &str) -> GroundworkResult<TokenSet> {
        let response = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&*OAUTH_HTTP_CLIENT)
            .await
            .map_err(|e| token_error(e, "token refresh"))?;
        Ok(token_set(&response))
    }
}

fn token_set(response: &BasicTokenResponse) -> TokenSet {
    let ttl = response
        .expires_in()
        .unwrap_or(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS));
    TokenSet {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_at: utc_now!() + ttl.as_millis() as i64,
    }
}

/// `invalid_grant` means the user revoked access or the refresh token
/// expired; only reconnecting fixes that.
fn token_error<RE: std::error::Error + 'static>(
    error: RequestTokenError<RE, BasicErrorResponse>,
    context: &str,
) -> GroundworkError {
    match error {
        RequestTokenError::ServerResponse(response) => {
            let message = format!(
                "OAuth {} rejected: {}{}",
                context,
                response.error(),
                response
                    .error_description()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            );
            warn!("{}", message);
            match response.error() {
                BasicErrorResponseType::InvalidGrant
                | BasicErrorResponseType::InvalidClient
                | BasicErrorResponseType::UnauthorizedClient => {
                    raise_error!(message, ErrorCode::AuthExpired)
                }
                _ => raise_error!(message, ErrorCode::HttpResponseError),
            }
        }
        RequestTokenError::Request(e) => raise_error!(
            format!("OAuth {} request failed: {}", context, e),
            ErrorCode::Transient
        ),
        RequestTokenError::Parse(e, _) => raise_error!(
            format!("OAuth {} response undecodable: {}", context, e),
            ErrorCode::ValidationFailure
        ),
        RequestTokenError::Other(e) => raise_error!(
            format!("OAuth {} failed: {}", context, e),
            ErrorCode::Transient
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::StandardErrorResponse;

    #[test]
    fn gmail_authorize_url_requests_offline_access() {
        let app = OAuthApp::new(ProviderKind::Gmail, "client-1".into(), Some("s".into()));
        let url = app.authorize_url("state-xyz", &"v".repeat(64)).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("client_id").map(String::as_str), Some("client-1"));
        assert_eq!(query.get("state").map(String::as_str), Some("state-xyz"));
        assert_eq!(query.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
        assert!(query.contains_key("code_challenge"));
        assert_eq!(
            query.get("redirect_uri").map(String::as_str),
            Some("http://localhost:15730/oauth2/callback")
        );
    }

    #[test]
    fn outlook_uses_tenant_endpoints() {
        let app = OAuthApp::new(ProviderKind::Outlook, "client-2".into(), None);
        assert!(app.token_url.contains("/common/oauth2/v2.0/token"));
        let url = app.authorize_url("s", &"v".repeat(64)).unwrap();
        assert!(url.as_str().contains("offline_access"));
        assert!(!url.as_str().contains("access_type"));
    }

    #[test]
    fn invalid_grant_requires_reauth() {
        let response = StandardErrorResponse::new(BasicErrorResponseType::InvalidGrant, None, None);
        let error = token_error::<std::io::Error>(RequestTokenError::ServerResponse(response), "refresh");
        assert_eq!(error.code(), ErrorCode::AuthExpired);

        let error = token_error::<std::io::Error>(
            RequestTokenError::Request(std::io::Error::other("reset")),
            "refresh",
        );
        assert_eq!(error.code(), ErrorCode::Transient);
    }
}
