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

use std::sync::Arc;

use native_db::Database;
use oauth2::PkceCodeChallenge;
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::modules::account::{ConnectedAccount, ConnectionGrant, ProviderKind};
use crate::modules::error::GroundworkResult;
use crate::modules::oauth2::pending::OAuth2Pending;
use crate::modules::provider::oauth::OAuthApp;
use crate::modules::provider::{ProviderAdapter, Providers, TokenSet};
use crate::modules::utils::encrypt::CredentialVault;
use crate::utc_now;

#[derive(Clone, Debug, Deserialize, Serialize, Object)]
pub struct AuthorizeUrlRequest {
    pub provider: ProviderKind,
}

#[derive(Clone, Debug, Deserialize, Serialize, Object)]
pub struct AuthorizeUrlResponse {
    pub authorize_url: String,
    pub state: String,
}

pub struct OAuth2Flow;

impl OAuth2Flow {
    /// Starts a connect flow and returns the provider consent URL.
    pub async fn authorize_url(
        db: &Arc<Database<'static>>,
        app: &OAuthApp,
        user_id: u64,
        company_id: Option<u64>,
    ) -> GroundworkResult<AuthorizeUrlResponse> {
        let (_, verifier) = PkceCodeChallenge::new_random_sha256();
        let state = hex::encode(rand::random::<[u8; 24]>());
        let url = app.authorize_url(&state, verifier.secret())?;
        OAuth2Pending {
            state: state.clone(),
            user_id,
            company_id,
            provider: app.kind,
            pkce_verifier: verifier.secret().clone(),
            created_at: utc_now!(),
        }
        .save(db)
        .await?;
        // Opportunistic cleanup of abandoned flows.
        if let Err(e) = OAuth2Pending::purge_expired(db).await {
            tracing::warn!("Failed to purge expired OAuth flows: {}", e);
        }
        Ok(AuthorizeUrlResponse {
            authorize_url: url.to_string(),
            state,
        })
    }

    /// Handles the provider redirect: validates `state`, exchanges the code
    /// and stores the connected mailbox.
    pub async fn callback(
        db: &Arc<Database<'static>>,
        vault: &CredentialVault,
        providers: &Providers,
        state: &str,
        code: &str,
    ) -> GroundworkResult<ConnectedAccount> {
        let pending = OAuth2Pending::take(db, state).await?;
        let app = OAuthApp::from_settings(pending.provider)?;
        let tokens = app.exchange_code(code, &pending.pkce_verifier).await?;
        let adapter = providers.get(pending.provider);
        Self::complete(db, vault, adapter.as_ref(), &pending, tokens).await
    }

    /// Encrypts fresh tokens and connects (or reconnects) the mailbox they
    /// belong to.
    pub async fn complete(
        db: &Arc<Database<'static>>,
        vault: &CredentialVault,
        adapter: &dyn ProviderAdapter,
        pending: &OAuth2Pending,
        tokens: TokenSet,
    ) -> GroundworkResult<ConnectedAccount> {
        let email = adapter.fetch_mailbox_address(&tokens.access_token).await?;
        let grant = ConnectionGrant {
            user_id: pending.user_id,
            company_id: pending.company_id,
            provider: pending.provider,
            email,
            access_token: vault.encrypt(&tokens.access_token)?,
            refresh_token: tokens
                .refresh_token
                .as_deref()
                .map(|t| vault.encrypt(t))
                .transpose()?,
            token_expires_at: Some(tokens.expires_at),
        };
        let account = ConnectedAccount::connect(db, grant).await?;
        info!(
            account_id = account.id,
            user_id = account.user_id,
            provider = %account.provider,
            "OAuth connection completed"
        );
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::in_memory_database;
    use crate::modules::sync::engine::tests::{test_vault, FakeProvider};

    #[tokio::test]
    async fn authorize_url_records_a_pending_flow() {
        let db = in_memory_database();
        let app = OAuthApp::new(ProviderKind::Gmail, "client-1".into(), None);
        let response = OAuth2Flow::authorize_url(&db, &app, 5, Some(9)).await.unwrap();
        assert!(response.authorize_url.contains(&response.state));

        let pending = OAuth2Pending::take(&db, &response.state).await.unwrap();
        assert_eq!(pending.user_id, 5);
        assert_eq!(pending.company_id, Some(9));
        assert!(pending.pkce_verifier.len() >= 43);
    }

    #[tokio::test]
    async fn completion_stores_encrypted_tokens_for_the_mailbox() {
        let db = in_memory_database();
        let vault = test_vault();
        let provider = FakeProvider::with_pages(vec![]);
        let pending = OAuth2Pending {
            state: "s".into(),
            user_id: 5,
            company_id: None,
            provider: ProviderKind::Gmail,
            pkce_verifier: "v".repeat(64),
            created_at: utc_now!(),
        };
        let account = OAuth2Flow::complete(
            &db,
            &vault,
            provider.as_ref(),
            &pending,
            TokenSet {
                access_token: "plain-access".into(),
                refresh_token: Some("plain-refresh".into()),
                expires_at: utc_now!() + 3_600_000,
            },
        )
        .await
        .unwrap();
        assert_eq!(account.email, "pm@example.com");
        assert_ne!(account.access_token, "plain-access");
        assert_eq!(vault.decrypt(&account.access_token).unwrap(), "plain-access");
        assert_eq!(
            vault.decrypt(account.refresh_token.as_deref().unwrap()).unwrap(),
            "plain-refresh"
        );
    }
}
