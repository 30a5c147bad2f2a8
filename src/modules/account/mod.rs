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

use native_db::*;
use native_model::{native_model, Model};
use poem_openapi::Enum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::modules::account::payload::AccountUpdateRequest;
use crate::modules::database::{
    filter_by_secondary_key_impl, insert_impl, list_all_impl, secondary_find_impl, update_impl,
};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::utils::normalize_address;
use crate::{id, raise_error, utc_now};

pub mod payload;
pub mod view;

pub const DEFAULT_SYNC_FREQUENCY_MIN: u32 = 15;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Enum)]
#[oai(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Workspace / Gmail REST API
    #[default]
    Gmail,
    /// Microsoft 365 via Microsoft Graph
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Outlook => "outlook",
        }
    }

    /// Folder synced when the account has none configured.
    pub fn default_folder(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "INBOX",
            ProviderKind::Outlook => "inbox",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Enum)]
#[oai(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    Paused,
}

/// A mailbox a user connected through OAuth.
///
/// At most one live record exists per (user, provider, mailbox address); the
/// unique `identity_key` enforces it, and a soft-deleted record moves out of
/// the way by embedding its own id in the key.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 1, version = 1)]
#[native_db(
    primary_key(pk -> String),
    secondary_key(identity_key -> String, unique)
)]
pub struct ConnectedAccount {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub provider: ProviderKind,
    pub email: String,
    /// Vault-encrypted
    pub access_token: String,
    /// Vault-encrypted
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub is_active: bool,
    pub auto_sync: bool,
    pub sync_frequency_min: u32,
    pub sync_folders: Vec<String>,
    pub last_sync_message_id: Option<String>,
    pub last_sync_cursor_at: Option<i64>,
    pub last_sync_at: Option<i64>,
    pub last_sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    pub needs_reauth: bool,
    pub messages_synced: u64,
    pub attachments_processed: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<u64>,
}

/// Freshly exchanged, already encrypted OAuth credentials.
#[derive(Clone, Debug)]
pub struct ConnectionGrant {
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub provider: ProviderKind,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
}

/// Outcome counters written when a cycle finishes.
#[derive(Clone, Debug, Default)]
pub struct CycleOutcome {
    pub messages_synced: u64,
    pub attachments_processed: u64,
    /// New cursor; `None` leaves the stored cursor untouched.
    pub cursor: Option<(Option<String>, i64)>,
    pub error: Option<String>,
    pub needs_reauth: bool,
}

impl ConnectedAccount {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn identity_key(&self) -> String {
        let base = Self::identity_of(self.user_id, self.provider, &self.email);
        match self.deleted_at {
            Some(_) => format!("{}:deleted:{}", base, self.id),
            None => base,
        }
    }

    fn identity_of(user_id: u64, provider: ProviderKind, email: &str) -> String {
        format!("{}:{}:{}", user_id, provider, normalize_address(email))
    }

    pub fn new(grant: ConnectionGrant) -> Self {
        let now = utc_now!();
        Self {
            id: id!(64),
            user_id: grant.user_id,
            company_id: grant.company_id,
            provider: grant.provider,
            email: normalize_address(&grant.email),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_expires_at: grant.token_expires_at,
            is_active: true,
            auto_sync: true,
            sync_frequency_min: DEFAULT_SYNC_FREQUENCY_MIN,
            sync_folders: vec![grant.provider.default_folder().to_string()],
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Eligible for the scheduled pass at all, ignoring timing.
    pub fn is_schedulable(&self) -> bool {
        self.is_active
            && self.auto_sync
            && !self.is_deleted()
            && !self.needs_reauth
            && self.last_sync_status != SyncStatus::Paused
    }

    /// Whether `sync_frequency_min` has elapsed since the last cycle.
    pub fn is_due(&self, now: i64) -> bool {
        match self.last_sync_at {
            None => true,
            Some(last) => now - last >= self.sync_frequency_min as i64 * 60_000,
        }
    }

    pub fn folders(&self) -> Vec<String> {
        if self.sync_folders.is_empty() {
            vec![self.provider.default_folder().to_string()]
        } else {
            self.sync_folders.clone()
        }
    }

    pub async fn find(db: &Arc<Database<'static>>, id: u64) -> GroundworkResult<Option<Self>> {
        secondary_find_impl::<ConnectedAccount>(db, ConnectedAccountKey::id, id).await
    }

    /// Live (not soft-deleted) account by id.
    pub async fn get(db: &Arc<Database<'static>>, id: u64) -> GroundworkResult<Self> {
        Self::find(db, id)
            .await?
            .filter(|a| !a.is_deleted())
            .ok_or_else(|| {
                raise_error!(
                    format!("Connected account id='{id}' not found"),
                    ErrorCode::ResourceNotFound
                )
            })
    }

    pub async fn find_by_identity(
        db: &Arc<Database<'static>>,
        user_id: u64,
        provider: ProviderKind,
        email: &str,
    ) -> GroundworkResult<Option<Self>> {
        secondary_find_impl::<ConnectedAccount>(
            db,
            ConnectedAccountKey::identity_key,
            Self::identity_of(user_id, provider, email),
        )
        .await
    }

    pub async fn list_all(db: &Arc<Database<'static>>) -> GroundworkResult<Vec<Self>> {
        list_all_impl(db).await
    }

    pub async fn list_for_user(
        db: &Arc<Database<'static>>,
        user_id: u64,
    ) -> GroundworkResult<Vec<Self>> {
        let accounts: Vec<ConnectedAccount> =
            filter_by_secondary_key_impl(db, ConnectedAccountKey::user_id, user_id).await?;
        Ok(accounts.into_iter().filter(|a| !a.is_deleted()).collect())
    }

    /// Live, active account whose mailbox address matches `address`.
    pub async fn find_by_address(
        db: &Arc<Database<'static>>,
        address: &str,
    ) -> GroundworkResult<Option<Self>> {
        let address = normalize_address(address);
        Ok(Self::list_all(db)
            .await?
            .into_iter()
            .find(|a| !a.is_deleted() && a.is_active && a.email == address))
    }

    /// Creates the account or, when the same mailbox is already connected for
    /// the user, replaces its tokens and clears any re-auth flag.
    pub async fn connect(
        db: &Arc<Database<'static>>,
        grant: ConnectionGrant,
    ) -> GroundworkResult<Self> {
        if let Some(existing) =
            Self::find_by_identity(db, grant.user_id, grant.provider, &grant.email).await?
        {
            info!(
                account_id = existing.id,
                provider = %grant.provider,
                "Reconnecting existing mailbox"
            );
            return Self::modify(db, existing.id, move |account| {
                account.access_token = grant.access_token;
                if grant.refresh_token.is_some() {
                    account.refresh_token = grant.refresh_token;
                }
                account.token_expires_at = grant.token_expires_at;
                account.company_id = grant.company_id.or(account.company_id);
                account.is_active = true;
                account.needs_reauth = false;
                account.last_sync_error = None;
                if account.last_sync_status == SyncStatus::Error {
                    account.last_sync_status = SyncStatus::Idle;
                }
            })
            .await;
        }
        let account = Self::new(grant);
        insert_impl(db, account.clone()).await?;
        info!(
            account_id = account.id,
            provider = %account.provider,
            email = %account.email,
            "Connected new mailbox"
        );
        Ok(account)
    }

    async fn modify(
        db: &Arc<Database<'static>>,
        id: u64,
        apply: impl FnOnce(&mut ConnectedAccount) + Send + 'static,
    ) -> GroundworkResult<Self> {
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .secondary::<ConnectedAccount>(ConnectedAccountKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Connected account id='{id}' not found"),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                apply(&mut updated);
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await
    }

    /// Soft delete. The record stays for history but leaves every active path.
    pub async fn disconnect(
        db: &Arc<Database<'static>>,
        id: u64,
        deleted_by: u64,
    ) -> GroundworkResult<()> {
        let account = Self::get(db, id).await?;
        Self::modify(db, account.id, move |account| {
            account.deleted_at = Some(utc_now!());
            account.deleted_by = Some(deleted_by);
            account.is_active = false;
            account.auto_sync = false;
        })
        .await?;
        info!(account_id = id, deleted_by, "Mailbox disconnected");
        Ok(())
    }

    pub async fn update(
        db: &Arc<Database<'static>>,
        id: u64,
        request: AccountUpdateRequest,
    ) -> GroundworkResult<Self> {
        request.validate()?;
        Self::get(db, id).await?;
        Self::modify(db, id, move |account| request.apply(account)).await
    }

    pub async fn store_tokens(
        db: &Arc<Database<'static>>,
        id: u64,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |account| {
            account.access_token = access_token;
            if refresh_token.is_some() {
                account.refresh_token = refresh_token;
            }
            account.token_expires_at = expires_at;
        })
        .await
    }

    pub async fn mark_syncing(db: &Arc<Database<'static>>, id: u64) -> GroundworkResult<Self> {
        Self::modify(db, id, |account| {
            account.last_sync_status = SyncStatus::Syncing;
        })
        .await
    }

    /// Writes the end-of-cycle state. Counters accumulate on both outcomes;
    /// the cursor only moves when the outcome carries one.
    pub async fn finish_cycle(
        db: &Arc<Database<'static>>,
        id: u64,
        outcome: CycleOutcome,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |account| {
            account.messages_synced += outcome.messages_synced;
            account.attachments_processed += outcome.attachments_processed;
            account.last_sync_at = Some(utc_now!());
            if let Some((message_id, cursor_at)) = outcome.cursor {
                if message_id.is_some() {
                    account.last_sync_message_id = message_id;
                }
                account.last_sync_cursor_at = Some(cursor_at);
            }
            match outcome.error {
                Some(error) => {
                    account.last_sync_status = SyncStatus::Error;
                    account.last_sync_error = Some(error);
                    if outcome.needs_reauth {
                        account.needs_reauth = true;
                    }
                }
                None => {
                    account.last_sync_status = SyncStatus::Idle;
                    account.last_sync_error = None;
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::in_memory_database;

    pub fn grant(user_id: u64, email: &str) -> ConnectionGrant {
        ConnectionGrant {
            user_id,
            company_id: Some(7),
            provider: ProviderKind::Gmail,
            email: email.into(),
            access_token: "enc-access".into(),
            refresh_token: Some("enc-refresh".into()),
            token_expires_at: Some(utc_now!() + 3_600_000),
        }
    }

    #[tokio::test]
    async fn reconnect_updates_existing_record() {
        let db = in_memory_database();
        let first = ConnectedAccount::connect(&db, grant(1, "PM@Example.com"))
            .await
            .unwrap();
        let mut second_grant = grant(1, "pm@example.com");
        second_grant.access_token = "enc-access-2".into();
        let second = ConnectedAccount::connect(&db, second_grant).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token, "enc-access-2");
        assert_eq!(ConnectedAccount::list_all(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_frees_identity_for_a_new_connection() {
        let db = in_memory_database();
        let first = ConnectedAccount::connect(&db, grant(1, "pm@example.com"))
            .await
            .unwrap();
        ConnectedAccount::disconnect(&db, first.id, 1).await.unwrap();

        assert!(ConnectedAccount::get(&db, first.id).await.is_err());
        assert!(ConnectedAccount::list_for_user(&db, 1)
            .await
            .unwrap()
            .is_empty());

        let second = ConnectedAccount::connect(&db, grant(1, "pm@example.com"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(ConnectedAccount::list_all(&db).await.unwrap().len(), 2);
        assert_eq!(ConnectedAccount::list_for_user(&db, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn schedulable_and_due() {
        let now = utc_now!();
        let mut account = ConnectedAccount::new(grant(1, "pm@example.com"));
        assert!(account.is_schedulable());
        assert!(account.is_due(now));

        account.last_sync_at = Some(now - 5 * 60_000);
        account.sync_frequency_min = 15;
        assert!(!account.is_due(now));
        account.last_sync_at = Some(now - 15 * 60_000);
        assert!(account.is_due(now));

        account.needs_reauth = true;
        assert!(!account.is_schedulable());
        account.needs_reauth = false;
        account.last_sync_status = SyncStatus::Paused;
        assert!(!account.is_schedulable());
    }

    #[tokio::test]
    async fn error_outcome_keeps_cursor() {
        let db = in_memory_database();
        let account = ConnectedAccount::connect(&db, grant(2, "site@example.com"))
            .await
            .unwrap();
        ConnectedAccount::finish_cycle(
            &db,
            account.id,
            CycleOutcome {
                messages_synced: 3,
                cursor: Some((Some("m3".into()), 1_000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let after = ConnectedAccount::finish_cycle(
            &db,
            account.id,
            CycleOutcome {
                messages_synced: 1,
                error: Some("boom".into()),
                needs_reauth: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(after.last_sync_cursor_at, Some(1_000));
        assert_eq!(after.last_sync_message_id.as_deref(), Some("m3"));
        assert_eq!(after.messages_synced, 4);
        assert_eq!(after.last_sync_status, SyncStatus::Error);
        assert!(after.needs_reauth);
    }
}
