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
use crate::modules::account::payload::AccountUpdateRequest;
use crate::modules::account::view::AccountResp;
use crate::modules::account::ConnectedAccount;
use crate::modules::common::auth::ClientContext;
use crate::modules::message::SyncedMessage;
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::response::DataPage;
use crate::modules::rest::ApiResult;
use crate::modules::sync::engine::{SyncResult, SyncTrigger, SYNC_ENGINE};
use crate::modules::sync::job::SyncJob;
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct AccountApi;

impl AccountApi {
    async fn owned_account(account_id: u64, context: &ClientContext) -> ApiResult<ConnectedAccount> {
        let account = ConnectedAccount::get(SYNC_ENGINE.db(), account_id).await?;
        context.require_owner(account.user_id)?;
        Ok(account)
    }
}

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::Account")]
impl AccountApi {
    /// Lists the mailboxes the caller has connected.
    #[oai(path = "/accounts", method = "get", operation_id = "list_accounts")]
    async fn list_accounts(&self, context: ClientContext) -> ApiResult<Json<Vec<AccountResp>>> {
        let accounts = ConnectedAccount::list_for_user(SYNC_ENGINE.db(), context.user_id).await?;
        Ok(Json(accounts.into_iter().map(AccountResp::from).collect()))
    }

    /// Get a connected mailbox by id.
    #[oai(path = "/account/:account_id", method = "get", operation_id = "get_account")]
    async fn get_account(
        &self,
        /// The connected account id
        account_id: Path<u64>,
        context: ClientContext,
    ) -> ApiResult<Json<AccountResp>> {
        let account = Self::owned_account(account_id.0, &context).await?;
        Ok(Json(account.into()))
    }

    /// Updates sync preferences or pauses/resumes scheduled syncing.
    #[oai(path = "/account/:account_id", method = "post", operation_id = "update_account")]
    async fn update_account(
        &self,
        account_id: Path<u64>,
        payload: Json<AccountUpdateRequest>,
        context: ClientContext,
    ) -> ApiResult<Json<AccountResp>> {
        let account = Self::owned_account(account_id.0, &context).await?;
        let updated = ConnectedAccount::update(SYNC_ENGINE.db(), account.id, payload.0).await?;
        Ok(Json(updated.into()))
    }

    /// Disconnects the mailbox. Synced messages and documents are kept.
    #[oai(path = "/account/:account_id", method = "delete", operation_id = "disconnect_account")]
    async fn disconnect_account(
        &self,
        account_id: Path<u64>,
        context: ClientContext,
    ) -> ApiResult<()> {
        let account = Self::owned_account(account_id.0, &context).await?;
        Ok(ConnectedAccount::disconnect(SYNC_ENGINE.db(), account.id, context.user_id).await?)
    }

    /// Runs a sync cycle for the mailbox right away and returns its result.
    ///
    /// A failed cycle is reported in the body; only an unknown or
    /// disconnected account is an error response.
    #[oai(path = "/account/:account_id/sync", method = "post", operation_id = "sync_account")]
    async fn sync_account(
        &self,
        account_id: Path<u64>,
        context: ClientContext,
    ) -> ApiResult<Json<SyncResult>> {
        let account = Self::owned_account(account_id.0, &context).await?;
        let result = SYNC_ENGINE
            .sync_account(account.id, SyncTrigger::Manual)
            .await?;
        Ok(Json(result))
    }

    /// Sync job history, newest first.
    #[oai(path = "/account/:account_id/jobs", method = "get", operation_id = "list_sync_jobs")]
    async fn list_sync_jobs(
        &self,
        account_id: Path<u64>,
        page: Query<Option<u64>>,
        page_size: Query<Option<u64>>,
        context: ClientContext,
    ) -> ApiResult<Json<DataPage<SyncJob>>> {
        let account = Self::owned_account(account_id.0, &context).await?;
        let jobs =
            SyncJob::paginate_for_account(SYNC_ENGINE.db(), account.id, page.0, page_size.0)
                .await?;
        Ok(Json(jobs.into()))
    }

    /// Messages synced from the mailbox, newest first.
    #[oai(
        path = "/account/:account_id/messages",
        method = "get",
        operation_id = "list_account_messages"
    )]
    async fn list_account_messages(
        &self,
        account_id: Path<u64>,
        page: Query<Option<u64>>,
        page_size: Query<Option<u64>>,
        context: ClientContext,
    ) -> ApiResult<Json<DataPage<SyncedMessage>>> {
        let account = Self::owned_account(account_id.0, &context).await?;
        let messages =
            SyncedMessage::paginate_for_account(SYNC_ENGINE.db(), account.id, page.0, page_size.0)
                .await?;
        Ok(Json(messages.into()))
    }
}
