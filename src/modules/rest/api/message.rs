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
use crate::modules::account::ConnectedAccount;
use crate::modules::common::auth::ClientContext;
use crate::modules::message::attachment::MessageAttachment;
use crate::modules::message::{MessageLinkRequest, SyncedMessage};
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::ApiResult;
use crate::modules::sync::engine::SYNC_ENGINE;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct MessageApi;

/// Loads the message and checks the caller owns the mailbox it came from.
async fn owned_message(message_id: u64, context: &ClientContext) -> ApiResult<SyncedMessage> {
    let message = SyncedMessage::get(SYNC_ENGINE.db(), message_id).await?;
    let account = ConnectedAccount::get(SYNC_ENGINE.db(), message.account_id).await?;
    context.require_owner(account.user_id)?;
    Ok(message)
}

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::Message")]
impl MessageApi {
    /// Get a synced message, including its body.
    #[oai(path = "/message/:message_id", method = "get", operation_id = "get_message")]
    async fn get_message(
        &self,
        message_id: Path<u64>,
        context: ClientContext,
    ) -> ApiResult<Json<SyncedMessage>> {
        Ok(Json(owned_message(message_id.0, &context).await?))
    }

    /// Attachments of a message with their download and indexing state.
    #[oai(
        path = "/message/:message_id/attachments",
        method = "get",
        operation_id = "list_message_attachments"
    )]
    async fn list_message_attachments(
        &self,
        message_id: Path<u64>,
        context: ClientContext,
    ) -> ApiResult<Json<Vec<MessageAttachment>>> {
        let message = owned_message(message_id.0, &context).await?;
        let attachments = MessageAttachment::list_for_message(SYNC_ENGINE.db(), message.id).await?;
        Ok(Json(attachments))
    }

    /// Links a message to a project, task or RFI. Omitted fields are left as they are.
    #[oai(path = "/message/:message_id/link", method = "post", operation_id = "link_message")]
    async fn link_message(
        &self,
        message_id: Path<u64>,
        payload: Json<MessageLinkRequest>,
        context: ClientContext,
    ) -> ApiResult<Json<SyncedMessage>> {
        let message = owned_message(message_id.0, &context).await?;
        let linked = SyncedMessage::link(SYNC_ENGINE.db(), message.id, payload.0).await?;
        Ok(Json(linked))
    }
}
