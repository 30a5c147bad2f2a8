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
use account::AccountApi;
use document::DocumentApi;
use message::MessageApi;
use oauth2::OAuth2Api;
use poem_openapi::{OpenApiService, Tags};

use crate::groundwork_version;
use crate::modules::settings::cli::SETTINGS;

pub mod account;
pub mod document;
pub mod message;
pub mod oauth2;

#[derive(Tags)]
pub enum ApiTags {
    /// Connected mailboxes and their sync history
    Account,
    /// Synced messages and attachments
    Message,
    /// Indexed project documents
    Document,
    /// Mailbox connect flow
    OAuth2,
}

type GroundworkOpenApi = (AccountApi, MessageApi, DocumentApi, OAuth2Api);

pub fn create_openapi_service() -> OpenApiService<GroundworkOpenApi, ()> {
    OpenApiService::new(
        (AccountApi, MessageApi, DocumentApi, OAuth2Api),
        "Groundwork Mail Sync API",
        groundwork_version!(),
    )
    .server(format!(
        "{}/api/v1",
        SETTINGS.groundwork_public_url.trim_end_matches('/')
    ))
}
