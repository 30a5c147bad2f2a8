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
use crate::modules::common::auth::ClientContext;
use crate::modules::oauth2::flow::{AuthorizeUrlRequest, AuthorizeUrlResponse, OAuth2Flow};
use crate::modules::provider::oauth::OAuthApp;
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::ApiResult;
use crate::modules::sync::engine::SYNC_ENGINE;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct OAuth2Api;

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::OAuth2")]
impl OAuth2Api {
    /// Starts connecting a Gmail or Outlook mailbox for the caller.
    ///
    /// Returns the provider consent URL. The provider redirects back to
    /// `/oauth2/callback`, which stores the mailbox.
    #[oai(path = "/oauth2/authorize-url", method = "post", operation_id = "oauth2_authorize_url")]
    async fn authorize_url(
        &self,
        payload: Json<AuthorizeUrlRequest>,
        context: ClientContext,
    ) -> ApiResult<Json<AuthorizeUrlResponse>> {
        let app = OAuthApp::from_settings(payload.0.provider)?;
        let response =
            OAuth2Flow::authorize_url(SYNC_ENGINE.db(), &app, context.user_id, context.company_id)
                .await?;
        Ok(Json(response))
    }
}
