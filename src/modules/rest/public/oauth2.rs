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
use poem::{handler, web::Query, IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info};

use crate::modules::oauth2::flow::OAuth2Flow;
use crate::modules::sync::engine::SYNC_ENGINE;

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn page(status: http::StatusCode, title: &str, detail: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h2>{title}</h2><p>{detail}</p></body></html>",
        title = html_escape(title),
        detail = html_escape(detail)
    );
    Response::builder()
        .status(status)
        .content_type("text/html; charset=utf-8")
        .body(body)
        .into_response()
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Provider redirect target of the connect flow.
#[handler]
pub async fn oauth2_callback(params: Query<CallbackParams>) -> Response {
    let params = params.0;
    if let Some(err) = params.error {
        let detail = params.error_description.unwrap_or(err);
        return page(
            http::StatusCode::BAD_REQUEST,
            "Mailbox connection was declined",
            &detail,
        );
    }
    let (Some(code), Some(state)) = (params.code, params.state) else {
        return page(
            http::StatusCode::BAD_REQUEST,
            "Mailbox connection failed",
            "The provider response is missing 'code' or 'state'.",
        );
    };

    match OAuth2Flow::callback(
        SYNC_ENGINE.db(),
        SYNC_ENGINE.vault(),
        SYNC_ENGINE.providers(),
        &state,
        &code,
    )
    .await
    {
        Ok(account) => {
            info!(account_id = account.id, "OAuth connect flow completed");
            page(
                http::StatusCode::OK,
                "Mailbox connected",
                &format!("{} is now connected. You can close this window.", account.email),
            )
        }
        Err(e) => {
            error!("OAuth callback failed: {:?}", e);
            page(e.code().status(), "Mailbox connection failed", &e.message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape("<b>\"a\" & b</b>"),
            "&lt;b&gt;&quot;a&quot; &amp; b&lt;/b&gt;"
        );
    }
}
