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

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::modules::account::ProviderKind;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::provider::http::{send_json, HTTP_CLIENT};
use crate::modules::provider::oauth::OAuthApp;
use crate::modules::provider::{
    AttachmentMeta, ListQuery, MalformedMessage, MessagePage, ProviderAdapter, ProviderMessage,
    TokenSet,
};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::utils::{extract_address, html_to_text, split_address_list};
use crate::raise_error;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    snippet: Option<String>,
    /// Millis since epoch, as a string
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    mime_type: Option<String>,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    attachment_id: Option<String>,
    size: Option<u64>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn is_attachment(&self) -> bool {
        !self.filename.is_empty()
            && self
                .body
                .as_ref()
                .is_some_and(|b| b.attachment_id.is_some())
    }

    /// Depth-first walk over this part and all nested parts.
    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a MessagePart)) {
        visit(self);
        for part in &self.parts {
            part.walk(visit);
        }
    }
}

/// Gmail REST API adapter.
pub struct GmailAdapter {
    api_base: String,
    oauth: Option<OAuthApp>,
}

impl GmailAdapter {
    pub fn new(api_base: String, oauth: Option<OAuthApp>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            oauth,
        }
    }

    pub fn from_settings() -> Self {
        Self::new(
            SETTINGS.groundwork_gmail_api_base.clone(),
            OAuthApp::from_settings(ProviderKind::Gmail).ok(),
        )
    }

    async fn get_message(&self, access_token: &str, id: &str) -> GroundworkResult<GmailMessage> {
        let url = format!("{}/users/me/messages/{}", self.api_base, id);
        send_json(
            HTTP_CLIENT
                .get(url)
                .bearer_auth(access_token)
                .query(&[("format", "full")]),
            "gmail get message",
        )
        .await
    }
}

/// `after:` takes epoch seconds and matches at second granularity; results
/// are filtered again client-side.
fn search_query(since: Option<i64>) -> Option<String> {
    since.map(|millis| format!("after:{}", millis.div_euclid(1000)))
}

fn decode_base64url(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()
}

fn body_of(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    decode_base64url(data).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn attachments_of(message: &GmailMessage) -> Vec<AttachmentMeta> {
    let mut attachments = Vec::new();
    if let Some(payload) = &message.payload {
        payload.walk(&mut |part| {
            if !part.is_attachment() {
                return;
            }
            let Some(body) = &part.body else { return };
            let Some(attachment_id) = &body.attachment_id else { return };
            let is_inline = part
                .header("Content-Disposition")
                .is_some_and(|d| d.trim_start().to_ascii_lowercase().starts_with("inline"));
            attachments.push(AttachmentMeta {
                provider_attachment_id: attachment_id.clone(),
                filename: part.filename.clone(),
                size: body.size.unwrap_or_default(),
                mime_type: part.mime_type.clone(),
                is_inline,
            });
        });
    }
    attachments
}

fn to_provider_message(message: GmailMessage) -> Result<ProviderMessage, String> {
    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok())
        .ok_or_else(|| "missing or invalid internalDate".to_string())?;
    let payload = message
        .payload
        .as_ref()
        .ok_or_else(|| "message has no payload".to_string())?;

    let mut body_text = None;
    let mut body_html = None;
    let mut has_attachments = false;
    payload.walk(&mut |part| {
        if part.is_attachment() {
            has_attachments = true;
            return;
        }
        if !part.filename.is_empty() {
            return;
        }
        match part.mime_type.as_deref() {
            Some("text/plain") if body_text.is_none() => body_text = body_of(part),
            Some("text/html") if body_html.is_none() => body_html = body_of(part),
            _ => {}
        }
    });
    if body_text.is_none() {
        body_text = body_html.as_deref().map(html_to_text);
    }

    let from = payload.header("From");
    let from_name = from
        .and_then(|f| f.split_once('<'))
        .map(|(name, _)| name.trim().trim_matches('"').to_string())
        .filter(|n| !n.is_empty());
    let sent_at = payload
        .header("Date")
        .and_then(|d| chrono::DateTime::parse_from_rfc2822(d.trim()).ok())
        .map(|d| d.timestamp_millis());

    Ok(ProviderMessage {
        provider_message_id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        subject: payload.header("Subject").map(str::to_string),
        from_address: from.map(extract_address).filter(|a| !a.is_empty()),
        from_name,
        to: payload.header("To").map(split_address_list).unwrap_or_default(),
        cc: payload.header("Cc").map(split_address_list).unwrap_or_default(),
        snippet: message.snippet.clone(),
        body_text,
        body_html,
        received_at,
        sent_at,
        is_read: !message.label_ids.iter().any(|l| l == "UNREAD"),
        is_important: message.label_ids.iter().any(|l| l == "IMPORTANT"),
        has_attachments,
    })
}

#[async_trait]
impl ProviderAdapter for GmailAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    async fn refresh_token(&self, refresh_token: &str) -> GroundworkResult<TokenSet> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            raise_error!(
                "Gmail OAuth client is not configured".into(),
                ErrorCode::MissingConfiguration
            )
        })?;
        oauth.refresh(refresh_token).await
    }

    async fn list_messages(
        &self,
        access_token: &str,
        query: &ListQuery,
    ) -> GroundworkResult<MessagePage> {
        let mut params = vec![
            ("labelIds", query.folder.clone()),
            ("maxResults", query.page_size.to_string()),
        ];
        if let Some(q) = search_query(query.since) {
            params.push(("q", q));
        }
        if let Some(token) = &query.page_token {
            params.push(("pageToken", token.clone()));
        }
        let list: ListResponse = send_json(
            HTTP_CLIENT
                .get(format!("{}/users/me/messages", self.api_base))
                .bearer_auth(access_token)
                .query(&params),
            "gmail list messages",
        )
        .await?;

        let mut page = MessagePage {
            next_page_token: list.next_page_token,
            ..Default::default()
        };
        for reference in list.messages {
            let fetched = match self.get_message(access_token, &reference.id).await {
                Ok(message) => to_provider_message(message),
                Err(e)
                    if matches!(
                        e.code(),
                        ErrorCode::ValidationFailure | ErrorCode::ResourceNotFound
                    ) =>
                {
                    Err(e.message())
                }
                Err(e) => return Err(e),
            };
            match fetched {
                Ok(message) => {
                    if query.since.is_some_and(|since| message.received_at <= since) {
                        debug!(id = %message.provider_message_id, "Skipping message at or before cursor");
                        continue;
                    }
                    page.messages.push(message);
                }
                Err(reason) => page.malformed.push(MalformedMessage {
                    provider_message_id: reference.id,
                    reason,
                }),
            }
        }
        Ok(page)
    }

    async fn list_attachments(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> GroundworkResult<Vec<AttachmentMeta>> {
        let message = self.get_message(access_token, message_id).await?;
        Ok(attachments_of(&message))
    }

    async fn download_attachment(
        &self,
        access_token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> GroundworkResult<Bytes> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.api_base, message_id, attachment_id
        );
        let body: AttachmentBody = send_json(
            HTTP_CLIENT.get(url).bearer_auth(access_token),
            "gmail download attachment",
        )
        .await?;
        decode_base64url(&body.data).map(Bytes::from).ok_or_else(|| {
            raise_error!(
                format!("Attachment {} is not valid base64url", attachment_id),
                ErrorCode::ValidationFailure
            )
        })
    }

    async fn fetch_mailbox_address(&self, access_token: &str) -> GroundworkResult<String> {
        let profile: Profile = send_json(
            HTTP_CLIENT
                .get(format!("{}/users/me/profile", self.api_base))
                .bearer_auth(access_token),
            "gmail profile",
        )
        .await?;
        Ok(profile.email_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GmailMessage {
        serde_json::from_value(serde_json::json!({
            "id": "18c1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Please see attached",
            "internalDate": "1735732800000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "Subject", "value": "RFI-012 response"},
                    {"name": "From", "value": "\"Jane Doe\" <Jane@Arch.example>"},
                    {"name": "To", "value": "pm@gc.example, site@gc.example"},
                    {"name": "Date", "value": "Wed, 1 Jan 2025 12:00:00 +0000"}
                ],
                "parts": [
                    {"mimeType": "multipart/alternative", "filename": "", "parts": [
                        {"mimeType": "text/plain", "filename": "", "body": {"data": "SGVsbG8gdGVhbQ"}},
                        {"mimeType": "text/html", "filename": "", "body": {"data": "PHA-SGVsbG88L3A-"}}
                    ]},
                    {"mimeType": "application/pdf", "filename": "A-101.pdf",
                     "headers": [{"name": "Content-Disposition", "value": "attachment; filename=A-101.pdf"}],
                     "body": {"attachmentId": "att-1", "size": 2048}},
                    {"mimeType": "image/png", "filename": "logo.png",
                     "headers": [{"name": "Content-Disposition", "value": "inline"}],
                     "body": {"attachmentId": "att-2", "size": 10}}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn decodes_full_message() {
        let message = to_provider_message(sample()).unwrap();
        assert_eq!(message.provider_message_id, "18c1");
        assert_eq!(message.subject.as_deref(), Some("RFI-012 response"));
        assert_eq!(message.from_address.as_deref(), Some("jane@arch.example"));
        assert_eq!(message.from_name.as_deref(), Some("Jane Doe"));
        assert_eq!(message.to, vec!["pm@gc.example", "site@gc.example"]);
        assert_eq!(message.body_text.as_deref(), Some("Hello team"));
        assert_eq!(message.received_at, 1_735_732_800_000);
        assert_eq!(message.sent_at, Some(1_735_732_800_000));
        assert!(!message.is_read);
        assert!(message.has_attachments);
    }

    #[test]
    fn lists_real_attachments_only() {
        let attachments = attachments_of(&sample());
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].provider_attachment_id, "att-1");
        assert_eq!(attachments[0].size, 2048);
        assert!(!attachments[0].is_inline);
        assert!(attachments[1].is_inline);
    }

    #[test]
    fn missing_internal_date_is_malformed() {
        let mut message = sample();
        message.internal_date = None;
        assert!(to_provider_message(message).is_err());
    }

    #[test]
    fn cursor_becomes_after_seconds() {
        assert_eq!(search_query(Some(1_735_732_800_999)).as_deref(), Some("after:1735732800"));
        assert_eq!(search_query(None), None);
        assert_eq!(decode_base64url("SGVsbG8=").unwrap(), b"Hello");
    }
}
