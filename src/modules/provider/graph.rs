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
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use url::Url;

use crate::modules::account::ProviderKind;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::provider::http::{send_bytes, send_json, HTTP_CLIENT};
use crate::modules::provider::oauth::OAuthApp;
use crate::modules::provider::{
    AttachmentMeta, ListQuery, MalformedMessage, MessagePage, ProviderAdapter, ProviderMessage,
    TokenSet,
};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::utils::{html_to_text, normalize_address};
use crate::raise_error;

const MESSAGE_FIELDS: &str = "id,conversationId,subject,from,toRecipients,ccRecipients,\
bodyPreview,body,receivedDateTime,sentDateTime,isRead,importance,hasAttachments";

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    conversation_id: Option<String>,
    subject: Option<String>,
    from: Option<Recipient>,
    #[serde(default)]
    to_recipients: Vec<Recipient>,
    #[serde(default)]
    cc_recipients: Vec<Recipient>,
    body_preview: Option<String>,
    body: Option<ItemBody>,
    received_date_time: Option<String>,
    sent_date_time: Option<String>,
    #[serde(default)]
    is_read: bool,
    importance: Option<String>,
    #[serde(default)]
    has_attachments: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
    id: String,
    name: Option<String>,
    #[serde(default)]
    size: u64,
    content_type: Option<String>,
    #[serde(default)]
    is_inline: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    mail: Option<String>,
    user_principal_name: Option<String>,
}

impl Recipient {
    fn address(&self) -> Option<String> {
        self.email_address
            .as_ref()?
            .address
            .as_deref()
            .map(normalize_address)
            .filter(|a| !a.is_empty())
    }
}

/// Microsoft Graph mail adapter.
pub struct GraphAdapter {
    api_base: String,
    oauth: Option<OAuthApp>,
}

impl GraphAdapter {
    pub fn new(api_base: String, oauth: Option<OAuthApp>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            oauth,
        }
    }

    pub fn from_settings() -> Self {
        Self::new(
            SETTINGS.groundwork_graph_api_base.clone(),
            OAuthApp::from_settings(ProviderKind::Outlook).ok(),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> GroundworkResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::MissingConfiguration))?;
        url.path_segments_mut()
            .map_err(|_| {
                raise_error!(
                    format!("Graph API base '{}' cannot carry a path", self.api_base),
                    ErrorCode::MissingConfiguration
                )
            })?
            .extend(segments);
        Ok(url)
    }

    fn list_url(&self, query: &ListQuery) -> GroundworkResult<Url> {
        if let Some(next_link) = &query.page_token {
            return Url::parse(next_link).map_err(|e| {
                raise_error!(
                    format!("Invalid Graph page link: {}", e),
                    ErrorCode::ValidationFailure
                )
            });
        }
        let mut url = self.endpoint(&["me", "mailFolders", &query.folder, "messages"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("$top", &query.page_size.to_string())
                .append_pair("$select", MESSAGE_FIELDS)
                .append_pair("$orderby", "receivedDateTime desc");
            if let Some(filter) = received_filter(query.since) {
                pairs.append_pair("$filter", &filter);
            }
        }
        Ok(url)
    }
}

fn received_filter(since: Option<i64>) -> Option<String> {
    let since = DateTime::<Utc>::from_timestamp_millis(since?)?;
    Some(format!(
        "receivedDateTime gt {}",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    ))
}

fn parse_time(value: Option<&str>) -> Option<i64> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|d| d.timestamp_millis())
}

fn to_provider_message(message: GraphMessage) -> Result<ProviderMessage, String> {
    let received_at = parse_time(message.received_date_time.as_deref())
        .ok_or_else(|| "missing or invalid receivedDateTime".to_string())?;

    let (body_text, body_html) = match message.body {
        Some(ItemBody {
            content_type: Some(kind),
            content: Some(content),
        }) if kind.eq_ignore_ascii_case("html") => (Some(html_to_text(&content)), Some(content)),
        Some(ItemBody {
            content: Some(content),
            ..
        }) => (Some(content), None),
        _ => (None, None),
    };

    Ok(ProviderMessage {
        provider_message_id: message.id,
        thread_id: message.conversation_id,
        subject: message.subject,
        from_address: message.from.as_ref().and_then(Recipient::address),
        from_name: message
            .from
            .as_ref()
            .and_then(|f| f.email_address.as_ref())
            .and_then(|e| e.name.clone())
            .filter(|n| !n.is_empty()),
        to: message.to_recipients.iter().filter_map(Recipient::address).collect(),
        cc: message.cc_recipients.iter().filter_map(Recipient::address).collect(),
        snippet: message.body_preview,
        body_text,
        body_html,
        received_at,
        sent_at: parse_time(message.sent_date_time.as_deref()),
        is_read: message.is_read,
        is_important: message
            .importance
            .is_some_and(|i| i.eq_ignore_ascii_case("high")),
        has_attachments: message.has_attachments,
    })
}

/// Decodes one listed item, keeping its id for reporting when it is bad.
fn decode_listed(value: serde_json::Value) -> Result<ProviderMessage, MalformedMessage> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    serde_json::from_value::<GraphMessage>(value)
        .map_err(|e| e.to_string())
        .and_then(to_provider_message)
        .map_err(|reason| MalformedMessage {
            provider_message_id: id,
            reason,
        })
}

/// Only file attachments carry downloadable bytes.
fn to_attachment_meta(attachment: GraphAttachment) -> Option<AttachmentMeta> {
    if attachment.odata_type.as_deref() != Some("#microsoft.graph.fileAttachment") {
        return None;
    }
    Some(AttachmentMeta {
        filename: attachment.name.unwrap_or_else(|| attachment.id.clone()),
        provider_attachment_id: attachment.id,
        size: attachment.size,
        mime_type: attachment.content_type,
        is_inline: attachment.is_inline,
    })
}

#[async_trait]
impl ProviderAdapter for GraphAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    async fn refresh_token(&self, refresh_token: &str) -> GroundworkResult<TokenSet> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            raise_error!(
                "Microsoft OAuth client is not configured".into(),
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
        let url = self.list_url(query)?;
        let list: Collection<serde_json::Value> = send_json(
            HTTP_CLIENT.get(url).bearer_auth(access_token),
            "graph list messages",
        )
        .await?;

        let mut page = MessagePage {
            next_page_token: list.next_link,
            ..Default::default()
        };
        for value in list.value {
            match decode_listed(value) {
                Ok(message) => {
                    if query.since.is_some_and(|since| message.received_at <= since) {
                        continue;
                    }
                    page.messages.push(message);
                }
                Err(malformed) => page.malformed.push(malformed),
            }
        }
        Ok(page)
    }

    async fn list_attachments(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> GroundworkResult<Vec<AttachmentMeta>> {
        let mut url = self.endpoint(&["me", "messages", message_id, "attachments"])?;
        url.query_pairs_mut()
            .append_pair("$select", "id,name,size,contentType,isInline");
        let list: Collection<GraphAttachment> = send_json(
            HTTP_CLIENT.get(url).bearer_auth(access_token),
            "graph list attachments",
        )
        .await?;
        Ok(list.value.into_iter().filter_map(to_attachment_meta).collect())
    }

    async fn download_attachment(
        &self,
        access_token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> GroundworkResult<Bytes> {
        let url = self.endpoint(&[
            "me",
            "messages",
            message_id,
            "attachments",
            attachment_id,
            "$value",
        ])?;
        send_bytes(
            HTTP_CLIENT.get(url).bearer_auth(access_token),
            "graph download attachment",
        )
        .await
    }

    async fn fetch_mailbox_address(&self, access_token: &str) -> GroundworkResult<String> {
        let mut url = self.endpoint(&["me"])?;
        url.query_pairs_mut()
            .append_pair("$select", "mail,userPrincipalName");
        let user: GraphUser =
            send_json(HTTP_CLIENT.get(url).bearer_auth(access_token), "graph me").await?;
        user.mail
            .or(user.user_principal_name)
            .ok_or_else(|| {
                raise_error!(
                    "Graph user has no mail address".into(),
                    ErrorCode::ValidationFailure
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_listed_messages_and_isolates_bad_ones() {
        let good = json!({
            "id": "AAMk1",
            "conversationId": "c1",
            "subject": "Submittal 08 71 00 door hardware",
            "from": {"emailAddress": {"name": "Sub Co", "address": "PM@Sub.example"}},
            "toRecipients": [{"emailAddress": {"address": "pm@gc.example"}}],
            "body": {"contentType": "html", "content": "<p>Attached</p>"},
            "receivedDateTime": "2025-01-01T12:00:00Z",
            "importance": "high",
            "hasAttachments": true
        });
        let message = decode_listed(good).unwrap();
        assert_eq!(message.from_address.as_deref(), Some("pm@sub.example"));
        assert_eq!(message.received_at, 1_735_732_800_000);
        assert_eq!(message.body_html.as_deref(), Some("<p>Attached</p>"));
        assert!(message.body_text.unwrap().contains("Attached"));
        assert!(message.is_important);

        let bad = decode_listed(json!({"id": "AAMk2", "subject": "no date"})).unwrap_err();
        assert_eq!(bad.provider_message_id, "AAMk2");
    }

    #[test]
    fn builds_filtered_list_url() {
        let adapter = GraphAdapter::new("https://graph.microsoft.com/v1.0/".into(), None);
        let url = adapter
            .list_url(&ListQuery {
                folder: "inbox".into(),
                since: Some(1_735_732_800_000),
                page_token: None,
                page_size: 25,
            })
            .unwrap();
        assert_eq!(url.path(), "/v1.0/me/mailFolders/inbox/messages");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["$top"], "25");
        assert_eq!(pairs["$filter"], "receivedDateTime gt 2025-01-01T12:00:00Z");

        let next = adapter
            .list_url(&ListQuery {
                page_token: Some("https://graph.microsoft.com/v1.0/me/messages?$skip=25".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.query(), Some("$skip=25"));
    }

    #[test]
    fn skips_non_file_attachments() {
        let list: Collection<GraphAttachment> = serde_json::from_value(json!({
            "value": [
                {"@odata.type": "#microsoft.graph.fileAttachment", "id": "a1", "name": "S-201.pdf", "size": 10, "contentType": "application/pdf", "isInline": false},
                {"@odata.type": "#microsoft.graph.itemAttachment", "id": "a2", "name": "Fwd", "size": 5}
            ]
        }))
        .unwrap();
        let metas: Vec<_> = list.value.into_iter().filter_map(to_attachment_meta).collect();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].filename, "S-201.pdf");
    }
}
