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

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use mail_parser::{MessageParser, MimeHeaders};
use poem_openapi::{Enum, Object};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::modules::account::ConnectedAccount;
use crate::modules::common::AddrVec;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::provider::ProviderMessage;
use crate::modules::sync::engine::{IncomingAttachment, IngestOutcome, SyncEngine};
use crate::modules::utils::{extract_address, html_to_text, split_address_list};
use crate::{raise_error, utc_now};

const SNIPPET_CHARS: usize = 200;

/// An email pushed to us by a forwarding service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InboundEmail {
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub message_id: Option<String>,
    pub date: Option<i64>,
    pub attachments: Vec<InboundAttachment>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InboundAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: Bytes,
}

/// Text fields and file parts of a multipart webhook request.
#[derive(Clone, Debug, Default)]
pub struct InboundForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<InboundAttachment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Enum)]
#[oai(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Stored,
    Duplicate,
    /// No connected mailbox matches any recipient.
    Ignored,
}

#[derive(Clone, Debug, Deserialize, Serialize, Object)]
pub struct WebhookReceipt {
    pub status: ReceiptStatus,
    pub account_id: Option<u64>,
    pub message_id: Option<u64>,
    pub attachments_stored: u64,
}

fn json_string(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Accepts `"a@x, B <b@y>"`, `["a@x"]` or `[{"Email": "a@x"}]`.
fn json_addresses(object: &Value, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match object.get(*key) {
            Some(Value::String(raw)) if !raw.trim().is_empty() => {
                return split_address_list(raw);
            }
            Some(Value::Array(items)) if !items.is_empty() => {
                return items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(raw) => Some(extract_address(raw)),
                        Value::Object(_) => {
                            json_string(item, &["Email", "email", "address"]).map(|a| extract_address(&a))
                        }
                        _ => None,
                    })
                    .filter(|a| !a.is_empty())
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

/// Display name of `"Name" <addr>`, if any.
fn display_name(raw: &str) -> Option<String> {
    let end = raw.find('<')?;
    let name = raw[..end].trim().trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    chrono::DateTime::parse_from_rfc2822(raw)
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.timestamp_millis())
}

impl InboundEmail {
    pub fn from_json(payload: &Value) -> GroundworkResult<Self> {
        if !payload.is_object() {
            return Err(raise_error!(
                "Webhook payload must be a JSON object".into(),
                ErrorCode::InvalidParameter
            ));
        }
        let from_raw = json_string(payload, &["from", "From", "sender"]);
        let from_full = payload.get("FromFull");
        let from_address = from_full
            .and_then(|f| json_string(f, &["Email", "email"]))
            .or_else(|| from_raw.clone())
            .map(|a| extract_address(&a));
        let from_name = from_full
            .and_then(|f| json_string(f, &["Name", "name"]))
            .or_else(|| from_raw.as_deref().and_then(display_name));

        let mut attachments = Vec::new();
        if let Some(items) = payload
            .get("attachments")
            .or_else(|| payload.get("Attachments"))
            .and_then(|v| v.as_array())
        {
            for item in items {
                let filename = json_string(item, &["filename", "Name", "name"])
                    .unwrap_or_else(|| "attachment".to_string());
                let Some(encoded) = json_string(item, &["content", "Content"]) else {
                    warn!(filename, "Webhook attachment without content skipped");
                    continue;
                };
                let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
                match STANDARD.decode(cleaned) {
                    Ok(content) => attachments.push(InboundAttachment {
                        filename,
                        content_type: json_string(
                            item,
                            &["content_type", "ContentType", "contentType"],
                        ),
                        content: Bytes::from(content),
                    }),
                    Err(e) => warn!(filename, "Webhook attachment with invalid base64 skipped: {}", e),
                }
            }
        }

        Ok(Self {
            from_address,
            from_name,
            to: json_addresses(payload, &["to", "To", "ToFull", "recipient"]),
            cc: json_addresses(payload, &["cc", "Cc", "CcFull"]),
            subject: json_string(payload, &["subject", "Subject"]),
            text: json_string(payload, &["text", "TextBody", "body-plain", "plain"]),
            html: json_string(payload, &["html", "HtmlBody", "body-html"]),
            message_id: json_string(payload, &["message_id", "MessageID", "Message-Id", "messageId"]),
            date: json_string(payload, &["date", "Date"]).and_then(|d| parse_date(&d)),
            attachments,
        })
    }

    /// Parses a complete RFC 5322 message.
    pub fn from_mime(raw: &[u8]) -> GroundworkResult<Self> {
        let message = MessageParser::default().parse(raw).ok_or_else(|| {
            raise_error!(
                "Failed to parse raw email; the message may be corrupted.".into(),
                ErrorCode::ValidationFailure
            )
        })?;
        let from = message.from().map(AddrVec::from).unwrap_or_default();
        let attachments = message
            .attachments()
            .enumerate()
            .map(|(index, part)| InboundAttachment {
                filename: part
                    .attachment_name()
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("attachment-{}", index + 1)),
                content_type: part.content_type().map(|ct| {
                    format!(
                        "{}/{}",
                        ct.c_type.as_ref(),
                        ct.c_subtype.as_deref().unwrap_or("octet-stream")
                    )
                }),
                content: Bytes::copy_from_slice(part.contents()),
            })
            .collect();
        Ok(Self {
            from_address: from.first().and_then(|a| a.address.clone()),
            from_name: from.first().and_then(|a| a.name.clone()),
            to: message.to().map(AddrVec::from).unwrap_or_default().addresses(),
            cc: message.cc().map(AddrVec::from).unwrap_or_default().addresses(),
            subject: message.subject().map(str::to_string),
            text: message.body_text(0).map(|cow| cow.into_owned()),
            html: message.body_html(0).map(|cow| cow.into_owned()),
            message_id: message.message_id().map(str::to_string),
            date: message.date().map(|d| d.to_timestamp() * 1000),
            attachments,
        })
    }

    /// Multipart form; a raw `email` field wins over the split fields.
    pub fn from_form(form: InboundForm) -> GroundworkResult<Self> {
        let field = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|k| form.fields.get(*k))
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(raw) = field(&["email"]) {
            let mut email = Self::from_mime(raw.as_bytes())?;
            for file in form.files {
                if !email.attachments.iter().any(|a| a.filename == file.filename) {
                    email.attachments.push(file);
                }
            }
            return Ok(email);
        }

        let from_raw = field(&["from", "sender", "From"]);
        Ok(Self {
            from_address: from_raw.as_deref().map(extract_address),
            from_name: from_raw.as_deref().and_then(display_name),
            to: field(&["to", "recipient", "To"])
                .map(|r| split_address_list(&r))
                .unwrap_or_default(),
            cc: field(&["cc", "Cc"])
                .map(|r| split_address_list(&r))
                .unwrap_or_default(),
            subject: field(&["subject", "Subject"]),
            text: field(&["text", "body-plain", "stripped-text"]),
            html: field(&["html", "body-html", "stripped-html"]),
            message_id: field(&["message_id", "Message-Id", "message-id"]),
            date: field(&["date", "Date"]).and_then(|d| parse_date(&d)),
            attachments: form.files,
        })
    }

    /// Provider id for dedup: the Message-ID, else a digest of the content.
    pub fn dedup_id(&self) -> String {
        if let Some(id) = &self.message_id {
            return id.trim().trim_matches(|c| c == '<' || c == '>').to_string();
        }
        let mut context = ring::digest::Context::new(&ring::digest::SHA256);
        for part in [
            self.from_address.as_deref().unwrap_or_default(),
            &self.to.join(","),
            self.subject.as_deref().unwrap_or_default(),
            &self.date.map(|d| d.to_string()).unwrap_or_default(),
            self.text.as_deref().unwrap_or_default(),
        ] {
            context.update(part.as_bytes());
            context.update(&[0]);
        }
        format!("webhook-{}", &hex::encode(context.finish())[..32])
    }

    pub fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter())
    }

    pub fn into_parts(self) -> (ProviderMessage, Vec<IncomingAttachment>) {
        let provider_message_id = self.dedup_id();
        let text = self
            .text
            .or_else(|| self.html.as_deref().map(html_to_text));
        let snippet = text.as_deref().map(|t| {
            t.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(SNIPPET_CHARS)
                .collect()
        });
        let message = ProviderMessage {
            provider_message_id,
            thread_id: None,
            subject: self.subject,
            from_address: self.from_address,
            from_name: self.from_name,
            to: self.to,
            cc: self.cc,
            snippet,
            body_text: text,
            body_html: self.html,
            received_at: utc_now!(),
            sent_at: self.date,
            is_read: false,
            is_important: false,
            has_attachments: !self.attachments.is_empty(),
        };
        let attachments = self
            .attachments
            .into_iter()
            .map(|a| IncomingAttachment {
                provider_attachment_id: None,
                size: a.content.len() as u64,
                filename: a.filename,
                mime_type: a.content_type,
                is_inline: false,
                content: Some(a.content),
            })
            .collect();
        (message, attachments)
    }
}

/// Routes an inbound email to the connected mailbox it was addressed to and
/// stores it like a polled message.
pub async fn receive(engine: &SyncEngine, email: InboundEmail) -> GroundworkResult<WebhookReceipt> {
    let mut account = None;
    for recipient in email.recipients() {
        if let Some(found) = ConnectedAccount::find_by_address(engine.db(), recipient).await? {
            account = Some(found);
            break;
        }
    }
    let Some(account) = account else {
        warn!(recipients = ?email.to, "Inbound email matches no connected mailbox");
        return Ok(WebhookReceipt {
            status: ReceiptStatus::Ignored,
            account_id: None,
            message_id: None,
            attachments_stored: 0,
        });
    };

    let (message, attachments) = email.into_parts();
    let receipt = match engine.ingest_inbound(&account, message, attachments).await? {
        IngestOutcome::Duplicate { .. } => WebhookReceipt {
            status: ReceiptStatus::Duplicate,
            account_id: Some(account.id),
            message_id: None,
            attachments_stored: 0,
        },
        IngestOutcome::Stored {
            message,
            attachments,
        } => WebhookReceipt {
            status: ReceiptStatus::Stored,
            account_id: Some(account.id),
            message_id: Some(message.id),
            attachments_stored: attachments.stored,
        },
    };
    info!(
        account_id = account.id,
        status = ?receipt.status,
        "Inbound email processed"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::message::attachment::MessageAttachment;
    use crate::modules::message::{MessageSource, SyncedMessage};
    use crate::modules::sync::engine::tests::{connect_account, harness, test_options, FakeProvider};
    use serde_json::json;

    const RAW: &str = "From: \"Site Super\" <super@gc.example>\r\n\
To: PM@Example.com\r\n\
Cc: owner@client.example\r\n\
Subject: Daily report\r\n\
Message-ID: <daily-42@gc.example>\r\n\
Date: Tue, 14 Oct 2025 08:30:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
Poured level 3 slab.\r\n\
--b1\r\n\
Content-Type: text/plain; name=\"log.txt\"\r\n\
Content-Disposition: attachment; filename=\"log.txt\"\r\n\
\r\n\
crew 12\r\n\
--b1--\r\n";

    #[test]
    fn json_payload_in_postmark_shape() {
        let payload = json!({
            "From": "\"Jane Architect\" <Jane@Design.example>",
            "To": "pm@example.com, \"Other\" <other@example.com>",
            "Subject": "RFI-012 response",
            "TextBody": "See attached.",
            "MessageID": "abc-123",
            "Date": "Tue, 14 Oct 2025 08:30:00 +0000",
            "Attachments": [
                {"Name": "rfi.txt", "ContentType": "text/plain", "Content": STANDARD.encode("door hardware")},
                {"Name": "broken.pdf", "Content": "***"}
            ]
        });
        let email = InboundEmail::from_json(&payload).unwrap();
        assert_eq!(email.from_address.as_deref(), Some("jane@design.example"));
        assert_eq!(email.from_name.as_deref(), Some("Jane Architect"));
        assert_eq!(email.to, vec!["pm@example.com", "other@example.com"]);
        assert_eq!(email.dedup_id(), "abc-123");
        assert_eq!(email.date, Some(1_760_430_600_000));
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].content, Bytes::from_static(b"door hardware"));
    }

    #[test]
    fn form_fields_and_raw_mime() {
        let mut form = InboundForm::default();
        form.fields.insert("sender".into(), "super@gc.example".into());
        form.fields.insert("recipient".into(), "pm@example.com".into());
        form.fields.insert("body-html".into(), "<p>Hello <b>team</b></p>".into());
        let email = InboundEmail::from_form(form).unwrap();
        assert_eq!(email.to, vec!["pm@example.com"]);
        let (message, _) = email.into_parts();
        assert!(message.body_text.unwrap().contains("Hello"));
        assert!(message.provider_message_id.starts_with("webhook-"));

        let mut form = InboundForm::default();
        form.fields.insert("email".into(), RAW.into());
        let email = InboundEmail::from_form(form).unwrap();
        assert_eq!(email.from_address.as_deref(), Some("super@gc.example"));
        assert_eq!(email.from_name.as_deref(), Some("Site Super"));
        assert_eq!(email.to, vec!["pm@example.com"]);
        assert_eq!(email.cc, vec!["owner@client.example"]);
        assert_eq!(email.dedup_id(), "daily-42@gc.example");
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "log.txt");
    }

    #[test]
    fn digest_id_is_stable() {
        let email = InboundEmail {
            from_address: Some("a@x.example".into()),
            to: vec!["pm@example.com".into()],
            subject: Some("Hi".into()),
            ..Default::default()
        };
        assert_eq!(email.dedup_id(), email.clone().dedup_id());
        let mut other = email.clone();
        other.subject = Some("Hello".into());
        assert_ne!(email.dedup_id(), other.dedup_id());
    }

    #[tokio::test]
    async fn inbound_email_is_stored_once_for_the_matching_mailbox() {
        let h = harness(FakeProvider::with_pages(vec![]), test_options());
        let account = connect_account(&h.db, "pm@example.com", 3_600_000).await;

        let mut form = InboundForm::default();
        form.fields.insert("email".into(), RAW.into());
        let receipt = receive(&h.engine, InboundEmail::from_form(form.clone()).unwrap())
            .await
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Stored);
        assert_eq!(receipt.account_id, Some(account.id));
        assert_eq!(receipt.attachments_stored, 1);

        let stored = SyncedMessage::get(&h.db, receipt.message_id.unwrap()).await.unwrap();
        assert_eq!(stored.source, MessageSource::Webhook);
        assert_eq!(stored.attachment_count, 1);
        let rows = MessageAttachment::list_for_message(&h.db, stored.id).await.unwrap();
        assert!(rows[0].downloaded);

        let again = receive(&h.engine, InboundEmail::from_form(form).unwrap())
            .await
            .unwrap();
        assert_eq!(again.status, ReceiptStatus::Duplicate);
    }

    #[tokio::test]
    async fn unknown_recipient_is_ignored() {
        let h = harness(FakeProvider::with_pages(vec![]), test_options());
        let email = InboundEmail {
            to: vec!["nobody@example.com".into()],
            subject: Some("Hi".into()),
            ..Default::default()
        };
        let receipt = receive(&h.engine, email).await.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Ignored);
    }
}
