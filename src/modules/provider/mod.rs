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

use async_trait::async_trait;
use bytes::Bytes;

use crate::modules::account::ProviderKind;
use crate::modules::error::GroundworkResult;

pub mod gmail;
pub mod graph;
pub mod http;
pub mod oauth;
pub mod retry;

/// Plaintext tokens returned by a refresh or code exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    /// Only present when the provider rotated it.
    pub refresh_token: Option<String>,
    /// UTC millis
    pub expires_at: i64,
}

#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub folder: String,
    /// Only messages received strictly after this instant (UTC millis).
    pub since: Option<i64>,
    pub page_token: Option<String>,
    pub page_size: u32,
}

/// A message as the provider described it, already decoded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderMessage {
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub snippet: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: i64,
    pub sent_at: Option<i64>,
    pub is_read: bool,
    pub is_important: bool,
    pub has_attachments: bool,
}

/// A listed item the adapter could not decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedMessage {
    pub provider_message_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct MessagePage {
    /// In provider order.
    pub messages: Vec<ProviderMessage>,
    pub malformed: Vec<MalformedMessage>,
    pub next_page_token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub provider_attachment_id: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub is_inline: bool,
}

/// One mailbox provider. Implementations are stateless apart from their HTTP
/// client and never touch storage.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn refresh_token(&self, refresh_token: &str) -> GroundworkResult<TokenSet>;

    async fn list_messages(
        &self,
        access_token: &str,
        query: &ListQuery,
    ) -> GroundworkResult<MessagePage>;

    async fn list_attachments(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> GroundworkResult<Vec<AttachmentMeta>>;

    async fn download_attachment(
        &self,
        access_token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> GroundworkResult<Bytes>;

    /// Primary address of the mailbox the token belongs to.
    async fn fetch_mailbox_address(&self, access_token: &str) -> GroundworkResult<String>;
}

/// Adapter lookup by provider kind.
#[derive(Clone)]
pub struct Providers {
    gmail: Arc<dyn ProviderAdapter>,
    outlook: Arc<dyn ProviderAdapter>,
}

impl Providers {
    pub fn new(gmail: Arc<dyn ProviderAdapter>, outlook: Arc<dyn ProviderAdapter>) -> Self {
        Self { gmail, outlook }
    }

    /// Real adapters configured from settings.
    pub fn from_settings() -> Self {
        Self::new(
            Arc::new(gmail::GmailAdapter::from_settings()),
            Arc::new(graph::GraphAdapter::from_settings()),
        )
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
        match kind {
            ProviderKind::Gmail => self.gmail.clone(),
            ProviderKind::Outlook => self.outlook.clone(),
        }
    }
}
