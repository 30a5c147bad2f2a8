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
use poem_openapi::{Enum, Object};
use serde::{Deserialize, Serialize};

use crate::modules::database::{
    filter_by_secondary_key_impl, secondary_find_impl, update_impl, with_transaction, Paginated,
};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::rest::response::paginate_vec;
use crate::{raise_error, utc_now};

pub mod attachment;

use attachment::MessageAttachment;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Enum)]
#[oai(rename_all = "lowercase")]
pub enum MessageSource {
    #[default]
    Poll,
    Webhook,
}

/// A message pulled from a connected mailbox. Never re-inserted once present:
/// `(account_id, provider_message_id)` is unique through `dedup_key`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, Object)]
#[native_model(id = 2, version = 1)]
#[native_db(
    primary_key(pk -> String),
    secondary_key(dedup_key -> String, unique)
)]
pub struct SyncedMessage {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
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
    pub attachment_count: u32,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub rfi_id: Option<String>,
    pub ai_category: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ai_suggested_project: Option<String>,
    pub source: MessageSource,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// Manual links from a message to project records.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct MessageLinkRequest {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub rfi_id: Option<String>,
}

impl SyncedMessage {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn dedup_key(&self) -> String {
        Self::dedup_key_of(self.account_id, &self.provider_message_id)
    }

    fn dedup_key_of(account_id: u64, provider_message_id: &str) -> String {
        format!("{}:{}", account_id, provider_message_id)
    }

    pub async fn find_by_provider_id(
        db: &Arc<Database<'static>>,
        account_id: u64,
        provider_message_id: &str,
    ) -> GroundworkResult<Option<Self>> {
        secondary_find_impl::<SyncedMessage>(
            db,
            SyncedMessageKey::dedup_key,
            Self::dedup_key_of(account_id, provider_message_id),
        )
        .await
    }

    /// Inserts the message and its attachment rows in one transaction unless
    /// a message with the same dedup key exists. Returns whether rows were written.
    pub async fn insert_if_absent(
        db: &Arc<Database<'static>>,
        message: SyncedMessage,
        attachments: Vec<MessageAttachment>,
    ) -> GroundworkResult<bool> {
        with_transaction(db, move |rw| {
            let existing: Option<SyncedMessage> = rw
                .get()
                .secondary(SyncedMessageKey::dedup_key, message.dedup_key())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            if existing.is_some() {
                return Ok(false);
            }
            rw.insert(message)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            for attachment in attachments {
                rw.insert(attachment)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            Ok(true)
        })
        .await
    }

    pub async fn get(db: &Arc<Database<'static>>, id: u64) -> GroundworkResult<Self> {
        secondary_find_impl::<SyncedMessage>(db, SyncedMessageKey::id, id)
            .await?
            .filter(|m| m.deleted_at.is_none())
            .ok_or_else(|| {
                raise_error!(
                    format!("Message id='{id}' not found"),
                    ErrorCode::ResourceNotFound
                )
            })
    }

    pub async fn list_for_account(
        db: &Arc<Database<'static>>,
        account_id: u64,
    ) -> GroundworkResult<Vec<Self>> {
        let mut messages: Vec<SyncedMessage> =
            filter_by_secondary_key_impl(db, SyncedMessageKey::account_id, account_id).await?;
        messages.retain(|m| m.deleted_at.is_none());
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(messages)
    }

    /// Newest first.
    pub async fn paginate_for_account(
        db: &Arc<Database<'static>>,
        account_id: u64,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> GroundworkResult<Paginated<Self>> {
        let messages = Self::list_for_account(db, account_id).await?;
        paginate_vec(messages, page, page_size)
    }

    async fn modify(
        db: &Arc<Database<'static>>,
        id: u64,
        apply: impl FnOnce(&mut SyncedMessage) + Send + 'static,
    ) -> GroundworkResult<Self> {
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .secondary::<SyncedMessage>(SyncedMessageKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Message id='{id}' not found"),
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

    pub async fn link(
        db: &Arc<Database<'static>>,
        id: u64,
        request: MessageLinkRequest,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |message| {
            if request.project_id.is_some() {
                message.project_id = request.project_id;
            }
            if request.task_id.is_some() {
                message.task_id = request.task_id;
            }
            if request.rfi_id.is_some() {
                message.rfi_id = request.rfi_id;
            }
        })
        .await
    }

    pub async fn enrich(
        db: &Arc<Database<'static>>,
        id: u64,
        category: Option<String>,
        confidence: Option<f64>,
        suggested_project: Option<String>,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |message| {
            message.ai_category = category;
            message.ai_confidence = confidence;
            if message.project_id.is_none() {
                message.ai_suggested_project = suggested_project;
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::in_memory_database;

    fn message(account_id: u64, provider_message_id: &str, received_at: i64) -> SyncedMessage {
        SyncedMessage {
            id: crate::id!(64),
            account_id,
            provider_message_id: provider_message_id.into(),
            subject: Some("RFI-012 Door hardware".into()),
            received_at,
            created_at: utc_now!(),
            updated_at: utc_now!(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_account() {
        let db = in_memory_database();
        assert!(SyncedMessage::insert_if_absent(&db, message(1, "m1", 10), Vec::new())
            .await
            .unwrap());
        assert!(!SyncedMessage::insert_if_absent(&db, message(1, "m1", 10), Vec::new())
            .await
            .unwrap());
        // Same provider id under another account is a different message.
        assert!(SyncedMessage::insert_if_absent(&db, message(2, "m1", 10), Vec::new())
            .await
            .unwrap());
        assert!(SyncedMessage::find_by_provider_id(&db, 1, "m1")
            .await
            .unwrap()
            .is_some());
        assert_eq!(SyncedMessage::list_for_account(&db, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lists_newest_first_and_links() {
        let db = in_memory_database();
        for (id, at) in [("a", 1), ("b", 3), ("c", 2)] {
            SyncedMessage::insert_if_absent(&db, message(9, id, at), Vec::new())
                .await
                .unwrap();
        }
        let page = SyncedMessage::paginate_for_account(&db, 9, Some(1), Some(2))
            .await
            .unwrap();
        let ids: Vec<_> = page
            .items
            .iter()
            .map(|m| m.provider_message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);

        let linked = SyncedMessage::link(
            &db,
            page.items[0].id,
            MessageLinkRequest {
                rfi_id: Some("rfi-12".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(linked.rfi_id.as_deref(), Some("rfi-12"));
    }

    #[tokio::test]
    async fn attachment_rows_commit_with_their_message() {
        let db = in_memory_database();
        let stored = message(3, "m7", 10);
        let row = |name: &str| {
            MessageAttachment::new(
                stored.id,
                3,
                Some(format!("att-{name}")),
                name.into(),
                10,
                None,
                false,
                crate::modules::ingest::categorize(name, None),
            )
        };
        assert!(
            SyncedMessage::insert_if_absent(&db, stored.clone(), vec![row("a.pdf"), row("b.pdf")])
                .await
                .unwrap()
        );
        assert!(
            !SyncedMessage::insert_if_absent(&db, message(3, "m7", 10), vec![row("c.pdf")])
                .await
                .unwrap()
        );
        let rows = MessageAttachment::list_for_message(&db, stored.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.filename != "c.pdf"));
    }
}
