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

use itertools::Itertools;
use native_db::*;
use native_model::{native_model, Model};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};

use crate::modules::database::{filter_by_secondary_key_impl, update_impl, with_transaction};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::ingest::{FileCategory, StoredFile};
use crate::{id, raise_error, utc_now};

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
#[native_model(id = 3, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct MessageAttachment {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub message_id: u64,
    #[secondary_key]
    pub account_id: u64,
    /// Provider-side id; `None` for attachments delivered inline by the webhook.
    pub provider_attachment_id: Option<String>,
    pub filename: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub is_inline: bool,
    pub storage_path: Option<String>,
    pub storage_url: Option<String>,
    pub downloaded: bool,
    pub downloaded_at: Option<i64>,
    pub processed: bool,
    pub processed_at: Option<i64>,
    pub indexed: bool,
    pub indexed_at: Option<i64>,
    pub file_type: String,
    pub is_potential_drawing: bool,
    pub is_potential_spec: bool,
    pub is_potential_photo: bool,
    pub document_id: Option<u64>,
    /// Set when the download policy rejected the file; it is never retried.
    pub skip_reason: Option<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MessageAttachment {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn new(
        message_id: u64,
        account_id: u64,
        provider_attachment_id: Option<String>,
        filename: String,
        size: u64,
        mime_type: Option<String>,
        is_inline: bool,
        category: FileCategory,
    ) -> Self {
        let now = utc_now!();
        Self {
            id: id!(64),
            message_id,
            account_id,
            provider_attachment_id,
            filename,
            size,
            mime_type,
            is_inline,
            file_type: category.file_type.to_string(),
            is_potential_drawing: category.is_potential_drawing,
            is_potential_spec: category.is_potential_spec,
            is_potential_photo: category.is_potential_photo,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Inserts the rows of `candidates` whose provider attachment id is not
    /// yet stored for `message_id`, and returns the rows written.
    pub async fn insert_missing(
        db: &Arc<Database<'static>>,
        message_id: u64,
        candidates: Vec<Self>,
    ) -> GroundworkResult<Vec<Self>> {
        with_transaction(db, move |rw| {
            let stored: Vec<MessageAttachment> = rw
                .scan()
                .secondary(MessageAttachmentKey::message_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .start_with(message_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .try_collect()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let mut written = Vec::new();
            for candidate in candidates {
                let known = stored.iter().any(|s| {
                    s.message_id == message_id
                        && s.provider_attachment_id == candidate.provider_attachment_id
                });
                if known {
                    continue;
                }
                rw.insert(candidate.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                written.push(candidate);
            }
            Ok(written)
        })
        .await
    }

    pub async fn list_for_message(
        db: &Arc<Database<'static>>,
        message_id: u64,
    ) -> GroundworkResult<Vec<Self>> {
        filter_by_secondary_key_impl(db, MessageAttachmentKey::message_id, message_id).await
    }

    /// Rows still worth another attempt: downloads that failed, and stored
    /// files whose indexing failed.
    pub async fn list_retryable(
        db: &Arc<Database<'static>>,
        account_id: u64,
        max_attempts: u32,
    ) -> GroundworkResult<Vec<Self>> {
        let attachments: Vec<MessageAttachment> =
            filter_by_secondary_key_impl(db, MessageAttachmentKey::account_id, account_id).await?;
        Ok(attachments
            .into_iter()
            .filter(|a| a.skip_reason.is_none() && a.attempts < max_attempts)
            .filter(|a| {
                let undownloaded = !a.downloaded && a.provider_attachment_id.is_some();
                let unindexed = a.downloaded && !a.processed && a.last_error.is_some();
                undownloaded || unindexed
            })
            .collect())
    }

    async fn modify(
        db: &Arc<Database<'static>>,
        id: u64,
        apply: impl FnOnce(&mut MessageAttachment) + Send + 'static,
    ) -> GroundworkResult<Self> {
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .secondary::<MessageAttachment>(MessageAttachmentKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Attachment id='{id}' not found"),
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

    pub async fn mark_downloaded(
        db: &Arc<Database<'static>>,
        id: u64,
        stored: StoredFile,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |a| {
            a.storage_path = Some(stored.path);
            a.storage_url = Some(stored.url);
            a.size = stored.size;
            a.downloaded = true;
            a.downloaded_at = Some(utc_now!());
            a.attempts += 1;
            a.last_error = None;
        })
        .await
    }

    pub async fn mark_failed(
        db: &Arc<Database<'static>>,
        id: u64,
        error: String,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |a| {
            a.attempts += 1;
            a.last_error = Some(error);
        })
        .await
    }

    pub async fn mark_skipped(
        db: &Arc<Database<'static>>,
        id: u64,
        reason: String,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |a| a.skip_reason = Some(reason)).await
    }

    /// Leaves the row unprocessed with the indexing error recorded.
    pub async fn mark_index_failed(
        db: &Arc<Database<'static>>,
        id: u64,
        error: String,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |a| {
            a.attempts += 1;
            a.last_error = Some(error);
        })
        .await
    }

    /// Records the outcome of document processing. `document_id` is `None`
    /// when the file type has no extractor.
    pub async fn mark_processed(
        db: &Arc<Database<'static>>,
        id: u64,
        document_id: Option<u64>,
    ) -> GroundworkResult<Self> {
        Self::modify(db, id, move |a| {
            let now = utc_now!();
            a.processed = true;
            a.processed_at = Some(now);
            a.last_error = None;
            if document_id.is_some() {
                a.document_id = document_id;
                a.indexed = true;
                a.indexed_at = Some(now);
            }
        })
        .await
    }
}
