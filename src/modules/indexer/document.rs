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
use poem_openapi::Object;
use serde::{Deserialize, Serialize};

use crate::modules::database::{secondary_find_impl, with_transaction};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::raise_error;

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

/// A calendar date found in the text, normalized to `YYYY-MM-DD`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct DateMention {
    pub date: String,
    pub raw: String,
    pub context: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct PartyMention {
    pub role: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct DocumentEntities {
    pub rfi_numbers: Vec<String>,
    pub submittal_numbers: Vec<String>,
    pub change_order_numbers: Vec<String>,
    pub drawing_numbers: Vec<String>,
    pub dates: Vec<DateMention>,
    pub parties: Vec<PartyMention>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct DocumentClassification {
    /// rfi, submittal, change_order, drawing, safety, specification or general
    pub document_type: String,
    pub folder_type: Option<String>,
    /// Two-digit CSI MasterFormat division
    pub csi_division: Option<String>,
    pub csi_division_name: Option<String>,
}

/// Extracted content of one processed file.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
#[native_model(id = 4, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct IndexedDocument {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key(unique)]
    pub file_path: String,
    /// SHA-256 of the file bytes, lowercase hex
    pub content_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub text: String,
    pub text_truncated: bool,
    pub page_count: Option<u32>,
    pub metadata: DocumentMetadata,
    pub entities: DocumentEntities,
    pub classification: DocumentClassification,
    pub keywords: Vec<String>,
    pub processing_ms: u64,
    pub processed_at: i64,
    pub created_at: i64,
}

impl IndexedDocument {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub async fn find(db: &Arc<Database<'static>>, id: u64) -> GroundworkResult<Option<Self>> {
        secondary_find_impl::<IndexedDocument>(db, IndexedDocumentKey::id, id).await
    }

    pub async fn get(db: &Arc<Database<'static>>, id: u64) -> GroundworkResult<Self> {
        Self::find(db, id).await?.ok_or_else(|| {
            raise_error!(
                format!("Document id='{id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    /// The document stored for `path`, if its bytes still hash to `hash`.
    pub async fn find_unchanged(
        db: &Arc<Database<'static>>,
        path: &str,
        hash: &str,
    ) -> GroundworkResult<Option<Self>> {
        let document: Option<IndexedDocument> =
            secondary_find_impl(db, IndexedDocumentKey::file_path, path.to_string()).await?;
        Ok(document.filter(|d| d.content_hash == hash))
    }

    /// Inserts, or replaces the record previously stored for the same path.
    pub async fn save(db: &Arc<Database<'static>>, document: IndexedDocument) -> GroundworkResult<Self> {
        with_transaction(db, move |rw| {
            let existing: Option<IndexedDocument> = rw
                .get()
                .secondary(IndexedDocumentKey::file_path, document.file_path.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let saved = match existing {
                Some(old) => {
                    let mut replacement = document;
                    replacement.id = old.id;
                    replacement.created_at = old.created_at;
                    rw.update(old, replacement.clone())
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                    replacement
                }
                None => {
                    rw.insert(document.clone())
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                    document
                }
            };
            Ok(saved)
        })
        .await
    }
}
