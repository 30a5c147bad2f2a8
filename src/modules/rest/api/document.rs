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
use std::path::{Component, Path as FsPath, PathBuf};

use crate::modules::common::auth::ClientContext;
use crate::modules::database::manager::DB_MANAGER;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::indexer::document::IndexedDocument;
use crate::modules::indexer::manager::{DocumentHit, DocumentSearchRequest, DOCUMENT_INDEX_MANAGER};
use crate::modules::indexer::{DirectoryIndexReport, DocumentIndexer};
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::response::DataPage;
use crate::modules::rest::ApiResult;
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::raise_error;
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct IndexDirectoryRequest {
    /// Directory under the documents folder of the data directory. Empty means the whole folder.
    pub directory: Option<String>,
}

/// Resolves `relative` below `root`, refusing absolute paths and `..`.
pub fn resolve_under(root: &FsPath, relative: Option<&str>) -> GroundworkResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    let Some(relative) = relative.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(resolved);
    };
    for component in FsPath::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(raise_error!(
                    format!("Directory '{}' must stay inside the documents folder", relative),
                    ErrorCode::InvalidParameter
                ))
            }
        }
    }
    Ok(resolved)
}

pub struct DocumentApi;

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::Document")]
impl DocumentApi {
    /// Full-text search over indexed documents, filterable by type and CSI division.
    #[oai(path = "/documents/search", method = "get", operation_id = "search_documents")]
    async fn search_documents(
        &self,
        /// Free text over file name, body and keywords
        query: Query<Option<String>>,
        /// e.g. `rfi`, `submittal`, `drawing`
        document_type: Query<Option<String>>,
        /// Two-digit CSI MasterFormat division
        csi_division: Query<Option<String>>,
        page: Query<Option<u64>>,
        page_size: Query<Option<u64>>,
        _context: ClientContext,
    ) -> ApiResult<Json<DataPage<DocumentHit>>> {
        let request = DocumentSearchRequest {
            query: query.0,
            document_type: document_type.0,
            csi_division: csi_division.0,
            page: page.0,
            page_size: page_size.0,
        };
        Ok(Json(DOCUMENT_INDEX_MANAGER.search(request).await?))
    }

    /// Get an indexed document with its extracted entities and classification.
    #[oai(path = "/document/:document_id", method = "get", operation_id = "get_document")]
    async fn get_document(
        &self,
        document_id: Path<u64>,
        _context: ClientContext,
    ) -> ApiResult<Json<IndexedDocument>> {
        Ok(Json(
            IndexedDocument::get(DB_MANAGER.meta_db(), document_id.0).await?,
        ))
    }

    /// Indexes every file in a directory of the documents folder.
    ///
    /// Files that fail are listed in the report; the run never stops early.
    #[oai(path = "/documents/index", method = "post", operation_id = "index_directory")]
    async fn index_directory(
        &self,
        payload: Json<IndexDirectoryRequest>,
        _context: ClientContext,
    ) -> ApiResult<Json<DirectoryIndexReport>> {
        let dir = resolve_under(
            &DATA_DIR_MANAGER.documents_dir,
            payload.0.directory.as_deref(),
        )?;
        if !dir.is_dir() {
            return Err(raise_error!(
                format!("Directory {:?} does not exist", dir),
                ErrorCode::ResourceNotFound
            )
            .into());
        }
        let indexer = DocumentIndexer::new(
            DB_MANAGER.meta_db().clone(),
            DOCUMENT_INDEX_MANAGER.clone(),
            SETTINGS.groundwork_index_skip_existing,
        );
        let report = indexer
            .index_directory(&dir, SETTINGS.groundwork_index_batch_size as usize)
            .await?;
        Ok(Json(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_must_stay_under_root() {
        let root = FsPath::new("/data/documents");
        assert_eq!(resolve_under(root, None).unwrap(), root);
        assert_eq!(resolve_under(root, Some("  ")).unwrap(), root);
        assert_eq!(
            resolve_under(root, Some("tower-a/./rfis")).unwrap(),
            root.join("tower-a").join("rfis")
        );
        assert!(resolve_under(root, Some("../secrets")).is_err());
        assert!(resolve_under(root, Some("/etc")).is_err());
    }
}
