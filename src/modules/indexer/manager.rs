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

use std::{
    path::Path,
    sync::{Arc, LazyLock},
    time::Duration,
};

use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tantivy::{
    collector::{Count, TopDocs},
    query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{IndexRecordOption, Value},
    snippet::SnippetGenerator,
    store::{Compressor, ZstdCompressor},
    Index, IndexBuilder, IndexReader, IndexSettings, IndexWriter, Searcher, TantivyDocument,
    Term,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::modules::error::{code::ErrorCode, GroundworkResult};
use crate::modules::indexer::document::IndexedDocument;
use crate::modules::indexer::schema::SchemaTools;
use crate::modules::rest::response::DataPage;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::raise_error;

pub static DOCUMENT_INDEX_MANAGER: LazyLock<Arc<DocumentIndexManager>> = LazyLock::new(|| {
    let manager = DocumentIndexManager::open(&DATA_DIR_MANAGER.index_dir).unwrap_or_else(|e| {
        panic!(
            "Failed to open document index at {:?}: {}",
            DATA_DIR_MANAGER.index_dir, e
        )
    });
    Arc::new(manager)
});

const WRITER_HEAP_BYTES: usize = 50_000_000;
const SNIPPET_MAX_CHARS: usize = 200;
const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct DocumentSearchRequest {
    /// Full-text query over file name, body and keywords. Empty matches all.
    pub query: Option<String>,
    pub document_type: Option<String>,
    pub csi_division: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct DocumentHit {
    pub document_id: u64,
    pub file_name: String,
    pub file_path: String,
    pub document_type: String,
    pub csi_division: Option<String>,
    pub score: f32,
    pub snippet: String,
}

/// Full-text index over processed documents. The metadata store stays the
/// source of truth; this index only answers search queries.
pub struct DocumentIndexManager {
    index_writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
    query_parser: QueryParser,
}

impl DocumentIndexManager {
    pub fn open(index_dir: &Path) -> GroundworkResult<Self> {
        std::fs::create_dir_all(index_dir).map_err(|e| {
            raise_error!(
                format!("Failed to create index directory {:?}: {}", index_dir, e),
                ErrorCode::StorageFailure
            )
        })?;
        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir)
        } else {
            IndexBuilder::new()
                .schema(SchemaTools::document_schema())
                .settings(IndexSettings {
                    docstore_compression: Compressor::Zstd(ZstdCompressor {
                        compression_level: Some(6),
                    }),
                    docstore_compress_dedicated_thread: true,
                    docstore_blocksize: 2_097_152,
                })
                .create_in_dir(index_dir)
        }
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Self::from_index(index)
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::from_index(Index::create_in_ram(SchemaTools::document_schema()))
            .expect("in-memory index")
    }

    fn from_index(index: Index) -> GroundworkResult<Self> {
        let writer = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        let reader = index
            .reader()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        let mut query_parser =
            QueryParser::for_index(&index, SchemaTools::document_default_fields());
        query_parser.set_conjunction_by_default();
        Ok(Self {
            index_writer: Arc::new(Mutex::new(writer)),
            reader,
            query_parser,
        })
    }

    fn to_tantivy_doc(document: &IndexedDocument) -> TantivyDocument {
        let f = SchemaTools::document_fields();
        let mut doc = TantivyDocument::default();
        doc.add_u64(f.f_id, document.id);
        doc.add_text(f.f_file_name, &document.file_name);
        doc.add_text(f.f_file_path, &document.file_path);
        doc.add_text(f.f_text, &document.text);
        for keyword in &document.keywords {
            doc.add_text(f.f_keywords, keyword);
        }
        doc.add_text(f.f_document_type, &document.classification.document_type);
        if let Some(division) = &document.classification.csi_division {
            doc.add_text(f.f_csi_division, division);
        }
        doc.add_i64(f.f_processed_at, document.processed_at);
        doc
    }

    /// Adds the document, replacing any earlier entry with the same id.
    pub async fn upsert(&self, document: &IndexedDocument) -> GroundworkResult<()> {
        let doc = Self::to_tantivy_doc(document);
        let mut writer = self.index_writer.lock().await;
        writer.delete_term(Term::from_field_u64(
            SchemaTools::document_fields().f_id,
            document.id,
        ));
        writer
            .add_document(doc)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        commit_with_retry(&mut writer).await
    }

    pub fn total_documents(&self) -> GroundworkResult<u64> {
        Ok(self.create_searcher()?.num_docs())
    }

    fn build_query(&self, request: &DocumentSearchRequest) -> GroundworkResult<Box<dyn Query>> {
        let f = SchemaTools::document_fields();
        let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if let Some(text) = request.query.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let query = self
                .query_parser
                .parse_query(text)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InvalidParameter))?;
            subqueries.push((Occur::Must, query));
        }

        for (field, value) in [
            (f.f_document_type, &request.document_type),
            (f.f_csi_division, &request.csi_division),
        ] {
            if let Some(value) = value {
                subqueries.push((
                    Occur::Must,
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, value),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
        }

        if subqueries.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        Ok(Box::new(BooleanQuery::new(subqueries)))
    }

    pub async fn search(
        &self,
        request: DocumentSearchRequest,
    ) -> GroundworkResult<DataPage<DocumentHit>> {
        let page = request.page.unwrap_or(1);
        let page_size = request
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        if page == 0 || page_size == 0 {
            return Err(raise_error!(
                "'page' and 'page_size' must be greater than 0.".into(),
                ErrorCode::InvalidParameter
            ));
        }

        let query = self.build_query(&request)?;
        let searcher = self.create_searcher()?;
        let offset = (page - 1) * page_size;
        let (top_docs, total) = searcher
            .search(
                &query,
                &(
                    TopDocs::with_limit(page_size as usize).and_offset(offset as usize),
                    Count,
                ),
            )
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;

        let f = SchemaTools::document_fields();
        let mut snippets = SnippetGenerator::create(&searcher, &*query, f.f_text)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        snippets.set_max_num_chars(SNIPPET_MAX_CHARS);

        let mut items = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc_async(address)
                .await
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let text_of = |field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            };
            items.push(DocumentHit {
                document_id: doc.get_first(f.f_id).and_then(|v| v.as_u64()).unwrap_or_default(),
                file_name: text_of(f.f_file_name).unwrap_or_default(),
                file_path: text_of(f.f_file_path).unwrap_or_default(),
                document_type: text_of(f.f_document_type).unwrap_or_default(),
                csi_division: text_of(f.f_csi_division),
                score,
                snippet: snippets.snippet_from_doc(&doc).fragment().to_string(),
            });
        }

        let total = total as u64;
        Ok(DataPage {
            current_page: Some(page),
            page_size: Some(page_size),
            total_items: total,
            items,
            total_pages: Some(total.div_ceil(page_size)),
        })
    }

    fn create_searcher(&self) -> GroundworkResult<Searcher> {
        self.reader
            .reload()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(self.reader.searcher())
    }
}

/// Commits pending operations; IO errors are retried with a growing delay.
async fn commit_with_retry(writer: &mut IndexWriter) -> GroundworkResult<()> {
    const MAX_RETRIES: u64 = 3;
    const RETRY_DELAY_MS: u64 = 500;

    let mut attempt = 0;
    loop {
        match writer.commit() {
            Ok(_) => return Ok(()),
            Err(tantivy::TantivyError::IoError(e)) if attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(
                    "Index commit failed (attempt {}/{}): {:?}",
                    attempt,
                    MAX_RETRIES + 1,
                    e
                );
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt)).await;
            }
            Err(e) => {
                let _ = writer.rollback();
                return Err(raise_error!(
                    format!("Index commit failed: {:#?}", e),
                    ErrorCode::StorageFailure
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::indexer::document::DocumentClassification;

    fn document(id: u64, name: &str, text: &str, document_type: &str) -> IndexedDocument {
        IndexedDocument {
            id,
            file_name: name.into(),
            file_path: format!("/data/{name}"),
            text: text.into(),
            keywords: vec!["concrete".into()],
            classification: DocumentClassification {
                document_type: document_type.into(),
                csi_division: Some("03".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn finds_documents_by_text_and_filters() {
        let index = DocumentIndexManager::in_memory();
        index
            .upsert(&document(1, "rfi-012.txt", "Clarify slab edge embed plates", "rfi"))
            .await
            .unwrap();
        index
            .upsert(&document(2, "pour-log.txt", "Slab pour scheduled Monday", "general"))
            .await
            .unwrap();

        let hits = index
            .search(DocumentSearchRequest {
                query: Some("slab".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.total_items, 2);

        let rfis = index
            .search(DocumentSearchRequest {
                query: Some("slab".into()),
                document_type: Some("rfi".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rfis.total_items, 1);
        assert_eq!(rfis.items[0].document_id, 1);
        assert_eq!(rfis.items[0].csi_division.as_deref(), Some("03"));
    }

    #[tokio::test]
    async fn upsert_replaces_previous_entry() {
        let index = DocumentIndexManager::in_memory();
        index.upsert(&document(7, "a.txt", "first", "general")).await.unwrap();
        index.upsert(&document(7, "a.txt", "second", "general")).await.unwrap();
        assert_eq!(index.total_documents().unwrap(), 1);

        let all = index.search(DocumentSearchRequest::default()).await.unwrap();
        assert_eq!(all.items.len(), 1);
    }

    #[tokio::test]
    async fn rejects_zero_page() {
        let index = DocumentIndexManager::in_memory();
        let result = index
            .search(DocumentSearchRequest {
                page: Some(0),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
    }
}
