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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use native_db::Database;
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::indexer::document::IndexedDocument;
use crate::modules::indexer::extract::{content_hash, extract};
use crate::modules::indexer::manager::DocumentIndexManager;
use crate::{id, raise_error, utc_now};

pub mod classify;
pub mod document;
pub mod entities;
pub mod extract;
pub mod fields;
pub mod keywords;
pub mod manager;
pub mod schema;

/// Result of indexing one file.
#[derive(Clone, Debug)]
pub struct IndexOutcome {
    pub document: IndexedDocument,
    /// True when a stored document with identical bytes was returned as-is.
    pub reused: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct IndexFailure {
    pub path: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct DirectoryIndexReport {
    pub total: u64,
    pub indexed: u64,
    pub reused: u64,
    /// Files with no text extractor.
    pub unsupported: u64,
    pub errors: Vec<IndexFailure>,
    pub duration_ms: u64,
}

/// Turns files into `IndexedDocument`s and keeps the search index in step.
pub struct DocumentIndexer {
    db: Arc<Database<'static>>,
    search: Arc<DocumentIndexManager>,
    skip_existing: bool,
    extractions: AtomicUsize,
}

impl DocumentIndexer {
    pub fn new(
        db: Arc<Database<'static>>,
        search: Arc<DocumentIndexManager>,
        skip_existing: bool,
    ) -> Self {
        Self {
            db,
            search,
            skip_existing,
            extractions: AtomicUsize::new(0),
        }
    }

    /// Number of files that went through text extraction.
    pub fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::Relaxed)
    }

    pub async fn index_file(&self, path: &Path) -> GroundworkResult<IndexOutcome> {
        let started = Instant::now();
        let path_str = path.to_string_lossy().to_string();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::ResourceNotFound
            } else {
                ErrorCode::StorageFailure
            };
            raise_error!(format!("Failed to read {:?}: {}", path, e), code)
        })?;

        let hash_input = bytes.clone();
        let hash = tokio::task::spawn_blocking(move || content_hash(&hash_input))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;

        if self.skip_existing {
            if let Some(existing) = IndexedDocument::find_unchanged(&self.db, &path_str, &hash).await? {
                debug!(path = %path_str, document_id = existing.id, "Content unchanged, reusing document");
                return Ok(IndexOutcome {
                    document: existing,
                    reused: true,
                });
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path_str.clone());
        let file_size = bytes.len() as u64;
        self.extractions.fetch_add(1, Ordering::Relaxed);
        let analysis_path = path.to_path_buf();
        let analysis_name = file_name.clone();
        let (content, entities, classification, keywords) =
            tokio::task::spawn_blocking(move || -> GroundworkResult<_> {
                let content = extract(&bytes, &analysis_name)?;
                let entities = entities::extract_entities(&content.text, &analysis_name);
                let classification = classify::classify(
                    &entities,
                    &content.text,
                    &analysis_name,
                    &analysis_path,
                );
                let keywords = keywords::top_keywords(&content.text);
                Ok((content, entities, classification, keywords))
            })
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))??;

        let now = utc_now!();
        let document = IndexedDocument {
            id: id!(64),
            file_path: path_str.clone(),
            content_hash: hash,
            file_name,
            file_size,
            mime_type: content.mime_type,
            text: content.text,
            text_truncated: content.truncated,
            page_count: content.page_count,
            metadata: content.metadata,
            entities,
            classification,
            keywords,
            processing_ms: started.elapsed().as_millis() as u64,
            processed_at: now,
            created_at: now,
        };
        let saved = IndexedDocument::save(&self.db, document).await?;
        if let Err(e) = self.search.upsert(&saved).await {
            warn!(document_id = saved.id, "Search index update failed: {}", e);
        }
        info!(
            path = %path_str,
            document_id = saved.id,
            document_type = %saved.classification.document_type,
            "Indexed document in {} ms",
            saved.processing_ms
        );
        Ok(IndexOutcome {
            document: saved,
            reused: false,
        })
    }

    /// Indexes every file below `dir` in concurrent batches of `batch_size`.
    /// A failing file is recorded in the report and never stops the run.
    pub async fn index_directory(
        &self,
        dir: &Path,
        batch_size: usize,
    ) -> GroundworkResult<DirectoryIndexReport> {
        let started = Instant::now();
        let root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))??;

        let total = files.len();
        let mut report = DirectoryIndexReport {
            total: total as u64,
            ..Default::default()
        };
        let mut processed = 0usize;
        for batch in files.chunks(batch_size.max(1)) {
            let results =
                futures::future::join_all(batch.iter().map(|path| self.index_file(path))).await;
            for (path, result) in batch.iter().zip(results) {
                match result {
                    Ok(outcome) if outcome.reused => report.reused += 1,
                    Ok(_) => report.indexed += 1,
                    Err(e) if e.code() == ErrorCode::UnsupportedType => report.unsupported += 1,
                    Err(e) => {
                        warn!(path = ?path, "Failed to index file: {}", e);
                        report.errors.push(IndexFailure {
                            path: path.to_string_lossy().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            processed += batch.len();
            info!("Indexed {}/{} files under {:?}", processed, total, dir);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }
}

/// Regular files below `dir`, recursively, in a stable order.
fn collect_files(dir: &Path) -> GroundworkResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| {
            raise_error!(
                format!("Failed to read directory {:?}: {}", current, e),
                ErrorCode::ResourceNotFound
            )
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_dir() => pending.push(path),
                Ok(t) if t.is_file() => files.push(path),
                _ => {}
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::in_memory_database;
    use crate::modules::indexer::extract::tests::sample_pdf;

    fn indexer(skip_existing: bool) -> DocumentIndexer {
        DocumentIndexer::new(
            in_memory_database(),
            Arc::new(DocumentIndexManager::in_memory()),
            skip_existing,
        )
    }

    #[tokio::test]
    async fn unchanged_bytes_are_not_reprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfi.txt");
        std::fs::write(&path, "RFI #045 slab edge detail, see A-101").unwrap();

        let indexer = indexer(true);
        let first = indexer.index_file(&path).await.unwrap();
        assert!(!first.reused);
        assert_eq!(first.document.entities.rfi_numbers, vec!["RFI-045"]);
        assert_eq!(first.document.classification.document_type, "rfi");

        let second = indexer.index_file(&path).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.document.id, first.document.id);
        assert_eq!(second.document.content_hash, first.document.content_hash);
        assert_eq!(indexer.extraction_count(), 1);

        std::fs::write(&path, "RFI #046 revised").unwrap();
        let third = indexer.index_file(&path).await.unwrap();
        assert!(!third.reused);
        // Same path keeps its record.
        assert_eq!(third.document.id, first.document.id);
        assert_eq!(indexer.extraction_count(), 2);
    }

    #[tokio::test]
    async fn identical_bytes_at_another_path_get_their_own_document() {
        let dir = tempfile::tempdir().unwrap();
        let submittals = dir.path().join("Submittals");
        let rfis = dir.path().join("RFIs");
        std::fs::create_dir_all(&submittals).unwrap();
        std::fs::create_dir_all(&rfis).unwrap();
        let a = submittals.join("a.txt");
        let b = rfis.join("b.txt");
        std::fs::write(&a, "Pour log for level 2").unwrap();
        std::fs::write(&b, "Pour log for level 2").unwrap();

        let indexer = indexer(true);
        let first = indexer.index_file(&a).await.unwrap();
        let second = indexer.index_file(&b).await.unwrap();
        assert!(!second.reused);
        assert_ne!(second.document.id, first.document.id);
        assert_eq!(second.document.file_path, b.to_string_lossy());
        assert_eq!(
            second.document.classification.folder_type.as_deref(),
            Some("rfis")
        );

        std::fs::write(&a, "Totally different RFI-9 content").unwrap();
        indexer.index_file(&a).await.unwrap();
        let stored = IndexedDocument::get(&indexer.db, second.document.id).await.unwrap();
        assert_eq!(stored.text, "Pour log for level 2");
        assert_eq!(stored.content_hash, first.document.content_hash);
    }

    #[tokio::test]
    async fn without_skip_existing_every_call_extracts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Pour log").unwrap();

        let indexer = indexer(false);
        indexer.index_file(&path).await.unwrap();
        indexer.index_file(&path).await.unwrap();
        assert_eq!(indexer.extraction_count(), 2);
    }

    #[tokio::test]
    async fn directory_run_collects_per_file_results() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Submittals");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.txt"), "Submittal SUB-003 door hardware").unwrap();
        std::fs::write(nested.join("b.pdf"), sample_pdf(&["Sheet E-001 lighting"], "E-001")).unwrap();
        std::fs::write(nested.join("broken.pdf"), b"%PDF-1.5 not really").unwrap();
        std::fs::write(dir.path().join("photo.heic"), [0u8, 1, 2]).unwrap();

        let indexer = indexer(true);
        let report = indexer.index_directory(dir.path(), 2).await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.unsupported, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].path.ends_with("broken.pdf"));

        let again = indexer.index_directory(dir.path(), 2).await.unwrap();
        assert_eq!(again.reused, 2);
        assert_eq!(again.indexed, 0);
    }
}
