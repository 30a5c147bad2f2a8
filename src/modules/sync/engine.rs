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

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{stream, StreamExt};
use native_db::Database;
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::modules::account::{ConnectedAccount, CycleOutcome};
use crate::modules::database::manager::DB_MANAGER;
use crate::modules::error::code::{Disposition, ErrorCode};
use crate::modules::error::{GroundworkError, GroundworkResult};
use crate::modules::indexer::manager::DOCUMENT_INDEX_MANAGER;
use crate::modules::indexer::DocumentIndexer;
use crate::modules::ingest::storage::AttachmentStore;
use crate::modules::ingest::{categorize, download_decision, DownloadDecision};
use crate::modules::message::attachment::MessageAttachment;
use crate::modules::message::{MessageSource, SyncedMessage};
use crate::modules::oracle::{enrich_message, ClassificationOracle, HttpOracle};
use crate::modules::provider::retry::RetryPolicy;
use crate::modules::provider::{ListQuery, ProviderAdapter, ProviderMessage, Providers};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::modules::sync::job::{JobCompletion, SyncJob, SyncJobStatus, SyncJobType};
use crate::modules::utils::encrypt::{CredentialVault, VAULT};
use crate::{id, raise_error, utc_now};

/// Tokens expiring within this window are refreshed before the cycle.
pub const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

/// File types the document indexer has an extractor for.
const INDEXABLE_FILE_TYPES: &[&str] = &["pdf", "text"];

pub static SYNC_ENGINE: LazyLock<Arc<SyncEngine>> =
    LazyLock::new(|| Arc::new(SyncEngine::from_settings()));

/// Whether a token expiring at `expires_at` must be refreshed at `now`.
/// Unknown expiry is trusted until the provider rejects it.
pub fn needs_refresh(expires_at: Option<i64>, now: i64) -> bool {
    match expires_at {
        Some(expires_at) => expires_at - now <= REFRESH_WINDOW_MS,
        None => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub cycle_timeout: Duration,
    pub page_size: u32,
    pub max_pages: u32,
    pub initial_sync_days: i64,
    pub download_attachments: bool,
    pub download_concurrency: usize,
    pub max_attachment_attempts: u32,
    pub known_projects: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            cycle_timeout: Duration::from_secs(SETTINGS.groundwork_sync_timeout_secs.max(1)),
            page_size: SETTINGS.groundwork_sync_page_size.max(1),
            max_pages: SETTINGS.groundwork_sync_max_pages.max(1),
            initial_sync_days: SETTINGS.groundwork_initial_sync_days,
            download_attachments: SETTINGS.groundwork_download_attachments,
            download_concurrency: (SETTINGS.groundwork_download_concurrency as usize).max(1),
            max_attachment_attempts: SETTINGS.groundwork_max_retries.max(1),
            known_projects: SETTINGS.groundwork_known_projects.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

/// An attachment about to be ingested. Polled attachments carry a provider
/// id and are downloaded; webhook attachments arrive with their bytes.
#[derive(Clone, Debug, Default)]
pub struct IncomingAttachment {
    pub provider_attachment_id: Option<String>,
    pub filename: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub is_inline: bool,
    pub content: Option<Bytes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentTally {
    pub stored: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl AttachmentTally {
    fn merge(&mut self, other: &AttachmentTally) {
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    fn add(&mut self, outcome: AttachmentOutcome) {
        match outcome {
            AttachmentOutcome::Stored => self.stored += 1,
            AttachmentOutcome::Skipped => self.skipped += 1,
            AttachmentOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentOutcome {
    Stored,
    Skipped,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    /// Already stored. `restored` counts attachments whose rows were missing
    /// and have been recreated from the provider listing.
    Duplicate { restored: AttachmentTally },
    Stored {
        message: SyncedMessage,
        attachments: AttachmentTally,
    },
}

/// What one cycle did. Returned to manual-sync callers and collected by the
/// scheduler.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct SyncResult {
    pub account_id: u64,
    pub job_id: u64,
    pub status: SyncJobStatus,
    pub messages_synced: u64,
    pub attachments_processed: u64,
    pub failed_items: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub error_code: Option<u32>,
    /// The account must be reconnected before it syncs again.
    pub needs_reauth: bool,
}

#[derive(Debug, Default)]
struct CycleProgress {
    total: u64,
    new_messages: u64,
    duplicates: u64,
    malformed: u64,
    failed_messages: u64,
    pages: u64,
    attachments: AttachmentTally,
    retried: AttachmentTally,
    /// Newest message seen this cycle as `(provider id, received_at)`.
    newest: Option<(String, i64)>,
    /// False once a folder was cut short by the page cap.
    exhausted: bool,
}

impl CycleProgress {
    fn observe(&mut self, message: &ProviderMessage) {
        let newer = self
            .newest
            .as_ref()
            .is_none_or(|(_, at)| message.received_at > *at);
        if newer {
            self.newest = Some((message.provider_message_id.clone(), message.received_at));
        }
    }

    fn summary(&self) -> serde_json::Value {
        json!({
            "messages_new": self.new_messages,
            "duplicates": self.duplicates,
            "malformed": self.malformed,
            "failed_messages": self.failed_messages,
            "pages": self.pages,
            "attachments_stored": self.attachments.stored + self.retried.stored,
            "attachments_skipped": self.attachments.skipped + self.retried.skipped,
            "attachments_failed": self.attachments.failed + self.retried.failed,
            "attachments_retried": self.retried.stored,
        })
    }
}

/// Runs sync cycles for connected accounts. One cycle per account at a time.
pub struct SyncEngine {
    db: Arc<Database<'static>>,
    providers: Providers,
    vault: Arc<CredentialVault>,
    store: AttachmentStore,
    indexer: Option<Arc<DocumentIndexer>>,
    oracle: Option<Arc<dyn ClassificationOracle>>,
    options: SyncOptions,
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database<'static>>,
        providers: Providers,
        vault: Arc<CredentialVault>,
        store: AttachmentStore,
        indexer: Option<Arc<DocumentIndexer>>,
        oracle: Option<Arc<dyn ClassificationOracle>>,
        options: SyncOptions,
    ) -> Self {
        Self {
            db,
            providers,
            vault,
            store,
            indexer,
            oracle,
            options,
            locks: DashMap::new(),
        }
    }

    pub fn from_settings() -> Self {
        let db = DB_MANAGER.meta_db().clone();
        let indexer = SETTINGS.groundwork_index_attachments.then(|| {
            Arc::new(DocumentIndexer::new(
                db.clone(),
                DOCUMENT_INDEX_MANAGER.clone(),
                SETTINGS.groundwork_index_skip_existing,
            ))
        });
        Self::new(
            db,
            Providers::from_settings(),
            VAULT.clone(),
            AttachmentStore::new(&DATA_DIR_MANAGER.attachments_dir, "/files/attachments"),
            indexer,
            HttpOracle::from_settings(),
            SyncOptions::default(),
        )
    }

    pub fn db(&self) -> &Arc<Database<'static>> {
        &self.db
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    fn lock_for(&self, account_id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs one full cycle for the account and records it as a `SyncJob`.
    ///
    /// Only lookup failures before the job exists come back as `Err`; a
    /// failed cycle is reported through the returned `SyncResult`.
    pub async fn sync_account(
        &self,
        account_id: u64,
        trigger: SyncTrigger,
    ) -> GroundworkResult<SyncResult> {
        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        let account = ConnectedAccount::get(&self.db, account_id).await?;
        if !account.is_active {
            return Err(raise_error!(
                format!("Connected account id='{account_id}' is not active"),
                ErrorCode::InvalidParameter
            ));
        }
        let job_type = match (trigger, account.last_sync_cursor_at) {
            (SyncTrigger::Manual, _) => SyncJobType::Manual,
            (SyncTrigger::Scheduled, None) => SyncJobType::Full,
            (SyncTrigger::Scheduled, Some(_)) => SyncJobType::Incremental,
        };
        let job = SyncJob::start(&self.db, account.id, job_type, self.options.retry.max_attempts)
            .await?;
        ConnectedAccount::mark_syncing(&self.db, account.id).await?;
        info!(
            account_id = account.id,
            job_id = job.id,
            provider = %account.provider,
            ?job_type,
            "Sync cycle started"
        );

        let started = Instant::now();
        let mut progress = CycleProgress {
            exhausted: true,
            ..Default::default()
        };
        let outcome = tokio::time::timeout(
            self.options.cycle_timeout,
            self.run_cycle(&account, &mut progress),
        )
        .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(raise_error!(
                format!(
                    "Sync cycle exceeded the {}s deadline",
                    self.options.cycle_timeout.as_secs()
                ),
                ErrorCode::SyncTimeout
            )),
        };

        self.finalize(&account, &job, progress, failure, started).await
    }

    async fn finalize(
        &self,
        account: &ConnectedAccount,
        job: &SyncJob,
        progress: CycleProgress,
        failure: Option<GroundworkError>,
        started: Instant,
    ) -> GroundworkResult<SyncResult> {
        let needs_reauth = failure
            .as_ref()
            .is_some_and(|e| e.code().requires_reauth());
        let cursor = match (&failure, progress.exhausted) {
            (None, true) => progress
                .newest
                .clone()
                .map(|(message_id, at)| (Some(message_id), at)),
            _ => None,
        };
        let attachments_processed = progress.attachments.stored + progress.retried.stored;
        let failed_items = progress.malformed + progress.failed_messages;

        ConnectedAccount::finish_cycle(
            &self.db,
            account.id,
            CycleOutcome {
                messages_synced: progress.new_messages,
                attachments_processed,
                cursor,
                error: failure.as_ref().map(|e| e.message()),
                needs_reauth,
            },
        )
        .await?;
        let job = SyncJob::finish(
            &self.db,
            job.id,
            JobCompletion {
                total_items: progress.total,
                processed_items: progress.new_messages + progress.duplicates,
                failed_items,
                retry_count: progress.retried.stored as u32,
                error: failure.as_ref().map(|e| (e.message(), e.code())),
                results: Some(progress.summary()),
            },
        )
        .await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &failure {
            None => info!(
                account_id = account.id,
                job_id = job.id,
                messages = progress.new_messages,
                attachments = attachments_processed,
                duration_ms,
                "Sync cycle finished"
            ),
            Some(e) => error!(
                account_id = account.id,
                job_id = job.id,
                code = ?e.code(),
                needs_reauth,
                "Sync cycle failed: {}",
                e
            ),
        }

        Ok(SyncResult {
            account_id: account.id,
            job_id: job.id,
            status: job.status,
            messages_synced: progress.new_messages,
            attachments_processed,
            failed_items,
            duration_ms,
            error: failure.as_ref().map(|e| e.message()),
            error_code: failure.as_ref().map(|e| e.code() as u32),
            needs_reauth,
        })
    }

    async fn run_cycle(
        &self,
        account: &ConnectedAccount,
        progress: &mut CycleProgress,
    ) -> GroundworkResult<()> {
        let access_token = self.ensure_access_token(account).await?;
        let adapter = self.providers.get(account.provider);

        if self.options.download_attachments {
            progress.retried = self
                .retry_pending(account, adapter.as_ref(), &access_token)
                .await?;
        }

        let since = account.last_sync_cursor_at.unwrap_or_else(|| {
            utc_now!() - self.options.initial_sync_days.max(0) * 24 * 60 * 60 * 1000
        });
        for folder in account.folders() {
            self.sync_folder(account, adapter.as_ref(), &access_token, &folder, since, progress)
                .await?;
        }
        Ok(())
    }

    async fn sync_folder(
        &self,
        account: &ConnectedAccount,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        folder: &str,
        since: i64,
        progress: &mut CycleProgress,
    ) -> GroundworkResult<()> {
        let mut query = ListQuery {
            folder: folder.to_string(),
            since: Some(since),
            page_token: None,
            page_size: self.options.page_size,
        };
        let mut pages = 0;
        loop {
            let page = self
                .options
                .retry
                .run("list_messages", || adapter.list_messages(access_token, &query))
                .await?;
            pages += 1;
            progress.pages += 1;
            debug!(
                account_id = account.id,
                folder,
                page = pages,
                messages = page.messages.len(),
                "Listed page"
            );

            for malformed in &page.malformed {
                warn!(
                    account_id = account.id,
                    provider_message_id = %malformed.provider_message_id,
                    "Skipping malformed message: {}",
                    malformed.reason
                );
                progress.total += 1;
                progress.malformed += 1;
            }

            for message in page.messages {
                progress.total += 1;
                progress.observe(&message);
                match self
                    .ingest_polled(account, adapter, access_token, message)
                    .await
                {
                    Ok(IngestOutcome::Duplicate { restored }) => {
                        progress.duplicates += 1;
                        progress.attachments.merge(&restored);
                    }
                    Ok(IngestOutcome::Stored { attachments, .. }) => {
                        progress.new_messages += 1;
                        progress.attachments.merge(&attachments);
                    }
                    Err(e) if e.code().disposition() == Disposition::Skip => {
                        warn!(account_id = account.id, "Skipping message: {}", e);
                        progress.failed_messages += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            match page.next_page_token {
                None => break,
                Some(token) if pages < self.options.max_pages => query.page_token = Some(token),
                Some(_) => {
                    warn!(
                        account_id = account.id,
                        folder,
                        max_pages = self.options.max_pages,
                        "Page cap reached; cursor held for the next cycle"
                    );
                    progress.exhausted = false;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Returns a usable plaintext access token, refreshing and persisting a
    /// new one when the stored token is about to expire.
    async fn ensure_access_token(&self, account: &ConnectedAccount) -> GroundworkResult<String> {
        if !needs_refresh(account.token_expires_at, utc_now!()) {
            return self.vault.decrypt(&account.access_token);
        }
        let encrypted = account.refresh_token.as_deref().ok_or_else(|| {
            raise_error!(
                format!(
                    "Access token for account id='{}' expired and no refresh token is stored",
                    account.id
                ),
                ErrorCode::MissingRefreshToken
            )
        })?;
        let refresh_token = self.vault.decrypt(encrypted)?;
        let adapter = self.providers.get(account.provider);
        let tokens = self
            .options
            .retry
            .run("refresh_token", || adapter.refresh_token(&refresh_token))
            .await?;

        let access = self.vault.encrypt(&tokens.access_token)?;
        let refresh = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.vault.encrypt(t))
            .transpose()?;
        ConnectedAccount::store_tokens(
            &self.db,
            account.id,
            access,
            refresh,
            Some(tokens.expires_at),
        )
        .await?;
        debug!(account_id = account.id, expires_at = tokens.expires_at, "Access token refreshed");
        Ok(tokens.access_token)
    }

    async fn ingest_polled(
        &self,
        account: &ConnectedAccount,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        message: ProviderMessage,
    ) -> GroundworkResult<IngestOutcome> {
        if let Some(stored) =
            SyncedMessage::find_by_provider_id(&self.db, account.id, &message.provider_message_id)
                .await?
        {
            let restored = if message.has_attachments {
                self.restore_attachments(account, adapter, access_token, &stored)
                    .await?
            } else {
                AttachmentTally::default()
            };
            return Ok(IngestOutcome::Duplicate { restored });
        }
        let attachments = if message.has_attachments {
            self.list_incoming(adapter, access_token, &message.provider_message_id)
                .await?
        } else {
            Vec::new()
        };
        self.ingest_message(
            account,
            Some((adapter, access_token)),
            message,
            attachments,
            MessageSource::Poll,
        )
        .await
    }

    async fn list_incoming(
        &self,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        provider_message_id: &str,
    ) -> GroundworkResult<Vec<IncomingAttachment>> {
        Ok(self
            .options
            .retry
            .run("list_attachments", || {
                adapter.list_attachments(access_token, provider_message_id)
            })
            .await?
            .into_iter()
            .map(|meta| IncomingAttachment {
                provider_attachment_id: Some(meta.provider_attachment_id),
                filename: meta.filename,
                size: meta.size,
                mime_type: meta.mime_type,
                is_inline: meta.is_inline,
                content: None,
            })
            .collect())
    }

    /// Recreates attachment rows a stored message is missing, then downloads
    /// them. Rows already present are left to the retry sweep.
    async fn restore_attachments(
        &self,
        account: &ConnectedAccount,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
        stored: &SyncedMessage,
    ) -> GroundworkResult<AttachmentTally> {
        let rows = MessageAttachment::list_for_message(&self.db, stored.id).await?;
        if !rows.is_empty() && rows.len() >= stored.attachment_count as usize {
            return Ok(AttachmentTally::default());
        }
        let candidates = self
            .list_incoming(adapter, access_token, &stored.provider_message_id)
            .await?
            .into_iter()
            .map(|attachment| attachment_row(stored.id, account.id, &attachment))
            .collect();
        let written = MessageAttachment::insert_missing(&self.db, stored.id, candidates).await?;
        if written.is_empty() {
            return Ok(AttachmentTally::default());
        }
        warn!(
            account_id = account.id,
            message_id = stored.id,
            restored = written.len(),
            "Recreated missing attachment rows"
        );
        if !self.options.download_attachments {
            return Ok(AttachmentTally::default());
        }
        Ok(self
            .process_attachments(
                Some((adapter, access_token)),
                &stored.provider_message_id,
                written.into_iter().map(|record| (record, None)).collect(),
            )
            .await)
    }

    /// Stores a message delivered by the inbound webhook.
    pub async fn ingest_inbound(
        &self,
        account: &ConnectedAccount,
        message: ProviderMessage,
        attachments: Vec<IncomingAttachment>,
    ) -> GroundworkResult<IngestOutcome> {
        self.ingest_message(account, None, message, attachments, MessageSource::Webhook)
            .await
    }

    async fn ingest_message(
        &self,
        account: &ConnectedAccount,
        remote: Option<(&dyn ProviderAdapter, &str)>,
        message: ProviderMessage,
        attachments: Vec<IncomingAttachment>,
        source: MessageSource,
    ) -> GroundworkResult<IngestOutcome> {
        let row = to_synced_message(account.id, message, attachments.len() as u32, source);
        let pending: Vec<(MessageAttachment, Option<Bytes>)> = attachments
            .into_iter()
            .map(|attachment| {
                let record = attachment_row(row.id, account.id, &attachment);
                (record, attachment.content)
            })
            .collect();
        let records = pending.iter().map(|(record, _)| record.clone()).collect();
        if !SyncedMessage::insert_if_absent(&self.db, row.clone(), records).await? {
            return Ok(IngestOutcome::Duplicate {
                restored: AttachmentTally::default(),
            });
        }

        let tally = if self.options.download_attachments || source == MessageSource::Webhook {
            self.process_attachments(remote, &row.provider_message_id, pending)
                .await
        } else {
            AttachmentTally::default()
        };

        if let Some(oracle) = &self.oracle {
            let db = self.db.clone();
            let oracle = oracle.clone();
            let message = row.clone();
            let known_projects = self.options.known_projects.clone();
            tokio::spawn(async move {
                enrich_message(&db, oracle.as_ref(), &message, &known_projects).await;
            });
        }

        debug!(
            account_id = account.id,
            message_id = row.id,
            attachments = row.attachment_count,
            "Stored message"
        );
        Ok(IngestOutcome::Stored {
            message: row,
            attachments: tally,
        })
    }

    async fn process_attachments(
        &self,
        remote: Option<(&dyn ProviderAdapter, &str)>,
        provider_message_id: &str,
        pending: Vec<(MessageAttachment, Option<Bytes>)>,
    ) -> AttachmentTally {
        let outcomes: Vec<AttachmentOutcome> = stream::iter(pending)
            .map(|(record, content)| {
                self.fetch_and_store(remote, provider_message_id, record, content)
            })
            .buffer_unordered(self.options.download_concurrency)
            .collect()
            .await;
        let mut tally = AttachmentTally::default();
        outcomes.into_iter().for_each(|o| tally.add(o));
        tally
    }

    /// Downloads (or takes the inline bytes of), stores and indexes one
    /// attachment. Failures are recorded on the row and never propagate.
    async fn fetch_and_store(
        &self,
        remote: Option<(&dyn ProviderAdapter, &str)>,
        provider_message_id: &str,
        record: MessageAttachment,
        content: Option<Bytes>,
    ) -> AttachmentOutcome {
        if let DownloadDecision::Reject(reason) =
            download_decision(&record.filename, record.size, record.mime_type.as_deref())
        {
            return self.skip(&record, reason).await;
        }

        let bytes = match content {
            Some(bytes) => bytes,
            None => {
                let (Some((adapter, access_token)), Some(attachment_id)) =
                    (remote, record.provider_attachment_id.as_deref())
                else {
                    return self
                        .fail(&record, "no content and no provider attachment id".into())
                        .await;
                };
                match self
                    .options
                    .retry
                    .run("download_attachment", || {
                        adapter.download_attachment(access_token, provider_message_id, attachment_id)
                    })
                    .await
                {
                    Ok(bytes) => bytes,
                    Err(e) => return self.fail(&record, e.message()).await,
                }
            }
        };

        // Listed sizes are advisory; gate again on the real byte count.
        if let DownloadDecision::Reject(reason) = download_decision(
            &record.filename,
            bytes.len() as u64,
            record.mime_type.as_deref(),
        ) {
            return self.skip(&record, reason).await;
        }

        let stored = match self.store.store(&bytes, &record.filename).await {
            Ok(stored) => stored,
            Err(e) => return self.fail(&record, e.message()).await,
        };
        let path = stored.path.clone();
        if let Err(e) = MessageAttachment::mark_downloaded(&self.db, record.id, stored).await {
            error!(attachment_id = record.id, "Failed to record download: {}", e);
            return AttachmentOutcome::Failed;
        }

        self.index_attachment(&record, &path).await;
        AttachmentOutcome::Stored
    }

    async fn index_attachment(&self, record: &MessageAttachment, path: &str) {
        let Some(indexer) = &self.indexer else {
            return;
        };
        let document_id = if INDEXABLE_FILE_TYPES.contains(&record.file_type.as_str()) {
            match indexer.index_file(std::path::Path::new(path)).await {
                Ok(outcome) => Some(outcome.document.id),
                Err(e) if e.code() == ErrorCode::UnsupportedType => None,
                Err(e) => {
                    warn!(attachment_id = record.id, "Indexing failed: {}", e);
                    if let Err(e) =
                        MessageAttachment::mark_index_failed(&self.db, record.id, e.message()).await
                    {
                        warn!(attachment_id = record.id, "Failed to record indexing error: {}", e);
                    }
                    return;
                }
            }
        } else {
            None
        };
        if let Err(e) = MessageAttachment::mark_processed(&self.db, record.id, document_id).await {
            warn!(attachment_id = record.id, "Failed to record processing: {}", e);
        }
    }

    async fn skip(&self, record: &MessageAttachment, reason: String) -> AttachmentOutcome {
        info!(
            attachment_id = record.id,
            filename = %record.filename,
            "Attachment not downloaded: {}",
            reason
        );
        if let Err(e) = MessageAttachment::mark_skipped(&self.db, record.id, reason).await {
            warn!(attachment_id = record.id, "Failed to record skip: {}", e);
        }
        AttachmentOutcome::Skipped
    }

    async fn fail(&self, record: &MessageAttachment, reason: String) -> AttachmentOutcome {
        warn!(
            attachment_id = record.id,
            filename = %record.filename,
            "Attachment download failed: {}",
            reason
        );
        if let Err(e) = MessageAttachment::mark_failed(&self.db, record.id, reason).await {
            warn!(attachment_id = record.id, "Failed to record failure: {}", e);
        }
        AttachmentOutcome::Failed
    }

    /// Re-attempts attachments earlier cycles failed to download or index.
    async fn retry_pending(
        &self,
        account: &ConnectedAccount,
        adapter: &dyn ProviderAdapter,
        access_token: &str,
    ) -> GroundworkResult<AttachmentTally> {
        let pending = MessageAttachment::list_retryable(
            &self.db,
            account.id,
            self.options.max_attachment_attempts,
        )
        .await?;
        let mut tally = AttachmentTally::default();
        if pending.is_empty() {
            return Ok(tally);
        }
        debug!(account_id = account.id, count = pending.len(), "Retrying pending attachments");
        for record in pending {
            if let (true, Some(path)) = (record.downloaded, record.storage_path.clone()) {
                self.index_attachment(&record, &path).await;
                continue;
            }
            let message = match SyncedMessage::get(&self.db, record.message_id).await {
                Ok(message) => message,
                Err(e) => {
                    warn!(attachment_id = record.id, "Parent message unavailable: {}", e);
                    continue;
                }
            };
            let outcome = self
                .fetch_and_store(
                    Some((adapter, access_token)),
                    &message.provider_message_id,
                    record,
                    None,
                )
                .await;
            tally.add(outcome);
        }
        Ok(tally)
    }
}

fn attachment_row(
    message_id: u64,
    account_id: u64,
    attachment: &IncomingAttachment,
) -> MessageAttachment {
    let category = categorize(&attachment.filename, attachment.mime_type.as_deref());
    MessageAttachment::new(
        message_id,
        account_id,
        attachment.provider_attachment_id.clone(),
        attachment.filename.clone(),
        attachment.size,
        attachment.mime_type.clone(),
        attachment.is_inline,
        category,
    )
}

fn to_synced_message(
    account_id: u64,
    message: ProviderMessage,
    attachment_count: u32,
    source: MessageSource,
) -> SyncedMessage {
    let now = utc_now!();
    SyncedMessage {
        id: id!(64),
        account_id,
        provider_message_id: message.provider_message_id,
        thread_id: message.thread_id,
        subject: message.subject,
        from_address: message.from_address,
        from_name: message.from_name,
        to: message.to,
        cc: message.cc,
        snippet: message.snippet,
        body_text: message.body_text,
        body_html: message.body_html,
        received_at: message.received_at,
        sent_at: message.sent_at,
        is_read: message.is_read,
        is_important: message.is_important,
        attachment_count,
        source,
        created_at: now,
        updated_at: now,
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modules::account::{ConnectionGrant, ProviderKind, SyncStatus};
    use crate::modules::database::in_memory_database;
    use crate::modules::indexer::extract::tests::sample_pdf;
    use crate::modules::indexer::manager::DocumentIndexManager;
    use crate::modules::provider::{AttachmentMeta, MalformedMessage, MessagePage, TokenSet};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// In-memory mailbox. Pages are served in order; `fail_page` makes the
    /// listing of that page index fail.
    #[derive(Default)]
    pub struct FakeProvider {
        pub pages: StdMutex<Vec<Vec<ProviderMessage>>>,
        pub malformed: StdMutex<Vec<MalformedMessage>>,
        pub attachments: StdMutex<HashMap<String, Vec<AttachmentMeta>>>,
        pub files: StdMutex<HashMap<String, Bytes>>,
        pub fail_page: StdMutex<Option<(usize, ErrorCode)>>,
        pub refresh_error: StdMutex<Option<ErrorCode>>,
        pub list_delay: StdMutex<Option<Duration>>,
        pub refresh_calls: AtomicU32,
        pub list_calls: AtomicU32,
    }

    impl FakeProvider {
        pub fn with_pages(pages: Vec<Vec<ProviderMessage>>) -> Arc<Self> {
            Arc::new(Self {
                pages: StdMutex::new(pages),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gmail
        }

        async fn refresh_token(&self, _refresh_token: &str) -> GroundworkResult<TokenSet> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = *self.refresh_error.lock().unwrap() {
                return Err(raise_error!("refresh rejected".into(), code));
            }
            Ok(TokenSet {
                access_token: "fresh-access".into(),
                refresh_token: Some("rotated-refresh".into()),
                expires_at: utc_now!() + 3_600_000,
            })
        }

        async fn list_messages(
            &self,
            access_token: &str,
            query: &ListQuery,
        ) -> GroundworkResult<MessagePage> {
            assert!(!access_token.is_empty());
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.list_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let index: usize = query
                .page_token
                .as_deref()
                .map(|t| t.parse().unwrap())
                .unwrap_or(0);
            if let Some((fail, code)) = *self.fail_page.lock().unwrap() {
                if fail == index {
                    return Err(raise_error!("listing failed".into(), code));
                }
            }
            let pages = self.pages.lock().unwrap();
            let since = query.since.unwrap_or(i64::MIN);
            let messages = pages
                .get(index)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|m| m.received_at > since)
                .collect();
            let malformed = if index == 0 {
                self.malformed.lock().unwrap().clone()
            } else {
                Vec::new()
            };
            Ok(MessagePage {
                messages,
                malformed,
                next_page_token: (index + 1 < pages.len()).then(|| (index + 1).to_string()),
            })
        }

        async fn list_attachments(
            &self,
            _access_token: &str,
            message_id: &str,
        ) -> GroundworkResult<Vec<AttachmentMeta>> {
            Ok(self
                .attachments
                .lock()
                .unwrap()
                .get(message_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn download_attachment(
            &self,
            _access_token: &str,
            _message_id: &str,
            attachment_id: &str,
        ) -> GroundworkResult<Bytes> {
            self.files
                .lock()
                .unwrap()
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| {
                    raise_error!("attachment gone".into(), ErrorCode::ResourceNotFound)
                })
        }

        async fn fetch_mailbox_address(&self, _access_token: &str) -> GroundworkResult<String> {
            Ok("pm@example.com".into())
        }
    }

    pub fn provider_message(id: &str, received_at: i64) -> ProviderMessage {
        ProviderMessage {
            provider_message_id: id.into(),
            subject: Some(format!("Message {id}")),
            from_address: Some("architect@example.com".into()),
            to: vec!["pm@example.com".into()],
            received_at,
            ..Default::default()
        }
    }

    pub fn test_vault() -> Arc<CredentialVault> {
        Arc::new(CredentialVault::new("test-password", 1_000))
    }

    pub fn test_options() -> SyncOptions {
        SyncOptions {
            cycle_timeout: Duration::from_secs(30),
            page_size: 10,
            max_pages: 20,
            initial_sync_days: 30,
            download_attachments: true,
            download_concurrency: 2,
            max_attachment_attempts: 3,
            known_projects: Vec::new(),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        }
    }

    pub struct Harness {
        pub engine: SyncEngine,
        pub provider: Arc<FakeProvider>,
        pub db: Arc<Database<'static>>,
        pub _dir: tempfile::TempDir,
    }

    pub fn harness(provider: Arc<FakeProvider>, options: SyncOptions) -> Harness {
        let db = in_memory_database();
        let dir = tempfile::tempdir().unwrap();
        let indexer = Arc::new(DocumentIndexer::new(
            db.clone(),
            Arc::new(DocumentIndexManager::in_memory()),
            true,
        ));
        let engine = SyncEngine::new(
            db.clone(),
            Providers::new(provider.clone(), provider.clone()),
            test_vault(),
            AttachmentStore::new(dir.path(), "/files/attachments"),
            Some(indexer),
            None,
            options,
        );
        Harness {
            engine,
            provider,
            db,
            _dir: dir,
        }
    }

    /// Connects an account whose access token expires `expires_in_ms` from now.
    pub async fn connect_account(
        db: &Arc<Database<'static>>,
        email: &str,
        expires_in_ms: i64,
    ) -> ConnectedAccount {
        let vault = test_vault();
        ConnectedAccount::connect(
            db,
            ConnectionGrant {
                user_id: 1,
                company_id: Some(1),
                provider: ProviderKind::Gmail,
                email: email.into(),
                access_token: vault.encrypt("stored-access").unwrap(),
                refresh_token: Some(vault.encrypt("stored-refresh").unwrap()),
                token_expires_at: Some(utc_now!() + expires_in_ms),
            },
        )
        .await
        .unwrap()
    }

    const HOUR: i64 = 3_600_000;

    #[test]
    fn refresh_window_is_inclusive() {
        let now = 1_000_000_000;
        assert!(needs_refresh(Some(now + 4 * 60_000), now));
        assert!(needs_refresh(Some(now + REFRESH_WINDOW_MS), now));
        assert!(needs_refresh(Some(now - 1), now));
        assert!(!needs_refresh(Some(now + 10 * 60_000), now));
        assert!(!needs_refresh(None, now));
    }

    #[tokio::test]
    async fn token_expiring_in_four_minutes_is_refreshed_before_listing() {
        let now = utc_now!();
        let h = harness(
            FakeProvider::with_pages(vec![vec![provider_message("m1", now - HOUR)]]),
            test_options(),
        );
        let account = connect_account(&h.db, "pm@example.com", 4 * 60_000).await;

        let result = h.engine.sync_account(account.id, SyncTrigger::Manual).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Success);
        assert_eq!(h.provider.refresh_calls.load(Ordering::SeqCst), 1);

        let stored = ConnectedAccount::get(&h.db, account.id).await.unwrap();
        let vault = test_vault();
        assert_eq!(vault.decrypt(&stored.access_token).unwrap(), "fresh-access");
        assert_eq!(
            vault.decrypt(stored.refresh_token.as_deref().unwrap()).unwrap(),
            "rotated-refresh"
        );
        assert!(stored.token_expires_at.unwrap() > now + 30 * 60_000);
    }

    #[tokio::test]
    async fn token_expiring_in_ten_minutes_is_not_refreshed() {
        let h = harness(FakeProvider::with_pages(vec![vec![]]), test_options());
        let account = connect_account(&h.db, "pm@example.com", 10 * 60_000).await;
        h.engine.sync_account(account.id, SyncTrigger::Manual).await.unwrap();
        assert_eq!(h.provider.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_marks_account_for_reauth() {
        let h = harness(FakeProvider::with_pages(vec![vec![]]), test_options());
        *h.provider.refresh_error.lock().unwrap() = Some(ErrorCode::AuthExpired);
        let account = connect_account(&h.db, "pm@example.com", 60_000).await;

        let result = h.engine.sync_account(account.id, SyncTrigger::Manual).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Error);
        assert!(result.needs_reauth);
        assert_eq!(result.error_code, Some(ErrorCode::AuthExpired as u32));
        assert_eq!(h.provider.list_calls.load(Ordering::SeqCst), 0);

        let stored = ConnectedAccount::get(&h.db, account.id).await.unwrap();
        assert!(stored.needs_reauth);
        assert_eq!(stored.last_sync_status, SyncStatus::Error);
        assert!(!stored.is_schedulable());
    }

    #[tokio::test]
    async fn repeated_cycles_never_duplicate_messages() {
        let now = utc_now!();
        let h = harness(
            FakeProvider::with_pages(vec![
                vec![provider_message("m1", now - 3 * HOUR), provider_message("m2", now - 2 * HOUR)],
                vec![provider_message("m3", now - HOUR)],
            ]),
            test_options(),
        );
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let first = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(first.messages_synced, 3);

        // Reset the cursor so the second cycle lists the same messages again.
        crate::modules::database::update_impl(
            &h.db,
            {
                let id = account.id;
                move |rw| {
                    rw.get()
                        .secondary::<ConnectedAccount>(
                            crate::modules::account::ConnectedAccountKey::id,
                            id,
                        )
                        .unwrap()
                        .ok_or_else(|| raise_error!("missing".into(), ErrorCode::ResourceNotFound))
                }
            },
            |current| {
                let mut updated = current.clone();
                updated.last_sync_cursor_at = None;
                Ok(updated)
            },
        )
        .await
        .unwrap();

        let second = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(second.status, SyncJobStatus::Success);
        assert_eq!(second.messages_synced, 0);
        assert_eq!(
            SyncedMessage::list_for_account(&h.db, account.id).await.unwrap().len(),
            3
        );
        let jobs = SyncJob::list_for_account(&h.db, account.id).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == SyncJobStatus::Success));
    }

    #[tokio::test]
    async fn failed_page_leaves_cursor_and_keeps_persisted_messages() {
        let now = utc_now!();
        let h = harness(
            FakeProvider::with_pages(vec![
                vec![provider_message("m1", now - 2 * HOUR)],
                vec![provider_message("m2", now - HOUR)],
            ]),
            test_options(),
        );
        *h.provider.fail_page.lock().unwrap() = Some((1, ErrorCode::Transient));
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let failed = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(failed.status, SyncJobStatus::Error);
        assert!(!failed.needs_reauth);
        let stored = ConnectedAccount::get(&h.db, account.id).await.unwrap();
        assert_eq!(stored.last_sync_cursor_at, None);
        assert_eq!(stored.last_sync_status, SyncStatus::Error);
        assert_eq!(stored.messages_synced, 1);

        *h.provider.fail_page.lock().unwrap() = None;
        let ok = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(ok.status, SyncJobStatus::Success);
        assert_eq!(ok.messages_synced, 1);
        let stored = ConnectedAccount::get(&h.db, account.id).await.unwrap();
        assert_eq!(stored.last_sync_cursor_at, Some(now - HOUR));
        assert_eq!(stored.last_sync_message_id.as_deref(), Some("m2"));
        assert_eq!(stored.last_sync_status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn malformed_messages_are_counted_and_skipped() {
        let now = utc_now!();
        let provider = FakeProvider::with_pages(vec![vec![provider_message("ok", now - HOUR)]]);
        *provider.malformed.lock().unwrap() = vec![MalformedMessage {
            provider_message_id: "bad".into(),
            reason: "missing payload".into(),
        }];
        let h = harness(provider, test_options());
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let result = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Success);
        assert_eq!(result.messages_synced, 1);
        assert_eq!(result.failed_items, 1);
    }

    #[tokio::test]
    async fn attachments_are_gated_stored_and_indexed() {
        let now = utc_now!();
        let mut message = provider_message("m1", now - HOUR);
        message.has_attachments = true;
        let provider = FakeProvider::with_pages(vec![vec![message]]);
        provider.attachments.lock().unwrap().insert(
            "m1".into(),
            vec![
                AttachmentMeta {
                    provider_attachment_id: "a-pdf".into(),
                    filename: "RFI-007 response.pdf".into(),
                    size: 2_000,
                    mime_type: Some("application/pdf".into()),
                    is_inline: false,
                },
                AttachmentMeta {
                    provider_attachment_id: "a-exe".into(),
                    filename: "invoice.pdf.exe".into(),
                    size: 10,
                    mime_type: Some("application/pdf".into()),
                    is_inline: false,
                },
                AttachmentMeta {
                    provider_attachment_id: "a-gone".into(),
                    filename: "site photo.jpg".into(),
                    size: 10,
                    mime_type: Some("image/jpeg".into()),
                    is_inline: false,
                },
            ],
        );
        provider.files.lock().unwrap().insert(
            "a-pdf".into(),
            Bytes::from(sample_pdf(&["RFI-007 door hardware"], "RFI 7")),
        );
        let h = harness(provider, test_options());
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let result = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Success);
        assert_eq!(result.attachments_processed, 1);

        let message = &SyncedMessage::list_for_account(&h.db, account.id).await.unwrap()[0];
        assert_eq!(message.attachment_count, 3);
        let rows = MessageAttachment::list_for_message(&h.db, message.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        let by_name = |name: &str| rows.iter().find(|r| r.filename == name).unwrap();

        let pdf = by_name("RFI-007 response.pdf");
        assert!(pdf.downloaded && pdf.processed && pdf.indexed);
        assert!(pdf.document_id.is_some());
        assert!(std::path::Path::new(pdf.storage_path.as_deref().unwrap()).exists());

        let exe = by_name("invoice.pdf.exe");
        assert!(!exe.downloaded);
        assert!(exe.skip_reason.is_some());

        let photo = by_name("site photo.jpg");
        assert!(!photo.downloaded);
        assert_eq!(photo.attempts, 1);
        assert!(photo.last_error.is_some());
    }

    #[tokio::test]
    async fn failed_downloads_are_retried_on_the_next_cycle() {
        let now = utc_now!();
        let mut message = provider_message("m1", now - HOUR);
        message.has_attachments = true;
        let provider = FakeProvider::with_pages(vec![vec![message]]);
        provider.attachments.lock().unwrap().insert(
            "m1".into(),
            vec![AttachmentMeta {
                provider_attachment_id: "a1".into(),
                filename: "notes.txt".into(),
                size: 5,
                mime_type: Some("text/plain".into()),
                is_inline: false,
            }],
        );
        let h = harness(provider, test_options());
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let first = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(first.attachments_processed, 0);

        h.provider
            .files
            .lock()
            .unwrap()
            .insert("a1".into(), Bytes::from_static(b"pour concrete friday"));
        let second = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(second.attachments_processed, 1);

        let message = &SyncedMessage::list_for_account(&h.db, account.id).await.unwrap()[0];
        let row = &MessageAttachment::list_for_message(&h.db, message.id).await.unwrap()[0];
        assert!(row.downloaded);
        assert_eq!(row.attempts, 2);
    }

    fn text_attachment(id: &str, filename: &str) -> AttachmentMeta {
        AttachmentMeta {
            provider_attachment_id: id.into(),
            filename: filename.into(),
            size: 20,
            mime_type: None,
            is_inline: false,
        }
    }

    #[tokio::test]
    async fn stored_message_missing_its_attachment_rows_gets_them_back() {
        let now = utc_now!();
        let mut message = provider_message("m1", now - HOUR);
        message.has_attachments = true;
        let provider = FakeProvider::with_pages(vec![vec![message.clone()]]);
        provider
            .attachments
            .lock()
            .unwrap()
            .insert("m1".into(), vec![text_attachment("a1", "pour log.txt")]);
        provider
            .files
            .lock()
            .unwrap()
            .insert("a1".into(), Bytes::from_static(b"pour concrete friday"));
        let h = harness(provider, test_options());
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        // A cycle cut short after the message committed but before its rows did.
        let orphan = to_synced_message(account.id, message, 1, MessageSource::Poll);
        SyncedMessage::insert_if_absent(&h.db, orphan.clone(), Vec::new())
            .await
            .unwrap();

        let result = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Success);
        assert_eq!(result.messages_synced, 0);
        assert_eq!(result.attachments_processed, 1);
        let rows = MessageAttachment::list_for_message(&h.db, orphan.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].downloaded && rows[0].processed);

        // Rows are not recreated twice.
        let restored = h
            .engine
            .restore_attachments(
                &account,
                h.provider.as_ref(),
                "stored-access",
                &SyncedMessage::get(&h.db, orphan.id).await.unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(restored, AttachmentTally::default());
        assert_eq!(
            MessageAttachment::list_for_message(&h.db, orphan.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_cycles_on_one_account_run_one_after_the_other() {
        let now = utc_now!();
        let provider = FakeProvider::with_pages(vec![vec![
            provider_message("m1", now - 2 * HOUR),
            provider_message("m2", now - HOUR),
        ]]);
        *provider.list_delay.lock().unwrap() = Some(Duration::from_millis(100));
        let h = harness(provider, test_options());
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let (a, b) = tokio::join!(
            h.engine.sync_account(account.id, SyncTrigger::Manual),
            h.engine.sync_account(account.id, SyncTrigger::Manual)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.status, SyncJobStatus::Success);
        assert_eq!(b.status, SyncJobStatus::Success);
        assert_eq!(a.messages_synced + b.messages_synced, 2);
        assert_eq!(
            SyncedMessage::list_for_account(&h.db, account.id).await.unwrap().len(),
            2
        );

        let jobs = SyncJob::list_for_account(&h.db, account.id).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.completed_at.is_some()));
        let (later, earlier) = (&jobs[0], &jobs[1]);
        assert!(later.started_at >= earlier.completed_at.unwrap());
        assert_eq!(earlier.total_items, 2);
        // The second cycle listed from the cursor the first one left.
        assert_eq!(later.total_items, 0);

        let stored = ConnectedAccount::get(&h.db, account.id).await.unwrap();
        assert_eq!(stored.last_sync_cursor_at, Some(now - HOUR));
        assert_eq!(stored.last_sync_message_id.as_deref(), Some("m2"));
        assert_eq!(stored.messages_synced, 2);
    }

    #[tokio::test]
    async fn indexing_failure_is_recorded_and_retried() {
        let now = utc_now!();
        let mut message = provider_message("m1", now - HOUR);
        message.has_attachments = true;
        let provider = FakeProvider::with_pages(vec![vec![message]]);
        provider
            .attachments
            .lock()
            .unwrap()
            .insert("m1".into(), vec![text_attachment("a1", "broken.pdf")]);
        provider
            .files
            .lock()
            .unwrap()
            .insert("a1".into(), Bytes::from_static(b"%PDF-1.5 garbage"));
        let h = harness(provider, test_options());
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let result = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Success);
        let message = &SyncedMessage::list_for_account(&h.db, account.id).await.unwrap()[0];
        let row = &MessageAttachment::list_for_message(&h.db, message.id).await.unwrap()[0];
        assert!(row.downloaded);
        assert!(!row.processed);
        assert!(row.last_error.as_deref().unwrap().contains("broken.pdf"));
        assert_eq!(row.attempts, 2);

        let retryable = MessageAttachment::list_retryable(&h.db, account.id, 3).await.unwrap();
        assert_eq!(retryable.len(), 1);

        h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        let row = &MessageAttachment::list_for_message(&h.db, message.id).await.unwrap()[0];
        assert_eq!(row.attempts, 3);
        assert!(MessageAttachment::list_retryable(&h.db, account.id, 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cycle_deadline_finalizes_error_job_without_moving_cursor() {
        let now = utc_now!();
        let provider = FakeProvider::with_pages(vec![vec![provider_message("m1", now - HOUR)]]);
        *provider.list_delay.lock().unwrap() = Some(Duration::from_secs(5));
        let mut options = test_options();
        options.cycle_timeout = Duration::from_millis(50);
        let h = harness(provider, options);
        let account = connect_account(&h.db, "pm@example.com", HOUR).await;

        let result = h.engine.sync_account(account.id, SyncTrigger::Scheduled).await.unwrap();
        assert_eq!(result.status, SyncJobStatus::Error);
        assert_eq!(result.error_code, Some(ErrorCode::SyncTimeout as u32));
        let stored = ConnectedAccount::get(&h.db, account.id).await.unwrap();
        assert_eq!(stored.last_sync_cursor_at, None);
        let jobs = SyncJob::list_for_account(&h.db, account.id).await.unwrap();
        assert_eq!(jobs[0].status, SyncJobStatus::Error);
        assert_eq!(jobs[0].error_code, Some(ErrorCode::SyncTimeout as u32));
    }

    #[tokio::test]
    async fn unknown_account_is_an_error_before_any_job() {
        let h = harness(FakeProvider::with_pages(vec![]), test_options());
        let err = h.engine.sync_account(42, SyncTrigger::Manual).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
        assert!(SyncJob::list_for_account(&h.db, 42).await.unwrap().is_empty());
    }
}
