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

use crate::modules::database::{filter_by_secondary_key_impl, insert_impl, list_all_impl, update_impl};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::rest::response::paginate_vec;
use crate::modules::database::Paginated;
use crate::{id, raise_error, utc_now};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Enum)]
#[oai(rename_all = "lowercase")]
pub enum SyncJobType {
    /// First cycle of an account, no cursor yet
    Full,
    #[default]
    Incremental,
    Manual,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Enum)]
#[oai(rename_all = "lowercase")]
pub enum SyncJobStatus {
    #[default]
    Syncing,
    Success,
    Error,
}

/// Record of one sync cycle. Created when the cycle starts and finalized
/// exactly once.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
#[native_model(id = 5, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct SyncJob {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub job_type: SyncJobType,
    pub status: SyncJobStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub error_code: Option<u32>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// JSON summary of the cycle
    pub results: Option<String>,
    pub created_at: i64,
}

/// Final figures written onto a job.
#[derive(Clone, Debug, Default)]
pub struct JobCompletion {
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    pub retry_count: u32,
    /// `(message, code)` when the cycle failed
    pub error: Option<(String, ErrorCode)>,
    pub results: Option<serde_json::Value>,
}

impl SyncJob {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub async fn start(
        db: &Arc<Database<'static>>,
        account_id: u64,
        job_type: SyncJobType,
        max_retries: u32,
    ) -> GroundworkResult<Self> {
        let now = utc_now!();
        let job = SyncJob {
            id: id!(64),
            account_id,
            job_type,
            status: SyncJobStatus::Syncing,
            started_at: now,
            max_retries,
            created_at: now,
            ..Default::default()
        };
        insert_impl(db, job.clone()).await?;
        Ok(job)
    }

    /// Moves a running job to `success` or `error`. A job that already left
    /// `syncing` is rejected.
    pub async fn finish(
        db: &Arc<Database<'static>>,
        id: u64,
        completion: JobCompletion,
    ) -> GroundworkResult<Self> {
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .secondary::<SyncJob>(SyncJobKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Sync job id='{id}' not found"),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                if current.status != SyncJobStatus::Syncing {
                    return Err(raise_error!(
                        format!("Sync job id='{}' is already finalized", current.id),
                        ErrorCode::AlreadyExists
                    ));
                }
                let now = utc_now!();
                let mut job = current.clone();
                job.total_items = completion.total_items;
                job.processed_items = completion.processed_items;
                job.failed_items = completion.failed_items;
                job.retry_count = completion.retry_count;
                job.completed_at = Some(now);
                job.duration_ms = Some((now - job.started_at).max(0) as u64);
                job.results = completion.results.map(|r| r.to_string());
                match completion.error {
                    Some((message, code)) => {
                        job.status = SyncJobStatus::Error;
                        job.error_message = Some(message);
                        job.error_code = Some(code as u32);
                    }
                    None => job.status = SyncJobStatus::Success,
                }
                Ok(job)
            },
        )
        .await
    }

    /// Newest first.
    pub async fn list_for_account(
        db: &Arc<Database<'static>>,
        account_id: u64,
    ) -> GroundworkResult<Vec<Self>> {
        let mut jobs: Vec<SyncJob> =
            filter_by_secondary_key_impl(db, SyncJobKey::account_id, account_id).await?;
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    pub async fn paginate_for_account(
        db: &Arc<Database<'static>>,
        account_id: u64,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> GroundworkResult<Paginated<Self>> {
        paginate_vec(Self::list_for_account(db, account_id).await?, page, page_size)
    }

    /// Jobs left in `syncing` by a process that stopped mid-cycle are closed
    /// as errors. Returns how many were closed.
    pub async fn close_interrupted(db: &Arc<Database<'static>>) -> GroundworkResult<usize> {
        let jobs: Vec<SyncJob> = list_all_impl(db).await?;
        let mut closed = 0;
        for job in jobs.into_iter().filter(|j| j.status == SyncJobStatus::Syncing) {
            Self::finish(
                db,
                job.id,
                JobCompletion {
                    error: Some((
                        "Interrupted by service restart".into(),
                        ErrorCode::InternalError,
                    )),
                    ..Default::default()
                },
            )
            .await?;
            closed += 1;
        }
        Ok(closed)
    }
}
