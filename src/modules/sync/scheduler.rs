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
use std::time::{Duration, Instant};

use futures::{stream, StreamExt};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::modules::account::ConnectedAccount;
use crate::modules::error::GroundworkResult;
use crate::modules::sync::engine::{SyncEngine, SyncResult, SyncTrigger};
use crate::modules::sync::job::SyncJobStatus;
use crate::modules::utils::shutdown;
use crate::utc_now;

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct AccountFailure {
    pub account_id: u64,
    pub message: String,
}

/// Summary of one scheduler pass.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct SchedulerReport {
    pub started_at: i64,
    pub duration_ms: u64,
    /// Accounts eligible for this pass.
    pub accounts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub results: Vec<SyncResult>,
    /// Accounts that could not start a cycle at all.
    pub errors: Vec<AccountFailure>,
}

/// Syncs every schedulable account, `concurrency` at a time. With `force`
/// the per-account frequency is ignored. One account failing never stops
/// the others.
pub async fn run_pass(
    engine: &SyncEngine,
    force: bool,
    concurrency: usize,
) -> GroundworkResult<SchedulerReport> {
    let started = Instant::now();
    let now = utc_now!();
    let accounts: Vec<ConnectedAccount> = ConnectedAccount::list_all(engine.db())
        .await?
        .into_iter()
        .filter(|a| a.is_schedulable() && (force || a.is_due(now)))
        .collect();

    let mut report = SchedulerReport {
        started_at: now,
        accounts: accounts.len() as u64,
        ..Default::default()
    };
    if accounts.is_empty() {
        return Ok(report);
    }
    info!(accounts = accounts.len(), force, concurrency, "Scheduler pass started");

    let outcomes: Vec<(u64, GroundworkResult<SyncResult>)> = stream::iter(accounts)
        .map(|account| async move {
            (
                account.id,
                engine.sync_account(account.id, SyncTrigger::Scheduled).await,
            )
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (account_id, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                if result.status == SyncJobStatus::Success {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
                report.results.push(result);
            }
            Err(e) => {
                warn!(account_id, "Scheduled sync could not start: {}", e);
                report.failed += 1;
                report.errors.push(AccountFailure {
                    account_id,
                    message: e.message(),
                });
            }
        }
    }
    report.results.sort_by_key(|r| r.account_id);
    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        duration_ms = report.duration_ms,
        "Scheduler pass finished"
    );
    Ok(report)
}

/// Runs `run_pass` every `interval_min` minutes until shutdown.
pub fn start_periodic_sync(engine: Arc<SyncEngine>, interval_min: u64, concurrency: usize) {
    if interval_min == 0 {
        info!("Periodic sync disabled; relying on the cron endpoint");
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_min * 60));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = shutdown::subscribe();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run_pass(&engine, false, concurrency).await {
                        error!("Scheduler pass failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Periodic sync stopped");
                    break;
                }
            }
        }
    });
}
