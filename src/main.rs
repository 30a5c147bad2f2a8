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
use mimalloc::MiMalloc;
use modules::{
    database::manager::DB_MANAGER,
    error::GroundworkResult,
    logger,
    rest::start_http_server,
    settings::{cli::SETTINGS, dir::DataDirManager},
    sync::{engine::SYNC_ENGINE, job::SyncJob, scheduler::start_periodic_sync},
};
use tracing::{info, warn};

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[cfg(not(test))]
#[tokio::main]
async fn main() -> GroundworkResult<()> {
    logger::initialize_logging();
    info!("Starting groundwork-server");
    info!("Version:  {}", groundwork_version!());

    if let Err(error) = initialize().await {
        eprintln!("{:?}", error);
        return Err(error);
    }

    start_http_server().await?;
    Ok(())
}

/// Prepares storage, recovers from an unclean stop and starts the scheduler.
async fn initialize() -> GroundworkResult<()> {
    DataDirManager::initialize().await?;
    let interrupted = SyncJob::close_interrupted(DB_MANAGER.meta_db()).await?;
    if interrupted > 0 {
        warn!("Closed {} sync jobs left running by the previous process", interrupted);
    }
    start_periodic_sync(
        SYNC_ENGINE.clone(),
        SETTINGS.groundwork_sync_interval_min,
        SETTINGS.sync_concurrency(),
    );
    Ok(())
}
