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

use std::path::PathBuf;
use std::sync::LazyLock;

use tracing::info;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;

pub static DATA_DIR_MANAGER: LazyLock<DataDirManager> =
    LazyLock::new(|| DataDirManager::new(PathBuf::from(&SETTINGS.groundwork_root_dir)));

/// Layout of the data directory.
#[derive(Debug, Clone)]
pub struct DataDirManager {
    pub root_dir: PathBuf,
    pub meta_db: PathBuf,
    pub attachments_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub index_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl DataDirManager {
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            meta_db: root_dir.join("meta.db"),
            attachments_dir: root_dir.join("attachments"),
            documents_dir: root_dir.join("documents"),
            index_dir: root_dir.join("index"),
            log_dir: root_dir.join("logs"),
            root_dir,
        }
    }

    pub async fn initialize() -> GroundworkResult<()> {
        for dir in [
            &DATA_DIR_MANAGER.attachments_dir,
            &DATA_DIR_MANAGER.documents_dir,
            &DATA_DIR_MANAGER.index_dir,
            &DATA_DIR_MANAGER.log_dir,
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                raise_error!(
                    format!("Failed to create data directory {:?}: {}", dir, e),
                    ErrorCode::StorageFailure
                )
            })?;
        }
        info!("Data directory ready at {:?}", DATA_DIR_MANAGER.root_dir);
        Ok(())
    }
}
