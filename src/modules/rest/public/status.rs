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
use poem::{handler, web::Json};
use serde::Serialize;
use tracing::warn;

use crate::groundwork_version;
use crate::modules::indexer::manager::DOCUMENT_INDEX_MANAGER;

#[derive(Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub indexed_documents: Option<u64>,
}

/// Liveness probe.
#[handler]
pub async fn get_status() -> Json<ServiceStatus> {
    let indexed_documents = match DOCUMENT_INDEX_MANAGER.total_documents() {
        Ok(total) => Some(total),
        Err(e) => {
            warn!("Failed to count indexed documents: {}", e);
            None
        }
    };
    Json(ServiceStatus {
        status: "ok",
        version: groundwork_version!(),
        indexed_documents,
    })
}
