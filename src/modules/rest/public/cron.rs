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
use poem::{handler, web::Json, Request};
use tracing::{info, warn};

use crate::modules::common::auth::secret_matches;
use crate::modules::common::create_api_error_response;
use crate::modules::error::code::ErrorCode;
use crate::modules::rest::CRON_SECRET_HEADER;
use crate::modules::settings::cli::SETTINGS;
use crate::modules::sync::engine::SYNC_ENGINE;
use crate::modules::sync::scheduler::{run_pass, SchedulerReport};

/// Checks the shared secret an external cron sends with each trigger.
/// Without a configured secret the endpoint is closed.
pub fn authorize_cron(req: &Request, expected: Option<&str>) -> poem::Result<()> {
    let Some(expected) = expected else {
        return Err(create_api_error_response(
            "Cron trigger is disabled: no secret configured",
            ErrorCode::Forbidden,
        ));
    };
    let provided = req
        .headers()
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided.is_empty() || !secret_matches(provided, expected) {
        warn!("Rejected cron trigger with a missing or wrong secret");
        return Err(create_api_error_response(
            "Invalid cron secret",
            ErrorCode::PermissionDenied,
        ));
    }
    Ok(())
}

/// Runs one scheduler pass over every due account.
#[handler]
pub async fn cron_sync(req: &Request) -> poem::Result<Json<SchedulerReport>> {
    authorize_cron(req, SETTINGS.groundwork_cron_secret.as_deref())?;
    let report = run_pass(&SYNC_ENGINE, false, SETTINGS.sync_concurrency()).await?;
    info!(
        accounts = report.accounts,
        succeeded = report.succeeded,
        failed = report.failed,
        "Cron sync pass finished"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(secret: Option<&str>) -> Request {
        let mut builder = Request::builder();
        if let Some(secret) = secret {
            builder = builder.header(CRON_SECRET_HEADER, secret);
        }
        builder.finish()
    }

    #[test]
    fn cron_secret_is_required() {
        assert!(authorize_cron(&request(Some("s3cret")), Some("s3cret")).is_ok());
        assert!(authorize_cron(&request(Some("wrong")), Some("s3cret")).is_err());
        assert!(authorize_cron(&request(None), Some("s3cret")).is_err());
        assert!(authorize_cron(&request(Some("s3cret")), None).is_err());
    }
}
