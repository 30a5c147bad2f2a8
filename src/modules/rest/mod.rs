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
use crate::modules::common::auth::{ApiGuard, COMPANY_ID_HEADER, USER_ID_HEADER};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::handler::error_handler;
use crate::modules::error::GroundworkResult;
use crate::modules::rest::public::cron::cron_sync;
use crate::modules::rest::public::oauth2::oauth2_callback;
use crate::modules::rest::public::status::get_status;
use crate::modules::rest::public::webhook::inbound_email;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::modules::{settings::cli::SETTINGS, utils::shutdown::shutdown_signal};
use crate::{groundwork_version, raise_error};

use super::error::ApiErrorResponse;
use api::create_openapi_service;
use http::Method;
use poem::endpoint::StaticFilesEndpoint;
use poem::listener::TcpListener;
use poem::middleware::{CatchPanic, Compression};
use poem::{get, post};
use poem::{middleware::Cors, EndpointExt, Route, Server};
use std::time::Duration;
use tracing::info;

pub mod api;
pub mod public;
pub mod response;

pub type ApiResult<T, E = ApiErrorResponse> = std::result::Result<T, E>;

pub const CRON_SECRET_HEADER: &str = "X-Cron-Secret";

pub async fn start_http_server() -> GroundworkResult<()> {
    let listener = TcpListener::bind((
        SETTINGS
            .groundwork_bind_ip
            .clone()
            .unwrap_or("0.0.0.0".into()),
        SETTINGS.groundwork_http_port as u16,
    ));

    let api_service = create_openapi_service()
        .summary("Inbound email sync and document indexing for construction projects");

    let swagger = api_service.swagger_ui();
    let redoc = api_service.redoc();
    let scalar = api_service.scalar();
    let spec_json = api_service.spec_endpoint();
    let spec_yaml = api_service.spec_endpoint_yaml();
    let openapi_explorer = api_service.openapi_explorer();

    let open_api_route = Route::new()
        .nest_no_strip("/api/v1", api_service)
        .with(ApiGuard);

    let cors_origins: Vec<String> = SETTINGS.groundwork_cors_origins.iter().cloned().collect();

    let cors = Cors::new()
        .allow_origins_fn(move |origin| {
            if cors_origins.is_empty() {
                return true;
            }
            cors_origins.iter().any(|o| o == origin)
        })
        .allow_credentials(true)
        .allow_methods(&[
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::HEAD,
            Method::PATCH,
        ])
        .allow_headers(vec![
            "Content-Type",
            "Authorization",
            USER_ID_HEADER,
            COMPANY_ID_HEADER,
        ])
        .expose_headers(vec!["Accept", "Retry-After"])
        .max_age(SETTINGS.groundwork_cors_max_age);

    let route = Route::new()
        .nest("/api-docs/swagger", swagger)
        .nest("/api-docs/redoc", redoc)
        .nest("/api-docs/explorer", openapi_explorer)
        .nest("/api-docs/scalar", scalar)
        .nest("/api-docs/spec.json", spec_json)
        .nest("/api-docs/spec.yaml", spec_yaml)
        .nest("/oauth2/callback", get(oauth2_callback))
        .nest("/api/status", get(get_status))
        .nest("/webhooks/inbound-email", post(inbound_email))
        .nest("/cron/sync", post(cron_sync))
        .nest(
            "/files/attachments",
            StaticFilesEndpoint::new(&DATA_DIR_MANAGER.attachments_dir),
        )
        .nest_no_strip("/api/v1", open_api_route)
        .with(cors)
        .with_if(
            SETTINGS.groundwork_http_compression_enabled,
            Compression::new(),
        )
        .with(CatchPanic::new());

    let server = Server::new(listener)
        .name("Groundwork Mail Sync")
        .idle_timeout(Duration::from_secs(60))
        .run_with_graceful_shutdown(
            route.catch_all_error(error_handler),
            shutdown_signal(),
            Some(Duration::from_secs(5)),
        );
    info!(
        "Groundwork Mail Sync {} is now running on port {}.",
        groundwork_version!(),
        SETTINGS.groundwork_http_port
    );
    server
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
}
