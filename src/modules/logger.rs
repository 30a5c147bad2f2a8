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

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::modules::settings::{cli::SETTINGS, dir::DATA_DIR_MANAGER};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn initialize_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&SETTINGS.groundwork_log_level)));

    if SETTINGS.groundwork_log_to_file {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("groundwork")
            .filename_suffix("log")
            .max_log_files(SETTINGS.groundwork_max_server_log_files)
            .build(&DATA_DIR_MANAGER.log_dir);

        match appender {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = LOG_GUARD.set(guard);
                let layer = if SETTINGS.groundwork_json_logs {
                    fmt::layer().json().with_writer(writer).boxed()
                } else {
                    fmt::layer().with_ansi(false).with_writer(writer).boxed()
                };
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!(
                    "Failed to open log directory {:?}, falling back to stdout: {}",
                    DATA_DIR_MANAGER.log_dir, e
                );
            }
        }
    }

    let layer = if SETTINGS.groundwork_json_logs {
        fmt::layer().json().boxed()
    } else {
        fmt::layer()
            .with_ansi(SETTINGS.groundwork_ansi_logs)
            .with_target(true)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();
}

/// Our crate at the configured level; chatty dependencies held at warn.
fn default_directives(level: &str) -> String {
    format!(
        "groundwork={level},poem={level},tantivy=warn,hyper=warn,reqwest=warn,{level}",
        level = level
    )
}
