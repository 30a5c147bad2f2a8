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

use clap::{builder::ValueParser, Parser};
use std::{collections::HashSet, env, path::PathBuf, sync::LazyLock};

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(|| {
    let root_dir = env::var("GROUNDWORK_ROOT_DIR")
        .unwrap_or_else(|_| env::temp_dir().join("groundwork_test").display().to_string());
    std::fs::create_dir_all(&root_dir).ok();

    Settings {
        groundwork_log_level: "info".to_string(),
        groundwork_http_port: 15730,
        groundwork_bind_ip: Some("0.0.0.0".to_string()),
        groundwork_public_url: "http://localhost:15730".to_string(),
        groundwork_cors_origins: HashSet::new(),
        groundwork_cors_max_age: 86400,
        groundwork_ansi_logs: true,
        groundwork_log_to_file: false,
        groundwork_json_logs: false,
        groundwork_max_server_log_files: 5,
        groundwork_encrypt_password: "test-password".to_string(),
        groundwork_encrypt_iterations: 1_000,
        groundwork_root_dir: root_dir,
        groundwork_metadata_cache_size: Some(134217728),
        groundwork_api_key: None,
        groundwork_cron_secret: Some("test-cron-secret".to_string()),
        groundwork_http_compression_enabled: true,
        groundwork_sync_concurrency: Some(2),
        groundwork_sync_interval_min: 0,
        groundwork_sync_timeout_secs: 300,
        groundwork_sync_page_size: 50,
        groundwork_sync_max_pages: 20,
        groundwork_initial_sync_days: 30,
        groundwork_max_retries: 3,
        groundwork_download_attachments: true,
        groundwork_download_concurrency: 4,
        groundwork_index_attachments: true,
        groundwork_index_batch_size: 10,
        groundwork_index_skip_existing: true,
        groundwork_gmail_client_id: None,
        groundwork_gmail_client_secret: None,
        groundwork_outlook_client_id: None,
        groundwork_outlook_client_secret: None,
        groundwork_outlook_tenant: "common".to_string(),
        groundwork_gmail_api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
        groundwork_graph_api_base: "https://graph.microsoft.com/v1.0".to_string(),
        groundwork_oracle_url: None,
        groundwork_oracle_api_key: None,
        groundwork_oracle_timeout_secs: 20,
        groundwork_known_projects: Vec::new(),
    }
});

#[derive(Debug, Parser)]
#[clap(
    name = "groundwork",
    about = "Inbound mailbox sync and construction document indexing service",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// groundwork log level (default: "info")
    #[clap(
        long,
        default_value = "info",
        env,
        help = "Set the log level for groundwork"
    )]
    pub groundwork_log_level: String,

    /// groundwork HTTP port (default: 15730)
    #[clap(
        long,
        default_value = "15730",
        env,
        help = "Set the HTTP port for groundwork"
    )]
    pub groundwork_http_port: i32,

    /// The IP address that the server binds to, in IPv4 format (e.g., 192.168.1.1).
    #[clap(
        long,
        env,
        default_value = "0.0.0.0",
        help = "The IP address that the server binds to, in IPv4 format (e.g., 192.168.1.1).",
        value_parser = ValueParser::new(|s: &str| {
            if s.parse::<std::net::Ipv4Addr>().is_err() {
                return Err("The bind IP address must be a valid IPv4 address.".to_string());
            }
            Ok(s.to_string())
        })
    )]
    pub groundwork_bind_ip: Option<String>,

    /// Public base URL, used to build the OAuth redirect and attachment URLs
    #[clap(
        long,
        default_value = "http://localhost:15730",
        env,
        help = "Set the public URL for groundwork"
    )]
    pub groundwork_public_url: String,

    #[clap(
        long,
        default_value = "",
        env,
        help = "Set the allowed CORS origins (comma-separated list, e.g., \"https://example.com, https://another.com\"). Empty allows any origin.",
        value_parser = ValueParser::new(|s: &str| -> Result<HashSet<String>, String> {
            let set: HashSet<String> = s.split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
            Ok(set)
        })
    )]
    pub groundwork_cors_origins: HashSet<String>,

    #[clap(
        long,
        default_value = "86400",
        env,
        help = "Set the CORS max age in seconds"
    )]
    pub groundwork_cors_max_age: i32,

    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub groundwork_ansi_logs: bool,

    /// If false, logs will be printed to stdout
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub groundwork_log_to_file: bool,

    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable JSON formatted logs"
    )]
    pub groundwork_json_logs: bool,

    #[clap(
        long,
        default_value = "5",
        env,
        help = "Set the maximum number of server log files"
    )]
    pub groundwork_max_server_log_files: usize,

    /// Password the token encryption key is derived from
    #[clap(
        long,
        default_value = "change-this-default-password-now",
        env,
        help = "Set the encryption password for stored OAuth tokens. Change this default in production!"
    )]
    pub groundwork_encrypt_password: String,

    #[clap(
        long,
        default_value = "100000",
        env,
        help = "PBKDF2 iterations used to derive the token encryption key"
    )]
    pub groundwork_encrypt_iterations: u32,

    #[clap(
        long,
        env,
        help = "Set the data directory (database, attachments, search index, logs)",
        value_parser = ValueParser::new(|s: &str| {
            let path = PathBuf::from(s);
            if !path.is_absolute() {
                return Err("Path must be an absolute directory path".to_string());
            }
            if !path.exists() {
                return Err(format!("Path {:?} does not exist", path));
            }
            if !path.is_dir() {
                return Err(format!("Path {:?} is not a directory", path));
            }
            Ok(s.to_string())
        })
    )]
    pub groundwork_root_dir: String,

    #[clap(
        long,
        env,
        default_value = "134217728",
        help = "Set the cache size for the metadata database in bytes"
    )]
    pub groundwork_metadata_cache_size: Option<usize>,

    /// Bearer key required on `/api/v1`. When unset, the API only trusts the
    /// identity headers injected by the upstream gateway.
    #[clap(long, env, help = "Bearer API key for the /api/v1 endpoints")]
    pub groundwork_api_key: Option<String>,

    /// Shared secret for the scheduled trigger endpoint. The endpoint is
    /// disabled when unset.
    #[clap(long, env, help = "Secret expected in the X-Cron-Secret header")]
    pub groundwork_cron_secret: Option<String>,

    #[clap(
        long,
        default_value = "true",
        env,
        help = "Enable compression for the open api server"
    )]
    pub groundwork_http_compression_enabled: bool,

    #[clap(
        long,
        env,
        help = "Maximum number of accounts synced concurrently (default: number of CPU cores x 2)",
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub groundwork_sync_concurrency: Option<u16>,

    #[clap(
        long,
        default_value = "0",
        env,
        help = "Run the scheduler in-process every N minutes (0 disables; rely on the cron endpoint instead)"
    )]
    pub groundwork_sync_interval_min: u64,

    #[clap(
        long,
        default_value = "300",
        env,
        help = "Deadline for a single account sync cycle, in seconds"
    )]
    pub groundwork_sync_timeout_secs: u64,

    #[clap(
        long,
        default_value = "50",
        env,
        help = "Messages requested per provider page",
        value_parser = clap::value_parser!(u32).range(1..=500)
    )]
    pub groundwork_sync_page_size: u32,

    #[clap(
        long,
        default_value = "20",
        env,
        help = "Maximum pages fetched per folder in one cycle"
    )]
    pub groundwork_sync_max_pages: u32,

    #[clap(
        long,
        default_value = "30",
        env,
        help = "How far back the first sync of a new account looks, in days"
    )]
    pub groundwork_initial_sync_days: i64,

    #[clap(
        long,
        default_value = "3",
        env,
        help = "Maximum attempts for rate-limited or transient provider calls"
    )]
    pub groundwork_max_retries: u32,

    #[clap(
        long,
        default_value = "true",
        env,
        help = "Download attachments during sync"
    )]
    pub groundwork_download_attachments: bool,

    #[clap(
        long,
        default_value = "4",
        env,
        help = "Concurrent attachment downloads per message",
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub groundwork_download_concurrency: u16,

    #[clap(
        long,
        default_value = "true",
        env,
        help = "Index downloaded attachments (PDF and text)"
    )]
    pub groundwork_index_attachments: bool,

    #[clap(
        long,
        default_value = "10",
        env,
        help = "Files processed concurrently per batch when indexing a directory",
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub groundwork_index_batch_size: u16,

    #[clap(
        long,
        default_value = "true",
        env,
        help = "Reuse stored documents whose content hash is unchanged"
    )]
    pub groundwork_index_skip_existing: bool,

    #[clap(long, env, help = "Google OAuth client id")]
    pub groundwork_gmail_client_id: Option<String>,

    #[clap(long, env, help = "Google OAuth client secret")]
    pub groundwork_gmail_client_secret: Option<String>,

    #[clap(long, env, help = "Microsoft identity platform client id")]
    pub groundwork_outlook_client_id: Option<String>,

    #[clap(long, env, help = "Microsoft identity platform client secret")]
    pub groundwork_outlook_client_secret: Option<String>,

    #[clap(
        long,
        default_value = "common",
        env,
        help = "Microsoft tenant used for the authorize and token endpoints"
    )]
    pub groundwork_outlook_tenant: String,

    #[clap(
        long,
        default_value = "https://gmail.googleapis.com/gmail/v1",
        env,
        help = "Gmail REST API base URL"
    )]
    pub groundwork_gmail_api_base: String,

    #[clap(
        long,
        default_value = "https://graph.microsoft.com/v1.0",
        env,
        help = "Microsoft Graph API base URL"
    )]
    pub groundwork_graph_api_base: String,

    /// Optional classification service. Messages are enriched with a category
    /// and suggested project when set; failures never block a sync.
    #[clap(long, env, help = "Classification oracle endpoint URL")]
    pub groundwork_oracle_url: Option<String>,

    #[clap(long, env, help = "Bearer key for the classification oracle")]
    pub groundwork_oracle_api_key: Option<String>,

    #[clap(
        long,
        default_value = "20",
        env,
        help = "Classification oracle request timeout, in seconds"
    )]
    pub groundwork_oracle_timeout_secs: u64,

    /// Project ids the oracle may suggest.
    #[clap(
        long,
        env,
        value_delimiter = ',',
        help = "Known project ids offered to the classification oracle (comma-separated)"
    )]
    pub groundwork_known_projects: Vec<String>,
}

impl Settings {
    pub fn sync_concurrency(&self) -> usize {
        self.groundwork_sync_concurrency
            .map(|c| c as usize)
            .unwrap_or_else(|| num_cpus::get() * 2)
    }

    pub fn oauth_redirect_url(&self) -> String {
        format!(
            "{}/oauth2/callback",
            self.groundwork_public_url.trim_end_matches('/')
        )
    }
}
