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

use poem_openapi::Object;
use serde::{Deserialize, Serialize};

use crate::modules::account::{ConnectedAccount, ProviderKind, SyncStatus};

/// Account as returned by the API; token material never leaves the server.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct AccountResp {
    pub id: u64,
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub provider: ProviderKind,
    pub email: String,
    pub token_expires_at: Option<i64>,
    pub has_refresh_token: bool,
    pub is_active: bool,
    pub auto_sync: bool,
    pub sync_frequency_min: u32,
    pub sync_folders: Vec<String>,
    pub last_sync_at: Option<i64>,
    pub last_sync_cursor_at: Option<i64>,
    pub last_sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    pub needs_reauth: bool,
    pub messages_synced: u64,
    pub attachments_processed: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ConnectedAccount> for AccountResp {
    fn from(account: ConnectedAccount) -> Self {
        AccountResp {
            id: account.id,
            user_id: account.user_id,
            company_id: account.company_id,
            provider: account.provider,
            email: account.email,
            token_expires_at: account.token_expires_at,
            has_refresh_token: account.refresh_token.is_some(),
            is_active: account.is_active,
            auto_sync: account.auto_sync,
            sync_frequency_min: account.sync_frequency_min,
            sync_folders: account.sync_folders,
            last_sync_at: account.last_sync_at,
            last_sync_cursor_at: account.last_sync_cursor_at,
            last_sync_status: account.last_sync_status,
            last_sync_error: account.last_sync_error,
            needs_reauth: account.needs_reauth,
            messages_synced: account.messages_synced,
            attachments_processed: account.attachments_processed,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}
