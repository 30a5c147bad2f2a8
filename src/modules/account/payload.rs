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

use crate::modules::account::{ConnectedAccount, SyncStatus};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::raise_error;

/// Minimum and maximum scheduled sync interval, in minutes.
const MIN_FREQUENCY: u32 = 5;
const MAX_FREQUENCY: u32 = 7 * 24 * 60;

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, Object)]
pub struct AccountUpdateRequest {
    /// Include the account in scheduled sync passes
    pub auto_sync: Option<bool>,
    /// Minutes between scheduled cycles
    pub sync_frequency_min: Option<u32>,
    /// Provider folder ids to sync; empty resets to the inbox
    pub sync_folders: Option<Vec<String>>,
    /// Pause or resume scheduled syncing without disconnecting
    pub paused: Option<bool>,
}

impl AccountUpdateRequest {
    pub fn validate(&self) -> GroundworkResult<()> {
        if let Some(frequency) = self.sync_frequency_min {
            if !(MIN_FREQUENCY..=MAX_FREQUENCY).contains(&frequency) {
                return Err(raise_error!(
                    format!(
                        "sync_frequency_min must be between {} and {} minutes",
                        MIN_FREQUENCY, MAX_FREQUENCY
                    ),
                    ErrorCode::InvalidParameter
                ));
            }
        }
        if let Some(folders) = &self.sync_folders {
            if folders.iter().any(|f| f.trim().is_empty()) {
                return Err(raise_error!(
                    "sync_folders must not contain empty names".into(),
                    ErrorCode::InvalidParameter
                ));
            }
        }
        Ok(())
    }

    pub fn apply(self, account: &mut ConnectedAccount) {
        if let Some(auto_sync) = self.auto_sync {
            account.auto_sync = auto_sync;
        }
        if let Some(frequency) = self.sync_frequency_min {
            account.sync_frequency_min = frequency;
        }
        if let Some(folders) = self.sync_folders {
            account.sync_folders = folders.into_iter().map(|f| f.trim().to_string()).collect();
        }
        match self.paused {
            Some(true) => account.last_sync_status = SyncStatus::Paused,
            Some(false) if account.last_sync_status == SyncStatus::Paused => {
                account.last_sync_status = SyncStatus::Idle
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_frequency() {
        let request = AccountUpdateRequest {
            sync_frequency_min: Some(1),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn pause_and_resume() {
        let mut account = ConnectedAccount::default();
        AccountUpdateRequest {
            paused: Some(true),
            ..Default::default()
        }
        .apply(&mut account);
        assert_eq!(account.last_sync_status, SyncStatus::Paused);
        AccountUpdateRequest {
            paused: Some(false),
            ..Default::default()
        }
        .apply(&mut account);
        assert_eq!(account.last_sync_status, SyncStatus::Idle);
    }
}
