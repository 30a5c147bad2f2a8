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

use itertools::Itertools;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::modules::account::ProviderKind;
use crate::modules::database::{batch_delete_impl, insert_impl, with_transaction};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::{raise_error, utc_now};

/// How long a started connect flow stays valid.
pub const PENDING_TTL_MS: i64 = 10 * 60 * 1000;

/// A connect flow waiting for the provider callback, keyed by its `state`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 6, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct OAuth2Pending {
    pub state: String,
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub provider: ProviderKind,
    pub pkce_verifier: String,
    pub created_at: i64,
}

impl OAuth2Pending {
    fn pk(&self) -> String {
        self.state.clone()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now - self.created_at > PENDING_TTL_MS
    }

    pub async fn save(&self, db: &Arc<Database<'static>>) -> GroundworkResult<()> {
        insert_impl(db, self.clone()).await
    }

    /// Removes and returns the flow for `state`. A state can be used once.
    pub async fn take(db: &Arc<Database<'static>>, state: &str) -> GroundworkResult<Self> {
        let key = state.to_string();
        let pending = with_transaction(db, move |rw| {
            let found: Option<OAuth2Pending> = rw
                .get()
                .primary(key)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            if let Some(found) = &found {
                rw.remove(found.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            Ok(found)
        })
        .await?
        .ok_or_else(|| {
            raise_error!(
                "Unknown or already used OAuth state".into(),
                ErrorCode::InvalidParameter
            )
        })?;
        if pending.is_expired(utc_now!()) {
            return Err(raise_error!(
                "OAuth flow expired; start the connection again".into(),
                ErrorCode::RequestTimeout
            ));
        }
        Ok(pending)
    }

    /// Drops flows that were never completed.
    pub async fn purge_expired(db: &Arc<Database<'static>>) -> GroundworkResult<usize> {
        let now = utc_now!();
        batch_delete_impl(db, move |rw| {
            let all: Vec<OAuth2Pending> = rw
                .scan()
                .primary()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .all()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .try_collect()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(all.into_iter().filter(|p| p.is_expired(now)).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::in_memory_database;

    fn pending(state: &str, created_at: i64) -> OAuth2Pending {
        OAuth2Pending {
            state: state.into(),
            user_id: 1,
            provider: ProviderKind::Outlook,
            pkce_verifier: "v".repeat(64),
            created_at,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let db = in_memory_database();
        pending("s1", utc_now!()).save(&db).await.unwrap();
        let taken = OAuth2Pending::take(&db, "s1").await.unwrap();
        assert_eq!(taken.provider, ProviderKind::Outlook);
        let again = OAuth2Pending::take(&db, "s1").await.unwrap_err();
        assert_eq!(again.code(), ErrorCode::InvalidParameter);
    }

    #[tokio::test]
    async fn expired_flows_are_rejected_and_purged() {
        let db = in_memory_database();
        let old = utc_now!() - PENDING_TTL_MS - 1;
        pending("old", old).save(&db).await.unwrap();
        pending("old-2", old).save(&db).await.unwrap();
        pending("fresh", utc_now!()).save(&db).await.unwrap();

        let err = OAuth2Pending::take(&db, "old").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequestTimeout);
        assert_eq!(OAuth2Pending::purge_expired(&db).await.unwrap(), 1);
        assert!(OAuth2Pending::take(&db, "fresh").await.is_ok());
    }
}
