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
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::modules::error::GroundworkResult;
use crate::modules::message::SyncedMessage;
use crate::modules::provider::http::{send_json, HTTP_CLIENT};
use crate::modules::settings::cli::SETTINGS;

const BODY_PREVIEW_CHARS: usize = 2000;

/// What the oracle said about one message.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Enrichment {
    pub category: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub extracted_fields: serde_json::Value,
    pub suggested_project: Option<String>,
}

#[derive(Debug, Serialize)]
struct OracleRequest<'a> {
    subject: &'a str,
    from: &'a str,
    body: String,
    known_projects: &'a [String],
}

/// External message classifier. Callers treat every failure as "no answer".
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(
        &self,
        message: &SyncedMessage,
        known_projects: &[String],
    ) -> GroundworkResult<Enrichment>;
}

/// JSON-over-HTTP oracle.
pub struct HttpOracle {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpOracle {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            url,
            api_key,
            timeout,
        }
    }

    /// `None` unless an oracle URL is configured.
    pub fn from_settings() -> Option<Arc<dyn ClassificationOracle>> {
        let url = SETTINGS.groundwork_oracle_url.clone()?;
        Some(Arc::new(Self::new(
            url,
            SETTINGS.groundwork_oracle_api_key.clone(),
            Duration::from_secs(SETTINGS.groundwork_oracle_timeout_secs),
        )))
    }
}

fn body_preview(message: &SyncedMessage) -> String {
    message
        .body_text
        .as_deref()
        .or(message.snippet.as_deref())
        .unwrap_or_default()
        .chars()
        .take(BODY_PREVIEW_CHARS)
        .collect()
}

#[async_trait]
impl ClassificationOracle for HttpOracle {
    async fn classify(
        &self,
        message: &SyncedMessage,
        known_projects: &[String],
    ) -> GroundworkResult<Enrichment> {
        let payload = OracleRequest {
            subject: message.subject.as_deref().unwrap_or("(no subject)"),
            from: message.from_address.as_deref().unwrap_or_default(),
            body: body_preview(message),
            known_projects,
        };
        let mut request = HTTP_CLIENT
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        send_json(request, "Classification oracle").await
    }
}

/// Asks the oracle about a freshly stored message and writes the answer back.
/// Never fails the caller.
pub async fn enrich_message(
    db: &Arc<native_db::Database<'static>>,
    oracle: &dyn ClassificationOracle,
    message: &SyncedMessage,
    known_projects: &[String],
) {
    let enrichment = match oracle.classify(message, known_projects).await {
        Ok(enrichment) => enrichment,
        Err(e) => {
            warn!(message_id = message.id, "Oracle enrichment skipped: {}", e);
            return;
        }
    };
    // Suggestions outside the known project list are dropped.
    let suggested = enrichment
        .suggested_project
        .filter(|p| known_projects.is_empty() || known_projects.contains(p));
    let confidence = enrichment.confidence.map(|c| c.clamp(0.0, 1.0));
    if let Err(e) =
        SyncedMessage::enrich(db, message.id, enrichment.category, confidence, suggested).await
    {
        warn!(message_id = message.id, "Failed to store enrichment: {}", e);
        return;
    }
    debug!(message_id = message.id, "Message enriched");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modules::database::in_memory_database;
    use crate::modules::error::code::ErrorCode;
    use crate::{raise_error, utc_now};

    pub struct FixedOracle(pub Option<Enrichment>);

    #[async_trait]
    impl ClassificationOracle for FixedOracle {
        async fn classify(
            &self,
            _message: &SyncedMessage,
            _known_projects: &[String],
        ) -> GroundworkResult<Enrichment> {
            self.0
                .clone()
                .ok_or_else(|| raise_error!("oracle offline".into(), ErrorCode::Transient))
        }
    }

    async fn stored_message(db: &Arc<native_db::Database<'static>>) -> SyncedMessage {
        let message = SyncedMessage {
            id: crate::id!(64),
            account_id: 1,
            provider_message_id: "p1".into(),
            subject: Some("Submittal 05 12 00 steel".into()),
            created_at: utc_now!(),
            ..Default::default()
        };
        SyncedMessage::insert_if_absent(db, message.clone(), Vec::new())
            .await
            .unwrap();
        message
    }

    #[tokio::test]
    async fn enrichment_is_written_and_unknown_projects_dropped() {
        let db = in_memory_database();
        let message = stored_message(&db).await;
        let oracle = FixedOracle(Some(Enrichment {
            category: Some("submittal".into()),
            confidence: Some(1.7),
            suggested_project: Some("other-project".into()),
            ..Default::default()
        }));
        enrich_message(&db, &oracle, &message, &["tower-a".to_string()]).await;
        let stored = SyncedMessage::get(&db, message.id).await.unwrap();
        assert_eq!(stored.ai_category.as_deref(), Some("submittal"));
        assert_eq!(stored.ai_confidence, Some(1.0));
        assert_eq!(stored.ai_suggested_project, None);
    }

    #[tokio::test]
    async fn oracle_failure_leaves_message_untouched() {
        let db = in_memory_database();
        let message = stored_message(&db).await;
        enrich_message(&db, &FixedOracle(None), &message, &[]).await;
        let stored = SyncedMessage::get(&db, message.id).await.unwrap();
        assert_eq!(stored.ai_category, None);
    }
}
