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

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::modules::error::code::Disposition;
use crate::modules::error::{GroundworkError, GroundworkResult};
use crate::modules::settings::cli::SETTINGS;

/// Bounded retry for upstream calls. Only `Retry` dispositions are retried;
/// rate limits wait for the provider's hint when one was given.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: SETTINGS.groundwork_max_retries.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max)` with up to 25% jitter added.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }

    /// How long to wait before the next attempt, or `None` if `error` must
    /// not be retried.
    pub fn delay_for(&self, attempt: u32, error: &GroundworkError) -> Option<Duration> {
        if error.code().disposition() != Disposition::Retry {
            return None;
        }
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        match error.retry_after() {
            Some(secs) => Some(Duration::from_secs(secs).min(self.max_delay)),
            None => Some(self.backoff(attempt)),
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> GroundworkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GroundworkResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match self.delay_for(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            "Retrying in {:?} after: {}",
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::error::code::ErrorCode;
    use crate::raise_error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };
        assert!(policy.backoff(0) >= Duration::from_millis(100));
        assert!(policy.backoff(8) <= Duration::from_millis(500));
    }

    #[test]
    fn rate_limit_hint_is_honored_and_capped() {
        let policy = fast(3);
        let hinted = GroundworkError::rate_limited("slow down".into(), Some(0));
        assert_eq!(policy.delay_for(0, &hinted), Some(Duration::ZERO));
        let long = GroundworkError::rate_limited("slow down".into(), Some(3600));
        assert_eq!(policy.delay_for(0, &long), Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_for(2, &hinted), None);
    }

    #[test]
    fn auth_errors_are_never_retried() {
        let policy = fast(3);
        let error = raise_error!("expired".into(), ErrorCode::AuthExpired);
        assert_eq!(policy.delay_for(0, &error), None);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(raise_error!("reset".into(), ErrorCode::Transient))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: GroundworkResult<()> = fast(2)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(raise_error!("reset".into(), ErrorCode::Transient))
            })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
