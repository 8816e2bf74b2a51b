//! Accounting collaborator client: a best-effort usage-increment callback fired by the
//! Scheduler after a successful booking. Failures are logged and never propagate.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::queue::UsageType;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct UsageIncrement<'a> {
    owner_id: &'a str,
    usage_type: UsageType,
    venue_id: i64,
}

/// Fires best-effort usage-increment callbacks to an external accounting service.
pub struct AccountingClient {
    http: reqwest::Client,
    callback_url: Option<String>,
}

impl AccountingClient {
    pub fn new(callback_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            callback_url,
        }
    }

    /// Fires the callback for a successful booking. Non-fatal: any failure (including
    /// a missing callback URL) is logged and swallowed.
    pub async fn record_usage(&self, owner_id: &str, usage_type: UsageType, venue_id: i64) {
        let Some(url) = &self.callback_url else {
            return;
        };
        if owner_id.is_empty() {
            return;
        }

        let payload = UsageIncrement {
            owner_id,
            usage_type,
            venue_id,
        };

        let result = self
            .http
            .post(url)
            .timeout(CALLBACK_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        if let Err(e) = result {
            warn!(owner_id, error = %e, "accounting usage callback failed");
        }
    }
}
