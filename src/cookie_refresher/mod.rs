//! Cookie Refresher: background loop that pre-warms WAF session cookies for a
//! configured list of venues, so the Upstream Protocol Client rarely has to absorb a
//! cold WAF challenge on the critical path of a booking attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::headless_browser::CookieFetcher;
use crate::services::Service;
use crate::vault::{CredentialVault, WafSession};

/// A WAF session is left alone if its remaining TTL exceeds this; only sessions
/// close to expiry (or missing entirely) are refreshed.
const SKIP_IF_TTL_ABOVE: Duration = Duration::from_secs(2 * 60 * 60);
const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct CookieRefresherService {
    vault: Arc<CredentialVault>,
    fetcher: Arc<dyn CookieFetcher>,
    venue_ids: Vec<i64>,
    interval: Duration,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl CookieRefresherService {
    pub fn new(
        vault: Arc<CredentialVault>,
        fetcher: Arc<dyn CookieFetcher>,
        venue_ids: Vec<i64>,
        interval: Duration,
    ) -> Self {
        Self {
            vault,
            fetcher,
            venue_ids,
            interval,
            shutdown_tx: None,
        }
    }

    /// Refreshes every configured venue whose WAF session is absent or within
    /// [`SKIP_IF_TTL_ABOVE`] of expiry.
    async fn refresh_all(&self) {
        for &venue_id in &self.venue_ids {
            if let Err(e) = self.refresh_one(venue_id).await {
                warn!(venue_id, error = %e, "cookie refresh failed for venue");
            }
        }
    }

    async fn refresh_one(&self, venue_id: i64) -> Result<(), anyhow::Error> {
        let ttl = self.vault.waf_session_ttl(venue_id).await?;
        if let Some(ttl) = ttl {
            if ttl > SKIP_IF_TTL_ABOVE {
                return Ok(());
            }
        }

        let (cookies, user_agent) = self.fetcher.harvest_cookies(venue_id).await?;
        let session = WafSession { cookies, user_agent };
        self.vault.set_waf_session(venue_id, &session, SESSION_TTL).await?;
        info!(venue_id, "refreshed WAF session");
        Ok(())
    }

    async fn run_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(venues = self.venue_ids.len(), "cookie refresher loop started");

        // Runs once immediately on startup, then on the configured interval.
        self.refresh_all().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; already refreshed above

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_all().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("cookie refresher received shutdown signal");
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Service for CookieRefresherService {
    fn name(&self) -> &'static str {
        "refresher"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.run_loop(shutdown_rx).await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::InMemoryKvs;
    use crate::vault::WafCookie;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CookieFetcher for CountingFetcher {
        async fn harvest_cookies(
            &self,
            _venue_id: i64,
        ) -> Result<(Vec<WafCookie>, String), crate::headless_browser::CookieFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((vec![], "test-agent".to_string()))
        }
    }

    #[tokio::test]
    async fn refresh_skips_venue_with_healthy_ttl() {
        let kvs = Arc::new(InMemoryKvs::new());
        let vault = Arc::new(CredentialVault::new(kvs.clone(), &"00".repeat(32)).unwrap());
        vault
            .set_waf_session(1, &WafSession { cookies: vec![], user_agent: "a".into() }, Duration::from_secs(23 * 60 * 60))
            .await
            .unwrap();

        let fetcher = Arc::new(CountingFetcher { calls: AtomicU32::new(0) });
        let refresher = CookieRefresherService::new(vault, fetcher.clone(), vec![1], Duration::from_secs(60));
        refresher.refresh_all().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_fetches_when_session_missing() {
        let kvs = Arc::new(InMemoryKvs::new());
        let vault = Arc::new(CredentialVault::new(kvs.clone(), &"00".repeat(32)).unwrap());

        let fetcher = Arc::new(CountingFetcher { calls: AtomicU32::new(0) });
        let refresher = CookieRefresherService::new(vault.clone(), fetcher.clone(), vec![1], Duration::from_secs(60));
        refresher.refresh_all().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(vault.get_waf_session(1).await.unwrap().is_some());
    }
}
