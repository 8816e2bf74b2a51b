//! Scheduler: the single-leader loop that dequeues and executes due reservations.
//!
//! One cooperative task, single-threaded: at most one upstream booking attempt is
//! in flight at a time. Every sleep point selects against the shutdown broadcast so
//! cancellation is bounded by the documented 30-second ceiling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::accounting::AccountingClient;
use crate::booking_window::BookingWindowResolver;
use crate::queue::{ReservationQueue, ScheduledReservation};
use crate::services::Service;
use crate::upstream::UpstreamClient;
use crate::vault::CredentialVault;

/// Upper bound on every sleep the scheduler performs, so shutdown is never more than
/// this far away.
const MAX_SLEEP: Duration = Duration::from_secs(30);
const DEFAULT_TIMEZONE: &str = "America/New_York";

pub struct SchedulerService {
    queue: Arc<ReservationQueue>,
    vault: Arc<CredentialVault>,
    upstream: Arc<UpstreamClient>,
    booking_window: Arc<BookingWindowResolver>,
    accounting: Arc<AccountingClient>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl SchedulerService {
    pub fn new(
        queue: Arc<ReservationQueue>,
        vault: Arc<CredentialVault>,
        upstream: Arc<UpstreamClient>,
        booking_window: Arc<BookingWindowResolver>,
        accounting: Arc<AccountingClient>,
    ) -> Self {
        Self {
            queue,
            vault,
            upstream,
            booking_window,
            accounting,
            shutdown_tx: None,
        }
    }

    /// Runs the scheduler loop until `shutdown_rx` fires. Each iteration peeks the
    /// earliest pending reservation, sleeps (capped at [`MAX_SLEEP`]) until it is due
    /// or until a shutdown/new-entry signal arrives, then executes it exactly once.
    async fn run_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("scheduler loop started");

        loop {
            let next = match self.queue.peek_next().await {
                Ok(next) => next,
                Err(e) => {
                    warn!(error = %e, "failed to peek next reservation, retrying shortly");
                    None
                }
            };

            let sleep_for = match &next {
                None => MAX_SLEEP,
                Some(reservation) => {
                    let now = Utc::now();
                    if reservation.run_time <= now {
                        Duration::ZERO
                    } else {
                        let remaining = (reservation.run_time - now)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        remaining.min(MAX_SLEEP)
                    }
                }
            };

            if sleep_for > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown_rx.recv() => {
                        info!("scheduler received shutdown signal during sleep");
                        return;
                    }
                }
                continue;
            }

            let Some(reservation) = next else {
                continue;
            };

            self.execute(reservation).await;
        }
    }

    /// Executes one reservation attempt, then deletes the entry regardless of
    /// outcome. The scheduler never retries a failed attempt.
    async fn execute(&self, reservation: ScheduledReservation) {
        let id = reservation.id.clone();
        let venue_id = reservation.venue_id;

        let credentials = if reservation.owner_id.is_empty() {
            None
        } else {
            match self.vault.get_credentials(&reservation.owner_id).await {
                Ok(creds) => creds,
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to resolve credentials, booking will likely fail on missing payment info");
                    None
                }
            }
        };

        let timezone = match self.booking_window.resolve(venue_id).await {
            Ok(window) => window.timezone.parse::<Tz>().unwrap_or(chrono_tz::America::New_York),
            Err(e) => {
                warn!(id = %id, venue_id, error = %e, "failed to resolve booking window timezone, defaulting to {}", DEFAULT_TIMEZONE);
                chrono_tz::America::New_York
            }
        };

        let result = self
            .upstream
            .book(&reservation, credentials.as_ref(), timezone)
            .await;

        match &result {
            Ok(outcome) => {
                info!(
                    id = %id,
                    venue_id,
                    reservation_id = %outcome.reservation_id,
                    booked_time = %outcome.booked_time,
                    "reservation booked successfully"
                );
                self.accounting
                    .record_usage(&reservation.owner_id, reservation.usage_type, venue_id)
                    .await;
            }
            Err(e) => {
                warn!(id = %id, venue_id, error = %e, "reservation attempt failed");
            }
        }

        if let Err(e) = self.queue.delete(&id).await {
            warn!(id = %id, error = %e, "failed to delete reservation after execution attempt");
        }
    }
}

#[async_trait::async_trait]
impl Service for SchedulerService {
    fn name(&self) -> &'static str {
        "scheduler"
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
    use crate::booking_window::PageFetcher;
    use crate::kvs::InMemoryKvs;
    use crate::queue::UsageType;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct NeverFetcher;
    #[async_trait]
    impl PageFetcher for NeverFetcher {
        async fn fetch_booking_page(
            &self,
            _venue_id: i64,
        ) -> Result<String, crate::booking_window::BookingWindowError> {
            Err(crate::booking_window::BookingWindowError::Undetermined)
        }
    }

    #[tokio::test]
    async fn execute_deletes_reservation_regardless_of_outcome() {
        let kvs = Arc::new(InMemoryKvs::new());
        let queue = Arc::new(ReservationQueue::new(kvs.clone()));
        let vault = Arc::new(CredentialVault::new(kvs.clone(), &"00".repeat(32)).unwrap());
        let upstream = Arc::new(
            UpstreamClient::new(
                "http://localhost:1".to_string(),
                "key".to_string(),
                vault.clone(),
                crate::config::RateLimitingConfig::default(),
            )
            .unwrap(),
        );
        let booking_window = Arc::new(BookingWindowResolver::new(kvs.clone(), Arc::new(NeverFetcher)));
        let accounting = Arc::new(AccountingClient::new(None));

        let scheduler = SchedulerService::new(queue.clone(), vault, upstream, booking_window, accounting);

        let mut reservation = ScheduledReservation::new(
            89607,
            Utc::now() + ChronoDuration::days(1),
            2,
            vec![],
            "".to_string(),
            UsageType::Immediate,
            Utc::now(),
        );
        reservation.id = "R-test".to_string();
        queue.enqueue(&reservation).await.unwrap();

        scheduler.execute(reservation).await;

        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }
}
