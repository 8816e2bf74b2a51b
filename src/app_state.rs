//! Application state shared across the control surface and background services.

use std::sync::Arc;

use crate::accounting::AccountingClient;
use crate::booking_window::BookingWindowResolver;
use crate::config::Config;
use crate::kvs::Kvs;
use crate::logs::LogBuffer;
use crate::queue::ReservationQueue;
use crate::status::ServiceStatusRegistry;
use crate::upstream::UpstreamClient;
use crate::vault::CredentialVault;

/// Explicit application context constructed once at startup and passed into HTTP
/// handlers and background tasks by reference, rather than reached for as a
/// process-wide singleton.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kvs: Arc<dyn Kvs>,
    pub vault: Arc<CredentialVault>,
    pub queue: Arc<ReservationQueue>,
    pub booking_window: Arc<BookingWindowResolver>,
    pub upstream: Arc<UpstreamClient>,
    pub accounting: Arc<AccountingClient>,
    pub service_statuses: ServiceStatusRegistry,
    pub logs: Arc<LogBuffer>,
}
