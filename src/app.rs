//! Application struct wiring together configuration, collaborators, and services.

use std::sync::Arc;

use anyhow::Context;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};

use crate::accounting::AccountingClient;
use crate::app_state::AppState;
use crate::booking_window::BookingWindowResolver;
use crate::cli::ServiceName;
use crate::config::Config;
use crate::cookie_refresher::CookieRefresherService;
use crate::headless_browser::HeadlessBrowserClient;
use crate::kvs::RedisKvs;
use crate::logs::LogBuffer;
use crate::queue::ReservationQueue;
use crate::scheduler::SchedulerService;
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::status::{ServiceStatus, ServiceStatusRegistry};
use crate::upstream::UpstreamClient;
use crate::vault::CredentialVault;
use std::process::ExitCode;
use tracing::{error, warn};

/// Main application struct containing all necessary components.
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Loads configuration and constructs every collaborator, wiring them into shared
    /// [`AppState`]. Does not start any service.
    pub async fn new(log_buffer: Arc<LogBuffer>) -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw().map(|k| {
                if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                    "SHUTDOWN_TIMEOUT".into()
                } else {
                    k.into()
                }
            }))
            .extract()
            .context("Failed to load config")?;

        let kvs: Arc<dyn crate::kvs::Kvs> = Arc::new(
            RedisKvs::new(&config.kvs_url, config.kvs_password.as_deref())
                .context("Failed to construct kvs client")?,
        );

        let vault = Arc::new(
            CredentialVault::new(kvs.clone(), &config.vault_key_hex)
                .context("Failed to construct credential vault")?,
        );
        let queue = Arc::new(ReservationQueue::new(kvs.clone()));

        let browser = Arc::new(HeadlessBrowserClient::new(config.browser_service_url.clone()));
        let booking_window = Arc::new(BookingWindowResolver::new(kvs.clone(), browser));

        let upstream = Arc::new(
            UpstreamClient::new(
                config.upstream_base_url.clone(),
                config.upstream_api_key.clone(),
                vault.clone(),
                config.rate_limiting.clone(),
            )
            .context("Failed to construct upstream client")?,
        );

        let accounting = Arc::new(AccountingClient::new(config.accounting_callback_url.clone()));

        let service_statuses = ServiceStatusRegistry::new();

        let app_state = AppState {
            config: Arc::new(config.clone()),
            kvs,
            vault,
            queue,
            booking_window,
            upstream,
            accounting,
            service_statuses,
            logs: log_buffer,
        };

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Parses the newline-delimited `venues_file` into venue ids for the Cookie
    /// Refresher. Blank lines and `#`-prefixed comments are skipped. Returns an empty
    /// list if no file is configured.
    fn load_venue_ids(&self) -> Result<Vec<i64>, anyhow::Error> {
        let Some(path) = &self.config.venues_file else {
            return Ok(Vec::new());
        };

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read venues file at {path}"))?;

        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                line.parse::<i64>()
                    .with_context(|| format!("Invalid venue id '{line}' in venues file"))
            })
            .collect()
    }

    /// Registers the given services with the manager (not yet spawned).
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Web) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager
                .register_service(ServiceName::Web.as_str(), web_service);
        }

        if services.contains(&ServiceName::Scheduler) {
            let scheduler_service = Box::new(SchedulerService::new(
                self.app_state.queue.clone(),
                self.app_state.vault.clone(),
                self.app_state.upstream.clone(),
                self.app_state.booking_window.clone(),
                self.app_state.accounting.clone(),
            ));
            self.service_manager
                .register_service(ServiceName::Scheduler.as_str(), scheduler_service);
        }

        if services.contains(&ServiceName::Refresher) {
            if self.config.cookie_refresh_enabled {
                let venue_ids = self.load_venue_ids()?;
                let browser = Arc::new(HeadlessBrowserClient::new(
                    self.config.browser_service_url.clone(),
                ));
                let refresher_service = Box::new(CookieRefresherService::new(
                    self.app_state.vault.clone(),
                    browser,
                    venue_ids,
                    self.config.cookie_refresh_interval,
                ));
                self.service_manager
                    .register_service(ServiceName::Refresher.as_str(), refresher_service);
            } else {
                warn!("cookie refresher disabled by configuration, not registering service");
                self.app_state
                    .service_statuses
                    .set(ServiceName::Refresher.as_str(), ServiceStatus::Disabled);
            }
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Starts all registered services.
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Runs the application until a service exits or a shutdown signal arrives.
    pub async fn run(self) -> ExitCode {
        use crate::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
