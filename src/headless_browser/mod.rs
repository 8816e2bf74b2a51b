//! Headless-browser collaborator client.
//!
//! Out of scope per the system's boundaries: we specify what the collaborator must
//! return, not how it drives the browser. Both consumers ([`PageFetcher`] for the
//! Booking-Window Resolver and [`CookieFetcher`] for the Cookie Refresher) talk to it
//! over HTTP as an external service, the same shape the teacher uses for its own
//! upstream collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::booking_window::{BookingWindowError, PageFetcher};
use crate::vault::WafCookie;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP client for the headless-browser cookie-harvest service.
#[derive(Clone)]
pub struct HeadlessBrowserClient {
    http: reqwest::Client,
    base_url: String,
}

impl HeadlessBrowserClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl PageFetcher for HeadlessBrowserClient {
    /// Fetches the raw HTML of a venue's booking page via the collaborator's
    /// `/render` endpoint.
    async fn fetch_booking_page(&self, venue_id: i64) -> Result<String, BookingWindowError> {
        let response = self
            .http
            .get(format!("{}/render", self.base_url))
            .query(&[("venue_id", venue_id.to_string())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BookingWindowError::Scrape(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BookingWindowError::Scrape(format!(
                "headless browser returned {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| BookingWindowError::Scrape(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CookieFetchError {
    #[error("headless browser request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct HarvestResponse {
    cookies: Vec<HarvestCookie>,
    user_agent: String,
}

#[derive(Deserialize)]
struct HarvestCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    http_only: bool,
    #[serde(default)]
    expires: Option<i64>,
}

fn default_path() -> String {
    "/".to_string()
}

/// The headless-browser collaborator as consumed by the Cookie Refresher: fetches a
/// fresh set of WAF cookies plus the user agent they were captured with.
#[async_trait]
pub trait CookieFetcher: Send + Sync {
    async fn harvest_cookies(&self, venue_id: i64) -> Result<(Vec<WafCookie>, String), CookieFetchError>;
}

#[async_trait]
impl CookieFetcher for HeadlessBrowserClient {
    async fn harvest_cookies(&self, venue_id: i64) -> Result<(Vec<WafCookie>, String), CookieFetchError> {
        let response = self
            .http
            .post(format!("{}/harvest", self.base_url))
            .query(&[("venue_id", venue_id.to_string())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| CookieFetchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CookieFetchError::Request(format!(
                "headless browser returned {}",
                response.status()
            )));
        }

        let body: HarvestResponse = response
            .json()
            .await
            .map_err(|e| CookieFetchError::Request(e.to_string()))?;

        let cookies = body
            .cookies
            .into_iter()
            .filter(|c| crate::vault::is_waf_cookie_name(&c.name))
            .map(|c| WafCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: c.expires,
            })
            .collect();

        Ok((cookies, body.user_agent))
    }
}
