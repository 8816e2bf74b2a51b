//! Booking-Window Resolver: given a venue, returns a cached or freshly inferred
//! (days-in-advance, release-hour, release-minute, timezone) tuple used to compute
//! the instant the scheduler must attempt a booking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::kvs::{Kvs, KvsError};

const DEFAULT_TIMEZONE: &str = "America/New_York";
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum BookingWindowError {
    #[error(transparent)]
    Kvs(#[from] KvsError),
    #[error("could not determine booking window")]
    Undetermined,
    #[error("unrecognized timezone: {0}")]
    UnknownTimezone(String),
    #[error("page scrape failed: {0}")]
    Scrape(String),
    #[error("corrupt booking window record: {0}")]
    Corrupt(String),
}

/// (days-in-advance, release-hour, release-minute, timezone) tuple for a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingWindow {
    pub days_in_advance: u32,
    pub release_hour: u32,
    pub release_minute: u32,
    pub timezone: String,
    pub scraped_at: DateTime<Utc>,
}

impl BookingWindow {
    /// Converts `reservation_time` into this window's local zone, subtracts
    /// `days_in_advance` calendar days, sets the wall-clock time to the release
    /// hour/minute, then converts back to UTC.
    pub fn calculate_run_time(
        &self,
        reservation_time: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, BookingWindowError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| BookingWindowError::UnknownTimezone(self.timezone.clone()))?;

        let local = reservation_time.with_timezone(&tz);
        let target_date = local.date_naive() - chrono::Duration::days(self.days_in_advance as i64);
        let release_time = NaiveTime::from_hms_opt(self.release_hour, self.release_minute, 0)
            .ok_or(BookingWindowError::Undetermined)?;

        let naive = target_date.and_time(release_time);
        let local_run_time = tz
            .from_local_datetime(&naive)
            .single()
            .ok_or(BookingWindowError::Undetermined)?;

        Ok(local_run_time.with_timezone(&Utc))
    }
}

/// The headless-browser collaborator: we specify what it must return, not how. A page
/// fetch returns the raw HTML of a venue's booking page for parsing.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_booking_page(&self, venue_id: i64) -> Result<String, BookingWindowError>;
}

fn cache_key(venue_id: i64) -> String {
    format!("booking_window:{venue_id}")
}

/// Resolves and caches [`BookingWindow`]s per venue.
pub struct BookingWindowResolver {
    kvs: Arc<dyn Kvs>,
    fetcher: Arc<dyn PageFetcher>,
}

impl BookingWindowResolver {
    pub fn new(kvs: Arc<dyn Kvs>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { kvs, fetcher }
    }

    /// On cache hit returns the cached window. On miss, scrapes the venue's page (with
    /// up to 3 attempts, 2s/4s linear back-off) and caches the result for 24h.
    pub async fn resolve(&self, venue_id: i64) -> Result<BookingWindow, BookingWindowError> {
        if let Some(raw) = self.kvs.get(&cache_key(venue_id)).await? {
            let window: BookingWindow = serde_json::from_str(&raw)
                .map_err(|e| BookingWindowError::Corrupt(e.to_string()))?;
            return Ok(window);
        }

        let window = self.scrape_with_retry(venue_id).await?;

        let serialized = serde_json::to_string(&window)
            .map_err(|e| BookingWindowError::Corrupt(e.to_string()))?;
        self.kvs
            .set(&cache_key(venue_id), &serialized, Some(CACHE_TTL))
            .await?;

        Ok(window)
    }

    async fn scrape_with_retry(&self, venue_id: i64) -> Result<BookingWindow, BookingWindowError> {
        let backoffs = [Duration::from_secs(2), Duration::from_secs(4)];
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            match self.fetcher.fetch_booking_page(venue_id).await {
                Ok(html) => match parse_booking_window(&html) {
                    Ok(window) => return Ok(window),
                    Err(e) => {
                        warn!(venue_id, attempt, error = %e, "booking window parse failed");
                        last_err = Some(e);
                    }
                },
                Err(e) => {
                    warn!(venue_id, attempt, error = %e, "booking window scrape failed");
                    last_err = Some(e);
                }
            }

            if let Some(backoff) = backoffs.get(attempt as usize) {
                tokio::time::sleep(*backoff).await;
            }
        }

        Err(last_err.unwrap_or(BookingWindowError::Undetermined))
    }
}

#[derive(Deserialize)]
struct StructuredBookingData {
    #[serde(default)]
    days_in_advance: Option<u32>,
    #[serde(default)]
    release_time: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

/// Parses a structured data blob embedded in the page (preferred path), falling back
/// to regex-over-HTML when absent.
fn parse_booking_window(html: &str) -> Result<BookingWindow, BookingWindowError> {
    if let Some(structured) = extract_structured_blob(html) {
        if let (Some(days), Some(release_time)) =
            (structured.days_in_advance, structured.release_time.as_deref())
        {
            if let Some((hour, minute)) = parse_release_time(release_time) {
                if days == 0 {
                    return Err(BookingWindowError::Undetermined);
                }
                return Ok(BookingWindow {
                    days_in_advance: days,
                    release_hour: hour,
                    release_minute: minute,
                    timezone: structured
                        .timezone
                        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
                    scraped_at: Utc::now(),
                });
            }
        }
    }

    let days_in_advance = regex_days_in_advance(html).ok_or(BookingWindowError::Undetermined)?;
    if days_in_advance == 0 {
        return Err(BookingWindowError::Undetermined);
    }
    let (release_hour, release_minute) =
        regex_release_time(html).ok_or(BookingWindowError::Undetermined)?;

    Ok(BookingWindow {
        days_in_advance,
        release_hour,
        release_minute,
        timezone: DEFAULT_TIMEZONE.to_string(),
        scraped_at: Utc::now(),
    })
}

fn extract_structured_blob(html: &str) -> Option<StructuredBookingData> {
    let marker = "window.__BOOKING_WINDOW__ = ";
    let start = html.find(marker)? + marker.len();
    let end = html[start..].find(';')? + start;
    serde_json::from_str(&html[start..end]).ok()
}

fn regex_days_in_advance(html: &str) -> Option<u32> {
    let re = Regex::new(r"(?i)(\d{1,3})\s*days?\s*in\s*advance").ok()?;
    re.captures(html)?.get(1)?.as_str().parse().ok()
}

fn regex_release_time(html: &str) -> Option<(u32, u32)> {
    let re = Regex::new(r"(?i)release\w*\s*(?:at)?\s*(\d{1,2}):(\d{2})\s*(am|pm)?").ok()?;
    let caps = re.captures(html)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
    if let Some(meridiem) = caps.get(3) {
        let is_pm = meridiem.as_str().eq_ignore_ascii_case("pm");
        if is_pm && hour != 12 {
            hour += 12;
        } else if !is_pm && hour == 12 {
            hour = 0;
        }
    }
    Some((hour, minute))
}

fn parse_release_time(s: &str) -> Option<(u32, u32)> {
    let (hour, minute) = s.split_once(':')?;
    Some((hour.parse().ok()?, minute.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn calculate_run_time_matches_documented_example() {
        let window = BookingWindow {
            days_in_advance: 30,
            release_hour: 9,
            release_minute: 0,
            timezone: "America/New_York".to_string(),
            scraped_at: Utc::now(),
        };
        let reservation_time = Utc.with_ymd_and_hms(2025, 7, 31, 23, 0, 0).unwrap();
        let run_time = window.calculate_run_time(reservation_time).unwrap();
        assert_eq!(run_time, Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn calculate_run_time_rejects_unknown_timezone() {
        let window = BookingWindow {
            days_in_advance: 30,
            release_hour: 9,
            release_minute: 0,
            timezone: "Not/AZone".to_string(),
            scraped_at: Utc::now(),
        };
        assert!(window.calculate_run_time(Utc::now()).is_err());
    }

    #[test]
    fn regex_fallback_parses_days_and_release_time() {
        let html = "<p>Reservations open 30 days in advance, release at 9:00 am</p>";
        let window = parse_booking_window(html).unwrap();
        assert_eq!(window.days_in_advance, 30);
        assert_eq!(window.release_hour, 9);
        assert_eq!(window.release_minute, 0);
    }

    #[test]
    fn structured_blob_is_preferred_over_regex() {
        let html = r#"<script>window.__BOOKING_WINDOW__ = {"days_in_advance":14,"release_time":"10:30","timezone":"America/Chicago"};</script>
            <p>60 days in advance, release at 3:00 pm</p>"#;
        let window = parse_booking_window(html).unwrap();
        assert_eq!(window.days_in_advance, 14);
        assert_eq!(window.release_hour, 10);
        assert_eq!(window.release_minute, 30);
        assert_eq!(window.timezone, "America/Chicago");
    }

    #[test]
    fn zero_days_in_advance_is_an_error() {
        let html = "<p>0 days in advance, release at 9:00 am</p>";
        assert!(matches!(
            parse_booking_window(html),
            Err(BookingWindowError::Undetermined)
        ));
    }
}
