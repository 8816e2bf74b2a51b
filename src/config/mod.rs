//! Configuration module for resnipe.
//!
//! Loads and parses configuration from environment variables using the figment
//! crate. Supports flexible duration parsing that accepts both numeric values
//! (interpreted as seconds) and duration strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration containing all sub-configurations.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Log level for the application.
    ///
    /// This value is used to set the log level for this application's target specifically,
    /// e.g. "debug" would be similar to "warn,resnipe=debug,...".
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error". Defaults to "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Port for the HTTP control surface (default: 8080).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout duration.
    ///
    /// Accepts both numeric values (seconds) and duration strings. Defaults to 30s,
    /// matching the scheduler's own cancellation-responsiveness ceiling.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Redis-compatible key-value store connection URL (e.g. `redis://host:6379`).
    pub kvs_url: String,
    /// Optional password for the KVS, appended to the connection if the URL doesn't embed one.
    pub kvs_password: Option<String>,

    /// Shared secret required in `X-Internal-Token` on every non-public control surface route.
    pub internal_token: String,
    /// Bearer token required on `/admin/*` routes.
    pub admin_token: String,

    /// 32-byte hex-encoded AES-256-GCM key protecting `UserCredentials` at rest.
    pub vault_key_hex: String,

    /// Upstream booking platform base URL.
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// Upstream API key, constant per deployment, sent on every call.
    pub upstream_api_key: String,

    /// Whether the Cookie Refresher service pre-warms WAF sessions on an interval.
    #[serde(default = "default_cookie_refresh_enabled")]
    pub cookie_refresh_enabled: bool,
    /// Interval between Cookie Refresher sweeps.
    #[serde(
        default = "default_cookie_refresh_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub cookie_refresh_interval: Duration,
    /// Path to a newline-delimited file of venue ids the Cookie Refresher keeps warm.
    pub venues_file: Option<String>,

    /// Base URL of the headless-browser cookie-harvest collaborator.
    #[serde(default = "default_browser_service_url")]
    pub browser_service_url: String,

    /// Best-effort accounting callback URL invoked after a successful booking.
    pub accounting_callback_url: Option<String>,

    /// Rate limiting configuration for Upstream Protocol Client requests.
    #[serde(default = "default_rate_limiting")]
    pub rate_limiting: RateLimitingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upstream_base_url() -> String {
    "https://api.resy.com".to_string()
}

fn default_cookie_refresh_enabled() -> bool {
    false
}

fn default_cookie_refresh_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_browser_service_url() -> String {
    "http://localhost:9222".to_string()
}

/// Rate limiting configuration for Upstream Protocol Client requests.
#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitingConfig {
    /// Requests per minute for login/session operations (very conservative).
    #[serde(default = "default_session_rpm")]
    pub session_rpm: u32,
    /// Requests per minute for FIND/search operations (moderate).
    #[serde(default = "default_search_rpm")]
    pub search_rpm: u32,
    /// Requests per minute for DETAIL/metadata operations (moderate).
    #[serde(default = "default_metadata_rpm")]
    pub metadata_rpm: u32,
    /// Requests per minute for BOOK operations (low priority, high stakes).
    #[serde(default = "default_book_rpm")]
    pub book_rpm: u32,
    /// Burst allowance (extra requests allowed in short bursts).
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: u32,
}

fn default_rate_limiting() -> RateLimitingConfig {
    RateLimitingConfig {
        session_rpm: default_session_rpm(),
        search_rpm: default_search_rpm(),
        metadata_rpm: default_metadata_rpm(),
        book_rpm: default_book_rpm(),
        burst_allowance: default_burst_allowance(),
    }
}

fn default_session_rpm() -> u32 {
    6
}

fn default_search_rpm() -> u32 {
    30
}

fn default_metadata_rpm() -> u32 {
    20
}

fn default_book_rpm() -> u32 {
    10
}

fn default_burst_allowance() -> u32 {
    3
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        default_rate_limiting()
    }
}

/// Duration parser configured to handle various time units with seconds as default.
///
/// Supports seconds (s, default), milliseconds (ms), and minutes (m). Does not support
/// fractions, exponents, or infinity values. Allows whitespace between the number and
/// the time unit and multiple time units summed together (e.g. "10s 2m" = 130 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and string values.
///
/// - `1` -> 1 second
/// - `"30s"` -> 30 seconds
/// - `"2 m"` -> 2 minutes
/// - `"1500ms"` -> 1.5 seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "invalid duration format '{value}': {e}. examples: '5' (5 seconds), '3500ms', '30s', '2m'"
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
