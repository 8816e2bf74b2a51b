use clap::Parser;

/// resnipe - reservation-sniping service for a WAF-protected booking platform
///
/// This application runs all services:
/// - web: HTTP control surface (reserve, list, cancel, credential linking, admin)
/// - scheduler: single-leader loop executing due reservations
/// - refresher: background task that pre-warms WAF session cookies
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServiceName {
    /// HTTP control surface
    Web,
    /// Single-leader reservation execution loop
    Scheduler,
    /// Background WAF cookie pre-warming loop
    Refresher,
}

impl ServiceName {
    /// Get all available services
    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Web, ServiceName::Scheduler, ServiceName::Refresher]
    }

    /// Convert to string for service registration
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Web => "web",
            ServiceName::Scheduler => "scheduler",
            ServiceName::Refresher => "refresher",
        }
    }
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_as_str() {
        assert_eq!(ServiceName::Web.as_str(), "web");
        assert_eq!(ServiceName::Scheduler.as_str(), "scheduler");
        assert_eq!(ServiceName::Refresher.as_str(), "refresher");
    }

    #[test]
    fn test_service_name_all() {
        let all = ServiceName::all();
        assert_eq!(all.len(), 3);
    }
}
