use std::sync::Arc;

use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::TracingFormat;
use crate::config::Config;
use crate::formatter;
use crate::logs::LogBuffer;

/// Configure and initialize logging for the application.
///
/// Events are fanned out to a formatted writer (pretty or JSON, per CLI flag) and into
/// the bounded [`LogBuffer`] consumed by the `/api/logs` control surface endpoint.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat, log_buffer: Arc<LogBuffer>) {
    // Note: even when base_level is trace or debug, we suppress trace logs from noisy
    // infrastructure modules to keep output readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!(
            "warn,resnipe={base_level},resnipe::upstream=debug,resnipe::vault=warn"
        ))
    });

    let use_pretty = matches!(tracing_format, TracingFormat::Pretty);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if use_pretty {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .event_format(formatter::CustomPrettyFormatter),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .event_format(formatter::CustomJsonFormatter)
                .fmt_fields(JsonFields::new()),
        )
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(log_buffer);

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
