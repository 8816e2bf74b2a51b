use clap::Parser;
use std::sync::Arc;
use tracing::info;

use resnipe::app::App;
use resnipe::cli::{Args, ServiceName};
use resnipe::logging;
use resnipe::logs::LogBuffer;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_buffer = Arc::new(LogBuffer::new());

    let mut app = match App::new(log_buffer.clone()).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("failed to initialize application: {e:?}");
            return std::process::ExitCode::FAILURE;
        }
    };

    logging::setup_logging(app.config(), args.tracing, log_buffer);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting resnipe"
    );

    if let Err(e) = app.setup_services(&ServiceName::all()) {
        tracing::error!(error = ?e, "failed to set up services");
        return std::process::ExitCode::FAILURE;
    }

    app.start_services();
    app.run().await
}
