use advanced_statefulset::{config::Config, manager, telemetry};
use clap::Parser;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    telemetry::init(config.verbosity);

    if let Err(e) = manager::run(config).await {
        tracing::error!(error = %e, "controller exited with error");
        std::process::exit(1);
    }
}
