use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use stservo_bus::{logging::init_file_logger, server::ServiceConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let config = ServiceConfig::parse();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = init_file_logger(&config.log_file) {
        eprintln!("failed to open log file {}: {}", config.log_file.display(), e);
        return ExitCode::FAILURE;
    }

    info!("starting bus manager on {}", config.bind);
    match stservo_bus::server::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("bus manager stopped: {}", e);
            eprintln!("bus manager stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
