// Main

mod amf;
mod buffer;
mod log;
mod rtmp;
mod server;
mod session;
mod utils;

use std::sync::Arc;

use log::{LogConfig, Logger};
use server::{run_server, RelayServerConfiguration, StreamRegistry};
use utils::get_env_bool;

/// Main function
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load .env
    let _ = dotenvy::dotenv();

    // Initialize logger

    let logger = Logger::new(LogConfig {
        prefix: "".to_string(),
        error_enabled: get_env_bool("LOG_ERROR", true),
        warning_enabled: get_env_bool("LOG_WARNING", true),
        info_enabled: get_env_bool("LOG_INFO", true),
        debug_enabled: get_env_bool("LOG_DEBUG", false),
        trace_enabled: get_env_bool("LOG_TRACE", get_env_bool("LOG_DEBUG", false)),
    });

    // Print version

    const VERSION: &str = env!("CARGO_PKG_VERSION");

    logger.log_info(&format!("RTMP relay server ({VERSION})"));

    // Load configuration

    let server_config = match RelayServerConfiguration::load_from_env(&logger) {
        Ok(c) => Arc::new(c),
        Err(_) => {
            std::process::exit(1);
        }
    };

    // Initialize stream registry

    let registry = Arc::new(StreamRegistry::new());

    // Run server

    run_server(logger, server_config, registry).await;

    Ok(())
}
