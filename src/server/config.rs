// Server configuration, loaded from environment variables

use crate::log::Logger;
use crate::log_error;
use crate::rtmp::{RTMP_CHUNK_SIZE_DEFAULT, RTMP_MAX_CHUNK_SIZE, RTMP_MIN_CHUNK_SIZE};
use crate::utils::{get_env_bool, get_env_string, get_env_u32};

const RTMP_PORT_DEFAULT: u32 = 1935;
const MAX_PORT: u32 = 65535;
const READ_BUFFER_SIZE_DEFAULT: u32 = 4096;

/// Server configuration
#[derive(Clone)]
pub struct RelayServerConfiguration {
    /// Port to listen on
    pub port: u32,

    /// Bind address
    pub bind_address: String,

    /// Negotiated chunk size advertised to publishers/players
    pub chunk_size: usize,

    /// Size of the read buffer used per session
    pub read_buffer_size: usize,

    /// Whether a GOP cache should be kept for fast subscriber joins.
    /// Declared for parity with deployments that expect the knob; this
    /// relay replays only the latched codec headers to new subscribers,
    /// never buffered frames, so the flag is read but not acted on.
    pub gop_cache_enabled: bool,

    /// Log every accepted connection and stream transition
    pub log_requests: bool,
}

impl RelayServerConfiguration {
    /// Loads configuration from environment variables
    pub fn load_from_env(logger: &Logger) -> Result<RelayServerConfiguration, ()> {
        let port = get_env_u32("RTMP_PORT", RTMP_PORT_DEFAULT);

        if port == 0 || port > MAX_PORT {
            log_error!(logger, format!("RTMP_PORT has an invalid value: {}", port));
            return Err(());
        }

        let bind_address = get_env_string("BIND_ADDRESS", "0.0.0.0");

        let chunk_size = get_env_u32("RTMP_CHUNK_SIZE", RTMP_CHUNK_SIZE_DEFAULT as u32) as usize;

        if !(RTMP_MIN_CHUNK_SIZE..=RTMP_MAX_CHUNK_SIZE).contains(&chunk_size) {
            log_error!(
                logger,
                format!(
                    "RTMP_CHUNK_SIZE has an invalid value: {}. Min: {}. Max: {}",
                    chunk_size, RTMP_MIN_CHUNK_SIZE, RTMP_MAX_CHUNK_SIZE
                )
            );
            return Err(());
        }

        let read_buffer_size =
            get_env_u32("RTMP_READ_BUFFER_SIZE", READ_BUFFER_SIZE_DEFAULT) as usize;
        let gop_cache_enabled = get_env_bool("RTMP_GOP_CACHE", false);
        let log_requests = get_env_bool("LOG_REQUESTS", true);

        Ok(RelayServerConfiguration {
            port,
            bind_address,
            chunk_size,
            read_buffer_size,
            gop_cache_enabled,
            log_requests,
        })
    }

    /// Gets the TCP address to listen on
    pub fn get_tcp_listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
