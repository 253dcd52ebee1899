// TCP accept loop
//
// Each accepted connection gets a unique session id, a log-prefixed child
// logger, and its own spawned task that owns the socket for the rest of
// its life — mirroring the teacher's `tcp_server`/`handle_connection_tcp`
// split, collapsed into one function since this relay has no TLS listener
// to share it with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::log::Logger;
use crate::session::run_session;
use crate::{log_error, log_info};

use super::config::RelayServerConfiguration;
use super::registry::StreamRegistry;

pub async fn run_server(logger: Logger, config: Arc<RelayServerConfiguration>, registry: Arc<StreamRegistry>) {
    let addr = config.get_tcp_listen_addr();

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log_error!(logger, format!("Could not bind to {addr}: {e}"));
            return;
        }
    };

    log_info!(logger, format!("Listening for RTMP connections on {addr}"));

    let next_session_id = AtomicU64::new(1);

    loop {
        let (socket, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log_error!(logger, format!("Failed to accept connection: {e}"));
                continue;
            }
        };

        let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);

        if config.log_requests {
            log_info!(logger, format!("[#{session_id}] Connection accepted from {remote_addr}"));
        }

        let session_logger = logger.make_child_logger(&format!("[#{session_id}] "));
        let session_config = config.clone();
        let session_registry = registry.clone();

        tokio::spawn(async move {
            if let Err(e) = socket.set_nodelay(true) {
                log_error!(session_logger, format!("Failed to set TCP_NODELAY: {e}"));
            }

            run_session(socket, session_id, session_logger, session_config, session_registry).await;
        });
    }
}
