// Per-connection session state

use tokio::sync::mpsc::Sender;

use crate::rtmp::RTMP_CHUNK_SIZE_DEFAULT;
use crate::server::{FanoutMessage, StreamHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Undetermined,
    Publisher,
    Subscriber,
}

/// State carried for the lifetime of one accepted connection. Owned
/// exclusively by that connection's task — nothing here is shared or
/// locked, which is what makes the chunk decode loop and the dispatch
/// functions safe to call without any synchronization of their own.
pub struct Session {
    pub id: u64,
    pub app: Option<String>,
    pub stream_key: Option<String>,
    pub role: Role,
    pub stream_handle: Option<StreamHandle>,
    pub message_stream_id: u32,
    pub chunk_size_out: usize,
    pub connected: bool,
    /// This session's own fan-out channel. Registered with the stream
    /// registry on `play`; cloned out of `Session` rather than looked up
    /// because dispatch has no other way to hand the registry a sender
    /// for a subscriber it has not registered yet.
    pub fanout_tx: Sender<FanoutMessage>,
}

impl Session {
    pub fn new_with_sender(id: u64, fanout_tx: Sender<FanoutMessage>) -> Self {
        Session {
            id,
            app: None,
            stream_key: None,
            role: Role::Undetermined,
            stream_handle: None,
            message_stream_id: 0,
            chunk_size_out: RTMP_CHUNK_SIZE_DEFAULT,
            connected: false,
            fanout_tx,
        }
    }
}
