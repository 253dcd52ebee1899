// Stream registry: publisher/subscriber roster and packet fan-out
//
// Grounded on the teacher's channel-status roster (one publisher id, a map
// of subscriber ids to message senders, broadcast by awaiting each
// subscriber's sender in turn while holding the stream's lock). This relay
// keeps that shape but drops the GOP cache: only the two codec headers and
// the latest metadata blob are latched, replayed once to a new subscriber
// at subscribe time and never replayed again.
//
// A registry entry, once created, lives for the rest of the process: it is
// never torn down just because it has no publisher or subscribers left, so
// a reconnecting publisher's headers are still there for anyone who joined
// in the gap. Entries are only ever dropped wholesale on server shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc::Sender, Mutex};

/// A unit of fan-out sent from a publisher's session to a subscriber's
/// session over its private mpsc channel.
#[derive(Debug, Clone)]
pub enum FanoutMessage {
    AudioHeader(Arc<Vec<u8>>),
    VideoHeader(Arc<Vec<u8>>),
    Metadata(Arc<Vec<u8>>),
    Audio { timestamp: u32, payload: Arc<Vec<u8>> },
    Video { timestamp: u32, payload: Arc<Vec<u8>> },
    PublisherGone,
}

pub struct StreamState {
    pub publisher_id: Option<u64>,
    pub subscribers: HashMap<u64, Sender<FanoutMessage>>,
    pub audio_header: Option<Arc<Vec<u8>>>,
    pub video_header: Option<Arc<Vec<u8>>>,
    pub metadata: Option<Arc<Vec<u8>>>,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            publisher_id: None,
            subscribers: HashMap::new(),
            audio_header: None,
            video_header: None,
            metadata: None,
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

pub type StreamHandle = Arc<Mutex<StreamState>>;

/// Registry of live streams, keyed by `"app/name"`.
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, StreamHandle>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        StreamRegistry {
            streams: Mutex::new(HashMap::new()),
        }
    }

    async fn stream_for(&self, key: &str) -> StreamHandle {
        let mut streams = self.streams.lock().await;
        streams
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StreamState::new())))
            .clone()
    }

    /// Claims the publisher slot for `key`. Fails if another session is
    /// already publishing to it.
    pub async fn publish(&self, key: &str, session_id: u64) -> Result<StreamHandle, ()> {
        let stream = self.stream_for(key).await;
        let mut state = stream.lock().await;

        if state.publisher_id.is_some() {
            return Err(());
        }

        state.publisher_id = Some(session_id);
        drop(state);

        Ok(stream)
    }

    /// Releases the publisher slot. Latched codec headers and metadata are
    /// kept as-is: a subscriber that joins before the next publisher shows
    /// up still gets the last known headers, and the next publisher simply
    /// overwrites them when its own sequence headers arrive. A no-op if
    /// `session_id` is not the current publisher.
    pub async fn unpublish(&self, stream: &StreamHandle, session_id: u64) {
        let mut state = stream.lock().await;

        if state.publisher_id != Some(session_id) {
            return;
        }

        state.publisher_id = None;

        for subscriber in state.subscribers.values() {
            let _ = subscriber.send(FanoutMessage::PublisherGone).await;
        }
    }

    /// Registers a subscriber and immediately replays any latched codec
    /// headers and metadata to it.
    pub async fn subscribe(&self, key: &str, session_id: u64, sender: Sender<FanoutMessage>) -> StreamHandle {
        let stream = self.stream_for(key).await;
        let mut state = stream.lock().await;

        if let Some(header) = &state.audio_header {
            let _ = sender.send(FanoutMessage::AudioHeader(header.clone())).await;
        }

        if let Some(header) = &state.video_header {
            let _ = sender.send(FanoutMessage::VideoHeader(header.clone())).await;
        }

        if let Some(meta) = &state.metadata {
            let _ = sender.send(FanoutMessage::Metadata(meta.clone())).await;
        }

        state.subscribers.insert(session_id, sender);
        drop(state);

        stream
    }

    pub async fn unsubscribe(&self, stream: &StreamHandle, session_id: u64) {
        let mut state = stream.lock().await;
        state.subscribers.remove(&session_id);
    }

    /// Broadcasts an audio packet from the current publisher, latching it
    /// first if it is a sequence header (AAC config, sound format 10/13).
    pub async fn publish_audio(&self, stream: &StreamHandle, session_id: u64, is_header: bool, timestamp: u32, payload: Vec<u8>) {
        let payload = Arc::new(payload);
        let mut state = stream.lock().await;

        if state.publisher_id != Some(session_id) {
            return;
        }

        if is_header {
            state.audio_header = Some(payload.clone());
        }

        for subscriber in state.subscribers.values() {
            let _ = subscriber
                .send(FanoutMessage::Audio { timestamp, payload: payload.clone() })
                .await;
        }
    }

    /// Broadcasts a video packet from the current publisher, latching it
    /// first if it is a sequence header (AVC config NALU type 0).
    pub async fn publish_video(&self, stream: &StreamHandle, session_id: u64, is_header: bool, timestamp: u32, payload: Vec<u8>) {
        let payload = Arc::new(payload);
        let mut state = stream.lock().await;

        if state.publisher_id != Some(session_id) {
            return;
        }

        if is_header {
            state.video_header = Some(payload.clone());
        }

        for subscriber in state.subscribers.values() {
            let _ = subscriber
                .send(FanoutMessage::Video { timestamp, payload: payload.clone() })
                .await;
        }
    }

    pub async fn publish_metadata(&self, stream: &StreamHandle, session_id: u64, payload: Vec<u8>) {
        let payload = Arc::new(payload);
        let mut state = stream.lock().await;

        if state.publisher_id != Some(session_id) {
            return;
        }

        state.metadata = Some(payload.clone());

        for subscriber in state.subscribers.values() {
            let _ = subscriber.send(FanoutMessage::Metadata(payload.clone())).await;
        }
    }

}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_publisher_is_rejected() {
        let registry = StreamRegistry::new();
        let stream = registry.publish("live/key", 1).await.unwrap();
        assert!(registry.publish("live/key", 2).await.is_err());

        registry.unpublish(&stream, 1).await;
        assert!(registry.publish("live/key", 2).await.is_ok());
    }

    #[tokio::test]
    async fn subscriber_receives_latched_headers_on_join() {
        let registry = StreamRegistry::new();
        let stream = registry.publish("live/key", 1).await.unwrap();

        registry.publish_video(&stream, 1, true, 0, vec![1, 2, 3]).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.subscribe("live/key", 2, tx).await;

        match rx.recv().await.unwrap() {
            FanoutMessage::VideoHeader(payload) => assert_eq!(*payload, vec![1, 2, 3]),
            other => panic!("expected a latched video header, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unpublish_keeps_latched_headers_for_the_next_publisher() {
        let registry = StreamRegistry::new();
        let stream = registry.publish("live/key", 1).await.unwrap();

        registry.publish_video(&stream, 1, true, 0, vec![1, 2, 3]).await;
        registry.unpublish(&stream, 1).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.subscribe("live/key", 2, tx).await;

        match rx.recv().await.unwrap() {
            FanoutMessage::VideoHeader(payload) => assert_eq!(*payload, vec![1, 2, 3]),
            other => panic!("expected the prior publisher's latched video header, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unpublish_notifies_subscribers() {
        let registry = StreamRegistry::new();
        let stream = registry.publish("live/key", 1).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.subscribe("live/key", 2, tx).await;

        registry.unpublish(&stream, 1).await;

        match rx.recv().await.unwrap() {
            FanoutMessage::PublisherGone => {}
            other => panic!("expected PublisherGone, got {other:?}"),
        }
    }
}
