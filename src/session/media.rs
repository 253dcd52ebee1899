// Handling of AUDIO/VIDEO/DATA messages from a publisher
//
// Grounded on the teacher's `handle_rtmp_packet_audio`/`handle_rtmp_packet_video`
// (sequence-header detection by inspecting the first payload bytes), minus
// the GOP cache push — packets go straight to `StreamRegistry`'s fan-out.

use crate::amf::{AmfDecoder, AmfEncoder};
use crate::rtmp::RtmpMessage;
use crate::server::{StreamHandle, StreamRegistry};

use super::types::{Role, Session};

pub async fn handle_audio(session: &Session, registry: &StreamRegistry, message: &RtmpMessage) {
    if session.role != Role::Publisher || message.payload.len() < 2 {
        return;
    }

    let Some(handle) = &session.stream_handle else {
        return;
    };

    let sound_format = (message.payload[0] >> 4) & 0x0f;
    // AAC (10) and wideband speech (13) carry an explicit sequence header
    // as their first frame, flagged by the second byte being 0.
    let is_header = (sound_format == 10 || sound_format == 13) && message.payload[1] == 0;

    registry
        .publish_audio(handle, session.id, is_header, message.timestamp, message.payload.clone())
        .await;
}

pub async fn handle_video(session: &Session, registry: &StreamRegistry, message: &RtmpMessage) {
    if session.role != Role::Publisher || message.payload.len() < 2 {
        return;
    }

    let Some(handle) = &session.stream_handle else {
        return;
    };

    let codec_id = message.payload[0] & 0x0f;
    // AVC (7) sequence header is flagged the same way as the AAC one.
    let is_header = codec_id == 7 && message.payload[1] == 0;

    registry
        .publish_video(handle, session.id, is_header, message.timestamp, message.payload.clone())
        .await;
}

/// Dispatches a Data/FlexStream message from a publisher. Grounded on the
/// original `RtmpSession::onNotify`/`Stream::onMeta`: the command name
/// decides whether this is metadata (under either alias) or a text cue,
/// and only the value that follows the recognized command name(s) is kept
/// and forwarded — the alias itself is not retained.
pub async fn handle_notify(session: &Session, registry: &StreamRegistry, timestamp: u32, payload: &[u8]) {
    if session.role != Role::Publisher {
        return;
    }

    let Some(handle) = &session.stream_handle else {
        return;
    };

    let mut decoder = AmfDecoder::new(payload);

    let Ok(command_item) = decoder.decode_value() else {
        return;
    };
    let Some(command) = command_item.as_str() else {
        return;
    };

    match command {
        "@setDataFrame" => {
            let Ok(inner) = decoder.decode_value() else {
                return;
            };
            if inner.as_str() != Some("onMetaData") {
                return;
            }
            publish_normalized_metadata(registry, handle, session.id, decoder.remaining_bytes()).await;
        }
        "onMetaData" => {
            publish_normalized_metadata(registry, handle, session.id, decoder.remaining_bytes()).await;
        }
        "onTextData" => {
            on_text(timestamp, decoder.remaining_bytes());
        }
        _ => {}
    }
}

/// Re-wraps a metadata value under the canonical `@setDataFrame`/`onMetaData`
/// pair before latching and broadcasting it, so subscribers see the same
/// shape regardless of which alias the publisher used.
async fn publish_normalized_metadata(registry: &StreamRegistry, handle: &StreamHandle, session_id: u64, metadata_value: &[u8]) {
    let mut enc = AmfEncoder::new();
    enc.write_string("@setDataFrame");
    enc.write_string("onMetaData");
    let mut payload = enc.into_bytes();
    payload.extend_from_slice(metadata_value);

    registry.publish_metadata(handle, session_id, payload).await;
}

/// Accepts a text data cue without forwarding it anywhere, matching the
/// original stream's text-data handler.
fn on_text(_timestamp: u32, _data: &[u8]) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfItem;
    use crate::server::StreamRegistry;

    async fn publishing_session(registry: &StreamRegistry) -> Session {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let mut session = Session::new_with_sender(1, tx);
        let handle = registry.publish("live/key", 1).await.unwrap();
        session.role = Role::Publisher;
        session.stream_handle = Some(handle);
        session
    }

    #[tokio::test]
    async fn set_data_frame_strips_the_alias_before_latching() {
        let registry = StreamRegistry::new();
        let session = publishing_session(&registry).await;

        let mut enc = AmfEncoder::new();
        enc.write_string("@setDataFrame");
        enc.write_string("onMetaData");
        enc.write_object(&[("width", AmfItem::Number(1920.0))]);

        handle_notify(&session, &registry, 0, &enc.into_bytes()).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.subscribe("live/key", 2, tx).await;

        match rx.recv().await.unwrap() {
            crate::server::FanoutMessage::Metadata(payload) => {
                let mut dec = AmfDecoder::new(&payload);
                assert_eq!(dec.decode_value().unwrap(), AmfItem::String("@setDataFrame".into()));
                assert_eq!(dec.decode_value().unwrap(), AmfItem::String("onMetaData".into()));
                assert_eq!(dec.decode_value().unwrap().object_field("width"), Some(&AmfItem::Number(1920.0)));
            }
            other => panic!("expected latched metadata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn on_text_data_does_not_reach_subscribers() {
        let registry = StreamRegistry::new();
        let session = publishing_session(&registry).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.subscribe("live/key", 2, tx).await;

        let mut enc = AmfEncoder::new();
        enc.write_string("onTextData");
        enc.write_string("hello");

        handle_notify(&session, &registry, 0, &enc.into_bytes()).await;

        assert!(rx.try_recv().is_err(), "onTextData must not be forwarded to subscribers");
    }
}
