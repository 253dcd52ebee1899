// Invoke (command) dispatch
//
// Grounded on the teacher's per-command handlers under `session/commands/`,
// collapsed into one module since this relay's command surface is a small,
// fixed subset. Dispatch functions are deliberately I/O-free: they return
// the bytes to write rather than writing them, so they can be tested
// without a socket, and so the caller keeps sole ownership of write
// ordering on the connection.

use crate::amf::{AmfDecoder, AmfError, AmfItem};
use crate::rtmp::*;

use super::types::{Role, Session};
use crate::server::StreamRegistry;

pub struct DispatchOutcome {
    pub responses: Vec<Vec<u8>>,
    pub close: bool,
}

impl DispatchOutcome {
    fn none() -> Self {
        DispatchOutcome { responses: Vec::new(), close: false }
    }

    fn single(message: Vec<u8>) -> Self {
        DispatchOutcome { responses: vec![message], close: false }
    }

    fn multi(messages: Vec<Vec<u8>>) -> Self {
        DispatchOutcome { responses: messages, close: false }
    }

    fn close() -> Self {
        DispatchOutcome { responses: Vec::new(), close: true }
    }
}

fn decode_command(payload: &[u8]) -> Result<(String, f64, Vec<AmfItem>), AmfError> {
    let mut decoder = AmfDecoder::new(payload);
    let name = decoder.decode_value()?.as_str().unwrap_or_default().to_string();
    let transaction_id = decoder.decode_value()?.as_f64().unwrap_or(0.0);
    let args = decoder.decode_all()?;
    Ok((name, transaction_id, args))
}

fn invoke_message(stream_id: u32, chunk_size: usize, payload: Vec<u8>) -> Vec<u8> {
    chunk_message(RTMP_CHANNEL_INVOKE, RTMP_TYPE_INVOKE as u8, stream_id, 0, &payload, chunk_size)
}

/// Dispatches a decoded AMF0 command (an INVOKE message). Returns the
/// response messages to write back, if any, and whether the session
/// should be torn down.
pub async fn handle_invoke(session: &mut Session, registry: &StreamRegistry, payload: &[u8]) -> DispatchOutcome {
    let (name, transaction_id, args) = match decode_command(payload) {
        Ok(v) => v,
        Err(_) => return DispatchOutcome::none(),
    };

    match name.as_str() {
        "connect" => handle_connect(session, transaction_id, &args),
        "createStream" => handle_create_stream(session, transaction_id),
        "publish" => handle_publish(session, registry, &args).await,
        "play" => handle_play(session, registry, &args).await,
        "deleteStream" => {
            teardown_stream(session, registry).await;
            DispatchOutcome::none()
        }
        "_checkbw" => DispatchOutcome::single(invoke_message(
            0,
            session.chunk_size_out,
            amf_create_stream_result_payload(transaction_id, 0.0),
        )),
        // Commands a client would send to a server it is itself connected
        // to (_result, onStatus) or that this relay doesn't act on
        // (pause, receiveAudio/Video toggles) are accepted and ignored.
        _ => DispatchOutcome::none(),
    }
}

fn handle_connect(session: &mut Session, transaction_id: f64, args: &[AmfItem]) -> DispatchOutcome {
    let connect_object = args.first();

    // Only AMF0 is supported on the wire. A present, non-zero objectEncoding
    // asks for AMF3 command encoding, which this relay cannot speak.
    if let Some(encoding) = connect_object.and_then(|v| v.object_field("objectEncoding")).and_then(|v| v.as_f64()) {
        if encoding != 0.0 {
            return DispatchOutcome::close();
        }
    }

    let app = connect_object
        .and_then(|v| v.object_field("app"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    session.app = Some(app);
    session.connected = true;

    DispatchOutcome::multi(vec![
        encode_window_ack_size(RTMP_DEFAULT_WINDOW_ACK_SIZE),
        encode_set_peer_bandwidth(RTMP_DEFAULT_PEER_BANDWIDTH, 2),
        encode_user_control_stream_begin(0),
        encode_set_chunk_size(session.chunk_size_out as u32),
        invoke_message(0, session.chunk_size_out, amf_connect_result_payload(transaction_id)),
    ])
}

fn handle_create_stream(session: &mut Session, transaction_id: f64) -> DispatchOutcome {
    session.message_stream_id = 1;

    DispatchOutcome::single(invoke_message(
        0,
        session.chunk_size_out,
        amf_create_stream_result_payload(transaction_id, session.message_stream_id as f64),
    ))
}

async fn handle_publish(session: &mut Session, registry: &StreamRegistry, args: &[AmfItem]) -> DispatchOutcome {
    let stream_name = args.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let app = session.app.clone().unwrap_or_default();

    if stream_name.is_empty() || app.is_empty() {
        return DispatchOutcome::single(invoke_message(
            session.message_stream_id,
            session.chunk_size_out,
            amf_error_status_payload("NetStream.Publish.BadName", "Missing app or stream name"),
        ));
    }

    let key = format!("{app}/{stream_name}");

    match registry.publish(&key, session.id).await {
        Ok(handle) => {
            session.role = Role::Publisher;
            session.stream_key = Some(key);
            session.stream_handle = Some(handle);

            DispatchOutcome::single(invoke_message(
                session.message_stream_id,
                session.chunk_size_out,
                amf_on_status_payload("status", "NetStream.Publish.Start", &format!("{stream_name} is now published.")),
            ))
        }
        Err(()) => {
            let error = invoke_message(
                session.message_stream_id,
                session.chunk_size_out,
                amf_error_status_payload("NetStream.Publish.BadName", "Stream is already being published"),
            );
            DispatchOutcome { responses: vec![error], close: true }
        }
    }
}

async fn handle_play(session: &mut Session, registry: &StreamRegistry, args: &[AmfItem]) -> DispatchOutcome {
    let stream_name = args.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let app = session.app.clone().unwrap_or_default();

    if stream_name.is_empty() || app.is_empty() {
        return DispatchOutcome::single(invoke_message(
            session.message_stream_id,
            session.chunk_size_out,
            amf_error_status_payload("NetStream.Play.Failed", "Missing app or stream name"),
        ));
    }

    let key = format!("{app}/{stream_name}");
    let handle = registry.subscribe(&key, session.id, session.fanout_tx.clone()).await;

    session.role = Role::Subscriber;
    session.stream_key = Some(key);
    session.stream_handle = Some(handle);

    DispatchOutcome::multi(vec![
        encode_user_control_stream_begin(session.message_stream_id),
        invoke_message(
            session.message_stream_id,
            session.chunk_size_out,
            amf_on_status_payload("status", "NetStream.Play.Reset", &format!("Playing and resetting {stream_name}.")),
        ),
        invoke_message(
            session.message_stream_id,
            session.chunk_size_out,
            amf_on_status_payload("status", "NetStream.Play.Start", &format!("Started playing {stream_name}.")),
        ),
    ])
}

/// Releases whatever role `session` holds in the registry. Called both on
/// an explicit `deleteStream` and when the connection itself goes away.
pub async fn teardown_stream(session: &mut Session, registry: &StreamRegistry) {
    let role = session.role.clone();
    let handle = session.stream_handle.take();
    session.stream_key = None;

    if let Some(handle) = handle {
        match role {
            Role::Publisher => registry.unpublish(&handle, session.id).await,
            Role::Subscriber => registry.unsubscribe(&handle, session.id).await,
            Role::Undetermined => {}
        }
    }

    session.role = Role::Undetermined;
}

/// Not reachable from the session's own command set but kept alongside
/// dispatch for symmetry with `DispatchOutcome::close`, which the chunk
/// decode loop uses when a message is malformed beyond recovery.
pub fn protocol_violation() -> DispatchOutcome {
    DispatchOutcome::close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfEncoder;
    use tokio::sync::mpsc;

    fn new_session() -> Session {
        let (tx, _rx) = mpsc::channel(8);
        Session::new_with_sender(1, tx)
    }

    fn connect_payload(app: &str) -> Vec<u8> {
        let mut enc = AmfEncoder::new();
        enc.write_string("connect");
        enc.write_number(1.0);
        enc.write_object(&[("app", AmfItem::String(app.to_string()))]);
        enc.into_bytes()
    }

    #[tokio::test]
    async fn connect_sets_app_and_replies() {
        let mut session = new_session();
        let registry = StreamRegistry::new();

        let outcome = handle_invoke(&mut session, &registry, &connect_payload("live")).await;

        assert_eq!(session.app.as_deref(), Some("live"));
        assert!(!outcome.responses.is_empty());
        assert!(!outcome.close);
    }

    #[tokio::test]
    async fn publish_then_second_publish_is_rejected() {
        let mut session = new_session();
        session.app = Some("live".to_string());
        let registry = StreamRegistry::new();

        let mut enc = AmfEncoder::new();
        enc.write_string("publish");
        enc.write_number(2.0);
        enc.write_null();
        enc.write_string("stream-key");
        enc.write_string("live");

        let outcome = handle_invoke(&mut session, &registry, &enc.into_bytes()).await;
        assert_eq!(session.role, Role::Publisher);
        assert_eq!(outcome.responses.len(), 1);

        let mut other = new_session();
        other.id = 2;
        other.app = Some("live".to_string());

        let mut enc2 = AmfEncoder::new();
        enc2.write_string("publish");
        enc2.write_number(2.0);
        enc2.write_null();
        enc2.write_string("stream-key");
        enc2.write_string("live");

        let outcome2 = handle_invoke(&mut other, &registry, &enc2.into_bytes()).await;
        assert_ne!(other.role, Role::Publisher);
        assert_eq!(outcome2.responses.len(), 1);
        assert!(outcome2.close, "a publish collision should tear down the colliding session");
    }

    #[tokio::test]
    async fn connect_with_nonzero_object_encoding_is_rejected() {
        let mut session = new_session();
        let registry = StreamRegistry::new();

        let mut enc = AmfEncoder::new();
        enc.write_string("connect");
        enc.write_number(1.0);
        enc.write_object(&[
            ("app", AmfItem::String("live".to_string())),
            ("objectEncoding", AmfItem::Number(3.0)),
        ]);

        let outcome = handle_invoke(&mut session, &registry, &enc.into_bytes()).await;
        assert!(outcome.close);
    }
}
