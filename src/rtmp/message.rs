// RTMP message encoding
//
// Every outgoing message goes through `chunk_message`, which always emits
// a single fmt-0 header followed by fmt-3 continuations — no header
// compression. That happens to match what a well-behaved live-streaming
// encoder already does on the wire, so there is no loss of interop from
// skipping fmt-1/fmt-2 compression on output.

use crate::amf::AmfEncoder;
use crate::buffer::*;

use super::constants::*;

const EXTENDED_TIMESTAMP_MARKER: u32 = 0x00ff_ffff;

fn write_basic_header(out: &mut Vec<u8>, fmt: u8, cid: u32) {
    if cid < 64 {
        out.push((fmt << 6) | cid as u8);
    } else if cid < 320 {
        out.push(fmt << 6);
        out.push((cid - 64) as u8);
    } else {
        out.push((fmt << 6) | 1);
        let v = cid - 64;
        out.push((v & 0xff) as u8);
        out.push((v >> 8) as u8);
    }
}

/// Encodes `payload` as a complete RTMP message: one fmt-0 chunk header
/// followed by as many fmt-3 continuation chunks as `chunk_size` requires.
pub fn chunk_message(
    cid: u32,
    msg_type: u8,
    stream_id: u32,
    timestamp: u32,
    payload: &[u8],
    chunk_size: usize,
) -> Vec<u8> {
    let chunk_size = chunk_size.max(1);
    let extended = timestamp >= EXTENDED_TIMESTAMP_MARKER;
    let ts_field = if extended { EXTENDED_TIMESTAMP_MARKER } else { timestamp };

    let mut out = Vec::with_capacity(payload.len() + payload.len() / chunk_size * 5 + 16);

    write_basic_header(&mut out, 0, cid);

    let mut hdr = [0u8; 11];
    store_u24_be(&mut hdr[0..3], ts_field);
    store_u24_be(&mut hdr[3..6], payload.len() as u32);
    hdr[6] = msg_type;
    store_u32_le(&mut hdr[7..11], stream_id);
    out.extend_from_slice(&hdr);

    if extended {
        let mut ext = [0u8; 4];
        store_u32_be(&mut ext, timestamp);
        out.extend_from_slice(&ext);
    }

    let mut offset = 0;
    let mut first = true;

    loop {
        let take = (payload.len() - offset).min(chunk_size);

        if !first {
            write_basic_header(&mut out, 3, cid);

            if extended {
                let mut ext = [0u8; 4];
                store_u32_be(&mut ext, timestamp);
                out.extend_from_slice(&ext);
            }
        }

        out.extend_from_slice(&payload[offset..offset + take]);
        offset += take;
        first = false;

        if offset >= payload.len() {
            break;
        }
    }

    out
}

// Protocol control messages (channel 2, stream id 0)

pub fn encode_set_chunk_size(chunk_size: u32) -> Vec<u8> {
    let mut payload = [0u8; 4];
    store_u32_be(&mut payload, chunk_size);
    chunk_message(RTMP_CHANNEL_PROTOCOL, RTMP_TYPE_SET_CHUNK_SIZE as u8, 0, 0, &payload, 128)
}

pub fn encode_window_ack_size(window_size: u32) -> Vec<u8> {
    let mut payload = [0u8; 4];
    store_u32_be(&mut payload, window_size);
    chunk_message(
        RTMP_CHANNEL_PROTOCOL,
        RTMP_TYPE_WINDOW_ACKNOWLEDGEMENT_SIZE as u8,
        0,
        0,
        &payload,
        128,
    )
}

pub fn encode_set_peer_bandwidth(window_size: u32, limit_type: u8) -> Vec<u8> {
    let mut payload = [0u8; 5];
    store_u32_be(&mut payload[0..4], window_size);
    payload[4] = limit_type;
    chunk_message(
        RTMP_CHANNEL_PROTOCOL,
        RTMP_TYPE_SET_PEER_BANDWIDTH as u8,
        0,
        0,
        &payload,
        128,
    )
}

pub fn encode_user_control_stream_begin(stream_id: u32) -> Vec<u8> {
    let mut payload = [0u8; 6];
    store_u16_be(&mut payload[0..2], STREAM_BEGIN);
    store_u32_be(&mut payload[2..6], stream_id);
    chunk_message(RTMP_CHANNEL_PROTOCOL, RTMP_TYPE_EVENT as u8, 0, 0, &payload, 128)
}

/// Replies to a peer's PingRequest, echoing the timestamp it sent.
pub fn encode_user_control_ping_response(timestamp: u32) -> Vec<u8> {
    let mut payload = [0u8; 6];
    store_u16_be(&mut payload[0..2], USER_CONTROL_EVENT_PING_RESPONSE);
    store_u32_be(&mut payload[2..6], timestamp);
    chunk_message(RTMP_CHANNEL_PROTOCOL, RTMP_TYPE_EVENT as u8, 0, 0, &payload, 128)
}

// Command-plane (AMF0) payload builders. Each returns the AMF0 body only —
// the caller wraps it with `chunk_message` on the invoke channel.

pub fn amf_connect_result_payload(transaction_id: f64) -> Vec<u8> {
    use crate::amf::AmfItem;

    let mut enc = AmfEncoder::new();
    enc.write_string("_result");
    enc.write_number(transaction_id);
    enc.write_object(&[
        ("fmsVer", AmfItem::String("FMS/3,0,1,123".to_string())),
        ("capabilities", AmfItem::Number(31.0)),
    ]);
    enc.write_object(&[
        ("level", AmfItem::String("status".to_string())),
        ("code", AmfItem::String("NetConnection.Connect.Success".to_string())),
        ("description", AmfItem::String("Connection succeeded.".to_string())),
        ("objectEncoding", AmfItem::Number(0.0)),
    ]);
    enc.into_bytes()
}

pub fn amf_create_stream_result_payload(transaction_id: f64, stream_id: f64) -> Vec<u8> {
    let mut enc = AmfEncoder::new();
    enc.write_string("_result");
    enc.write_number(transaction_id);
    enc.write_null();
    enc.write_number(stream_id);
    enc.into_bytes()
}

pub fn amf_on_status_payload(level: &str, code: &str, description: &str) -> Vec<u8> {
    use crate::amf::AmfItem;

    let mut enc = AmfEncoder::new();
    enc.write_string("onStatus");
    enc.write_number(0.0);
    enc.write_null();
    enc.write_object(&[
        ("level", AmfItem::String(level.to_string())),
        ("code", AmfItem::String(code.to_string())),
        ("description", AmfItem::String(description.to_string())),
    ]);
    enc.into_bytes()
}

pub fn amf_error_status_payload(code: &str, description: &str) -> Vec<u8> {
    amf_on_status_payload("error", code, description)
}

/// Client-mode command builders. No code path in this server's accept
/// loop originates a connection, but these exist so the wire format can be
/// exercised end-to-end in tests and so a future client mode is not a
/// from-scratch job.
pub mod client {
    use crate::amf::AmfItem;
    use crate::amf::AmfEncoder;

    pub fn amf_connect_payload(app: &str, tc_url: &str) -> Vec<u8> {
        let mut enc = AmfEncoder::new();
        enc.write_string("connect");
        enc.write_number(1.0);
        enc.write_object(&[
            ("app", AmfItem::String(app.to_string())),
            ("type", AmfItem::String("nonprivate".to_string())),
            ("flashVer", AmfItem::String("FMLE/3.0".to_string())),
            ("tcUrl", AmfItem::String(tc_url.to_string())),
        ]);
        enc.into_bytes()
    }

    pub fn amf_create_stream_payload(transaction_id: f64) -> Vec<u8> {
        let mut enc = AmfEncoder::new();
        enc.write_string("createStream");
        enc.write_number(transaction_id);
        enc.write_null();
        enc.into_bytes()
    }

    pub fn amf_publish_payload(transaction_id: f64, stream_key: &str) -> Vec<u8> {
        let mut enc = AmfEncoder::new();
        enc.write_string("publish");
        enc.write_number(transaction_id);
        enc.write_null();
        enc.write_string(stream_key);
        enc.write_string("live");
        enc.into_bytes()
    }

    pub fn amf_play_payload(transaction_id: f64, stream_key: &str) -> Vec<u8> {
        let mut enc = AmfEncoder::new();
        enc.write_string("play");
        enc.write_number(transaction_id);
        enc.write_null();
        enc.write_string(stream_key);
        enc.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::{ChunkDecoder, DecodeOutcome};

    #[test]
    fn set_chunk_size_round_trips_through_decoder() {
        let wire = encode_set_chunk_size(4096);
        let mut decoder = ChunkDecoder::new();

        match decoder.decode_step(&wire).unwrap() {
            DecodeOutcome::Message { message, .. } => {
                assert_eq!(message.msg_type, RTMP_TYPE_SET_CHUNK_SIZE as u8);
                assert_eq!(load_u32_be(&message.payload), 4096);
            }
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[test]
    fn ping_response_echoes_timestamp() {
        let wire = encode_user_control_ping_response(0x1234_5678);
        let mut decoder = ChunkDecoder::new();

        match decoder.decode_step(&wire).unwrap() {
            DecodeOutcome::Message { message, .. } => {
                assert_eq!(message.msg_type, RTMP_TYPE_EVENT as u8);
                assert_eq!(load_u16_be(&message.payload[0..2]), USER_CONTROL_EVENT_PING_RESPONSE);
                assert_eq!(load_u32_be(&message.payload[2..6]), 0x1234_5678);
            }
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[test]
    fn chunk_message_splits_payload_on_continuations() {
        let payload = vec![9u8; 400];
        let wire = chunk_message(RTMP_CHANNEL_VIDEO, RTMP_TYPE_VIDEO as u8, 5, 0, &payload, 128);

        // fmt0 basic header (1) + header (11) + 128 bytes, then 3 continuations
        // each with a 1-byte basic header.
        let expected_len = 1 + 11 + 128 + (1 + 128) + (1 + 128) + (1 + 16);
        assert_eq!(wire.len(), expected_len);
    }
}
