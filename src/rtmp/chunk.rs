// RTMP chunk stream decoder
//
// Chunk streams interleave fragments of up to 8 independent messages
// (one per channel id slot) over a single byte stream. Each fragment is a
// basic header (1-3 bytes, carries the format and the channel id),
// optionally followed by a message header (0, 3, 7 or 11 bytes depending
// on format), optionally followed by a 4-byte extended timestamp, followed
// by up to `chunk_size` bytes of message payload.
//
// This decoder is fed whatever bytes are available and, on a short read,
// leaves the input slice untouched and reports `DecodeOutcome::NeedMore` —
// the caller is expected to read more bytes and retry rather than the
// decoder buffering partial headers itself.

use super::constants::*;

const CHANNEL_SLOTS: usize = 8;
const EXTENDED_TIMESTAMP_MARKER: u32 = 0x00ff_ffff;

#[derive(Debug)]
pub enum ChunkError {
    UnknownChannelContinuation { cid: u32 },
    ChannelTableFull,
    ExpectedContinuation { cid: u32 },
    MessageTooLarge { length: usize },
    InvalidMessageType { msg_type: u8 },
}

/// Highest message type id RTMP defines (Aggregate Message). Anything past
/// this is not a protocol control, command or media type this stream
/// format can carry.
const MAX_MESSAGE_TYPE: u8 = 22;

#[derive(Debug, Clone)]
pub struct RtmpMessage {
    pub cid: u32,
    pub msg_type: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub enum DecodeOutcome {
    /// Not enough bytes were available; none were consumed.
    NeedMore,
    /// A chunk fragment was consumed but the message it belongs to is not
    /// complete yet.
    Progressed { consumed: usize },
    /// A chunk fragment was consumed and completed a message.
    Message { consumed: usize, message: RtmpMessage },
}

struct Slot {
    cid: u32,
    msg_type: u8,
    stream_id: u32,
    length: usize,
    timestamp: u32,
    delta: u32,
    payload: Vec<u8>,
    in_progress: bool,
}

/// Maximum length of a single RTMP message body this server will assemble.
/// Chosen generously above any audio/video frame a relay should see; a
/// message claiming to be larger is treated as a protocol violation rather
/// than an excuse to allocate unbounded memory.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub struct ChunkDecoder {
    slots: [Option<Slot>; CHANNEL_SLOTS],
    chunk_size: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        ChunkDecoder {
            slots: Default::default(),
            chunk_size: RTMP_CHUNK_SIZE_DEFAULT,
        }
    }

    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size;
    }

    fn slot_index_for(&self, cid: u32) -> Option<usize> {
        let preferred = (cid as usize) % CHANNEL_SLOTS;

        if matches!(&self.slots[preferred], Some(s) if s.cid == cid) {
            return Some(preferred);
        }

        for offset in 0..CHANNEL_SLOTS {
            let idx = (preferred + offset) % CHANNEL_SLOTS;
            if matches!(&self.slots[idx], Some(s) if s.cid == cid) {
                return Some(idx);
            }
        }

        None
    }

    fn allocate_slot_for(&mut self, cid: u32) -> Result<usize, ChunkError> {
        if let Some(idx) = self.slot_index_for(cid) {
            return Ok(idx);
        }

        let preferred = (cid as usize) % CHANNEL_SLOTS;

        for offset in 0..CHANNEL_SLOTS {
            let idx = (preferred + offset) % CHANNEL_SLOTS;
            if self.slots[idx].is_none() {
                return Ok(idx);
            }
        }

        Err(ChunkError::ChannelTableFull)
    }

    /// Attempts to decode exactly one chunk fragment from the front of
    /// `buf`. Returns how many bytes were consumed, and the completed
    /// message if the fragment finished one.
    pub fn decode_step(&mut self, buf: &[u8]) -> Result<DecodeOutcome, ChunkError> {
        if buf.is_empty() {
            return Ok(DecodeOutcome::NeedMore);
        }

        let mut pos = 0usize;

        let first = buf[pos];
        let fmt = first >> 6;
        let basic_cid = (first & 0x3f) as u32;

        let cid = match basic_cid {
            0 => {
                if buf.len() < pos + 2 {
                    return Ok(DecodeOutcome::NeedMore);
                }
                pos += 1;
                let cid = 64 + buf[pos] as u32;
                pos += 1;
                cid
            }
            1 => {
                if buf.len() < pos + 3 {
                    return Ok(DecodeOutcome::NeedMore);
                }
                pos += 1;
                let cid = 64 + buf[pos] as u32 + (buf[pos + 1] as u32) * 256;
                pos += 2;
                cid
            }
            other => {
                pos += 1;
                other
            }
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };

        if buf.len() < pos + header_len {
            return Ok(DecodeOutcome::NeedMore);
        }

        let existing_idx = self.slot_index_for(cid);

        if fmt == 3 {
            // Continuation of an in-progress message, or a repeat of the
            // last explicit header starting a brand-new message.
            let idx = existing_idx.ok_or(ChunkError::UnknownChannelContinuation { cid })?;
            let slot = self.slots[idx].as_mut().unwrap();

            if !slot.in_progress {
                slot.timestamp = slot.timestamp.wrapping_add(slot.delta);
                slot.payload.clear();
                slot.in_progress = true;
            }

            return self.consume_payload_fragment(idx, buf, pos);
        }

        // fmt 0, 1 or 2: reject starting a new explicit header mid-message
        if let Some(idx) = existing_idx {
            if self.slots[idx].as_ref().unwrap().in_progress {
                return Err(ChunkError::ExpectedContinuation { cid });
            }
        }

        let (timestamp_field, length, msg_type, stream_id) = match fmt {
            0 => {
                let ts = load_u24(&buf[pos..pos + 3]);
                let len = load_u24(&buf[pos + 3..pos + 6]) as usize;
                let ty = buf[pos + 6];
                let sid = u32::from_le_bytes([
                    buf[pos + 7],
                    buf[pos + 8],
                    buf[pos + 9],
                    buf[pos + 10],
                ]);
                (ts, len, ty, Some(sid))
            }
            1 => {
                let delta = load_u24(&buf[pos..pos + 3]);
                let len = load_u24(&buf[pos + 3..pos + 6]) as usize;
                let ty = buf[pos + 6];
                (delta, len, ty, None)
            }
            2 => {
                let delta = load_u24(&buf[pos..pos + 3]);
                (delta, 0, 0, None)
            }
            _ => unreachable!(),
        };

        if (fmt == 0 || fmt == 1) && msg_type > MAX_MESSAGE_TYPE {
            return Err(ChunkError::InvalidMessageType { msg_type });
        }

        pos += header_len;

        let mut absolute_timestamp = timestamp_field;
        let mut has_extended = timestamp_field == EXTENDED_TIMESTAMP_MARKER;

        if has_extended {
            if buf.len() < pos + 4 {
                return Ok(DecodeOutcome::NeedMore);
            }
            absolute_timestamp = load_u32(&buf[pos..pos + 4]);
            pos += 4;
        } else {
            has_extended = false;
        }
        let _ = has_extended;

        let idx = match existing_idx {
            Some(idx) => idx,
            None => self.allocate_slot_for(cid)?,
        };

        {
            let length_final;
            let msg_type_final;
            let stream_id_final;
            let delta_or_absolute;

            match fmt {
                0 => {
                    length_final = length;
                    msg_type_final = msg_type;
                    stream_id_final = stream_id.unwrap();
                    delta_or_absolute = absolute_timestamp;
                }
                1 => {
                    let prev = self.slots[idx].as_ref();
                    length_final = length;
                    msg_type_final = msg_type;
                    stream_id_final = prev.map(|s| s.stream_id).unwrap_or(0);
                    delta_or_absolute = absolute_timestamp;
                }
                _ => {
                    let prev = self.slots[idx].as_ref();
                    length_final = prev.map(|s| s.length).unwrap_or(0);
                    msg_type_final = prev.map(|s| s.msg_type).unwrap_or(0);
                    stream_id_final = prev.map(|s| s.stream_id).unwrap_or(0);
                    delta_or_absolute = absolute_timestamp;
                }
            };

            if length_final > MAX_MESSAGE_SIZE {
                return Err(ChunkError::MessageTooLarge { length: length_final });
            }

            let base_timestamp = if fmt == 0 {
                delta_or_absolute
            } else {
                self.slots[idx]
                    .as_ref()
                    .map(|s| s.timestamp.wrapping_add(delta_or_absolute))
                    .unwrap_or(delta_or_absolute)
            };

            self.slots[idx] = Some(Slot {
                cid,
                msg_type: msg_type_final,
                stream_id: stream_id_final,
                length: length_final,
                timestamp: base_timestamp,
                delta: delta_or_absolute,
                payload: Vec::with_capacity(length_final),
                in_progress: true,
            });
        }

        self.consume_payload_fragment(idx, buf, pos)
    }

    fn consume_payload_fragment(
        &mut self,
        idx: usize,
        buf: &[u8],
        header_end: usize,
    ) -> Result<DecodeOutcome, ChunkError> {
        let slot = self.slots[idx].as_mut().unwrap();
        let remaining_needed = slot.length - slot.payload.len();
        let take = remaining_needed.min(self.chunk_size);

        if buf.len() < header_end + take {
            return Ok(DecodeOutcome::NeedMore);
        }

        slot.payload.extend_from_slice(&buf[header_end..header_end + take]);
        let consumed = header_end + take;

        if slot.payload.len() == slot.length {
            slot.in_progress = false;

            let message = RtmpMessage {
                cid: slot.cid,
                msg_type: slot.msg_type,
                stream_id: slot.stream_id,
                timestamp: slot.timestamp,
                payload: std::mem::take(&mut slot.payload),
            };

            Ok(DecodeOutcome::Message { consumed, message })
        } else {
            Ok(DecodeOutcome::Progressed { consumed })
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn load_u24(buf: &[u8]) -> u32 {
    (buf[0] as u32) << 16 | (buf[1] as u32) << 8 | (buf[2] as u32)
}

fn load_u32(buf: &[u8]) -> u32 {
    (buf[0] as u32) << 24 | (buf[1] as u32) << 16 | (buf[2] as u32) << 8 | (buf[3] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::chunk_message;

    #[test]
    fn decodes_single_chunk_message() {
        let payload = b"hello rtmp".to_vec();
        let wire = chunk_message(RTMP_CHANNEL_INVOKE, 20, 1, 0, &payload, 128);

        let mut decoder = ChunkDecoder::new();
        let outcome = decoder.decode_step(&wire).unwrap();

        match outcome {
            DecodeOutcome::Message { consumed, message } => {
                assert_eq!(consumed, wire.len());
                assert_eq!(message.payload, payload);
                assert_eq!(message.msg_type, 20);
                assert_eq!(message.stream_id, 1);
            }
            other => panic!("expected a completed message, got {other:?}"),
        }
    }

    #[test]
    fn reassembles_message_split_across_chunk_size() {
        let payload = vec![7u8; 300];
        let wire = chunk_message(RTMP_CHANNEL_VIDEO, RTMP_TYPE_VIDEO as u8, 1, 0, &payload, 128);

        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(128);

        let mut offset = 0;
        let mut completed = None;

        while offset < wire.len() {
            match decoder.decode_step(&wire[offset..]).unwrap() {
                DecodeOutcome::NeedMore => panic!("decoder starved on in-memory input"),
                DecodeOutcome::Progressed { consumed } => offset += consumed,
                DecodeOutcome::Message { consumed, message } => {
                    offset += consumed;
                    completed = Some(message);
                }
            }
        }

        let message = completed.expect("message should have completed");
        assert_eq!(message.payload, payload);
    }

    #[test]
    fn reports_need_more_on_truncated_header() {
        let mut decoder = ChunkDecoder::new();
        let outcome = decoder.decode_step(&[0x03]).unwrap();
        assert!(matches!(outcome, DecodeOutcome::NeedMore));
    }

    #[test]
    fn interleaves_two_channels_independently() {
        let a = chunk_message(RTMP_CHANNEL_AUDIO, RTMP_TYPE_AUDIO as u8, 1, 0, b"aaaa", 128);
        let v = chunk_message(RTMP_CHANNEL_VIDEO, RTMP_TYPE_VIDEO as u8, 1, 0, b"vvvv", 128);

        let mut decoder = ChunkDecoder::new();

        let mut wire = Vec::new();
        wire.extend_from_slice(&a);
        wire.extend_from_slice(&v);

        let mut offset = 0;
        let mut messages = Vec::new();

        while offset < wire.len() {
            match decoder.decode_step(&wire[offset..]).unwrap() {
                DecodeOutcome::NeedMore => panic!("starved"),
                DecodeOutcome::Progressed { consumed } => offset += consumed,
                DecodeOutcome::Message { consumed, message } => {
                    offset += consumed;
                    messages.push(message);
                }
            }
        }

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, b"aaaa");
        assert_eq!(messages[1].payload, b"vvvv");
    }
}
