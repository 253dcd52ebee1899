// AMF0 decoding cursor
//
// Reads forward through a byte slice one value at a time. Any premature end
// of input is an error rather than a partial value — a message's AMF0
// payload always arrives whole (it is the fully reassembled body of a
// chunked RTMP message), so there is nothing to wait for.

use crate::buffer::{load_f64_be, load_u16_be, load_u16_le, load_u32_be};

use super::item::*;

#[derive(Debug)]
pub enum AmfError {
    Truncated,
    UnsupportedMarker(u8),
}

pub struct AmfDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> AmfDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        AmfDecoder { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn has_more(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// The unread tail of the input, starting at the cursor's current
    /// position. Used to forward "everything after the values already
    /// decoded" without re-encoding them.
    pub fn remaining_bytes(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AmfError> {
        if self.remaining() < n {
            return Err(AmfError::Truncated);
        }

        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, AmfError> {
        Ok(self.take(1)?[0])
    }

    fn read_utf8_short(&mut self) -> Result<String, AmfError> {
        let len = load_u16_be(self.take(2)?) as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_utf8_long(&mut self) -> Result<String, AmfError> {
        let len = load_u32_be(self.take(4)?) as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Decodes the next value, including nested objects
    pub fn decode_value(&mut self) -> Result<AmfItem, AmfError> {
        let marker = self.read_u8()?;

        match marker {
            AMF0_NUMBER => Ok(AmfItem::Number(load_f64_be(self.take(8)?))),
            AMF0_BOOLEAN => Ok(AmfItem::Boolean(self.read_u8()? != 0)),
            AMF0_STRING => Ok(AmfItem::String(self.read_utf8_short()?)),
            AMF0_LONG_STRING => Ok(AmfItem::LongString(self.read_utf8_long()?)),
            AMF0_NULL => Ok(AmfItem::Null),
            AMF0_DATE => {
                let millis = load_f64_be(self.take(8)?);
                let timezone = load_u16_le(self.take(2)?) as i16;
                Ok(AmfItem::Date { millis, timezone })
            }
            AMF0_OBJECT_END => Ok(AmfItem::ObjectEnd),
            AMF0_OBJECT => self.decode_object_fields(),
            AMF0_ECMA_ARRAY => {
                self.take(4)?; // associative-array count, not trusted
                self.decode_object_fields()
            }
            other => Err(AmfError::UnsupportedMarker(other)),
        }
    }

    /// Decodes the key/value pairs of an object body, stopping at the
    /// empty-key + ObjectEnd sentinel. Assumes the leading type marker for
    /// the object itself has already been consumed.
    fn decode_object_fields(&mut self) -> Result<AmfItem, AmfError> {
        let mut fields = Vec::new();

        loop {
            let key = self.read_utf8_short()?;
            let value = self.decode_value()?;

            if key.is_empty() && matches!(value, AmfItem::ObjectEnd) {
                break;
            }

            fields.push((key, value));
        }

        Ok(AmfItem::Object(fields))
    }

    /// Decodes every remaining value in the buffer, in order. Used to pull
    /// out the positional arguments of an RTMP command (after the command
    /// name and transaction id have already been read).
    pub fn decode_all(&mut self) -> Result<Vec<AmfItem>, AmfError> {
        let mut values = Vec::new();

        while self.has_more() {
            values.push(self.decode_value()?);
        }

        Ok(values)
    }
}
