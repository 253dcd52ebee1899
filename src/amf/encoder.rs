// AMF0 encoding
//
// Builds a flat byte vector value by value. String encoding escalates to
// the long-string marker automatically once the payload no longer fits the
// 16-bit length prefix, matching how AMF0 writers in the wild behave rather
// than making callers pick the marker themselves.

use crate::buffer::{store_f64_be, store_u16_be, store_u16_le, store_u32_be};

use super::item::*;

const SHORT_STRING_LIMIT: usize = u16::MAX as usize;

pub struct AmfEncoder {
    buf: Vec<u8>,
}

impl AmfEncoder {
    pub fn new() -> Self {
        AmfEncoder { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_number(&mut self, value: f64) -> &mut Self {
        self.buf.push(AMF0_NUMBER);
        let mut tmp = [0u8; 8];
        store_f64_be(&mut tmp, value);
        self.buf.extend_from_slice(&tmp);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buf.push(AMF0_BOOLEAN);
        self.buf.push(value as u8);
        self
    }

    pub fn write_null(&mut self) -> &mut Self {
        self.buf.push(AMF0_NULL);
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();

        if bytes.len() <= SHORT_STRING_LIMIT {
            self.buf.push(AMF0_STRING);
            self.write_utf8_short(bytes);
        } else {
            self.buf.push(AMF0_LONG_STRING);
            self.write_utf8_long(bytes);
        }

        self
    }

    pub fn write_date(&mut self, millis: f64, timezone: i16) -> &mut Self {
        self.buf.push(AMF0_DATE);
        let mut tmp = [0u8; 8];
        store_f64_be(&mut tmp, millis);
        self.buf.extend_from_slice(&tmp);
        let mut tz = [0u8; 2];
        store_u16_le(&mut tz, timezone as u16);
        self.buf.extend_from_slice(&tz);
        self
    }

    pub fn write_object(&mut self, fields: &[(&str, AmfItem)]) -> &mut Self {
        self.buf.push(AMF0_OBJECT);

        for (key, value) in fields {
            self.write_utf8_short(key.as_bytes());
            self.write_value(value);
        }

        self.write_utf8_short(&[]);
        self.buf.push(AMF0_OBJECT_END);
        self
    }

    fn write_value(&mut self, value: &AmfItem) {
        match value {
            AmfItem::Number(n) => {
                self.write_number(*n);
            }
            AmfItem::Boolean(b) => {
                self.write_bool(*b);
            }
            AmfItem::String(s) | AmfItem::LongString(s) => {
                self.write_string(s);
            }
            AmfItem::Null => {
                self.write_null();
            }
            AmfItem::Date { millis, timezone } => {
                self.write_date(*millis, *timezone);
            }
            AmfItem::Object(fields) => {
                let borrowed: Vec<(&str, AmfItem)> =
                    fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
                self.write_object(&borrowed);
            }
            AmfItem::ObjectEnd => {
                self.buf.push(AMF0_OBJECT_END);
            }
        }
    }

    fn write_utf8_short(&mut self, bytes: &[u8]) {
        let mut len = [0u8; 2];
        store_u16_be(&mut len, bytes.len() as u16);
        self.buf.extend_from_slice(&len);
        self.buf.extend_from_slice(bytes);
    }

    fn write_utf8_long(&mut self, bytes: &[u8]) {
        let mut len = [0u8; 4];
        store_u32_be(&mut len, bytes.len() as u32);
        self.buf.extend_from_slice(&len);
        self.buf.extend_from_slice(bytes);
    }
}

impl Default for AmfEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfDecoder;

    #[test]
    fn escalates_to_long_string_past_u16_limit() {
        let long = "a".repeat(SHORT_STRING_LIMIT + 1);
        let mut enc = AmfEncoder::new();
        enc.write_string(&long);
        let bytes = enc.into_bytes();

        assert_eq!(bytes[0], AMF0_LONG_STRING);

        let mut dec = AmfDecoder::new(&bytes);
        assert_eq!(dec.decode_value().unwrap(), AmfItem::LongString(long));
    }
}
