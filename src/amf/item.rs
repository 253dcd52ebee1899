// AMF0 value representation

// AMF0 type markers (ECMA-ish subset this server actually speaks)
pub const AMF0_NUMBER: u8 = 0x00;
pub const AMF0_BOOLEAN: u8 = 0x01;
pub const AMF0_STRING: u8 = 0x02;
pub const AMF0_OBJECT: u8 = 0x03;
pub const AMF0_NULL: u8 = 0x05;
pub const AMF0_ECMA_ARRAY: u8 = 0x08;
pub const AMF0_OBJECT_END: u8 = 0x09;
pub const AMF0_LONG_STRING: u8 = 0x0c;
pub const AMF0_DATE: u8 = 0x0b;

/// A decoded AMF0 value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfItem {
    Number(f64),
    Boolean(bool),
    String(String),
    LongString(String),
    Null,
    Date { millis: f64, timezone: i16 },
    Object(Vec<(String, AmfItem)>),
    ObjectEnd,
}

impl AmfItem {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AmfItem::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfItem::String(s) | AmfItem::LongString(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn object_field(&self, key: &str) -> Option<&AmfItem> {
        match self {
            AmfItem::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}
