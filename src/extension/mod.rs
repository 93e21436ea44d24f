//! MQTT v5 property extension codec
//!
//! Optional per-packet properties travel as a compact `{id: u8, value}`
//! sequence. The shape of each value is fixed by a static per-id table,
//! and each id is only legal in certain packet directions; both are
//! validated here so packet handling never sees a malformed block.
//! Strings and binary values carry a `u16` length prefix, variable byte
//! integers follow MQTT spec section 1.5.5.

use std::fmt;

use crate::cursor::{BinaryCursor, CursorError};

/// Wire shape of an extension value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    /// Zero bytes; presence of the id is the value
    Flag,
    OneByteInt,
    TwoByteInt,
    FourByteInt,
    VarInt,
    Utf8String,
    Binary,
    /// Two length-prefixed strings
    NamePair,
}

/// Which peer may send a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

const DIR_C2S: u8 = 0x01;
const DIR_S2C: u8 = 0x02;
const DIR_BOTH: u8 = DIR_C2S | DIR_S2C;

/// Property identifiers understood by the broker core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExtensionId {
    PayloadFormat = 0x01,
    ExpiryInterval = 0x02,
    ContentType = 0x03,
    ReplyTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionId = 0x0B,
    TopicAlias = 0x23,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaxPacketSize = 0x27,
}

impl ExtensionId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(ExtensionId::PayloadFormat),
            0x02 => Some(ExtensionId::ExpiryInterval),
            0x03 => Some(ExtensionId::ContentType),
            0x08 => Some(ExtensionId::ReplyTopic),
            0x09 => Some(ExtensionId::CorrelationData),
            0x0B => Some(ExtensionId::SubscriptionId),
            0x23 => Some(ExtensionId::TopicAlias),
            0x25 => Some(ExtensionId::RetainAvailable),
            0x26 => Some(ExtensionId::UserProperty),
            0x27 => Some(ExtensionId::MaxPacketSize),
            _ => None,
        }
    }

    /// Static metadata: wire shape and permitted directions
    pub fn kind(self) -> ExtensionKind {
        match self {
            ExtensionId::PayloadFormat => ExtensionKind::OneByteInt,
            ExtensionId::ExpiryInterval => ExtensionKind::FourByteInt,
            ExtensionId::ContentType => ExtensionKind::Utf8String,
            ExtensionId::ReplyTopic => ExtensionKind::Utf8String,
            ExtensionId::CorrelationData => ExtensionKind::Binary,
            ExtensionId::SubscriptionId => ExtensionKind::VarInt,
            ExtensionId::TopicAlias => ExtensionKind::TwoByteInt,
            ExtensionId::RetainAvailable => ExtensionKind::Flag,
            ExtensionId::UserProperty => ExtensionKind::NamePair,
            ExtensionId::MaxPacketSize => ExtensionKind::FourByteInt,
        }
    }

    fn directions(self) -> u8 {
        match self {
            ExtensionId::PayloadFormat => DIR_C2S,
            ExtensionId::ExpiryInterval => DIR_BOTH,
            ExtensionId::ContentType => DIR_BOTH,
            ExtensionId::ReplyTopic => DIR_BOTH,
            ExtensionId::CorrelationData => DIR_BOTH,
            ExtensionId::SubscriptionId => DIR_BOTH,
            ExtensionId::TopicAlias => DIR_BOTH,
            ExtensionId::RetainAvailable => DIR_S2C,
            ExtensionId::UserProperty => DIR_BOTH,
            ExtensionId::MaxPacketSize => DIR_C2S,
        }
    }

    pub fn valid_for(self, direction: Direction) -> bool {
        let bit = match direction {
            Direction::ClientToServer => DIR_C2S,
            Direction::ServerToClient => DIR_S2C,
        };
        self.directions() & bit != 0
    }
}

/// A decoded extension value; the variant always matches the id's kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionValue {
    Flag,
    OneByteInt(u8),
    TwoByteInt(u16),
    FourByteInt(u32),
    VarInt(u32),
    Utf8String(String),
    Binary(Vec<u8>),
    NamePair(String, String),
}

impl ExtensionValue {
    fn kind(&self) -> ExtensionKind {
        match self {
            ExtensionValue::Flag => ExtensionKind::Flag,
            ExtensionValue::OneByteInt(_) => ExtensionKind::OneByteInt,
            ExtensionValue::TwoByteInt(_) => ExtensionKind::TwoByteInt,
            ExtensionValue::FourByteInt(_) => ExtensionKind::FourByteInt,
            ExtensionValue::VarInt(_) => ExtensionKind::VarInt,
            ExtensionValue::Utf8String(_) => ExtensionKind::Utf8String,
            ExtensionValue::Binary(_) => ExtensionKind::Binary,
            ExtensionValue::NamePair(_, _) => ExtensionKind::NamePair,
        }
    }
}

/// One property as it appears in a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub id: ExtensionId,
    pub value: ExtensionValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    UnknownId(u8),
    /// The id may not be sent in this direction
    InvalidDirection(ExtensionId),
    /// The value variant does not match the id's declared kind
    KindMismatch(ExtensionId),
    Cursor(CursorError),
    InvalidUtf8,
    /// A string/binary value exceeds the u16 length prefix
    ValueTooLong,
}

impl fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionError::UnknownId(id) => write!(f, "unknown extension id 0x{id:02x}"),
            ExtensionError::InvalidDirection(id) => {
                write!(f, "extension {id:?} not valid for this direction")
            }
            ExtensionError::KindMismatch(id) => {
                write!(f, "value shape does not match extension {id:?}")
            }
            ExtensionError::Cursor(e) => write!(f, "extension block malformed: {e}"),
            ExtensionError::InvalidUtf8 => write!(f, "extension string is not valid utf-8"),
            ExtensionError::ValueTooLong => {
                write!(f, "extension value exceeds the 65535-byte limit")
            }
        }
    }
}

impl std::error::Error for ExtensionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtensionError::Cursor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CursorError> for ExtensionError {
    fn from(e: CursorError) -> Self {
        ExtensionError::Cursor(e)
    }
}

/// Append one extension to `cursor`, checking direction validity and that
/// the value matches the id's declared shape.
pub fn write_extension(
    cursor: &mut BinaryCursor,
    extension: &Extension,
    direction: Direction,
) -> Result<(), ExtensionError> {
    if !extension.id.valid_for(direction) {
        return Err(ExtensionError::InvalidDirection(extension.id));
    }
    if extension.value.kind() != extension.id.kind() {
        return Err(ExtensionError::KindMismatch(extension.id));
    }
    cursor.write_u8(extension.id as u8)?;
    match &extension.value {
        ExtensionValue::Flag => {}
        ExtensionValue::OneByteInt(v) => cursor.write_u8(*v)?,
        ExtensionValue::TwoByteInt(v) => cursor.write_u16(*v)?,
        ExtensionValue::FourByteInt(v) => cursor.write_u32(*v)?,
        ExtensionValue::VarInt(v) => cursor.write_var_int(*v)?,
        ExtensionValue::Utf8String(s) => write_prefixed(cursor, s.as_bytes())?,
        ExtensionValue::Binary(b) => write_prefixed(cursor, b)?,
        ExtensionValue::NamePair(name, value) => {
            write_prefixed(cursor, name.as_bytes())?;
            write_prefixed(cursor, value.as_bytes())?;
        }
    }
    Ok(())
}

/// Decode a full extension block, validating ids and direction. The block
/// runs to the end of the readable region.
pub fn scan(data: &[u8], direction: Direction) -> Result<Vec<Extension>, ExtensionError> {
    let mut cursor = BinaryCursor::wrap_slice(data);
    let mut extensions = Vec::new();
    while cursor.position() < data.len() {
        extensions.push(read_extension(&mut cursor, direction)?);
    }
    Ok(extensions)
}

/// Decode the extension at the cursor's position
pub fn read_extension(
    cursor: &mut BinaryCursor,
    direction: Direction,
) -> Result<Extension, ExtensionError> {
    let raw = cursor.read_u8()?;
    let id = ExtensionId::from_u8(raw).ok_or(ExtensionError::UnknownId(raw))?;
    if !id.valid_for(direction) {
        return Err(ExtensionError::InvalidDirection(id));
    }
    let value = match id.kind() {
        ExtensionKind::Flag => ExtensionValue::Flag,
        ExtensionKind::OneByteInt => ExtensionValue::OneByteInt(cursor.read_u8()?),
        ExtensionKind::TwoByteInt => ExtensionValue::TwoByteInt(cursor.read_u16()?),
        ExtensionKind::FourByteInt => ExtensionValue::FourByteInt(cursor.read_u32()?),
        ExtensionKind::VarInt => ExtensionValue::VarInt(cursor.read_var_int()?),
        ExtensionKind::Utf8String => ExtensionValue::Utf8String(read_prefixed_string(cursor)?),
        ExtensionKind::Binary => ExtensionValue::Binary(read_prefixed(cursor)?),
        ExtensionKind::NamePair => {
            let name = read_prefixed_string(cursor)?;
            let value = read_prefixed_string(cursor)?;
            ExtensionValue::NamePair(name, value)
        }
    };
    Ok(Extension { id, value })
}

fn write_prefixed(cursor: &mut BinaryCursor, data: &[u8]) -> Result<(), ExtensionError> {
    if data.len() > u16::MAX as usize {
        return Err(ExtensionError::ValueTooLong);
    }
    cursor.write_u16(data.len() as u16)?;
    Ok(cursor.write_bytes(data)?)
}

fn read_prefixed(cursor: &mut BinaryCursor) -> Result<Vec<u8>, CursorError> {
    let len = cursor.read_u16()? as usize;
    cursor.read_bytes(len)
}

fn read_prefixed_string(cursor: &mut BinaryCursor) -> Result<String, ExtensionError> {
    String::from_utf8(read_prefixed(cursor)?).map_err(|_| ExtensionError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(extensions: &[Extension], direction: Direction) -> Vec<Extension> {
        let mut cursor = BinaryCursor::new();
        for e in extensions {
            write_extension(&mut cursor, e, direction).unwrap();
        }
        scan(cursor.data(), direction).unwrap()
    }

    #[test]
    fn test_scan_mixed_block() {
        let extensions = vec![
            Extension {
                id: ExtensionId::PayloadFormat,
                value: ExtensionValue::OneByteInt(1),
            },
            Extension {
                id: ExtensionId::SubscriptionId,
                value: ExtensionValue::VarInt(268_435_455),
            },
            Extension {
                id: ExtensionId::ContentType,
                value: ExtensionValue::Utf8String("application/json".into()),
            },
            Extension {
                id: ExtensionId::UserProperty,
                value: ExtensionValue::NamePair("region".into(), "eu-1".into()),
            },
            Extension {
                id: ExtensionId::CorrelationData,
                value: ExtensionValue::Binary(vec![0, 1, 0xFF]),
            },
        ];
        assert_eq!(round_trip(&extensions, Direction::ClientToServer), extensions);
    }

    #[test]
    fn test_flag_carries_no_bytes() {
        let ext = Extension {
            id: ExtensionId::RetainAvailable,
            value: ExtensionValue::Flag,
        };
        let mut cursor = BinaryCursor::new();
        write_extension(&mut cursor, &ext, Direction::ServerToClient).unwrap();
        assert_eq!(cursor.data(), &[0x25]);
        assert_eq!(
            scan(cursor.data(), Direction::ServerToClient).unwrap(),
            vec![ext]
        );
    }

    #[test]
    fn test_direction_enforced() {
        let ext = Extension {
            id: ExtensionId::RetainAvailable,
            value: ExtensionValue::Flag,
        };
        let mut cursor = BinaryCursor::new();
        assert_eq!(
            write_extension(&mut cursor, &ext, Direction::ClientToServer).unwrap_err(),
            ExtensionError::InvalidDirection(ExtensionId::RetainAvailable)
        );
        // and on the read side
        let err = scan(&[0x27, 0, 0, 0, 1], Direction::ServerToClient).unwrap_err();
        assert_eq!(err, ExtensionError::InvalidDirection(ExtensionId::MaxPacketSize));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let ext = Extension {
            id: ExtensionId::TopicAlias,
            value: ExtensionValue::FourByteInt(5),
        };
        let mut cursor = BinaryCursor::new();
        assert_eq!(
            write_extension(&mut cursor, &ext, Direction::ClientToServer).unwrap_err(),
            ExtensionError::KindMismatch(ExtensionId::TopicAlias)
        );
    }

    #[test]
    fn test_oversized_value_rejected() {
        let ext = Extension {
            id: ExtensionId::CorrelationData,
            value: ExtensionValue::Binary(vec![0; u16::MAX as usize + 1]),
        };
        let mut cursor = BinaryCursor::new();
        assert_eq!(
            write_extension(&mut cursor, &ext, Direction::ClientToServer).unwrap_err(),
            ExtensionError::ValueTooLong
        );
        assert_eq!(cursor.written_len(), 1, "only the id byte may be written");
    }

    #[test]
    fn test_unknown_id_rejected() {
        let err = scan(&[0x7E], Direction::ClientToServer).unwrap_err();
        assert_eq!(err, ExtensionError::UnknownId(0x7E));
    }

    #[test]
    fn test_truncated_value() {
        // TopicAlias declares two bytes but only one follows
        let err = scan(&[0x23, 0x01], Direction::ClientToServer).unwrap_err();
        assert!(matches!(err, ExtensionError::Cursor(_)));
    }
}
