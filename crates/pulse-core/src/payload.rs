//! Typed payload items carried inside frames
//!
//! A frame payload is a sequence of TLV entries:
//! `type(1) | length(u32 BE) | value(length)`.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Item type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    ServerError = 0x01,
    PushEvent = 0x02,
    Status = 0x03,
    Data = 0x04,
}

impl ItemType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(ItemType::ServerError),
            0x02 => Ok(ItemType::PushEvent),
            0x03 => Ok(ItemType::Status),
            0x04 => Ok(ItemType::Data),
            other => Err(ProtocolError::UnknownItemType { item_type: other }),
        }
    }
}

// ----------------------------------------------------------------------------
// Server Errors
// ----------------------------------------------------------------------------

/// Classification of an error delivered to an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerErrorKind {
    /// Connection lost and recovery abandoned
    CommsFailure,
    /// HTTP exchange answered with a non-success status
    HttpStatus(u16),
    /// Payload could not be decoded
    Malformed,
    /// Server rejected the request
    Rejected(u16),
}

impl ServerErrorKind {
    fn to_wire(self) -> (u8, u16) {
        match self {
            ServerErrorKind::CommsFailure => (1, 0),
            ServerErrorKind::HttpStatus(status) => (2, status),
            ServerErrorKind::Malformed => (3, 0),
            ServerErrorKind::Rejected(code) => (4, code),
        }
    }

    fn from_wire(kind: u8, code: u16) -> Self {
        match kind {
            1 => ServerErrorKind::CommsFailure,
            2 => ServerErrorKind::HttpStatus(code),
            3 => ServerErrorKind::Malformed,
            _ => ServerErrorKind::Rejected(code),
        }
    }
}

/// Typed error status handed to the owning engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub message: String,
}

impl ServerError {
    pub fn new<T: Into<String>>(kind: ServerErrorKind, message: T) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Push Events
// ----------------------------------------------------------------------------

/// Kinds of unsolicited server messages
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PushEventType {
    ContactsChange = 1,
    ProfileChange = 2,
    ChatMessage = 3,
    PresenceChange = 4,
    IdentityChange = 5,
    SystemNotification = 6,
}

impl PushEventType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(PushEventType::ContactsChange),
            2 => Ok(PushEventType::ProfileChange),
            3 => Ok(PushEventType::ChatMessage),
            4 => Ok(PushEventType::PresenceChange),
            5 => Ok(PushEventType::IdentityChange),
            6 => Ok(PushEventType::SystemNotification),
            other => Err(ProtocolError::UnknownPushType { event_type: other }),
        }
    }
}

/// An unsolicited server message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event_type: PushEventType,
    pub body: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Payload Items
// ----------------------------------------------------------------------------

/// One decoded payload entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadItem {
    ServerError(ServerError),
    PushEvent(PushEvent),
    Status(bool),
    /// Opaque business payload interpreted by the engine's collaborator
    Data(Vec<u8>),
}

impl PayloadItem {
    pub fn item_type(&self) -> ItemType {
        match self {
            PayloadItem::ServerError(_) => ItemType::ServerError,
            PayloadItem::PushEvent(_) => ItemType::PushEvent,
            PayloadItem::Status(_) => ItemType::Status,
            PayloadItem::Data(_) => ItemType::Data,
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        match self {
            PayloadItem::ServerError(error) => {
                let (kind, code) = error.kind.to_wire();
                let mut value = Vec::with_capacity(3 + error.message.len());
                value.push(kind);
                value.extend_from_slice(&code.to_be_bytes());
                value.extend_from_slice(error.message.as_bytes());
                value
            }
            PayloadItem::PushEvent(event) => {
                let mut value = Vec::with_capacity(1 + event.body.len());
                value.push(event.event_type as u8);
                value.extend_from_slice(&event.body);
                value
            }
            PayloadItem::Status(ok) => vec![u8::from(*ok)],
            PayloadItem::Data(data) => data.clone(),
        }
    }

    fn from_value(item_type: ItemType, value: &[u8]) -> Result<Self, ProtocolError> {
        match item_type {
            ItemType::ServerError => {
                if value.len() < 3 {
                    return Err(ProtocolError::Truncated {
                        expected: 3,
                        actual: value.len(),
                    });
                }
                let code = u16::from_be_bytes([value[1], value[2]]);
                let message = std::str::from_utf8(&value[3..])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                Ok(PayloadItem::ServerError(ServerError {
                    kind: ServerErrorKind::from_wire(value[0], code),
                    message,
                }))
            }
            ItemType::PushEvent => {
                let (&tag, body) = value.split_first().ok_or(ProtocolError::Truncated {
                    expected: 1,
                    actual: 0,
                })?;
                Ok(PayloadItem::PushEvent(PushEvent {
                    event_type: PushEventType::from_u8(tag)?,
                    body: body.to_vec(),
                }))
            }
            ItemType::Status => match value {
                [flag] => Ok(PayloadItem::Status(*flag != 0)),
                _ => Err(ProtocolError::Truncated {
                    expected: 1,
                    actual: value.len(),
                }),
            },
            ItemType::Data => Ok(PayloadItem::Data(value.to_vec())),
        }
    }
}

// ----------------------------------------------------------------------------
// Codec
// ----------------------------------------------------------------------------

/// TLV codec for payload item sequences
pub struct PayloadCodec;

impl PayloadCodec {
    /// Encode items in order
    pub fn encode(items: &[PayloadItem]) -> Vec<u8> {
        let mut encoded = Vec::new();
        for item in items {
            let value = item.value_bytes();
            encoded.push(item.item_type() as u8);
            encoded.extend_from_slice(&(value.len() as u32).to_be_bytes());
            encoded.extend_from_slice(&value);
        }
        encoded
    }

    /// Decode a full item sequence
    pub fn decode(mut data: &[u8]) -> Result<Vec<PayloadItem>, ProtocolError> {
        let mut items = Vec::new();
        while !data.is_empty() {
            if data.len() < 5 {
                return Err(ProtocolError::Truncated {
                    expected: 5,
                    actual: data.len(),
                });
            }
            let item_type = ItemType::from_u8(data[0])?;
            let length = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
            let end = 5usize.saturating_add(length);
            if data.len() < end {
                return Err(ProtocolError::Truncated {
                    expected: end,
                    actual: data.len(),
                });
            }
            items.push(PayloadItem::from_value(item_type, &data[5..end])?);
            data = &data[end..];
        }
        Ok(items)
    }
}
