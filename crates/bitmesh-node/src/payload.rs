//! Application payloads carried inside encrypted mesh frames and relay
//! envelopes.
//!
//! The first byte is the [`MessageType`] of the payload. Message ids are
//! length-prefixed with one byte.
//!
//! ```text
//! Message              0x04 | id_len | id | content
//! DeliveryAck          0x0A | id_len | id
//! ReadReceipt          0x0C | id_len | id
//! FavoriteNotification 0x14 | 0x00 or 0x01
//! ```
//!
//! On relays the same bytes travel as the rumor content, base64 encoded
//! behind [`RELAY_CONTENT_PREFIX`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use bitmesh_core::constants::{MAX_PAYLOAD_SIZE, MessageType};
use bitmesh_protocol::session::FRAME_OVERHEAD;

use crate::error::PayloadError;

/// Marks rumor content produced by a bitmesh node.
pub const RELAY_CONTENT_PREFIX: &str = "bitmesh1:";

/// Longest message id the one-byte length prefix can carry.
pub const MAX_MESSAGE_ID_LEN: usize = u8::MAX as usize;

/// Largest message body that still fits one encrypted mesh packet.
pub const MAX_CONTENT_SIZE: usize = MAX_PAYLOAD_SIZE - FRAME_OVERHEAD - 2 - MAX_MESSAGE_ID_LEN;

/// Reject a message that could never be encoded for either transport.
pub fn check_message(message_id: &str, content: &[u8]) -> Result<(), PayloadError> {
    if message_id.len() > MAX_MESSAGE_ID_LEN {
        return Err(PayloadError::IdTooLong);
    }
    if content.len() > MAX_CONTENT_SIZE {
        return Err(PayloadError::ContentTooLarge {
            size: content.len(),
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Message { message_id: String, content: Vec<u8> },
    DeliveryAck { message_id: String },
    ReadReceipt { message_id: String },
    Favorite { is_favorite: bool },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Message { .. } => MessageType::Message,
            Payload::DeliveryAck { .. } => MessageType::DeliveryAck,
            Payload::ReadReceipt { .. } => MessageType::ReadReceipt,
            Payload::Favorite { .. } => MessageType::FavoriteNotification,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let mut out = vec![self.message_type() as u8];
        match self {
            Payload::Message {
                message_id,
                content,
            } => {
                put_id(&mut out, message_id)?;
                out.extend_from_slice(content);
            }
            Payload::DeliveryAck { message_id } | Payload::ReadReceipt { message_id } => {
                put_id(&mut out, message_id)?;
            }
            Payload::Favorite { is_favorite } => out.push(u8::from(*is_favorite)),
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let (&tag, body) = bytes.split_first().ok_or(PayloadError::Empty)?;
        let message_type =
            MessageType::from_u8(tag).map_err(|_| PayloadError::UnexpectedType(tag))?;
        match message_type {
            MessageType::Message => {
                let (message_id, rest) = take_id(body)?;
                Ok(Payload::Message {
                    message_id,
                    content: rest.to_vec(),
                })
            }
            MessageType::DeliveryAck => {
                let (message_id, _) = take_id(body)?;
                Ok(Payload::DeliveryAck { message_id })
            }
            MessageType::ReadReceipt => {
                let (message_id, _) = take_id(body)?;
                Ok(Payload::ReadReceipt { message_id })
            }
            MessageType::FavoriteNotification => match body.first() {
                Some(&flag) => Ok(Payload::Favorite {
                    is_favorite: flag != 0,
                }),
                None => Err(PayloadError::Truncated),
            },
            _ => Err(PayloadError::UnexpectedType(tag)),
        }
    }

    /// Rumor content for the relay path.
    pub fn to_relay_content(&self) -> Result<String, PayloadError> {
        Ok(format!("{RELAY_CONTENT_PREFIX}{}", BASE64.encode(self.encode()?)))
    }

    pub fn from_relay_content(content: &str) -> Result<Self, PayloadError> {
        let encoded = content
            .strip_prefix(RELAY_CONTENT_PREFIX)
            .ok_or(PayloadError::MissingPrefix)?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| PayloadError::InvalidBase64)?;
        Self::decode(&bytes)
    }
}

fn put_id(out: &mut Vec<u8>, id: &str) -> Result<(), PayloadError> {
    let len = u8::try_from(id.len()).map_err(|_| PayloadError::IdTooLong)?;
    out.push(len);
    out.extend_from_slice(id.as_bytes());
    Ok(())
}

fn take_id(body: &[u8]) -> Result<(String, &[u8]), PayloadError> {
    let (&len, rest) = body.split_first().ok_or(PayloadError::Truncated)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(PayloadError::Truncated);
    }
    let (id, rest) = rest.split_at(len);
    let id = std::str::from_utf8(id).map_err(|_| PayloadError::InvalidId)?;
    Ok((id.to_string(), rest))
}
