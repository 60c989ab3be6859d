//! JSON array messages exchanged with relays.
//!
//! Client to relay: `["EVENT", ev]`, `["REQ", id, filter...]`,
//! `["CLOSE", id]`. Relay to client: `["EVENT", id, ev]`,
//! `["OK", event_id, accepted, message]`, `["EOSE", id]`, `["NOTICE", msg]`.

use bitmesh_protocol::envelope::{Event, KIND_GIFT_WRAP};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RelayError;

/// Subscription filter. Unset fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Gift wraps addressed to the hex public key `pubkey`.
    pub fn gift_wraps_for(pubkey: &str) -> Self {
        Self {
            kinds: Some(vec![KIND_GIFT_WRAP]),
            p_tags: Some(vec![pubkey.to_string()]),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, RelayError> {
        let value = match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut parts = Vec::with_capacity(filters.len() + 2);
                parts.push(json!("REQ"));
                parts.push(json!(subscription_id));
                for filter in filters {
                    parts.push(serde_json::to_value(filter)?);
                }
                Value::Array(parts)
            }
            ClientMessage::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose(String),
    Notice(String),
}

impl RelayMessage {
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(mut parts) = value else {
            return Err(RelayError::Malformed("not an array"));
        };
        let label = parts
            .first()
            .and_then(Value::as_str)
            .ok_or(RelayError::Malformed("missing message label"))?
            .to_string();

        match label.as_str() {
            "EVENT" => {
                if parts.len() < 3 {
                    return Err(RelayError::Malformed("EVENT needs a subscription id and event"));
                }
                let subscription_id = string_at(&parts, 1)?;
                let event = serde_json::from_value(parts.swap_remove(2))?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => Ok(RelayMessage::Ok {
                event_id: string_at(&parts, 1)?,
                accepted: parts
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or(RelayError::Malformed("OK needs an accepted flag"))?,
                message: parts
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "EOSE" => Ok(RelayMessage::Eose(string_at(&parts, 1)?)),
            "NOTICE" => Ok(RelayMessage::Notice(string_at(&parts, 1)?)),
            _ => Err(RelayError::Malformed("unknown message label")),
        }
    }
}

fn string_at(parts: &[Value], idx: usize) -> Result<String, RelayError> {
    parts
        .get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RelayError::Malformed("expected a string field"))
}
