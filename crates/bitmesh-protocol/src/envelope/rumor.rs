//! Rumor: the unsigned inner message.

use super::event::{Event, KIND_RUMOR};
use crate::error::EnvelopeError;

/// Build a rumor carrying `content` from the author with hex public key
/// `author_pubkey`.
pub fn create_rumor(
    content: &str,
    author_pubkey: &str,
    created_at: u64,
) -> Result<Event, EnvelopeError> {
    Event::unsigned(
        author_pubkey.to_string(),
        created_at,
        KIND_RUMOR,
        Vec::new(),
        content.to_string(),
    )
}

/// Parse a serialized rumor and check its kind and id.
pub fn parse_rumor(json: &str) -> Result<Event, EnvelopeError> {
    let rumor = Event::from_json(json)?;
    rumor.expect_kind(KIND_RUMOR)?;
    rumor.verify_id()?;
    Ok(rumor)
}
