//! Outbound envelopes: addressed, composable payloads handed to the
//! message adapter for dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BotError;
use crate::id;
use crate::message::{Message, Room, User};

/// Builder for an outbound message.
///
/// At dispatch time either `room.id` or the user must resolve to a room;
/// `reply` additionally requires a user and `react` a target message id
/// in `payload["target_id"]`. The method set is open: adapters reject
/// methods they do not implement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub strings: Vec<String>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded: Option<DateTime<Utc>>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    /// Create an unaddressed envelope with the default `send` method.
    pub fn new() -> Self {
        Self {
            id: id::random_id(),
            method: "send".into(),
            room: None,
            user: None,
            strings: Vec::new(),
            payload: Value::Null,
            branch_id: None,
            created: Utc::now(),
            responded: None,
        }
    }

    /// Create an envelope addressed back at a message's user and room.
    pub fn from_message(message: &Message) -> Self {
        let mut envelope = Self::new();
        envelope.address_from(message);
        envelope
    }

    /// Address this envelope at a message's user and room.
    pub fn address_from(&mut self, message: &Message) -> &mut Self {
        let user = message.user();
        self.room = user.room.clone();
        self.user = Some(user.clone());
        self
    }

    pub fn to_user(&mut self, user: User) -> &mut Self {
        self.user = Some(user);
        self
    }

    pub fn to_room(&mut self, room: Room) -> &mut Self {
        self.room = Some(room);
        self
    }

    /// Append a line of text.
    pub fn write(&mut self, text: impl Into<String>) -> &mut Self {
        self.strings.push(text.into());
        self
    }

    /// Attach a payload (attachments, blocks, reactions...).
    pub fn compose(&mut self, payload: Value) -> &mut Self {
        self.payload = payload;
        self
    }

    /// Set the dispatch method.
    pub fn via(&mut self, method: impl Into<String>) -> &mut Self {
        self.method = method.into();
        self
    }

    /// The room id this envelope resolves to: its own room, or the
    /// addressed user's room.
    pub fn room_id(&self) -> Option<&str> {
        self.room
            .as_ref()
            .map(|r| r.id.as_str())
            .or_else(|| {
                self.user
                    .as_ref()
                    .and_then(|u| u.room.as_ref())
                    .map(|r| r.id.as_str())
            })
            .filter(|id| !id.is_empty())
    }

    /// Validate required fields for the envelope's method.
    pub fn validate_for_dispatch(&self) -> Result<(), BotError> {
        if self.room_id().is_none() && self.user.is_none() {
            return Err(BotError::InvalidEnvelope(
                "neither room nor user resolves an address".into(),
            ));
        }
        match self.method.as_str() {
            "reply" if self.user.is_none() => {
                Err(BotError::InvalidEnvelope("reply requires a user".into()))
            }
            "react" if self.payload.get("target_id").and_then(Value::as_str).is_none() => Err(
                BotError::InvalidEnvelope("react requires payload.target_id".into()),
            ),
            _ => Ok(()),
        }
    }
}
