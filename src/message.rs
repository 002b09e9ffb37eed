//! Inbound payload types: users, rooms, and the tagged message variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id;
use crate::nlu::NluResult;

// ---------------------------------------------------------------------------
// User / Room
// ---------------------------------------------------------------------------

/// A chat room (channel, group, DM thread) with a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// A chat user with a stable id, optional display name, and the room the
/// platform last saw them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            room: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_room(mut self, room: Room) -> Self {
        self.room = Some(room);
        self
    }

    /// Fill unset fields from a newer sighting. First seen wins: existing
    /// values are kept, gaps are filled.
    pub fn merge(&mut self, newer: &User) {
        if self.name.is_none() {
            self.name = newer.name.clone();
        }
        if self.room.is_none() {
            self.room = newer.room.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An inbound message from a chat platform.
///
/// Every variant carries a 32-char random `id` minted at construction and
/// a `user` reference. Messages are immutable after construction, except
/// that the understand stage may attach an NLU result to a `Text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Text {
        user: User,
        text: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        nlu: Option<NluResult>,
    },
    Enter {
        user: User,
        id: String,
    },
    Leave {
        user: User,
        id: String,
    },
    Rich {
        user: User,
        payload: Value,
        id: String,
    },
    Server {
        user: User,
        data: Value,
        id: String,
    },
    CatchAll {
        original: Box<Message>,
    },
}

impl Message {
    pub fn text(user: User, text: impl Into<String>) -> Self {
        Message::Text {
            user,
            text: text.into(),
            id: id::random_id(),
            nlu: None,
        }
    }

    pub fn enter(user: User) -> Self {
        Message::Enter {
            user,
            id: id::random_id(),
        }
    }

    pub fn leave(user: User) -> Self {
        Message::Leave {
            user,
            id: id::random_id(),
        }
    }

    pub fn rich(user: User, payload: Value) -> Self {
        Message::Rich {
            user,
            payload,
            id: id::random_id(),
        }
    }

    pub fn server(user: User, data: Value) -> Self {
        Message::Server {
            user,
            data,
            id: id::random_id(),
        }
    }

    /// Wrap a message nothing matched, for the catch-all stage.
    pub fn catch_all(original: Message) -> Self {
        Message::CatchAll {
            original: Box::new(original),
        }
    }

    /// The sending user. A catch-all wrapper delegates to its original.
    pub fn user(&self) -> &User {
        match self {
            Message::Text { user, .. }
            | Message::Enter { user, .. }
            | Message::Leave { user, .. }
            | Message::Rich { user, .. }
            | Message::Server { user, .. } => user,
            Message::CatchAll { original } => original.user(),
        }
    }

    /// The message id. A catch-all wrapper delegates to its original.
    pub fn id(&self) -> &str {
        match self {
            Message::Text { id, .. }
            | Message::Enter { id, .. }
            | Message::Leave { id, .. }
            | Message::Rich { id, .. }
            | Message::Server { id, .. } => id,
            Message::CatchAll { original } => original.id(),
        }
    }

    /// Text content for `Text` messages; a catch-all wrapper exposes its
    /// original's text so catch-all branches can still inspect it.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Message::Text { text, .. } => Some(text),
            Message::CatchAll { original } => original.text_content(),
            _ => None,
        }
    }

    /// The attached NLU result, if the understand stage produced one.
    pub fn nlu(&self) -> Option<&NluResult> {
        match self {
            Message::Text { nlu, .. } => nlu.as_ref(),
            Message::CatchAll { original } => original.nlu(),
            _ => None,
        }
    }

    /// Attach an NLU result. Only meaningful on `Text`; other variants
    /// ignore the attachment.
    pub fn set_nlu(&mut self, result: NluResult) {
        if let Message::Text { nlu, .. } = self {
            *nlu = Some(result);
        }
    }

    /// Server payload data, if this is a `Server` message.
    pub fn server_data(&self) -> Option<&Value> {
        match self {
            Message::Server { data, .. } => Some(data),
            Message::Rich { payload, .. } => Some(payload),
            Message::CatchAll { original } => original.server_data(),
            _ => None,
        }
    }
}
