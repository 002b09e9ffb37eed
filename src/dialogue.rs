//! Dialogues: per-audience path scoping.
//!
//! An engaged dialogue swaps its own path in for the global one, so a
//! conversation can run against private follow-up branches. When a run
//! begins the dialogue's current path is set aside for processing and a
//! fresh one installed, letting branch callbacks queue the next turn's
//! branches. After the run: an unmatched turn restores the set-aside
//! path, a matched turn with new branches keeps the dialogue engaged,
//! and a matched turn with none closes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::path::Path;

/// How wide an audience a dialogue binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One user in one room.
    Direct,
    /// One user anywhere.
    User,
    /// Anyone in one room.
    Room,
}

/// Deterministic registry key derived from user/room/scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Audience {
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Audience {
    /// Derive the audience of a message at the given scope.
    pub fn of(scope: Scope, message: &Message) -> Self {
        let user = message.user();
        let room_id = user.room.as_ref().map(|room| room.id.clone());
        match scope {
            Scope::Direct => Self {
                scope,
                user_id: Some(user.id.clone()),
                room_id,
            },
            Scope::User => Self {
                scope,
                user_id: Some(user.id.clone()),
                room_id: None,
            },
            Scope::Room => Self {
                scope,
                user_id: None,
                room_id,
            },
        }
    }
}

/// A per-audience conversation holding its own branch path.
#[derive(Debug)]
pub struct Dialogue {
    pub audience: Audience,
    path: Mutex<Path>,
    previous: Mutex<Option<Path>>,
}

impl Dialogue {
    fn new(audience: Audience) -> Self {
        Self {
            audience,
            path: Mutex::new(Path::new()),
            previous: Mutex::new(None),
        }
    }

    /// Mutate the dialogue's current path, e.g. to add follow-up
    /// branches from a callback.
    pub fn with_path<R>(&self, f: impl FnOnce(&mut Path) -> R) -> R {
        let mut path = self.path.lock().unwrap();
        f(&mut path)
    }

    /// Whether the current path has any branches queued.
    pub fn has_branches(&self) -> bool {
        self.path.lock().unwrap().has_branches()
    }

    /// Set the current path aside as the previous one, install a fresh
    /// empty path for callbacks to fill, and return the set-aside path
    /// for the run to process.
    pub fn progress_path(&self) -> Path {
        let mut path = self.path.lock().unwrap();
        let processing = std::mem::take(&mut *path);
        *self.previous.lock().unwrap() = Some(processing.clone());
        processing
    }

    /// Restore the previously set-aside path, discarding anything added
    /// since. No-op when nothing was set aside.
    pub fn revert_path(&self) {
        if let Some(previous) = self.previous.lock().unwrap().take() {
            *self.path.lock().unwrap() = previous;
        }
    }
}

/// Process-wide dialogue registry keyed by audience.
#[derive(Debug, Default)]
pub struct DialogueRegistry {
    dialogues: Mutex<HashMap<Audience, Arc<Dialogue>>>,
}

impl DialogueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or return the already-open) dialogue for an audience.
    pub fn open(&self, audience: Audience) -> Arc<Dialogue> {
        let mut dialogues = self.dialogues.lock().unwrap();
        dialogues
            .entry(audience.clone())
            .or_insert_with(|| Arc::new(Dialogue::new(audience)))
            .clone()
    }

    /// The dialogue engaged for a message, trying the most specific
    /// audience first: direct, then user, then room.
    pub fn engaged(&self, message: &Message) -> Option<Arc<Dialogue>> {
        let dialogues = self.dialogues.lock().unwrap();
        for scope in [Scope::Direct, Scope::User, Scope::Room] {
            let audience = Audience::of(scope, message);
            if let Some(dialogue) = dialogues.get(&audience) {
                return Some(dialogue.clone());
            }
        }
        None
    }

    /// Remove a dialogue from the registry.
    pub fn close(&self, audience: &Audience) {
        self.dialogues.lock().unwrap().remove(audience);
        log::debug!("[dialogue] closed {:?}", audience);
    }

    /// Number of open dialogues.
    pub fn len(&self) -> usize {
        self.dialogues.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogues.lock().unwrap().is_empty()
    }
}
