//! In-process memory: a key/value brain plus the user directory, with
//! round-tripping through the storage adapter.
//!
//! The exported snapshot is a mapping of sub-collection name to payload;
//! `users` is the user directory keyed by user id and is rehydrated into
//! user records on load. Every other key is opaque to the brain.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::message::User;

/// The brain: process-wide conversational memory.
#[derive(Debug, Default)]
pub struct Brain {
    data: RwLock<HashMap<String, Value>>,
    users: RwLock<HashMap<String, User>>,
}

impl Brain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.write().unwrap().insert(key.into(), value);
    }

    /// Read a value back.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().unwrap().get(key).cloned()
    }

    /// Drop a key.
    pub fn forget(&self, key: &str) {
        self.data.write().unwrap().remove(key);
    }

    /// Record a user sighting in the directory. First seen wins for
    /// fields; gaps are filled from the newer record. Returns the
    /// directory's view of the user.
    pub fn remember_user(&self, user: &User) -> User {
        let mut users = self.users.write().unwrap();
        let entry = users
            .entry(user.id.clone())
            .or_insert_with(|| user.clone());
        entry.merge(user);
        entry.clone()
    }

    /// Look up a user by id.
    pub fn user(&self, id: &str) -> Option<User> {
        self.users.read().unwrap().get(id).cloned()
    }

    /// The full user directory.
    pub fn users(&self) -> HashMap<String, User> {
        self.users.read().unwrap().clone()
    }

    /// Export the full memory snapshot for persistence.
    pub fn export(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in self.data.read().unwrap().iter() {
            map.insert(key.clone(), value.clone());
        }
        let users: Map<String, Value> = self
            .users
            .read()
            .unwrap()
            .iter()
            .filter_map(|(id, user)| {
                serde_json::to_value(user).ok().map(|v| (id.clone(), v))
            })
            .collect();
        map.insert("users".into(), Value::Object(users));
        Value::Object(map)
    }

    /// Replace memory contents from a persisted snapshot, rehydrating the
    /// `users` sub into user records. Entries that fail to deserialise
    /// are dropped with a warning.
    pub fn hydrate(&self, snapshot: Value) {
        let Value::Object(map) = snapshot else {
            return;
        };
        let mut data = self.data.write().unwrap();
        let mut users = self.users.write().unwrap();
        data.clear();
        users.clear();
        for (key, value) in map {
            if key == "users" {
                if let Value::Object(records) = value {
                    for (id, record) in records {
                        match serde_json::from_value::<User>(record) {
                            Ok(user) => {
                                users.insert(id, user);
                            }
                            Err(err) => {
                                log::warn!("[memory] dropping unreadable user {}: {}", id, err);
                            }
                        }
                    }
                }
            } else {
                data.insert(key, value);
            }
        }
    }
}
