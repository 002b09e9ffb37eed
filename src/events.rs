//! Stage-entry event emission.
//!
//! Listeners are synchronous observers keyed by event name. Stage events
//! (`hear`, `listen`, `understand`, `act`, `serve`, `respond`,
//! `remember`) fire at stage entry, before validation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::state::State;

/// A synchronous event listener receiving the current pipeline state.
pub type Listener = Arc<dyn Fn(&State) + Send + Sync>;

/// Name-keyed listener registry.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for the named event.
    pub fn on<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&State) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap();
        listeners
            .entry(name.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Emit the named event to all its listeners, in registration order.
    pub fn emit(&self, name: &str, state: &State) {
        let listeners: Vec<Listener> = {
            let map = self.listeners.read().unwrap();
            match map.get(name) {
                Some(registered) => registered.clone(),
                None => return,
            }
        };
        for listener in listeners {
            listener(state);
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap();
        f.debug_struct("EventEmitter")
            .field("events", &listeners.len())
            .finish()
    }
}
