//! Pipeline state: the envelope-of-facts threaded through one
//! reception or dispatch run.
//!
//! A state is created per run and owned by it. It carries the inbound
//! message (or the outbound envelopes for dispatch runs), the flags the
//! stages cooperate through, and the lifecycle timestamps. The `bot`
//! handle gives callbacks access to adapters, dialogues and the respond
//! sequence; it is never persisted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::bot::Bot;
use crate::branch::Branch;
use crate::dialogue::Dialogue;
use crate::envelope::Envelope;
use crate::error::BotError;
use crate::message::Message;
use crate::path::Path;
use crate::thought::Thoughts;

/// Mutable record owned by one pipeline run.
#[derive(Clone)]
pub struct State {
    /// Handle back to the owning bot. Not persisted.
    pub bot: Arc<Bot>,
    /// The inbound message, for reception runs.
    pub message: Option<Message>,
    /// The outbound queue, in composition order.
    pub envelopes: Vec<Envelope>,
    /// Which named sequence is running.
    pub sequence: String,
    /// Stage name → completion timestamp, added when a stage succeeds.
    pub processed: HashMap<String, DateTime<Utc>>,
    /// Whether any branch matched during this run. Monotonic.
    pub matched: bool,
    /// Stops further branches in the current stage.
    pub done: bool,
    /// Aborts the entire sequence at the next stage boundary.
    pub exit: bool,
    /// The last branch that matched.
    pub branch: Option<Arc<Branch>>,
    /// Captured fragments from the most recent match.
    pub conditions: Vec<String>,
    /// The dialogue this run is scoped to, when one is engaged.
    pub dialogue: Option<Arc<Dialogue>>,
    pub heard: Option<DateTime<Utc>>,
    pub listened: Option<DateTime<Utc>>,
    pub understood: Option<DateTime<Utc>>,
    pub responded: Option<DateTime<Utc>>,
    pub remembered: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("sequence", &self.sequence)
            .field("matched", &self.matched)
            .field("done", &self.done)
            .field("exit", &self.exit)
            .field("envelopes", &self.envelopes.len())
            .field("processed", &self.processed.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl State {
    fn empty(bot: Arc<Bot>) -> Self {
        Self {
            bot,
            message: None,
            envelopes: Vec::new(),
            sequence: String::new(),
            processed: HashMap::new(),
            matched: false,
            done: false,
            exit: false,
            branch: None,
            conditions: Vec::new(),
            dialogue: None,
            heard: None,
            listened: None,
            understood: None,
            responded: None,
            remembered: None,
        }
    }

    /// State for a reception run over an inbound message.
    pub fn for_message(bot: Arc<Bot>, message: Message) -> Self {
        let mut state = Self::empty(bot);
        state.message = Some(message);
        state
    }

    /// State for a dispatch run over an already-built envelope.
    pub fn for_envelope(bot: Arc<Bot>, envelope: Envelope) -> Self {
        let mut state = Self::empty(bot);
        state.envelopes.push(envelope);
        state
    }

    /// Stop further branch processing in the current stage.
    pub fn finish(&mut self) {
        self.done = true;
    }

    /// Envelopes composed but not yet handed to the message adapter.
    pub fn pending_envelopes(&self) -> Vec<&Envelope> {
        self.envelopes
            .iter()
            .filter(|envelope| envelope.responded.is_none())
            .collect()
    }

    /// Envelopes already dispatched.
    pub fn dispatched_envelopes(&self) -> Vec<&Envelope> {
        self.envelopes
            .iter()
            .filter(|envelope| envelope.responded.is_some())
            .collect()
    }

    /// The envelope under composition: the last pending one, or a fresh
    /// envelope addressed from the inbound message.
    pub fn respond_envelope(&mut self) -> &mut Envelope {
        let needs_new = self
            .envelopes
            .last()
            .map(|envelope| envelope.responded.is_some())
            .unwrap_or(true);
        if needs_new {
            let envelope = match &self.message {
                Some(message) => Envelope::from_message(message),
                None => Envelope::new(),
            };
            self.envelopes.push(envelope);
        }
        self.envelopes
            .last_mut()
            .expect("envelope queue cannot be empty here")
    }

    /// Run the `respond` sequence over this state, dispatching the
    /// pending envelopes.
    pub async fn respond(&mut self) -> Result<(), BotError> {
        let thoughts = Thoughts::new(self.bot.clone())?;
        let mut path = Path::new();
        thoughts.run("respond", self, &mut path).await
    }

    /// Compose and immediately dispatch a response via the given method.
    pub async fn respond_via(&mut self, method: &str, strings: &[&str]) -> Result<(), BotError> {
        let envelope = self.respond_envelope();
        envelope.via(method);
        for text in strings {
            envelope.write(*text);
        }
        self.respond().await
    }

    /// Serialisable snapshot for the storage adapter: data fields only,
    /// with the matched branch flattened to its id.
    pub fn snapshot(&self) -> Result<Value, BotError> {
        Ok(json!({
            "sequence": self.sequence,
            "message": serde_json::to_value(&self.message)?,
            "envelopes": serde_json::to_value(&self.envelopes)?,
            "processed": serde_json::to_value(&self.processed)?,
            "matched": self.matched,
            "done": self.done,
            "exit": self.exit,
            "branch": self.branch.as_ref().map(|branch| branch.id.clone()),
            "conditions": self.conditions,
            "heard": self.heard,
            "listened": self.listened,
            "understood": self.understood,
            "responded": self.responded,
            "remembered": self.remembered,
        }))
    }
}
