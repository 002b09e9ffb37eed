//! # Confab
//!
//! A conversational-agent runtime. Inbound messages from pluggable chat
//! platforms are routed through a deterministic, middleware-wrapped
//! thought process (hear, listen, understand, act, respond, remember)
//! that coordinates branch matching, NLU dispatch, dialogue scoping,
//! catch-all fallback, and memory persistence, with extension points at
//! every stage.
//!
//! The core stays platform-agnostic: chat platforms, storage backends
//! and NLU providers plug in through the [`adapters`] traits.

pub mod adapters;
pub mod bot;
pub mod branch;
pub mod config;
pub mod dialogue;
pub mod envelope;
pub mod error;
pub mod events;
pub mod id;
pub mod memory;
pub mod message;
pub mod middleware;
pub mod nlu;
pub mod path;
pub mod state;
pub mod thought;

pub use bot::{Adapters, Bot};
pub use branch::{Branch, Matcher};
pub use config::Settings;
pub use dialogue::{Audience, Dialogue, DialogueRegistry, Scope};
pub use envelope::Envelope;
pub use error::{AdapterError, BotError};
pub use message::{Message, Room, User};
pub use middleware::{Flow, Middleware};
pub use nlu::{NluCriteria, NluResult};
pub use path::{Path, Stage};
pub use state::State;
pub use thought::{Thought, Thoughts};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
