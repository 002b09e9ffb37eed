//! Adapter contracts: the three external collaborators the runtime
//! consumes. Concrete platform, storage and NLU implementations live in
//! their own crates and implement these traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::AdapterError;
use crate::message::Message;

/// A chat-platform adapter.
///
/// Implementations subscribe to their platform on `start` and feed each
/// inbound message to `Bot::receive`. Outbound, `dispatch` must honour
/// the envelope's `method` and fail with
/// [`AdapterError::MethodUnsupported`] for methods it does not implement;
/// `send`, `dm`, `reply` and `react` are the minimum set.
///
/// Reply contract: when the envelope's room id does not embed the user
/// id (i.e. the room is not a direct-message room for that user),
/// prepend `@username ` to each string before sending.
#[async_trait]
pub trait MessageAdapter: Send + Sync {
    /// Human-readable adapter name, for logs.
    fn name(&self) -> &str;

    /// Connect to the platform and begin feeding inbound messages.
    async fn start(&self) -> Result<(), AdapterError>;

    /// Disconnect and release platform resources.
    async fn shutdown(&self) -> Result<(), AdapterError>;

    /// Deliver an outbound envelope.
    async fn dispatch(&self, envelope: &Envelope) -> Result<(), AdapterError>;
}

/// A persistence adapter.
///
/// `memory` is reserved for the in-memory key/value brain; every other
/// `sub` name addresses an append-only serial store. `find`/`find_one`
/// match by shallow key equality on list elements.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), AdapterError>;

    async fn shutdown(&self) -> Result<(), AdapterError>;

    /// Append `data` to the `sub` serial store.
    async fn keep(&self, sub: &str, data: Value) -> Result<(), AdapterError>;

    /// All elements of `sub` matching `params` by shallow key equality.
    async fn find(&self, sub: &str, params: &Value) -> Result<Vec<Value>, AdapterError>;

    /// The first element of `sub` matching `params`.
    async fn find_one(&self, sub: &str, params: &Value) -> Result<Option<Value>, AdapterError>;

    /// Remove elements of `sub` matching `params`.
    async fn lose(&self, sub: &str, params: &Value) -> Result<(), AdapterError>;

    /// Persist the brain's full key/value snapshot.
    async fn save_memory(&self, data: Value) -> Result<(), AdapterError>;

    /// Load the brain snapshot: a mapping of sub-collection name to
    /// payload, where `users` maps user ids to user records.
    async fn load_memory(&self) -> Result<Value, AdapterError>;
}

/// A natural-language-understanding adapter.
///
/// `process` returns the provider-shaped result mapping (intents,
/// entities, language, sentiment, ...). An empty mapping means
/// "no result".
#[async_trait]
pub trait NluAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, message: &Message) -> Result<Value, AdapterError>;
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------
