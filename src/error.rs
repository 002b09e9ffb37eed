//! Error types for the runtime.
//!
//! Expected absences (no adapter configured, no branches, empty text) are
//! recovered locally and never surface as `Err`; the variants here cover
//! programmer errors, misconfiguration, and adapter failures.

use thiserror::Error;

/// Errors raised by adapter implementations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter does not implement the requested dispatch method.
    /// Fatal for the envelope being dispatched.
    #[error("dispatch method not supported: {0}")]
    MethodUnsupported(String),

    /// Opaque adapter-internal failure.
    #[error("adapter failure: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Errors raised by the core pipeline.
#[derive(Debug, Error)]
pub enum BotError {
    /// A requested operation needs a collaborator that was never configured.
    #[error("no {0} adapter configured")]
    AdapterMissing(&'static str),

    /// A stage was constructed against a middleware register that does not
    /// exist. Fatal at startup.
    #[error("unknown middleware register: {0}")]
    UnknownMiddleware(String),

    /// A sequence name was requested that the orchestrator does not know.
    #[error("unknown sequence: {0}")]
    UnknownSequence(String),

    /// An envelope failed dispatch-entry validation.
    #[error("envelope not dispatchable: {0}")]
    InvalidEnvelope(String),

    /// A matcher pattern failed to compile.
    #[error("invalid matcher pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A user callback, validator, action, or middleware piece failed.
    #[error("callback failed: {0}")]
    Callback(String),

    /// A state snapshot could not be serialised for persistence.
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An adapter operation failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
