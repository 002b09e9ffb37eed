//! Ordered, composable middleware pipelines wrapped around each piece of
//! work the runtime performs.
//!
//! A piece receives the state and passes control by returning
//! [`Flow::Next`], or completes the pipeline early by returning
//! [`Flow::Done`]. The chain runs iteratively in registration order; the
//! terminal action runs only when every piece passed control. An error
//! from a piece unwinds the pipeline without running the terminal and
//! surfaces to the caller.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::BotError;
use crate::state::State;

/// Control decision returned by a middleware piece: continue to the next
/// piece, or complete the pipeline early without the terminal action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Done,
}

/// A middleware piece: an async unit over the pipeline state.
pub type Piece =
    Arc<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<Flow, BotError>> + Send + Sync>;

/// A terminal action or branch callback: the work a pipeline wraps.
pub type Callback =
    Arc<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>> + Send + Sync>;

/// Terminal that resolves without doing anything, for stages with no work
/// of their own.
pub fn resolve(_state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
    Box::pin(async { Ok(()) })
}

/// A named, ordered middleware pipeline.
#[derive(Clone, Default)]
pub struct Middleware {
    name: String,
    stack: Vec<Piece>,
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name)
            .field("pieces", &self.stack.len())
            .finish()
    }
}

impl Middleware {
    /// Create an empty pipeline with the given register name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Append a piece. Pieces execute in registration order.
    pub fn register<F>(&mut self, piece: F)
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<Flow, BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.stack.push(Arc::new(piece));
    }

    /// Run the chain over `state`. Returns `Ok(true)` when every piece
    /// passed control and the terminal ran, `Ok(false)` on an early
    /// completion, and `Err` when a piece or the terminal failed.
    pub async fn execute(&self, state: &mut State, terminal: &Callback) -> Result<bool, BotError> {
        for piece in &self.stack {
            match piece(state).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Done) => {
                    log::debug!("[middleware] {} completed early", self.name);
                    return Ok(false);
                }
                Err(err) => {
                    log::error!("[middleware] {} piece failed: {}", self.name, err);
                    return Err(err);
                }
            }
        }
        terminal(state).await?;
        Ok(true)
    }
}
