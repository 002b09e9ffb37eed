//! Paths: named collections of branches grouped by the stage that
//! processes them.
//!
//! Each stage collection is an insertion-ordered, id-keyed map backed by
//! a plain vector: insertion order is the processing order, and adding a
//! branch under an existing id replaces it in place (last writer wins).

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::branch::{Branch, Matcher};
use crate::error::BotError;
use crate::nlu::NluCriteria;
use crate::state::State;

/// The stages that hold branch collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Listen,
    Understand,
    Serve,
    Act,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Listen => "listen",
            Stage::Understand => "understand",
            Stage::Serve => "serve",
            Stage::Act => "act",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouped branch collections for one scope (global or one dialogue).
#[derive(Clone, Default)]
pub struct Path {
    listen: Vec<Arc<Branch>>,
    understand: Vec<Arc<Branch>>,
    serve: Vec<Arc<Branch>>,
    act: Vec<Arc<Branch>>,
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("listen", &self.listen.len())
            .field("understand", &self.understand.len())
            .field("serve", &self.serve.len())
            .field("act", &self.act.len())
            .finish()
    }
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, stage: Stage) -> &Vec<Arc<Branch>> {
        match stage {
            Stage::Listen => &self.listen,
            Stage::Understand => &self.understand,
            Stage::Serve => &self.serve,
            Stage::Act => &self.act,
        }
    }

    fn collection_mut(&mut self, stage: Stage) -> &mut Vec<Arc<Branch>> {
        match stage {
            Stage::Listen => &mut self.listen,
            Stage::Understand => &mut self.understand,
            Stage::Serve => &mut self.serve,
            Stage::Act => &mut self.act,
        }
    }

    /// Install a branch under a stage. A branch with the same id replaces
    /// the existing one in place; otherwise it appends. Returns the id.
    pub fn add(&mut self, stage: Stage, branch: Branch) -> String {
        let id = branch.id.clone();
        let collection = self.collection_mut(stage);
        match collection.iter().position(|b| b.id == id) {
            Some(index) => collection[index] = Arc::new(branch),
            None => collection.push(Arc::new(branch)),
        }
        id
    }

    /// The branches of one stage, in processing order.
    pub fn stage(&self, stage: Stage) -> &[Arc<Branch>] {
        self.collection(stage)
    }

    /// Collapse a stage's collection to its force-marked branches.
    pub fn forced(&mut self, stage: Stage) {
        self.collection_mut(stage).retain(|branch| branch.force);
    }

    /// Whether any stage has branches installed.
    pub fn has_branches(&self) -> bool {
        !self.listen.is_empty()
            || !self.understand.is_empty()
            || !self.serve.is_empty()
            || !self.act.is_empty()
    }

    // -----------------------------------------------------------------------
    // Builder helpers
    // -----------------------------------------------------------------------

    /// Listen for text matching a case-insensitive pattern.
    pub fn text<F>(&mut self, pattern: &str, callback: F) -> Result<String, BotError>
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        let branch = Branch::new(Matcher::text(pattern)?, callback);
        Ok(self.add(Stage::Listen, branch))
    }

    /// Listen for the fragment between two markers.
    pub fn capture<F>(
        &mut self,
        after: &str,
        before: Option<&str>,
        callback: F,
    ) -> Result<String, BotError>
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        let branch = Branch::new(Matcher::capture(after, before)?, callback);
        Ok(self.add(Stage::Listen, branch))
    }

    /// Listen with a custom predicate.
    pub fn custom<M, F>(&mut self, predicate: M, callback: F) -> String
    where
        M: Fn(&crate::message::Message) -> Option<Vec<String>> + Send + Sync + 'static,
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Stage::Listen, Branch::new(Matcher::custom(predicate), callback))
    }

    /// Understand an NLU result matching the criteria.
    pub fn nlu<F>(&mut self, criteria: NluCriteria, callback: F) -> String
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Stage::Understand, Branch::new(Matcher::Nlu(criteria), callback))
    }

    /// Serve server/webhook data matching the given keys.
    pub fn server<F>(&mut self, keys: Value, callback: F) -> String
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Stage::Serve, Branch::new(Matcher::keys(keys), callback))
    }

    /// Listen for a user entering a room.
    pub fn enter<F>(&mut self, callback: F) -> String
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Stage::Listen, Branch::new(Matcher::Enter, callback))
    }

    /// Listen for a user leaving a room.
    pub fn leave<F>(&mut self, callback: F) -> String
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Stage::Listen, Branch::new(Matcher::Leave, callback))
    }

    /// Act on anything no other branch matched.
    pub fn catch_all<F>(&mut self, callback: F) -> String
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Stage::Act, Branch::new(Matcher::CatchAll, callback))
    }
}
