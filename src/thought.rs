//! The thought process: named pipeline stages and the sequences that
//! string them together.
//!
//! A stage (`Thought`) wraps one unit of reasoning in its middleware:
//! validation gates the work, branches are consulted in insertion order,
//! and the stage's action reacts to success or failure. The orchestrator
//! (`Thoughts`) owns the stage map and the named sequences (`receive`,
//! `serve`, `respond`, `dispatch`) and runs stages strictly serially,
//! honouring the cooperative `done` / `exit` flags.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::bot::Bot;
use crate::branch::Branch;
use crate::error::BotError;
use crate::message::Message;
use crate::middleware::{resolve, Callback, Middleware};
use crate::nlu::NluResult;
use crate::path::{Path, Stage};
use crate::state::State;

/// Validation gate run before a stage's work. Returning `Ok(false)`
/// marks the stage unsuccessful and the sequence continues; `Err` is
/// fatal for the run.
pub type Validate = Arc<
    dyn for<'a> Fn(&'a mut State, &'a mut Path) -> BoxFuture<'a, Result<bool, BotError>>
        + Send
        + Sync,
>;

/// Reaction to a stage's outcome, called with the success flag.
pub type Action = Arc<
    dyn for<'a> Fn(&'a mut State, &'a mut Path, bool) -> BoxFuture<'a, Result<(), BotError>>
        + Send
        + Sync,
>;

/// Where a stage's branches come from.
#[derive(Clone)]
pub enum BranchSource {
    /// Middleware-only stage.
    None,
    /// Branches are read from the run's path at processing time.
    Stage(Stage),
    /// A fixed collection supplied at construction.
    Supplied(Vec<Arc<Branch>>),
}

impl BranchSource {
    /// Whether any branch in this source is force-marked. Forced
    /// branches keep a stage alive once `done` has been set upstream.
    fn has_forced(&self, path: &Path) -> bool {
        match self {
            BranchSource::None => false,
            BranchSource::Stage(stage) => path.stage(*stage).iter().any(|branch| branch.force),
            BranchSource::Supplied(list) => list.iter().any(|branch| branch.force),
        }
    }
}

fn validate_pass<'a>(
    _state: &'a mut State,
    _path: &'a mut Path,
) -> BoxFuture<'a, Result<bool, BotError>> {
    Box::pin(async { Ok(true) })
}

fn action_noop<'a>(
    _state: &'a mut State,
    _path: &'a mut Path,
    _success: bool,
) -> BoxFuture<'a, Result<(), BotError>> {
    Box::pin(async { Ok(()) })
}

/// One pipeline stage.
pub struct Thought {
    pub name: String,
    source: BranchSource,
    middleware: Middleware,
    validate: Validate,
    action: Action,
}

impl Thought {
    /// Create a stage over the given middleware pipeline, with an
    /// always-true validate and a no-op action.
    pub fn new(name: impl Into<String>, source: BranchSource, middleware: Middleware) -> Self {
        Self {
            name: name.into(),
            source,
            middleware,
            validate: Arc::new(validate_pass),
            action: Arc::new(action_noop),
        }
    }

    pub fn with_validate<F>(mut self, validate: F) -> Self
    where
        F: for<'a> Fn(&'a mut State, &'a mut Path) -> BoxFuture<'a, Result<bool, BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.validate = Arc::new(validate);
        self
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: for<'a> Fn(&'a mut State, &'a mut Path, bool) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        self.action = Arc::new(action);
        self
    }

    /// Process this stage: validate, run middleware and branches, then
    /// the action. Returns whether the stage succeeded.
    pub async fn process(&self, state: &mut State, path: &mut Path) -> Result<bool, BotError> {
        if state.exit {
            return Ok(false);
        }

        // stage-entry event, before validation
        state.bot.events.emit(&self.name, state);

        match &self.source {
            BranchSource::None => {}
            BranchSource::Supplied(branches) if branches.is_empty() => {
                log::debug!("[thought] {} skipped, no branches supplied", self.name);
                (self.action)(state, path, false).await?;
                return Ok(false);
            }
            source => {
                // forced branches survive an upstream finish
                if state.done && !source.has_forced(path) {
                    log::debug!("[thought] {} skipped, state already done", self.name);
                    (self.action)(state, path, false).await?;
                    return Ok(false);
                }
            }
        }

        let valid = match (self.validate)(state, path).await {
            Ok(valid) => valid,
            Err(err) => {
                log::error!("[thought] {} validate failed: {}", self.name, err);
                (self.action)(state, path, false).await?;
                return Err(err);
            }
        };
        if !valid {
            log::debug!("[thought] {} validation failed", self.name);
            (self.action)(state, path, false).await?;
            return Ok(false);
        }

        let success = match &self.source {
            BranchSource::None => {
                let terminal: Callback = Arc::new(resolve);
                self.middleware.execute(state, &terminal).await?
            }
            source => {
                let branches: Vec<Arc<Branch>> = match source {
                    BranchSource::Stage(stage) => path.stage(*stage).to_vec(),
                    BranchSource::Supplied(list) => list.clone(),
                    BranchSource::None => Vec::new(),
                };
                let mut matched_here = false;
                for branch in branches {
                    // done stops unforced branches only; later items may
                    // still be force-marked
                    if state.done && !branch.force {
                        continue;
                    }
                    if branch.process(state, &self.middleware).await? {
                        matched_here = true;
                    }
                }
                matched_here
            }
        };

        if success {
            state.processed.insert(self.name.clone(), Utc::now());
            (self.action)(state, path, true).await?;
        } else {
            (self.action)(state, path, false).await?;
        }
        Ok(success)
    }
}

// ---------------------------------------------------------------------------
// Built-in stage policies
// ---------------------------------------------------------------------------

fn action_hear<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
    success: bool,
) -> BoxFuture<'a, Result<(), BotError>> {
    Box::pin(async move {
        if success {
            state.heard = Some(Utc::now());
        } else {
            // a rejected hear aborts subsequent branch processing
            state.finish();
        }
        Ok(())
    })
}

fn action_listen<'a>(
    state: &'a mut State,
    path: &'a mut Path,
    success: bool,
) -> BoxFuture<'a, Result<(), BotError>> {
    Box::pin(async move {
        if success {
            state.listened = Some(Utc::now());
            // a listen match restricts understand to forced branches
            path.forced(Stage::Understand);
        }
        Ok(())
    })
}

fn validate_understand<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
) -> BoxFuture<'a, Result<bool, BotError>> {
    Box::pin(async move {
        let bot = state.bot.clone();
        let adapter = match bot.adapters.nlu.clone() {
            Some(adapter) => adapter,
            None => {
                log::debug!("[thought] understand skipped, no NLU adapter");
                return Ok(false);
            }
        };
        let message = match state.message.clone() {
            Some(message) => message,
            None => return Ok(false),
        };
        let text = match message.text_content() {
            Some(text) => text.trim(),
            None => return Ok(false),
        };
        if text.is_empty() {
            return Ok(false);
        }
        if let Some(min) = bot.settings.nlu_min_length() {
            if text.chars().count() < min {
                log::debug!("[thought] understand skipped, text below {} chars", min);
                return Ok(false);
            }
        }
        let raw = adapter.process(&message).await.map_err(BotError::from)?;
        match NluResult::from_value(&raw) {
            Some(result) => {
                if let Some(message) = state.message.as_mut() {
                    message.set_nlu(result);
                }
                Ok(true)
            }
            None => {
                log::debug!("[thought] understand skipped, empty NLU result");
                Ok(false)
            }
        }
    })
}

fn action_understand<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
    success: bool,
) -> BoxFuture<'a, Result<(), BotError>> {
    Box::pin(async move {
        if success {
            state.understood = Some(Utc::now());
        }
        Ok(())
    })
}

fn validate_act<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
) -> BoxFuture<'a, Result<bool, BotError>> {
    Box::pin(async move {
        if state.matched {
            return Ok(false);
        }
        if let Some(original) = state.message.take() {
            state.message = Some(Message::catch_all(original));
        }
        Ok(true)
    })
}

fn validate_respond<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
) -> BoxFuture<'a, Result<bool, BotError>> {
    Box::pin(async move {
        if state.bot.adapters.message.is_none() {
            return Err(BotError::AdapterMissing("message"));
        }
        if state.pending_envelopes().is_empty() {
            log::debug!("[thought] respond skipped, no pending envelope");
            return Ok(false);
        }
        if let Some(branch_id) = state.branch.as_ref().map(|branch| branch.id.clone()) {
            for envelope in state
                .envelopes
                .iter_mut()
                .filter(|envelope| envelope.responded.is_none())
            {
                envelope.branch_id = Some(branch_id.clone());
            }
        }
        Ok(true)
    })
}

fn action_respond<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
    success: bool,
) -> BoxFuture<'a, Result<(), BotError>> {
    Box::pin(async move {
        if !success {
            return Ok(());
        }
        let adapter = state
            .bot
            .adapters
            .message
            .clone()
            .ok_or(BotError::AdapterMissing("message"))?;
        for envelope in state
            .envelopes
            .iter_mut()
            .filter(|envelope| envelope.responded.is_none())
        {
            envelope.validate_for_dispatch()?;
            adapter.dispatch(envelope).await.map_err(BotError::from)?;
            envelope.responded = Some(Utc::now());
            log::debug!(
                "[thought] dispatched envelope {} via {}",
                envelope.id,
                envelope.method
            );
        }
        state.responded = Some(Utc::now());
        Ok(())
    })
}

fn validate_remember<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
) -> BoxFuture<'a, Result<bool, BotError>> {
    Box::pin(async move {
        if state.bot.adapters.storage.is_none() {
            log::debug!("[thought] remember skipped, no storage adapter");
            return Ok(false);
        }
        let dispatched = state
            .envelopes
            .iter()
            .any(|envelope| envelope.responded.is_some());
        if !state.matched && !dispatched {
            log::debug!("[thought] remember skipped, nothing matched or dispatched");
            return Ok(false);
        }
        if state.matched {
            if let Some(message) = &state.message {
                state.bot.brain.remember_user(message.user());
            }
        }
        Ok(true)
    })
}

fn action_remember<'a>(
    state: &'a mut State,
    _path: &'a mut Path,
    success: bool,
) -> BoxFuture<'a, Result<(), BotError>> {
    Box::pin(async move {
        if !success {
            return Ok(());
        }
        let storage = state
            .bot
            .adapters
            .storage
            .clone()
            .ok_or(BotError::AdapterMissing("storage"))?;
        let snapshot = state.snapshot()?;
        storage.keep("states", snapshot).await.map_err(BotError::from)?;
        state.remembered = Some(Utc::now());
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Thoughts, the orchestrator
// ---------------------------------------------------------------------------

/// Owns the stage map and the named sequences.
pub struct Thoughts {
    stages: HashMap<String, Thought>,
    sequences: HashMap<String, Vec<String>>,
}

impl Thoughts {
    /// Build the built-in stages and sequences against the bot's
    /// middleware registries. Fails if a stage's middleware register is
    /// missing.
    pub fn new(bot: Arc<Bot>) -> Result<Self, BotError> {
        let middleware = |name: &str| {
            bot.middleware(name)
                .ok_or_else(|| BotError::UnknownMiddleware(name.to_string()))
        };

        let mut stages = HashMap::new();
        stages.insert(
            "hear".to_string(),
            Thought::new("hear", BranchSource::None, middleware("hear")?).with_action(action_hear),
        );
        stages.insert(
            "listen".to_string(),
            Thought::new("listen", BranchSource::Stage(Stage::Listen), middleware("listen")?)
                .with_action(action_listen),
        );
        stages.insert(
            "understand".to_string(),
            Thought::new(
                "understand",
                BranchSource::Stage(Stage::Understand),
                middleware("understand")?,
            )
            .with_validate(validate_understand)
            .with_action(action_understand),
        );
        stages.insert(
            "serve".to_string(),
            Thought::new("serve", BranchSource::Stage(Stage::Serve), middleware("serve")?),
        );
        stages.insert(
            "act".to_string(),
            Thought::new("act", BranchSource::Stage(Stage::Act), middleware("act")?)
                .with_validate(validate_act),
        );
        stages.insert(
            "respond".to_string(),
            Thought::new("respond", BranchSource::None, middleware("respond")?)
                .with_validate(validate_respond)
                .with_action(action_respond),
        );
        stages.insert(
            "remember".to_string(),
            Thought::new("remember", BranchSource::None, middleware("remember")?)
                .with_validate(validate_remember)
                .with_action(action_remember),
        );

        let mut sequences = HashMap::new();
        sequences.insert(
            "receive".to_string(),
            vec!["hear", "listen", "understand", "act", "remember"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        sequences.insert(
            "serve".to_string(),
            vec!["hear", "serve", "act", "remember"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        sequences.insert("respond".to_string(), vec!["respond".to_string()]);
        sequences.insert(
            "dispatch".to_string(),
            vec!["respond".to_string(), "remember".to_string()],
        );

        Ok(Self { stages, sequences })
    }

    /// Install or replace a stage.
    pub fn add_stage(&mut self, thought: Thought) {
        self.stages.insert(thought.name.clone(), thought);
    }

    /// Install or replace a named sequence.
    pub fn add_sequence(&mut self, name: impl Into<String>, stages: Vec<String>) {
        self.sequences.insert(name.into(), stages);
    }

    /// Run a named sequence over the state and run path. Stages that
    /// fail validation simply mark unsuccess; `exit` aborts at the next
    /// stage boundary; stage errors propagate.
    pub async fn run(
        &self,
        sequence: &str,
        state: &mut State,
        path: &mut Path,
    ) -> Result<(), BotError> {
        let names = self
            .sequences
            .get(sequence)
            .ok_or_else(|| BotError::UnknownSequence(sequence.to_string()))?;
        state.sequence = sequence.to_string();
        log::debug!("[thought] running {} sequence", sequence);
        for name in names {
            if state.exit {
                log::debug!("[thought] {} sequence aborted by exit", sequence);
                break;
            }
            let thought = self
                .stages
                .get(name)
                .ok_or_else(|| BotError::UnknownSequence(format!("{} stage {}", sequence, name)))?;
            thought.process(state, path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mocks::{MockMessenger, MockNlu, MockStore};
    use crate::branch::Matcher;
    use crate::config::Settings;
    use crate::message::{Room, User};
    use crate::middleware::Flow;
    use crate::nlu::NluCriteria;
    use serde_json::{json, Value};

    fn noop(_state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async { Ok(()) })
    }

    fn mark(state: &mut State, key: &str) {
        state.bot.brain.set(key, json!(true));
    }

    fn mark_soft(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async move {
            mark(state, "soft-ran");
            Ok(())
        })
    }

    fn mark_forced(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async move {
            mark(state, "forced-ran");
            Ok(())
        })
    }

    fn collect_condition(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async move {
            let mut list = state
                .bot
                .brain
                .get("captured")
                .and_then(|value| value.as_array().cloned())
                .unwrap_or_default();
            list.push(Value::String(
                state.conditions.first().cloned().unwrap_or_default(),
            ));
            state.bot.brain.set("captured", Value::Array(list));
            Ok(())
        })
    }

    fn collect_condition_and_finish(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async move {
            collect_condition(state).await?;
            state.finish();
            Ok(())
        })
    }

    fn user() -> User {
        User::new("u1").with_name("franky").in_room(Room::new("general"))
    }

    async fn run_receive(bot: Arc<Bot>, message: Message, path: &mut Path) -> State {
        let mut state = State::for_message(bot.clone(), message);
        let thoughts = Thoughts::new(bot).unwrap();
        thoughts.run("receive", &mut state, path).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_hear_failure_stops_branch_processing() {
        fn reject(_state: &mut State) -> BoxFuture<'_, Result<Flow, BotError>> {
            Box::pin(async { Ok(Flow::Done) })
        }
        let bot = Arc::new(Bot::new(Settings::new()));
        bot.register_middleware("hear", reject);
        let mut path = Path::new();
        path.text("hello", mark_soft).unwrap();

        let state = run_receive(bot.clone(), Message::text(user(), "hello"), &mut path).await;
        assert!(!state.matched);
        assert!(state.done);
        assert!(!state.processed.contains_key("hear"));
        assert!(!state.processed.contains_key("listen"));
        assert_eq!(bot.brain.get("soft-ran"), None);
    }

    #[tokio::test]
    async fn test_listen_match_restricts_understand_to_forced() {
        let mut bot = Bot::new(Settings::new());
        bot.adapters.nlu = Some(Arc::new(MockNlu {
            result: json!({ "intents": [{ "id": "greet", "score": 0.9 }] }),
        }));
        let bot = Arc::new(bot);

        let mut path = Path::new();
        path.text("hello", noop).unwrap();
        path.nlu(NluCriteria::intent("greet"), mark_soft);
        path.add(
            Stage::Understand,
            Branch::new(Matcher::Nlu(NluCriteria::intent("greet")), mark_forced).with_force(true),
        );

        let state = run_receive(bot.clone(), Message::text(user(), "hello"), &mut path).await;
        assert!(state.processed.contains_key("listen"));
        assert!(state.processed.contains_key("understand"));
        assert_eq!(bot.brain.get("forced-ran"), Some(json!(true)));
        assert_eq!(bot.brain.get("soft-ran"), None);
    }

    #[tokio::test]
    async fn test_capture_branches_collect_fragments() {
        // the first branch finishes the state, so the second only runs
        // because both are force-marked
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.add(
            Stage::Listen,
            Branch::new(
                Matcher::capture("call me", Some("please")).unwrap(),
                collect_condition_and_finish,
            )
            .with_force(true),
        );
        path.add(
            Stage::Listen,
            Branch::new(Matcher::capture("call me", None).unwrap(), collect_condition)
                .with_force(true),
        );

        let state = run_receive(
            bot.clone(),
            Message::text(user(), "Call me bb, please"),
            &mut path,
        )
        .await;
        assert!(state.matched);
        assert!(state.done);
        assert_eq!(
            bot.brain.get("captured"),
            Some(json!(["bb", "bb, please"]))
        );
    }

    #[tokio::test]
    async fn test_empty_text_walks_the_whole_sequence() {
        let mut bot = Bot::new(Settings::new());
        bot.adapters.storage = Some(Arc::new(MockStore::default()));
        let bot = Arc::new(bot);
        let mut path = Path::new();

        let state = run_receive(bot.clone(), Message::text(user(), ""), &mut path).await;
        assert!(state.processed.contains_key("hear"));
        assert!(!state.processed.contains_key("listen"));
        assert!(!state.processed.contains_key("understand"));
        assert!(!state.processed.contains_key("act"));
        assert!(!state.processed.contains_key("remember"));
        assert!(matches!(state.message, Some(Message::CatchAll { .. })));
    }

    #[tokio::test]
    async fn test_act_runs_only_when_unmatched() {
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.catch_all(mark_forced);

        let state = run_receive(bot.clone(), Message::text(user(), "anything"), &mut path).await;
        assert!(state.processed.contains_key("act"));
        assert!(state.matched);
        assert_eq!(bot.brain.get("forced-ran"), Some(json!(true)));

        // a matched run skips act entirely
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.text("anything", noop).unwrap();
        path.catch_all(mark_soft);
        let state = run_receive(bot.clone(), Message::text(user(), "anything"), &mut path).await;
        assert!(!state.processed.contains_key("act"));
        assert_eq!(bot.brain.get("soft-ran"), None);
    }

    #[tokio::test]
    async fn test_remember_requires_storage() {
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.text("hello", noop).unwrap();
        let state = run_receive(bot, Message::text(user(), "hello"), &mut path).await;
        assert!(state.matched);
        assert!(!state.processed.contains_key("remember"));
    }

    #[tokio::test]
    async fn test_remember_keeps_state_and_user() {
        let store = Arc::new(MockStore::default());
        let mut bot = Bot::new(Settings::new());
        bot.adapters.storage = Some(store.clone());
        let bot = Arc::new(bot);
        let mut path = Path::new();
        path.text("hello", noop).unwrap();

        let state = run_receive(bot.clone(), Message::text(user(), "hello"), &mut path).await;
        assert!(state.processed.contains_key("remember"));
        assert!(state.remembered.is_some());

        let kept = store.kept_in("states");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["sequence"], "receive");
        assert_eq!(kept[0]["matched"], true);
        assert!(kept[0].get("bot").is_none());
        assert_eq!(bot.brain.user("u1").unwrap().name.as_deref(), Some("franky"));
    }

    #[tokio::test]
    async fn test_done_skips_unforced_branches() {
        fn finish_now(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
            Box::pin(async move {
                state.finish();
                Ok(())
            })
        }
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.text("hello", finish_now).unwrap();
        path.text("hello", mark_soft).unwrap();

        let state = run_receive(bot.clone(), Message::text(user(), "hello there"), &mut path).await;
        assert!(state.matched);
        assert_eq!(bot.brain.get("soft-ran"), None);
    }

    #[tokio::test]
    async fn test_forced_branch_survives_done_in_same_stage() {
        fn finish_now(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
            Box::pin(async move {
                state.finish();
                Ok(())
            })
        }
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.text("hello", finish_now).unwrap();
        path.text("hello", mark_soft).unwrap();
        path.add(
            Stage::Listen,
            Branch::new(Matcher::text("hello").unwrap(), mark_forced).with_force(true),
        );

        let state = run_receive(bot.clone(), Message::text(user(), "hello there"), &mut path).await;
        assert!(state.matched);
        assert!(state.done);
        assert_eq!(bot.brain.get("soft-ran"), None);
        assert_eq!(bot.brain.get("forced-ran"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_forced_stage_runs_after_upstream_finish() {
        fn finish_now(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
            Box::pin(async move {
                state.finish();
                Ok(())
            })
        }
        let mut bot = Bot::new(Settings::new());
        bot.adapters.nlu = Some(Arc::new(MockNlu {
            result: json!({ "intents": [{ "id": "greet" }] }),
        }));
        let bot = Arc::new(bot);
        let mut path = Path::new();
        path.text("hello", finish_now).unwrap();
        path.nlu(NluCriteria::intent("greet"), mark_soft);
        path.add(
            Stage::Understand,
            Branch::new(Matcher::Nlu(NluCriteria::intent("greet")), mark_forced).with_force(true),
        );

        // listen matches and finishes; the understand stage still runs
        // its forced sub-collection
        let state = run_receive(bot.clone(), Message::text(user(), "hello"), &mut path).await;
        assert!(state.done);
        assert!(state.processed.contains_key("understand"));
        assert_eq!(bot.brain.get("forced-ran"), Some(json!(true)));
        assert_eq!(bot.brain.get("soft-ran"), None);
    }

    #[tokio::test]
    async fn test_exit_aborts_sequence() {
        fn bail(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
            Box::pin(async move {
                state.exit = true;
                Ok(())
            })
        }
        let store = Arc::new(MockStore::default());
        let mut bot = Bot::new(Settings::new());
        bot.adapters.storage = Some(store.clone());
        let bot = Arc::new(bot);
        let mut path = Path::new();
        path.text("hello", bail).unwrap();

        let state = run_receive(bot, Message::text(user(), "hello"), &mut path).await;
        assert!(state.matched);
        assert!(state.exit);
        assert!(!state.processed.contains_key("remember"));
        assert!(store.kept_in("states").is_empty());
    }

    #[tokio::test]
    async fn test_respond_without_message_adapter_is_fatal() {
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut state = State::for_message(bot.clone(), Message::text(user(), "hello"));
        state.respond_envelope().write("hi");
        let thoughts = Thoughts::new(bot).unwrap();
        let result = thoughts.run("respond", &mut state, &mut Path::new()).await;
        assert!(matches!(result, Err(BotError::AdapterMissing("message"))));
    }

    #[tokio::test]
    async fn test_respond_stamps_branch_id_and_timestamps() {
        fn reply_hi(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
            Box::pin(async move { state.respond_via("send", &["hi"]).await })
        }
        let messenger = Arc::new(MockMessenger::default());
        let mut bot = Bot::new(Settings::new());
        bot.adapters.message = Some(messenger.clone());
        let bot = Arc::new(bot);
        let mut path = Path::new();
        path.add(
            Stage::Listen,
            Branch::new(Matcher::text("hello").unwrap(), reply_hi).with_id("greeting"),
        );

        let state = run_receive(bot, Message::text(user(), "hello"), &mut path).await;
        assert!(state.processed.contains_key("respond"));
        assert!(state.responded.is_some());
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].branch_id.as_deref(), Some("greeting"));
        assert_eq!(sent[0].strings, vec!["hi"]);
        assert!(sent[0].responded.is_none(), "stamped after dispatch");
    }

    #[tokio::test]
    async fn test_understand_respects_min_length() {
        let mut settings = Settings::new();
        settings.set("nlu-min-length", json!(10));
        let mut bot = Bot::new(settings);
        bot.adapters.nlu = Some(Arc::new(MockNlu {
            result: json!({ "intents": [{ "id": "greet" }] }),
        }));
        let bot = Arc::new(bot);
        let mut path = Path::new();
        path.nlu(NluCriteria::intent("greet"), mark_forced);

        let state = run_receive(bot.clone(), Message::text(user(), "hi"), &mut path).await;
        assert!(!state.processed.contains_key("understand"));
        assert_eq!(bot.brain.get("forced-ran"), None);
    }

    #[tokio::test]
    async fn test_understand_attaches_nlu_result() {
        let mut bot = Bot::new(Settings::new());
        bot.adapters.nlu = Some(Arc::new(MockNlu {
            result: json!({ "intents": [{ "id": "greet", "score": 0.8 }] }),
        }));
        let bot = Arc::new(bot);
        let mut path = Path::new();
        path.nlu(NluCriteria::intent("greet").with_score(0.5), mark_forced);

        let state = run_receive(bot.clone(), Message::text(user(), "good morning"), &mut path).await;
        assert!(state.processed.contains_key("understand"));
        assert!(state.message.as_ref().unwrap().nlu().is_some());
        assert_eq!(bot.brain.get("forced-ran"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_serve_sequence_matches_server_data() {
        let bot = Arc::new(Bot::new(Settings::new()));
        let mut path = Path::new();
        path.server(json!({ "event": "deploy" }), mark_forced);

        let mut state = State::for_message(
            bot.clone(),
            Message::server(user(), json!({ "event": "deploy", "env": "prod" })),
        );
        let thoughts = Thoughts::new(bot.clone()).unwrap();
        thoughts.run("serve", &mut state, &mut path).await.unwrap();
        assert!(state.processed.contains_key("serve"));
        assert!(!state.processed.contains_key("act"));
        assert_eq!(bot.brain.get("forced-ran"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_unknown_sequence_rejected() {
        let bot = Arc::new(Bot::new(Settings::new()));
        let thoughts = Thoughts::new(bot.clone()).unwrap();
        let mut state = State::for_message(bot, Message::text(user(), "hi"));
        let result = thoughts.run("ponder", &mut state, &mut Path::new()).await;
        assert!(matches!(result, Err(BotError::UnknownSequence(_))));
    }

    #[tokio::test]
    async fn test_stage_events_emitted_before_validate() {
        let bot = Arc::new(Bot::new(Settings::new()));
        bot.events.on("understand", |state: &State| {
            // fires even though understand validation will fail
            assert!(state.message.is_some());
        });
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        bot.events.on("hear", move |_state| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let mut path = Path::new();
        run_receive(bot, Message::text(user(), "hello"), &mut path).await;
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
