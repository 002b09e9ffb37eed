//! The bot: process-wide glue owning settings, adapter slots, the global
//! branch path, the middleware registries, the dialogue registry, the
//! brain, and the event emitter.
//!
//! Adapters feed inbound messages to [`Bot::receive`] (chat) or
//! [`Bot::serve`] (server payloads); user code dispatches outbound
//! envelopes with [`Bot::dispatch`]. Each run gets a fresh state and a
//! run-local clone of the selected path, so adds from concurrent runs
//! become visible to subsequent runs without disturbing one in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::adapters::{MessageAdapter, NluAdapter, StorageAdapter};
use crate::config::Settings;
use crate::dialogue::DialogueRegistry;
use crate::envelope::Envelope;
use crate::error::BotError;
use crate::events::EventEmitter;
use crate::memory::Brain;
use crate::message::Message;
use crate::middleware::{Flow, Middleware};
use crate::path::Path;
use crate::state::State;
use crate::thought::Thoughts;

const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5);

/// The middleware registers seeded on every bot.
pub const MIDDLEWARE_REGISTERS: &[&str] = &[
    "hear",
    "listen",
    "understand",
    "act",
    "serve",
    "respond",
    "remember",
];

/// The configured adapter slots.
#[derive(Default)]
pub struct Adapters {
    pub message: Option<Arc<dyn MessageAdapter>>,
    pub storage: Option<Arc<dyn StorageAdapter>>,
    pub nlu: Option<Arc<dyn NluAdapter>>,
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("message", &self.message.as_ref().map(|a| a.name().to_string()))
            .field("storage", &self.storage.as_ref().map(|a| a.name().to_string()))
            .field("nlu", &self.nlu.as_ref().map(|a| a.name().to_string()))
            .finish()
    }
}

/// The conversational-agent runtime.
pub struct Bot {
    pub settings: Settings,
    pub adapters: Adapters,
    pub events: EventEmitter,
    pub brain: Brain,
    path: RwLock<Path>,
    middlewares: RwLock<HashMap<String, Middleware>>,
    dialogues: DialogueRegistry,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("name", &self.settings.name())
            .field("adapters", &self.adapters)
            .finish()
    }
}

impl Bot {
    /// Create a bot with the given settings and empty middleware
    /// registers. Adapters are plugged into `adapters` before the bot is
    /// shared and started.
    pub fn new(settings: Settings) -> Self {
        let mut middlewares = HashMap::new();
        for name in MIDDLEWARE_REGISTERS {
            middlewares.insert(name.to_string(), Middleware::named(*name));
        }
        Self {
            settings,
            adapters: Adapters::default(),
            events: EventEmitter::new(),
            brain: Brain::new(),
            path: RwLock::new(Path::new()),
            middlewares: RwLock::new(middlewares),
            dialogues: DialogueRegistry::new(),
            autosave: Mutex::new(None),
        }
    }

    /// Mutate the global branch path.
    pub fn with_path<R>(&self, f: impl FnOnce(&mut Path) -> R) -> R {
        let mut path = self.path.write().unwrap();
        f(&mut path)
    }

    /// Register a middleware piece under a named register, creating the
    /// register when it does not exist yet (custom stages bring their own
    /// register names).
    pub fn register_middleware<F>(&self, name: &str, piece: F)
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<Flow, BotError>>
            + Send
            + Sync
            + 'static,
    {
        let mut middlewares = self.middlewares.write().unwrap();
        middlewares
            .entry(name.to_string())
            .or_insert_with(|| Middleware::named(name))
            .register(piece);
    }

    /// A clone of the named middleware pipeline, for stage construction.
    pub fn middleware(&self, name: &str) -> Option<Middleware> {
        self.middlewares.read().unwrap().get(name).cloned()
    }

    /// The dialogue registry.
    pub fn dialogues(&self) -> &DialogueRegistry {
        &self.dialogues
    }

    /// Whether a piece of text addresses the bot by name or alias.
    pub fn directed(&self, text: &str) -> bool {
        let trimmed = text.trim().trim_start_matches('@').to_lowercase();
        if trimmed.starts_with(&self.settings.name().to_lowercase()) {
            return true;
        }
        match self.settings.alias() {
            Some(alias) => trimmed.starts_with(&alias.to_lowercase()),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the bot: bring up storage, load memory, connect the message
    /// adapter, and spawn the auto-save loop when configured.
    pub async fn start(self: Arc<Self>) -> Result<(), BotError> {
        log::info!("[bot] {} starting", self.settings.name());
        if let Some(storage) = self.adapters.storage.clone() {
            storage.start().await.map_err(BotError::from)?;
            match storage.load_memory().await {
                Ok(snapshot) => self.brain.hydrate(snapshot),
                Err(err) => log::warn!("[bot] could not load memory: {}", err),
            }
        }
        if let Some(message) = self.adapters.message.clone() {
            message.start().await.map_err(BotError::from)?;
        }
        if self.settings.auto_save() && self.adapters.storage.is_some() {
            let bot = self.clone();
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(AUTOSAVE_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(err) = bot.save_memory().await {
                        log::warn!("[bot] auto-save failed: {}", err);
                    }
                }
            });
            *self.autosave.lock().unwrap() = Some(handle);
        }
        Ok(())
    }

    /// Shut the bot down: stop auto-saving, save memory once more, and
    /// disconnect adapters.
    pub async fn shutdown(self: Arc<Self>) -> Result<(), BotError> {
        log::info!("[bot] {} shutting down", self.settings.name());
        if let Some(handle) = self.autosave.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(message) = self.adapters.message.clone() {
            message.shutdown().await.map_err(BotError::from)?;
        }
        if let Some(storage) = self.adapters.storage.clone() {
            if let Err(err) = self.save_memory().await {
                log::warn!("[bot] could not save memory on shutdown: {}", err);
            }
            storage.shutdown().await.map_err(BotError::from)?;
        }
        Ok(())
    }

    /// Persist the brain snapshot through the storage adapter.
    pub async fn save_memory(&self) -> Result<(), BotError> {
        let storage = self
            .adapters
            .storage
            .clone()
            .ok_or(BotError::AdapterMissing("storage"))?;
        storage
            .save_memory(self.brain.export())
            .await
            .map_err(BotError::from)
    }

    /// Replace the brain contents from the storage adapter.
    pub async fn load_memory(&self) -> Result<(), BotError> {
        let storage = self
            .adapters
            .storage
            .clone()
            .ok_or(BotError::AdapterMissing("storage"))?;
        let snapshot = storage.load_memory().await.map_err(BotError::from)?;
        self.brain.hydrate(snapshot);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run the `receive` sequence over an inbound chat message.
    ///
    /// When a dialogue is engaged for the message's audience, the run
    /// processes the dialogue's path instead of the global one, and the
    /// dialogue is reverted or closed afterwards per the match outcome.
    pub async fn receive(self: Arc<Self>, message: Message) -> Result<State, BotError> {
        log::debug!("[bot] receiving message {}", message.id());
        let dialogue = self.dialogues.engaged(&message);
        let mut state = State::for_message(self.clone(), message);
        state.dialogue = dialogue.clone();
        let mut path = match &dialogue {
            Some(dialogue) => dialogue.progress_path(),
            None => self.with_path(|path| path.clone()),
        };

        let thoughts = Thoughts::new(self.clone())?;
        let outcome = thoughts.run("receive", &mut state, &mut path).await;

        if let Some(dialogue) = &dialogue {
            if !state.matched {
                dialogue.revert_path();
            } else if !dialogue.has_branches() {
                self.dialogues.close(&dialogue.audience);
            }
        }
        outcome?;
        Ok(state)
    }

    /// Run the `serve` sequence over a server/webhook payload.
    pub async fn serve(self: Arc<Self>, message: Message) -> Result<State, BotError> {
        log::debug!("[bot] serving message {}", message.id());
        let mut state = State::for_message(self.clone(), message);
        let mut path = self.with_path(|path| path.clone());
        let thoughts = Thoughts::new(self.clone())?;
        thoughts.run("serve", &mut state, &mut path).await?;
        Ok(state)
    }

    /// Run the `dispatch` sequence over an already-built envelope:
    /// deliver it, then remember the run.
    pub async fn dispatch(self: Arc<Self>, envelope: Envelope) -> Result<State, BotError> {
        log::debug!("[bot] dispatching envelope {}", envelope.id);
        let mut state = State::for_envelope(self.clone(), envelope);
        let mut path = Path::new();
        let thoughts = Thoughts::new(self.clone())?;
        thoughts.run("dispatch", &mut state, &mut path).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mocks::{MockMessenger, MockStore};
    use crate::dialogue::{Audience, Scope};
    use crate::message::{Room, User};
    use serde_json::json;

    fn noop(_state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async { Ok(()) })
    }

    fn greet(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async move { state.respond_via("send", &["hi"]).await })
    }

    fn add_two_followups(state: &mut State) -> BoxFuture<'_, Result<(), BotError>> {
        Box::pin(async move {
            if let Some(dialogue) = state.dialogue.clone() {
                dialogue.with_path(|path| {
                    path.text("confirm", noop).unwrap();
                    path.text("cancel", noop).unwrap();
                });
            }
            Ok(())
        })
    }

    fn user() -> User {
        User::new("u1").with_name("franky").in_room(Room::new("general"))
    }

    fn bot_with(
        messenger: Option<Arc<MockMessenger>>,
        store: Option<Arc<MockStore>>,
    ) -> Arc<Bot> {
        let mut bot = Bot::new(Settings::new());
        if let Some(messenger) = messenger {
            bot.adapters.message = Some(messenger);
        }
        if let Some(store) = store {
            bot.adapters.storage = Some(store);
        }
        Arc::new(bot)
    }

    #[tokio::test]
    async fn test_receive_matches_responds_and_remembers() {
        let messenger = Arc::new(MockMessenger::default());
        let store = Arc::new(MockStore::default());
        let bot = bot_with(Some(messenger.clone()), Some(store.clone()));
        bot.with_path(|path| {
            path.text("hello", greet).unwrap();
        });

        let state = bot
            .clone()
            .receive(Message::text(user(), "hello world"))
            .await
            .unwrap();

        assert!(state.matched);
        for stage in ["hear", "listen", "respond", "remember"] {
            assert!(state.processed.contains_key(stage), "missing {}", stage);
        }
        assert!(!state.processed.contains_key("act"));
        assert!(!state.processed.contains_key("understand"));

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, "send");
        assert_eq!(sent[0].room_id(), Some("general"));
        assert_eq!(sent[0].strings, vec!["hi"]);
        assert_eq!(store.kept_in("states").len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_sequence_delivers_and_remembers() {
        let messenger = Arc::new(MockMessenger::default());
        let store = Arc::new(MockStore::default());
        let bot = bot_with(Some(messenger.clone()), Some(store.clone()));

        let mut envelope = Envelope::new();
        envelope.to_room(Room::new("general")).write("announcement");
        let state = bot.dispatch(envelope).await.unwrap();

        assert!(!state.matched);
        assert!(state.processed.contains_key("respond"));
        assert!(state.processed.contains_key("remember"));
        assert_eq!(messenger.sent().len(), 1);
        assert_eq!(store.kept_in("states").len(), 1);
        assert_eq!(state.dispatched_envelopes().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unsupported_method_is_fatal() {
        let messenger = Arc::new(MockMessenger::rejecting("wave"));
        let bot = bot_with(Some(messenger), None);
        let mut envelope = Envelope::new();
        envelope.to_room(Room::new("general")).via("wave");
        let result = bot.dispatch(envelope).await;
        assert!(matches!(
            result,
            Err(BotError::Adapter(crate::error::AdapterError::MethodUnsupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_dialogue_stays_engaged_with_followups() {
        let bot = bot_with(None, None);
        let opening = Message::text(user(), "start");
        let dialogue = bot
            .dialogues()
            .open(Audience::of(Scope::Direct, &opening));
        dialogue.with_path(|path| {
            path.text("yes", add_two_followups).unwrap();
        });

        let state = bot
            .clone()
            .receive(Message::text(user(), "yes"))
            .await
            .unwrap();

        assert!(state.matched);
        let engaged = bot.dialogues().engaged(&opening).unwrap();
        assert!(Arc::ptr_eq(&engaged, &dialogue));
        assert!(dialogue.has_branches());
    }

    #[tokio::test]
    async fn test_dialogue_closes_without_followups() {
        let bot = bot_with(None, None);
        let opening = Message::text(user(), "start");
        let dialogue = bot
            .dialogues()
            .open(Audience::of(Scope::Direct, &opening));
        dialogue.with_path(|path| {
            path.text("yes", noop).unwrap();
        });

        let state = bot
            .clone()
            .receive(Message::text(user(), "yes"))
            .await
            .unwrap();

        assert!(state.matched);
        assert!(bot.dialogues().engaged(&opening).is_none());
    }

    #[tokio::test]
    async fn test_dialogue_reverts_when_unmatched() {
        let bot = bot_with(None, None);
        let opening = Message::text(user(), "start");
        let dialogue = bot
            .dialogues()
            .open(Audience::of(Scope::Direct, &opening));
        dialogue.with_path(|path| {
            path.text("yes", noop).unwrap();
        });

        let state = bot
            .clone()
            .receive(Message::text(user(), "something else"))
            .await
            .unwrap();

        assert!(!state.matched);
        assert!(dialogue.has_branches(), "previous path restored");
        assert!(bot.dialogues().engaged(&opening).is_some());
    }

    #[tokio::test]
    async fn test_dialogue_path_shadows_global_path() {
        let bot = bot_with(None, None);
        bot.with_path(|path| {
            path.text("yes", greet).unwrap();
        });
        let opening = Message::text(user(), "start");
        let dialogue = bot
            .dialogues()
            .open(Audience::of(Scope::Direct, &opening));
        dialogue.with_path(|path| {
            path.text("no", noop).unwrap();
        });

        // would match globally, but the engaged dialogue's path rules
        let state = bot
            .clone()
            .receive(Message::text(user(), "yes"))
            .await
            .unwrap();
        assert!(!state.matched);
    }

    #[tokio::test]
    async fn test_serve_uses_global_path() {
        let bot = bot_with(None, None);
        bot.with_path(|path| {
            path.server(json!({ "event": "deploy" }), noop);
        });
        let state = bot
            .serve(Message::server(user(), json!({ "event": "deploy" })))
            .await
            .unwrap();
        assert!(state.matched);
        assert!(state.processed.contains_key("serve"));
    }

    #[tokio::test]
    async fn test_start_loads_memory_and_shutdown_saves() {
        let store = Arc::new(MockStore::default());
        store
            .save_memory(json!({
                "users": { "u9": { "id": "u9", "name": "early" } },
                "counters": { "greets": 7 }
            }))
            .await
            .unwrap();

        let bot = bot_with(None, Some(store.clone()));
        bot.clone().start().await.unwrap();
        assert_eq!(bot.brain.user("u9").unwrap().name.as_deref(), Some("early"));
        assert_eq!(bot.brain.get("counters"), Some(json!({ "greets": 7 })));

        bot.brain.set("counters", json!({ "greets": 8 }));
        bot.clone().shutdown().await.unwrap();
        let saved = store.load_memory().await.unwrap();
        assert_eq!(saved["counters"], json!({ "greets": 8 }));
        assert_eq!(saved["users"]["u9"]["name"], "early");
    }

    #[tokio::test]
    async fn test_save_memory_requires_storage() {
        let bot = bot_with(None, None);
        assert!(matches!(
            bot.save_memory().await,
            Err(BotError::AdapterMissing("storage"))
        ));
    }

    #[test]
    fn test_middleware_registers_seeded() {
        let bot = Bot::new(Settings::new());
        for name in MIDDLEWARE_REGISTERS {
            assert!(bot.middleware(name).is_some(), "missing register {}", name);
        }
        assert!(bot.middleware("ponder").is_none());
    }

    #[test]
    fn test_register_middleware_creates_custom_register() {
        fn pass(_state: &mut State) -> BoxFuture<'_, Result<Flow, BotError>> {
            Box::pin(async { Ok(Flow::Next) })
        }
        let bot = Bot::new(Settings::new());
        bot.register_middleware("ponder", pass);
        assert_eq!(bot.middleware("ponder").unwrap().len(), 1);
    }

    #[test]
    fn test_directed_matches_name_and_alias() {
        let mut settings = Settings::new();
        settings.set("name", json!("franky"));
        settings.set("alias", json!("fb"));
        let bot = Bot::new(settings);
        assert!(bot.directed("franky, what time is it"));
        assert!(bot.directed("@FB hello"));
        assert!(!bot.directed("hello franky"));
    }
}
