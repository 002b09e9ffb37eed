//! Runtime settings: a small store of recognised options fed from
//! defaults, prefixed environment variables, and a JSON config block.
//!
//! Only the recognised keys are retained; anything else is dropped with a
//! debug log. Config *file* loading is the embedder's concern.

use std::collections::HashMap;

use log::LevelFilter;
use serde_json::Value;

/// Environment variable prefix, e.g. `CONFAB_NAME` supplies `name`.
pub const ENV_PREFIX: &str = "CONFAB_";

/// The option names the runtime recognises.
pub const RECOGNISED: &[&str] = &[
    "name",
    "alias",
    "log-level",
    "auto-save",
    "message-adapter",
    "nlu-adapter",
    "storage-adapter",
    "webhook-adapter",
    "analytics-adapter",
    "nlu-min-length",
];

/// Normalise an option name to the hyphen-case form used as store key.
fn normalise(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

/// Parse an environment value: booleans and numbers become typed values,
/// everything else stays a string.
fn parse_env_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(raw.to_string()),
        },
    }
}

/// Settings store holding only recognised options.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, Value>,
}

impl Settings {
    /// Create an empty settings store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a settings store populated from `CONFAB_`-prefixed
    /// environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                settings.set(&normalise(stripped), parse_env_value(&value));
            }
        }
        settings
    }

    /// Merge a JSON object block into the store. Later wins.
    pub fn apply_json(&mut self, block: &Value) {
        if let Value::Object(map) = block {
            for (key, value) in map {
                self.set(&normalise(key), value.clone());
            }
        }
    }

    /// Set a single option. Unrecognised names are dropped.
    pub fn set(&mut self, key: &str, value: Value) {
        let key = normalise(key);
        if RECOGNISED.contains(&key.as_str()) {
            self.values.insert(key, value);
        } else {
            log::debug!("[settings] dropping unrecognised option {}", key);
        }
    }

    /// Raw access to a stored option.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&normalise(key))
    }

    /// The bot's name. Defaults to `"bot"`.
    pub fn name(&self) -> String {
        self.get("name")
            .and_then(Value::as_str)
            .unwrap_or("bot")
            .to_string()
    }

    /// Optional alternate name the bot answers to.
    pub fn alias(&self) -> Option<String> {
        self.get("alias").and_then(Value::as_str).map(String::from)
    }

    /// The configured log level, for the embedder to install in its
    /// logger implementation. Defaults to `Info`.
    pub fn log_level(&self) -> LevelFilter {
        match self
            .get("log-level")
            .and_then(Value::as_str)
            .unwrap_or("info")
        {
            "off" | "silent" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }

    /// Whether memory auto-save is enabled. Defaults to false.
    pub fn auto_save(&self) -> bool {
        self.get("auto-save").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Minimum text length before the NLU adapter is consulted.
    pub fn nlu_min_length(&self) -> Option<usize> {
        self.get("nlu-min-length")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }
}
