//! Branches: matcher + callback bundles installed on a path.
//!
//! Matching a branch mutates the run state (`matched`, `branch`,
//! `conditions`) and then runs the branch callback under the stage's
//! middleware. A short-circuited pipeline leaves the match recorded but
//! the callback unrun.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::BotError;
use crate::id;
use crate::message::Message;
use crate::middleware::{Callback, Middleware};
use crate::nlu::NluCriteria;
use crate::state::State;

static TRAILING_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,.;:!?]+$").unwrap());

/// A user predicate matcher returning optional captured fragments.
pub type CustomMatcher = Arc<dyn Fn(&Message) -> Option<Vec<String>> + Send + Sync>;

/// How a branch decides whether a message is for it.
///
/// `evaluate` returns `None` for no match, or the captured fragments that
/// become the state's `conditions`.
#[derive(Clone)]
pub enum Matcher {
    /// Regex over the message text. Captures are the regex groups, or the
    /// full match when the pattern has none.
    Text(Regex),
    /// Capture the substring following `after`, optionally ending before
    /// `before`. Case-insensitive.
    Capture { regex: Regex },
    /// Shallow key/value equality against server data or rich payloads.
    Keys(Value),
    /// Match against the attached NLU result.
    Nlu(NluCriteria),
    /// The user entered a room.
    Enter,
    /// The user left a room.
    Leave,
    /// Nothing else matched and the message was wrapped for the act stage.
    CatchAll,
    /// User-supplied predicate.
    Custom(CustomMatcher),
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Text(re) => write!(f, "Text({})", re.as_str()),
            Matcher::Capture { regex } => write!(f, "Capture({})", regex.as_str()),
            Matcher::Keys(keys) => write!(f, "Keys({})", keys),
            Matcher::Nlu(criteria) => write!(f, "Nlu({:?})", criteria),
            Matcher::Enter => write!(f, "Enter"),
            Matcher::Leave => write!(f, "Leave"),
            Matcher::CatchAll => write!(f, "CatchAll"),
            Matcher::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl Matcher {
    /// Case-insensitive regex matcher over message text.
    pub fn text(pattern: &str) -> Result<Self, BotError> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Matcher::Text(regex))
    }

    /// Capture directive: the fragment following `after`, up to `before`
    /// when given (separator punctuation excluded), otherwise to the end
    /// of the text.
    pub fn capture(after: &str, before: Option<&str>) -> Result<Self, BotError> {
        let pattern = match before {
            Some(before) => format!(
                r"{}\s*(.*?)[\s,.;:!?]*{}",
                regex::escape(after),
                regex::escape(before)
            ),
            None => format!(r"{}\s*(.*)$", regex::escape(after)),
        };
        let regex = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
        Ok(Matcher::Capture { regex })
    }

    /// Shallow equality matcher over server data / rich payload keys.
    pub fn keys(keys: Value) -> Self {
        Matcher::Keys(keys)
    }

    /// Custom predicate matcher.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Message) -> Option<Vec<String>> + Send + Sync + 'static,
    {
        Matcher::Custom(Arc::new(predicate))
    }

    /// Evaluate against a message. `None` means no match.
    pub fn evaluate(&self, message: &Message) -> Option<Vec<String>> {
        match self {
            Matcher::Text(regex) => {
                let text = message.text_content()?;
                let captures = regex.captures(text)?;
                let groups: Vec<String> = captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().to_string())
                    .collect();
                if groups.is_empty() {
                    Some(vec![captures.get(0)?.as_str().to_string()])
                } else {
                    Some(groups)
                }
            }
            Matcher::Capture { regex } => {
                let text = message.text_content()?;
                let captures = regex.captures(text)?;
                let fragment = captures.get(1)?.as_str();
                let fragment = TRAILING_SEPARATORS.replace(fragment, "");
                Some(vec![fragment.to_string()])
            }
            Matcher::Keys(keys) => {
                let data = message.server_data()?;
                let wanted = keys.as_object()?;
                let all_equal = wanted.iter().all(|(key, value)| data.get(key) == Some(value));
                if all_equal {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            Matcher::Nlu(criteria) => {
                if message.nlu()?.matches(criteria) {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            Matcher::Enter => matches!(message, Message::Enter { .. }).then(Vec::new),
            Matcher::Leave => matches!(message, Message::Leave { .. }).then(Vec::new),
            Matcher::CatchAll => matches!(message, Message::CatchAll { .. }).then(Vec::new),
            Matcher::Custom(predicate) => predicate(message),
        }
    }
}

/// A matcher + callback bundle.
#[derive(Clone)]
pub struct Branch {
    pub id: String,
    pub matcher: Matcher,
    pub callback: Callback,
    /// Forced branches survive the promotion into a forced sub-collection
    /// and still run while `done` is set.
    pub force: bool,
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("id", &self.id)
            .field("matcher", &self.matcher)
            .field("force", &self.force)
            .finish()
    }
}

impl Branch {
    /// Create a branch with a counter-minted id.
    pub fn new<F>(matcher: Matcher, callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<(), BotError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id::counter("branch"),
            matcher,
            callback: Arc::new(callback),
            force: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Evaluate the matcher and, on a match, record it on the state and
    /// run the callback under the stage middleware. Returns whether this
    /// branch matched.
    pub async fn process(
        self: Arc<Self>,
        state: &mut State,
        middleware: &Middleware,
    ) -> Result<bool, BotError> {
        if state.done && !self.force {
            return Ok(false);
        }
        let message = match &state.message {
            Some(message) => message,
            None => return Ok(false),
        };
        let captures = match self.matcher.evaluate(message) {
            Some(captures) => captures,
            None => return Ok(false),
        };

        log::debug!("[branch] {} matched", self.id);
        state.matched = true;
        state.conditions = captures;
        state.branch = Some(self.clone());

        let callback = self.callback.clone();
        middleware.execute(state, &callback).await?;
        Ok(true)
    }
}
