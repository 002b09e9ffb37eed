//! Natural-language-understanding result normalisation.
//!
//! Provider payloads vary wildly; the raw mapping returned by an NLU
//! adapter is normalised into [`NluResult`] so branches can match against
//! intents, entities, language, sentiment and friends with one uniform
//! predicate, independent of the provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element of an NLU attribute set, e.g. a single detected intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NluItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl NluItem {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self {
                id: Some(s.clone()),
                ..Default::default()
            }),
            Value::Object(map) => {
                let item = Self {
                    id: map.get("id").and_then(Value::as_str).map(String::from),
                    name: map
                        .get("name")
                        .or_else(|| map.get("value"))
                        .and_then(Value::as_str)
                        .map(String::from),
                    score: map
                        .get("score")
                        .or_else(|| map.get("confidence"))
                        .and_then(Value::as_f64),
                };
                if item.id.is_none() && item.name.is_none() && item.score.is_none() {
                    None
                } else {
                    Some(item)
                }
            }
            _ => None,
        }
    }
}

/// The items detected for one attribute (all intents, all entities, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NluResultSet(pub Vec<NluItem>);

impl NluResultSet {
    /// Does any item satisfy every constraint of the criteria?
    pub fn matches(&self, criteria: &NluCriteria) -> bool {
        self.0.iter().any(|item| {
            if let Some(ref id) = criteria.id {
                if item.id.as_deref() != Some(id.as_str()) {
                    return false;
                }
            }
            if let Some(ref name) = criteria.name {
                if item.name.as_deref() != Some(name.as_str()) {
                    return false;
                }
            }
            if let Some(min) = criteria.score_gte {
                match item.score {
                    Some(score) if score >= min => {}
                    _ => return false,
                }
            }
            true
        })
    }
}

/// Normalised NLU result: attribute name → detected items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NluResult {
    #[serde(flatten)]
    pub attributes: HashMap<String, NluResultSet>,
}

impl NluResult {
    /// Normalise a raw provider payload. Returns `None` for an empty
    /// mapping, which the understand stage treats as "no result".
    pub fn from_value(raw: &Value) -> Option<Self> {
        let map = raw.as_object()?;
        if map.is_empty() {
            return None;
        }
        let mut attributes = HashMap::new();
        for (attribute, value) in map {
            let items: Vec<NluItem> = match value {
                Value::Array(values) => values.iter().filter_map(NluItem::from_value).collect(),
                other => NluItem::from_value(other).into_iter().collect(),
            };
            attributes.insert(attribute.clone(), NluResultSet(items));
        }
        if attributes.values().all(|set| set.0.is_empty()) {
            return None;
        }
        Some(Self { attributes })
    }

    /// The item set for one attribute, if the provider reported it.
    pub fn get(&self, attribute: &str) -> Option<&NluResultSet> {
        self.attributes.get(attribute)
    }

    /// Uniform match predicate over the criteria's attribute.
    pub fn matches(&self, criteria: &NluCriteria) -> bool {
        self.get(&criteria.attribute)
            .map(|set| set.matches(criteria))
            .unwrap_or(false)
    }
}

/// Constraints an NLU branch matches against.
///
/// Every populated field must hold on a single item of the targeted
/// attribute set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NluCriteria {
    pub attribute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_gte: Option<f64>,
}

impl NluCriteria {
    /// Match an intent by id.
    pub fn intent(id: impl Into<String>) -> Self {
        Self {
            attribute: "intents".into(),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Match an entity by name.
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            attribute: "entities".into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Match any attribute by id.
    pub fn attribute(attribute: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Require a minimum score on the matched item.
    pub fn with_score(mut self, min: f64) -> Self {
        self.score_gte = Some(min);
        self
    }
}
