//! ID generation: random message/envelope ids and per-prefix serial counters.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use uuid::Uuid;

static COUNTERS: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Generate a 32-character random identifier.
pub fn random_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate the next serial identifier for `prefix`, formatted
/// `{prefix}_{n}`. Counters are strictly increasing per prefix for the
/// lifetime of the process.
pub fn counter(prefix: &str) -> String {
    let mut counters = COUNTERS.lock().unwrap();
    let n = counters.entry(prefix.to_string()).or_insert(0);
    *n += 1;
    format!("{}_{}", prefix, n)
}
