/**
 * Sensitive-data redaction.
 *
 * Any mapping key containing one of the patterns below (case-insensitive
 * substring match) has its value replaced with the literal `"[REDACTED]"`
 * before the data leaves the process. A matched key's value is never
 * walked; everything else is descended recursively.
 */
use serde_json::{Map, Value};

/// Replacement literal the collector displays verbatim.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEY_PATTERNS: [&str; 14] = [
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "auth",
    "authorization",
    "credit_card",
    "creditcard",
    "cvv",
    "ssn",
    "private_key",
    "privatekey",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Rewrites a value tree in place.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => redact_map(map),
        Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        _ => {}
    }
}

/// Rewrites a mapping in place, replacing sensitive entries wholesale.
pub fn redact_map(map: &mut Map<String, Value>) {
    for (key, entry) in map.iter_mut() {
        if is_sensitive_key(key) {
            *entry = Value::String(REDACTED.into());
        } else {
            redact_value(entry);
        }
    }
}
