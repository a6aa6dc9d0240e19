/**
 * Remote breakpoints — non-breaking capture points the collector plants
 * in the host's code.
 *
 * The registry maps breakpoint ids to entries carrying a location, an
 * optional condition, and a hit budget. `hit()` gates on existence,
 * budget, and the sliding-window rate limiter, then hands back a ticket
 * the agent turns into a `breakpoint_hit` snapshot. Captures never
 * suspend execution.
 *
 * Conditions are carried verbatim and surfaced to the collector but
 * never evaluated here; the host must not execute untrusted code.
 */
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Per-entry hit budget ceiling; `set` commands are clamped to it.
pub const MAX_HITS_CEILING: u32 = 50;

/// Breakpoint captures allowed per sliding 1-second window, across all
/// entries.
pub const CAPTURES_PER_SECOND: u32 = 50;

// ---------------------------------------------------------------------------
// BreakpointEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakpointEntry {
    pub id: String,
    pub file_path: String,
    pub line_number: u32,
    /// Opaque gating label owned by the collector; never evaluated.
    pub condition: Option<String>,
    pub max_hits: u32,
    pub hit_count: u32,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// What `hit()` hands back when a capture is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitTicket {
    pub file_path: String,
    pub line_number: u32,
    pub hit_count: u32,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Token bucket over a sliding 1-second window.
#[derive(Debug)]
pub struct RateLimiter {
    cap: u32,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Consumes one token if the window has budget left.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }

        if self.count >= self.cap {
            return false;
        }

        self.count += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// BreakpointRegistry
// ---------------------------------------------------------------------------

pub struct BreakpointRegistry {
    entries: HashMap<String, BreakpointEntry>,
    limiter: RateLimiter,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            limiter: RateLimiter::new(CAPTURES_PER_SECOND),
        }
    }

    /**
     * Creates or replaces an entry. Replacing resets the hit count; the
     * budget is clamped into `[1, 50]`.
     */
    pub fn set(
        &mut self,
        id: impl Into<String>,
        file_path: impl Into<String>,
        line_number: u32,
        condition: Option<String>,
        max_hits: u32,
    ) {
        let id = id.into();
        let entry = BreakpointEntry {
            id: id.clone(),
            file_path: file_path.into(),
            line_number,
            condition,
            max_hits: max_hits.clamp(1, MAX_HITS_CEILING),
            hit_count: 0,
            created_at: epoch_millis(),
        };
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&BreakpointEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /**
     * Records a hit if the entry exists, has budget, and the limiter
     * allows another capture this window. Returns the capture ticket,
     * or `None` when any gate declines (silent no-op for the host).
     */
    pub fn hit(&mut self, id: &str) -> Option<HitTicket> {
        let entry = self.entries.get_mut(id)?;

        if entry.hit_count >= entry.max_hits {
            return None;
        }

        if !self.limiter.allow() {
            return None;
        }

        entry.hit_count += 1;
        Some(HitTicket {
            file_path: entry.file_path.clone(),
            line_number: entry.line_number,
            hit_count: entry.hit_count,
        })
    }

    /**
     * Dispatches a control command from the collector. Payloads from
     * older collectors spell the location keys `file`/`line`; both
     * spellings are accepted. Malformed payloads are ignored.
     */
    pub fn handle_command(&mut self, command: &str, payload: &Value) {
        match command {
            "set_breakpoint" | "set" => {
                let Some(id) = payload.get("id").and_then(Value::as_str) else {
                    return;
                };
                let Some(file_path) = string_field(payload, &["file_path", "file"]) else {
                    return;
                };
                let line_number =
                    int_field(payload, &["line_number", "line"]).unwrap_or(0) as u32;
                let condition = payload
                    .get("condition")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let max_hits = int_field(payload, &["max_hits"]).unwrap_or(1) as u32;

                self.set(id, file_path, line_number, condition, max_hits);
            }

            "remove_breakpoint" | "remove" => {
                if let Some(id) = payload.get("id").and_then(Value::as_str) {
                    self.remove(id);
                }
            }

            _ => {}
        }
    }
}

fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn int_field(payload: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| payload.get(*key).and_then(Value::as_u64))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /**
     * Hits against an unknown id are silent no-ops.
     */
    #[test]
    fn test_hit_unknown_id() {
        let mut registry = BreakpointRegistry::new();
        assert!(registry.hit("X").is_none());
    }

    /**
     * A two-hit budget yields exactly two tickets, counting 1 then 2.
     */
    #[test]
    fn test_hit_budget() {
        let mut registry = BreakpointRegistry::new();
        registry.set("X", "f", 7, None, 2);

        assert_eq!(registry.hit("X").unwrap().hit_count, 1);
        assert_eq!(registry.hit("X").unwrap().hit_count, 2);
        assert!(registry.hit("X").is_none());
        assert!(registry.hit("X").is_none());
    }

    /**
     * Budgets clamp into [1, 50] and replacing an entry resets the count.
     */
    #[test]
    fn test_set_clamps_and_replaces() {
        let mut registry = BreakpointRegistry::new();

        registry.set("X", "f", 7, None, 0);
        assert_eq!(registry.get("X").unwrap().max_hits, 1);

        registry.set("X", "f", 7, None, 500);
        assert_eq!(registry.get("X").unwrap().max_hits, MAX_HITS_CEILING);

        registry.hit("X");
        registry.set("X", "g", 8, None, 3);
        let entry = registry.get("X").unwrap();
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.file_path, "g");
    }

    /**
     * The limiter caps captures inside one window and resets with time.
     */
    #[test]
    fn test_rate_limiter_window() {
        let mut limiter = RateLimiter::new(3);

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        /* rewind the window instead of sleeping */
        limiter.window_start = Instant::now() - Duration::from_secs(2);
        assert!(limiter.allow());
    }

    /**
     * The registry-wide limiter gates hits across entries.
     */
    #[test]
    fn test_registry_rate_limit() {
        let mut registry = BreakpointRegistry::new();
        registry.set("X", "f", 1, None, 50);
        registry.set("Y", "g", 2, None, 50);

        let mut allowed = 0;
        for _ in 0..40 {
            if registry.hit("X").is_some() {
                allowed += 1;
            }
            if registry.hit("Y").is_some() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, CAPTURES_PER_SECOND);
    }

    /**
     * Commands dispatch set/remove and tolerate the alternate payload
     * key spellings.
     */
    #[test]
    fn test_handle_command() {
        let mut registry = BreakpointRegistry::new();

        registry.handle_command(
            "set_breakpoint",
            &json!({"id": "X", "file_path": "f", "line_number": 7, "max_hits": 2}),
        );
        let entry = registry.get("X").unwrap();
        assert_eq!(entry.file_path, "f");
        assert_eq!(entry.line_number, 7);
        assert_eq!(entry.max_hits, 2);

        registry.handle_command(
            "set_breakpoint",
            &json!({"id": "Y", "file": "g", "line": 9, "condition": "order.total > 100"}),
        );
        let entry = registry.get("Y").unwrap();
        assert_eq!(entry.file_path, "g");
        assert_eq!(entry.line_number, 9);
        assert_eq!(entry.condition.as_deref(), Some("order.total > 100"));
        assert_eq!(entry.max_hits, 1);

        registry.handle_command("remove_breakpoint", &json!({"id": "X"}));
        assert!(registry.get("X").is_none());

        /* malformed and unknown commands are ignored */
        registry.handle_command("set_breakpoint", &json!({"file": "f"}));
        registry.handle_command("resize", &json!({}));
        assert_eq!(registry.len(), 1);
    }
}
