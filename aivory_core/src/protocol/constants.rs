/**
 * Agent-wide constants.
 *
 * These values identify the agent to the Aivory collector and carry the
 * defaults used when the environment provides no overrides.
 */

/// Runtime identifier sent in the `register` payload and in every record.
pub const RUNTIME: &str = "rust";

/// Compiler version captured at build time (see `build.rs`).
pub const RUNTIME_VERSION: &str = env!("AIVORY_RUSTC_VERSION");

/// Agent version string included in the `register` payload.
/// Derived at compile time from the `aivory_core` package version.
pub const AGENT_VERSION: &str = concat!("aivory-rust/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Outbound envelope types.
pub const MSG_REGISTER: &str = "register";
pub const MSG_EXCEPTION: &str = "exception";
pub const MSG_SNAPSHOT: &str = "snapshot";
pub const MSG_BREAKPOINT_HIT: &str = "breakpoint_hit";
pub const MSG_HEARTBEAT: &str = "heartbeat";

/// Inbound envelope types.
pub const MSG_REGISTERED: &str = "registered";
pub const MSG_ERROR: &str = "error";
pub const MSG_SET_BREAKPOINT: &str = "set_breakpoint";
pub const MSG_REMOVE_BREAKPOINT: &str = "remove_breakpoint";

// ---------------------------------------------------------------------------
// Configuration defaults
// ---------------------------------------------------------------------------

/// Default collector endpoint.
pub const DEFAULT_BACKEND_URL: &str = "wss://api.aivory.net/ws/monitor/agent";

/// Default environment label.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Default error-hook sampling rate (keep everything).
pub const DEFAULT_SAMPLING_RATE: f64 = 1.0;

/// Default variable-tree depth bound.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

/// Default heartbeat cadence hint, in milliseconds. The host drives the
/// actual timing; this value is reported to the collector at registration.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default cap on reconnect attempts before the transport stays down.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
