/*!
 * Aivory Core — the monitoring agent engine.
 *
 * This crate provides the capture pipeline, the breakpoint registry,
 * and the collector transport. End users should depend on the `aivory`
 * facade crate instead, which re-exports everything and wires up the
 * panic hook.
 *
 * # Module structure
 *
 * - `protocol/` — what we send: records, envelope, constants
 * - `transport/` — how we deliver: frame codec, handshake, queue, backoff
 * - `capture/` — how a live error becomes a record: reflection, stack
 *   walking, fingerprinting, redaction, request context
 * - `breakpoint` — collector-planted capture points, rate limited
 * - `agent` — lifecycle, global state, context, routing
 *
 * # Failure policy
 *
 * Nothing in here may disturb the host application. Every public free
 * function swallows internal panics and I/O trouble; the only visible
 * side effect is a stderr line when `debug` is enabled.
 */

mod agent;
mod breakpoint;
mod config;
mod error;

pub mod capture;
pub mod protocol;
pub mod transport;

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use agent::{Agent, BeforeSend, Options};
pub use breakpoint::{BreakpointEntry, BreakpointRegistry, RateLimiter};
pub use capture::{ErrorKind, Exception, RequestSnapshot, RequestSource};
pub use config::Config;
pub use error::{AgentError, Result};
pub use protocol::constants::{AGENT_VERSION, RUNTIME, RUNTIME_VERSION};
pub use protocol::types::{
    Envelope, ExceptionRecord, Severity, SnapshotRecord, StackFrame, User, VariableNode,
};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/**
 * Activates the agent with the given config and hooks.
 *
 * Returns `Ok(true)` when this call activated the agent, `Ok(false)`
 * when one was already active (the call is then a no-op), and `Err` for
 * an invalid config.
 */
pub fn init(config: Config, options: Options) -> Result<bool> {
    Agent::init(config, options)
}

/**
 * Uninstalls the agent: emits the pending fatal record if one exists,
 * closes the transport, and clears the global. A later `init` starts
 * fresh. Safe to call when not initialized.
 */
pub fn shutdown() {
    Agent::shutdown();
}

pub fn is_initialized() -> bool {
    agent::get_agent().is_some()
}

/// Whether the transport currently holds an open link to the collector.
pub fn is_connected() -> bool {
    agent::get_agent().map(|a| a.is_connected()).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Captures
// ---------------------------------------------------------------------------

/**
 * Captures an exception with error severity, merging the optional
 * per-call context over the ambient context. Deduplicated by
 * fingerprint; silent no-op if the agent is not initialized.
 */
pub fn capture_exception(exception: &Exception, context: Option<Value>) {
    guarded(|agent| agent.capture_exception(exception, context.clone()));
}

/// Captures with an explicit severity. Used by the panic hook.
pub fn capture(exception: &Exception, severity: Severity, context: Option<Value>) {
    guarded(|agent| agent.capture(exception, severity, context.clone()));
}

/**
 * Reports an error-hook event: warnings, notices, deprecations, and
 * the fatal classes. Subject to the configured sampling rate; fatal
 * classes surface once, at shutdown.
 */
pub fn capture_error(kind: ErrorKind, message: &str) {
    guarded(|agent| agent.capture_error(kind, message));
}

/// Sends a plain informational message with a call-site backtrace.
pub fn capture_message(message: &str) {
    guarded(|agent| agent.capture_message(message));
}

/// Takes a manual snapshot of the current stack and context.
pub fn capture_snapshot(context: Option<Value>) {
    guarded(|agent| agent.capture_snapshot(context.clone()));
}

// ---------------------------------------------------------------------------
// Ambient context
// ---------------------------------------------------------------------------

/// Shallow-merges `map` into the context attached to every capture.
pub fn set_context(map: Map<String, Value>) {
    guarded(|agent| agent.set_context(map.clone()));
}

/// Replaces the user attached to every capture.
pub fn set_user(user: User) {
    guarded(|agent| agent.set_user(user.clone()));
}

// ---------------------------------------------------------------------------
// Breakpoints & host pumps
// ---------------------------------------------------------------------------

/**
 * Marks a developer-placed breakpoint. Emits a `breakpoint_hit`
 * snapshot when the collector has armed this id and the hit budget and
 * rate limit allow; otherwise a silent no-op. Execution never pauses.
 */
pub fn breakpoint(id: &str) {
    guarded(|agent| agent.breakpoint(id));
}

/// Like `breakpoint`, with explicit local values to include.
pub fn breakpoint_with_locals(id: &str, locals: Value) {
    guarded(|agent| agent.breakpoint_with_locals(id, Some(locals.clone())));
}

/// Emits one heartbeat envelope. The host chooses the cadence.
pub fn heartbeat() {
    guarded(|agent| agent.heartbeat());
}

/**
 * Drives the transport: performs a due reconnect, reads at most one
 * inbound frame, and applies any collector commands to the breakpoint
 * registry. Call this periodically.
 */
pub fn process_messages() {
    guarded(|agent| agent.process_messages());
}

// ---------------------------------------------------------------------------
// Internal: the swallow-everything wrapper
// ---------------------------------------------------------------------------

/**
 * Runs `f` against the global agent, if any, catching panics so agent
 * internals can never take the host down. Failures are only visible
 * on stderr in debug mode.
 */
fn guarded<F: Fn(&Agent)>(f: F) {
    let Some(agent) = agent::get_agent() else {
        return;
    };

    let result = catch_unwind(AssertUnwindSafe(|| f(&agent)));
    if result.is_err() && agent.config().debug {
        eprintln!("[Aivory] internal capture failure suppressed");
    }
}
