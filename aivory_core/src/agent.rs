/**
 * The agent — process-wide orchestrator that owns the config, the
 * capture pipeline, the breakpoint registry, and the transport.
 *
 * Lifecycle:
 * 1. The facade calls `Agent::init(config, options)`, which validates
 *    the config, builds the subsystems, opens the transport, and stores
 *    the agent in a global slot.
 * 2. The public free functions in `lib.rs` read the global and delegate.
 * 3. `Agent::shutdown()` emits the pending fatal record (if any),
 *    closes the socket, and clears the slot, so a later `init` is legal.
 *
 * The global is an `RwLock<Option<Arc<Agent>>>` rather than a
 * `OnceLock` precisely because shutdown must clear it.
 */
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};

use crate::breakpoint::BreakpointRegistry;
use crate::capture::exception::{ErrorKind, Exception, ExceptionCapture};
use crate::capture::redact::redact_map;
use crate::capture::request::{EnvRequestSource, RequestSource};
use crate::capture::stack::{collect_raw_frames, StackWalker, BREAKPOINT_SKIP_FRAMES};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::constants::{
    MSG_BREAKPOINT_HIT, MSG_EXCEPTION, MSG_REMOVE_BREAKPOINT, MSG_SET_BREAKPOINT, MSG_SNAPSHOT,
};
use crate::protocol::types::{ExceptionRecord, Severity, SnapshotRecord, User};
use crate::transport::{epoch_millis, ControlEvent, Transport};

// ---------------------------------------------------------------------------
// Global singleton
// ---------------------------------------------------------------------------

static GLOBAL_AGENT: RwLock<Option<Arc<Agent>>> = RwLock::new(None);

/// The initialized agent, or `None` before `init` / after `shutdown`.
pub fn get_agent() -> Option<Arc<Agent>> {
    GLOBAL_AGENT.read().ok().and_then(|slot| slot.clone())
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Callback invoked before each exception record is handed to the
/// transport. Return `None` to drop the record.
pub type BeforeSend = Arc<dyn Fn(ExceptionRecord) -> Option<ExceptionRecord> + Send + Sync>;

/**
 * Engine-level hooks, passed through `init` by the facade.
 *
 * `before_send` mirrors the usual SDK filter: it receives the built
 * record and may modify or drop it. If the callback panics, the
 * original record is sent unchanged and a warning is logged in debug
 * mode.
 */
#[derive(Default)]
pub struct Options {
    pub before_send: Option<BeforeSend>,

    /// Supplies per-request state; defaults to the CGI-environment probe.
    pub request_source: Option<Arc<dyn RequestSource>>,
}

// ---------------------------------------------------------------------------
// Ambient context
// ---------------------------------------------------------------------------

/// Mutable state merged into every capture: `set_context` accumulates,
/// `set_user` replaces.
#[derive(Default)]
struct AmbientContext {
    custom: Map<String, Value>,
    user: Option<User>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    config: Arc<Config>,
    hostname: String,
    exceptions: ExceptionCapture,
    registry: Mutex<BreakpointRegistry>,
    transport: Mutex<Transport>,
    context: RwLock<AmbientContext>,
    before_send: Option<BeforeSend>,
}

impl Agent {
    /**
     * Validates the config and activates the agent.
     *
     * Idempotent: when an agent is already active the call warns (in
     * debug mode) and returns `Ok(false)` without touching anything.
     * Returns `Ok(true)` when this call activated the agent.
     */
    pub fn init(config: Config, options: Options) -> Result<bool> {
        config.validate()?;

        let mut slot = match GLOBAL_AGENT.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };

        if slot.is_some() {
            if config.debug {
                eprintln!("[Aivory] already initialized; init ignored");
            }
            return Ok(false);
        }

        let agent = Arc::new(Agent::build(config, options));

        /*
         * Best-effort first connect: a failure schedules the retry and
         * the outbound queue buffers in the meantime.
         */
        if let Ok(mut transport) = agent.transport.lock() {
            let _ = transport.connect();
        }

        *slot = Some(agent);
        Ok(true)
    }

    fn build(config: Config, options: Options) -> Self {
        let config = Arc::new(config);
        let hostname = local_hostname();
        let agent_id = make_agent_id(&hostname);

        let request_source: Arc<dyn RequestSource> = options
            .request_source
            .unwrap_or_else(|| Arc::new(EnvRequestSource));

        Self {
            exceptions: ExceptionCapture::new(config.clone(), request_source),
            registry: Mutex::new(BreakpointRegistry::new()),
            transport: Mutex::new(Transport::new(config.clone(), agent_id, hostname.clone())),
            context: RwLock::new(AmbientContext::default()),
            before_send: options.before_send,
            hostname,
            config,
        }
    }

    /**
     * Emits the pending fatal record (if any), disconnects, and clears
     * the global slot. Never blocks beyond a socket close.
     */
    pub fn shutdown() {
        let agent = match GLOBAL_AGENT.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let Some(agent) = agent else { return };

        if let Some(fatal) = agent.exceptions.take_last_fatal() {
            if let Some(record) = agent.exceptions.capture(&fatal, Severity::Critical, None) {
                agent.send_exception_record(record);
            }
        }

        if let Ok(mut registry) = agent.registry.lock() {
            registry.clear();
        }
        if let Ok(mut transport) = agent.transport.lock() {
            transport.disconnect();
        };
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Captures
    // -----------------------------------------------------------------------

    /// Captures with an explicit severity. The workhorse behind
    /// `capture_exception` and the panic hook.
    pub fn capture(&self, exception: &Exception, severity: Severity, context: Option<Value>) {
        let merged = self.merged_context(context);
        if let Some(record) = self.exceptions.capture(exception, severity, merged) {
            self.send_exception_record(record);
        }
    }

    pub fn capture_exception(&self, exception: &Exception, context: Option<Value>) {
        self.capture(exception, Severity::Error, context);
    }

    /// Error-hook entry point; sampling and severity mapping live in
    /// the capture pipeline.
    pub fn capture_error(&self, kind: ErrorKind, message: &str) {
        if let Some(record) = self.exceptions.capture_error(kind, message) {
            self.send_exception_record(record);
        }
    }

    /// Info-severity capture of a plain message with a call-site stack.
    pub fn capture_message(&self, message: &str) {
        let exception = Exception::new("message", message);
        self.capture(&exception, Severity::Info, None);
    }

    /// Manual point-in-time snapshot: current stack plus context, no
    /// exception involved.
    pub fn capture_snapshot(&self, context: Option<Value>) {
        let raw = collect_raw_frames();
        let walker = StackWalker::new(self.exceptions.reflector());
        let stack_trace = walker.walk(&raw);

        let (file_path, line_number) = stack_trace
            .first()
            .map(|f| (f.file_path.clone(), f.line_number))
            .unwrap_or((None, 0));

        let record = SnapshotRecord {
            breakpoint_id: None,
            exception_id: None,
            captured_at: epoch_millis(),
            file_path,
            line_number,
            stack_trace,
            local_variables: None,
            request_context: self.merged_context(context),
            hit_count: None,
        };

        self.send_snapshot_record(MSG_SNAPSHOT, record);
    }

    // -----------------------------------------------------------------------
    // Ambient context
    // -----------------------------------------------------------------------

    /// Shallow-merges `map` into the custom context.
    pub fn set_context(&self, map: Map<String, Value>) {
        if let Ok(mut context) = self.context.write() {
            for (key, value) in map {
                context.custom.insert(key, value);
            }
        }
    }

    /// Replaces the current user.
    pub fn set_user(&self, user: User) {
        if let Ok(mut context) = self.context.write() {
            context.user = Some(user);
        }
    }

    /**
     * Builds the merged capture context: custom context first, the
     * per-call context shallow-merged over it, then the user. Redaction
     * happens downstream, right before the data enters a record.
     */
    fn merged_context(&self, call_context: Option<Value>) -> Option<Value> {
        let mut merged = self
            .context
            .read()
            .map(|c| c.custom.clone())
            .unwrap_or_default();

        match call_context {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    merged.insert(key, value);
                }
            }
            Some(other) => {
                merged.insert("context".into(), other);
            }
            None => {}
        }

        if let Ok(context) = self.context.read() {
            if let Some(user) = &context.user {
                if let Ok(user_value) = serde_json::to_value(user) {
                    merged.insert("user".into(), user_value);
                }
            }
        }

        if merged.is_empty() {
            None
        } else {
            Some(Value::Object(merged))
        }
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    /// Developer-placed capture point: `aivory::breakpoint("checkout")`.
    pub fn breakpoint(&self, id: &str) {
        self.breakpoint_with_locals(id, None);
    }

    /**
     * A breakpoint hit with explicit locals (the runtime cannot see the
     * caller's variables on its own). Gated by the registry: unknown
     * ids, spent budgets, and the rate limiter are all silent no-ops.
     */
    pub fn breakpoint_with_locals(&self, id: &str, locals: Option<Value>) {
        if !self.config.enable_breakpoints {
            return;
        }

        let ticket = match self.registry.lock() {
            Ok(mut registry) => registry.hit(id),
            Err(_) => None,
        };
        let Some(ticket) = ticket else { return };

        let raw = collect_raw_frames();
        let walker = StackWalker::new(self.exceptions.reflector());
        let stack_trace = walker.walk_skipping(&raw, BREAKPOINT_SKIP_FRAMES);
        let local_variables = locals.as_ref().and_then(|l| walker.reflect_arguments(l));

        let record = SnapshotRecord {
            breakpoint_id: Some(id.to_string()),
            exception_id: None,
            captured_at: epoch_millis(),
            file_path: Some(ticket.file_path),
            line_number: ticket.line_number,
            stack_trace,
            local_variables,
            request_context: self.merged_context(None),
            hit_count: Some(ticket.hit_count),
        };

        self.send_snapshot_record(MSG_BREAKPOINT_HIT, record);
    }

    // -----------------------------------------------------------------------
    // Host-driven pumps
    // -----------------------------------------------------------------------

    pub fn heartbeat(&self) {
        if let Ok(mut transport) = self.transport.lock() {
            transport.send_heartbeat();
        }
    }

    /// One transport pump step plus dispatch of any control commands to
    /// the breakpoint registry.
    pub fn process_messages(&self) {
        let events = match self.transport.lock() {
            Ok(mut transport) => transport.process_messages(),
            Err(_) => return,
        };

        if events.is_empty() || !self.config.enable_breakpoints {
            return;
        }

        if let Ok(mut registry) = self.registry.lock() {
            for event in events {
                match event {
                    ControlEvent::SetBreakpoint(payload) => {
                        registry.handle_command(MSG_SET_BREAKPOINT, &payload)
                    }
                    ControlEvent::RemoveBreakpoint(payload) => {
                        registry.handle_command(MSG_REMOVE_BREAKPOINT, &payload)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Record hand-off
    // -----------------------------------------------------------------------

    fn send_exception_record(&self, record: ExceptionRecord) {
        let record = match &self.before_send {
            Some(callback) => {
                let original = record.clone();
                match catch_unwind(AssertUnwindSafe(|| callback(record))) {
                    Ok(None) => return,
                    Ok(Some(modified)) => modified,
                    Err(_) => {
                        if self.config.debug {
                            eprintln!("[Aivory] before_send panicked; sending original record");
                        }
                        original
                    }
                }
            }
            None => record,
        };

        let Ok(Value::Object(mut payload)) = serde_json::to_value(&record) else {
            return;
        };

        if let Ok(mut transport) = self.transport.lock() {
            /* exception payloads additionally carry the agent identity */
            payload.insert("agent_id".into(), transport.agent_id().into());
            payload.insert(
                "environment".into(),
                self.config.environment.clone().into(),
            );
            payload.insert("hostname".into(), self.hostname.clone().into());
            transport.send(MSG_EXCEPTION, Value::Object(payload));
        }
    }

    fn send_snapshot_record(&self, msg_type: &str, mut record: SnapshotRecord) {
        if let Some(Value::Object(map)) = record.request_context.as_mut() {
            redact_map(map);
        }

        let Ok(Value::Object(mut payload)) = serde_json::to_value(&record) else {
            return;
        };

        if let Ok(mut transport) = self.transport.lock() {
            payload.insert("agent_id".into(), transport.agent_id().into());
            transport.send(msg_type, Value::Object(payload));
        }
    }
}

// ---------------------------------------------------------------------------
// Identity helpers
// ---------------------------------------------------------------------------

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `<hostname>-<8 hex>-<pid>`; the collector may rename us at
/// registration.
fn make_agent_id(hostname: &str) -> String {
    format!(
        "{hostname}-{:08x}-{}",
        rand::random::<u32>(),
        std::process::id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> Config {
        Config {
            api_key: "k".into(),
            /* a port nothing listens on, so connects fail fast */
            backend_url: "ws://127.0.0.1:9".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_agent_id_format() {
        let id = make_agent_id("web-1");
        let rest = id.strip_prefix("web-1-").unwrap();
        let (hex, pid) = rest.split_once('-').unwrap();

        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(pid, std::process::id().to_string());
    }

    /**
     * Context merging: call context shadows custom context, and the
     * user rides under its own key.
     */
    #[test]
    fn test_merged_context() {
        let agent = Agent::build(offline_config(), Options::default());

        let mut custom = Map::new();
        custom.insert("region".into(), "eu".into());
        custom.insert("tier".into(), "free".into());
        agent.set_context(custom);

        agent.set_user(User {
            id: Some("u1".into()),
            ..User::default()
        });

        let merged = agent
            .merged_context(Some(serde_json::json!({"tier": "paid"})))
            .unwrap();

        assert_eq!(merged["region"], "eu");
        assert_eq!(merged["tier"], "paid");
        assert_eq!(merged["user"]["id"], "u1");
    }

    #[test]
    fn test_merged_context_empty_is_none() {
        let agent = Agent::build(offline_config(), Options::default());
        assert!(agent.merged_context(None).is_none());
    }

    /**
     * Lifecycle: init activates once, a second init is a warning no-op,
     * and shutdown clears the slot so init works again.
     *
     * One test owns the global slot to keep the suite race-free.
     */
    #[test]
    fn test_init_is_idempotent_and_shutdown_clears() {
        assert!(get_agent().is_none());

        assert!(Agent::init(offline_config(), Options::default()).unwrap());
        assert!(get_agent().is_some());

        /* second init: untouched, not an error */
        assert!(!Agent::init(offline_config(), Options::default()).unwrap());

        Agent::shutdown();
        assert!(get_agent().is_none());

        /* re-init after shutdown is legal */
        assert!(Agent::init(offline_config(), Options::default()).unwrap());
        Agent::shutdown();
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = Config {
            api_key: String::new(),
            ..Config::default()
        };
        assert!(Agent::init(config, Options::default()).is_err());
    }
}
