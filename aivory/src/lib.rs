/*!
 * Aivory — in-process exception and snapshot monitoring.
 *
 * This is the crate applications should depend on. It re-exports the
 * engine API and wires up the panic hook through a single `init` call.
 *
 * # Quick start
 *
 * ```ignore
 * fn main() {
 *     let _guard = aivory::init("YOUR_API_KEY").expect("aivory init");
 *
 *     // panics and captured errors now stream to the collector
 *     aivory::capture_message("application started");
 *
 *     loop {
 *         // ... application work ...
 *         aivory::process_messages();
 *     }
 *     // _guard drops here: pending fatal emitted, transport closed
 * }
 * ```
 *
 * # With options
 *
 * ```ignore
 * let _guard = aivory::init(aivory::InitOptions {
 *     api_key: "YOUR_API_KEY".into(),
 *     environment: Some("staging".into()),
 *     debug: Some(true),
 *     before_send: Some(std::sync::Arc::new(|record| {
 *         if record.exception_type == "Noise" { None } else { Some(record) }
 *     })),
 *     ..Default::default()
 * })?;
 * ```
 */

use std::sync::Arc;

use aivory_core::{Agent, Config, Options, RequestSource, Result};

// ---------------------------------------------------------------------------
// Re-exports from aivory_core — the public surface area
// ---------------------------------------------------------------------------

pub use aivory_core::{
    breakpoint, breakpoint_with_locals, capture, capture_error, capture_exception,
    capture_message, capture_snapshot, heartbeat, is_connected, is_initialized,
    process_messages, set_context, set_user, shutdown, AgentError, BeforeSend, ErrorKind,
    Exception, ExceptionRecord, Severity, StackFrame, User, VariableNode, AGENT_VERSION,
};

// ---------------------------------------------------------------------------
// InitOptions
// ---------------------------------------------------------------------------

/**
 * Configuration for `init`.
 *
 * Every `Option` field overrides the corresponding `AIVORY_*`
 * environment variable; unset fields fall back to the environment and
 * then to the documented defaults. Implements `From<&str>` so a bare
 * api key is enough:
 *
 * ```ignore
 * let _guard = aivory::init("API_KEY")?;
 * ```
 */
#[derive(Default)]
pub struct InitOptions {
    /// Collector credential. Empty means "take it from `AIVORY_API_KEY`".
    pub api_key: String,

    pub backend_url: Option<String>,
    pub environment: Option<String>,
    pub application_name: Option<String>,
    pub sampling_rate: Option<f64>,
    pub max_variable_depth: Option<u32>,
    pub debug: Option<bool>,
    pub enable_breakpoints: Option<bool>,

    /// Whether to install the panic hook. Defaults to `true`.
    pub catch_panics: Option<bool>,

    /// Optional filter over outgoing exception records.
    pub before_send: Option<BeforeSend>,

    /// Optional per-request state source for web hosts.
    pub request_source: Option<Arc<dyn RequestSource>>,
}

impl From<&str> for InitOptions {
    fn from(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/**
 * Shutdown-on-drop guard returned by `init`.
 *
 * Hold it for the lifetime of the application; when it drops, the
 * panic hook is disabled and the agent shuts down (emitting any
 * pending fatal record first). Only the guard whose `init` call
 * actually activated the agent does this — the guard a redundant
 * `init` returns is inert.
 */
pub struct Guard {
    active: bool,
}

impl Drop for Guard {
    fn drop(&mut self) {
        if self.active {
            aivory_panic::uninstall();
            aivory_core::shutdown();
        }
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/**
 * Initializes the agent.
 *
 * Builds the config from the `AIVORY_*` environment merged with the
 * given overrides, validates it, opens the transport, and installs the
 * panic hook (unless `catch_panics` is false).
 *
 * Idempotent: a second call while an agent is active changes nothing
 * and returns an inert guard.
 *
 * # Errors
 * `AgentError::ConfigInvalid` when the api key is missing, the
 * sampling rate is outside [0, 1], or the depth bound is outside
 * [0, 10].
 */
pub fn init(options: impl Into<InitOptions>) -> Result<Guard> {
    let opts = options.into();

    /*
     * Environment first, explicit options on top.
     */
    let mut config = Config::from_env();
    if !opts.api_key.is_empty() {
        config.api_key = opts.api_key;
    }
    if let Some(backend_url) = opts.backend_url {
        config.backend_url = backend_url;
    }
    if let Some(environment) = opts.environment {
        config.environment = environment;
    }
    if let Some(application_name) = opts.application_name {
        config.application_name = Some(application_name);
    }
    if let Some(sampling_rate) = opts.sampling_rate {
        config.sampling_rate = sampling_rate;
    }
    if let Some(max_variable_depth) = opts.max_variable_depth {
        config.max_variable_depth = max_variable_depth;
    }
    if let Some(debug) = opts.debug {
        config.debug = debug;
    }
    if let Some(enable_breakpoints) = opts.enable_breakpoints {
        config.enable_breakpoints = enable_breakpoints;
    }

    let catch_panics = opts.catch_panics.unwrap_or(true);

    let activated = Agent::init(
        config,
        Options {
            before_send: opts.before_send,
            request_source: opts.request_source,
        },
    )?;

    if activated && catch_panics {
        aivory_panic::install();
    }

    Ok(Guard { active: activated })
}
