/**
 * Exception capture — the heart of the pipeline.
 *
 * `ExceptionCapture` turns an `Exception` into a wire-ready
 * `ExceptionRecord`: it fingerprints and deduplicates, walks the stack,
 * reflects the exception into a variable tree (message, code, file,
 * line, declared fields, cause chain, request superglobals), and caps
 * everything per the reflection bounds.
 *
 * Error-hook events flow through `capture_error`, which applies the
 * severity mapping and the sampling rate. Fatal-class kinds are not
 * emitted inline; they are parked in the `last_error` slot, and the
 * shutdown path emits one final critical record for the most recent one.
 */
use std::collections::{HashSet, BTreeMap};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::capture::fingerprint::fingerprint;
use crate::capture::redact::redact_map;
use crate::capture::reflect::{
    truncate_plain, Reflector, MAX_DEPTH_MARKER, MESSAGE_VALUE_CAP, SCALAR_VALUE_CAP,
};
use crate::capture::request::{RequestSnapshot, RequestSource};
use crate::capture::stack::{collect_raw_frames, RawFrame, StackWalker};
use crate::config::Config;
use crate::protocol::constants::{RUNTIME, RUNTIME_VERSION};
use crate::protocol::types::{ExceptionRecord, Severity, VariableNode};

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// The dedup set is cleared once it grows past this many fingerprints.
pub const FINGERPRINT_SET_CAP: usize = 1000;

/// Child cap for the `$GET` / `$POST` views.
pub const SUPERGLOBAL_CHILD_CAP: usize = 20;

/// Child cap for the `$SESSION` view.
pub const SESSION_CHILD_CAP: usize = 10;

/// Field names the reflection walk skips: the accessors already cover them.
const RESERVED_FIELDS: [&str; 6] = ["message", "code", "file", "line", "trace", "previous"];

// ---------------------------------------------------------------------------
// Exception
// ---------------------------------------------------------------------------

/**
 * An owned description of a throwable: identity, location, declared
 * fields, cause chain, and the raw frames recorded when it was built.
 *
 * `Exception::new` captures a backtrace at the call site; integrations
 * that already hold frames (the panic hook, tests) can override them
 * with `with_frames`.
 */
#[derive(Debug, Clone, Default)]
pub struct Exception {
    pub type_name: String,
    pub message: String,
    pub code: i64,
    pub file: Option<String>,
    pub line: u32,
    /// Public declared fields beyond the standard accessors.
    pub fields: Map<String, Value>,
    pub previous: Option<Box<Exception>>,
    pub frames: Vec<RawFrame>,
}

impl Exception {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let frames = collect_raw_frames();
        let (file, line) = frames
            .first()
            .map(|f| (f.file.clone(), f.line.unwrap_or(0)))
            .unwrap_or((None, 0));

        Self {
            type_name: type_name.into(),
            message: message.into(),
            code: 0,
            file,
            line,
            fields: Map::new(),
            previous: None,
            frames,
        }
    }

    /**
     * Builds an exception from any `std::error::Error`, using the
     * concrete type name and walking the `source()` chain into
     * `previous` links.
     */
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut exception = Self::new(std::any::type_name::<E>(), err.to_string());
        exception.previous = err.source().map(|s| Box::new(Self::from_cause(s)));
        exception
    }

    fn from_cause(err: &dyn std::error::Error) -> Self {
        Self {
            type_name: "error".into(),
            message: err.to_string(),
            previous: err.source().map(|s| Box::new(Self::from_cause(s))),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_previous(mut self, previous: Exception) -> Self {
        self.previous = Some(Box::new(previous));
        self
    }

    pub fn with_frames(mut self, frames: Vec<RawFrame>) -> Self {
        self.frames = frames;
        self
    }
}

// ---------------------------------------------------------------------------
// ErrorKind — error-hook event classification
// ---------------------------------------------------------------------------

/// Classification for error-hook events, mirroring the engine error
/// classes the collector groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Parse,
    CoreError,
    CompileError,
    UserError,
    Warning,
    CoreWarning,
    CompileWarning,
    UserWarning,
    Notice,
    Strict,
    Deprecated,
    UserDeprecated,
    UserNotice,
    Other,
}

impl ErrorKind {
    pub fn severity(self) -> Severity {
        use ErrorKind::*;
        match self {
            Fatal | Parse | CoreError | CompileError | UserError => Severity::Critical,
            Warning | CoreWarning | CompileWarning | UserWarning => Severity::Warning,
            Notice | Strict | Deprecated | UserDeprecated | UserNotice => Severity::Info,
            Other => Severity::Error,
        }
    }

    /// Fatal-class events bypass the inline path and surface once at
    /// shutdown.
    pub fn is_fatal_class(self) -> bool {
        self.severity() == Severity::Critical
    }

    /// Wire label used as the record's exception type.
    pub fn label(self) -> &'static str {
        use ErrorKind::*;
        match self {
            Fatal => "fatal",
            Parse => "parse",
            CoreError => "core-error",
            CompileError => "compile-error",
            UserError => "user-error",
            Warning => "warning",
            CoreWarning => "core-warning",
            CompileWarning => "compile-warning",
            UserWarning => "user-warning",
            Notice => "notice",
            Strict => "strict",
            Deprecated => "deprecated",
            UserDeprecated => "user-deprecated",
            UserNotice => "user-notice",
            Other => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// ExceptionCapture
// ---------------------------------------------------------------------------

pub struct ExceptionCapture {
    config: Arc<Config>,
    reflector: Reflector,
    request_source: Arc<dyn RequestSource>,

    /// Fingerprints already emitted this process lifetime (bounded).
    fingerprints: Mutex<HashSet<String>>,

    /// Most recent fatal-class error, inspected once at shutdown.
    last_error: Mutex<Option<Exception>>,
}

impl ExceptionCapture {
    pub fn new(config: Arc<Config>, request_source: Arc<dyn RequestSource>) -> Self {
        let reflector = Reflector::new(config.max_variable_depth);
        Self {
            config,
            reflector,
            request_source,
            fingerprints: Mutex::new(HashSet::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    /**
     * Builds a record for the given exception, or `None` when the
     * fingerprint was already emitted.
     *
     * `context` is the merged per-capture context (custom context,
     * call-site context, user); when absent, the request probe supplies
     * whatever metadata the environment carries. Either way the context
     * is redacted before it enters the record.
     */
    pub fn capture(
        &self,
        exception: &Exception,
        severity: Severity,
        context: Option<Value>,
    ) -> Option<ExceptionRecord> {
        let walker = StackWalker::new(&self.reflector);
        let stack_trace = walker.walk(&exception.frames);

        /*
         * Step 1: dedup. The set is bounded: past the cap it is cleared
         * wholesale rather than evicted piecemeal.
         */
        let fp = fingerprint(&exception.type_name, &stack_trace);
        {
            let mut seen = match self.fingerprints.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if seen.contains(&fp) {
                return None;
            }
            if seen.len() > FINGERPRINT_SET_CAP {
                seen.clear();
            }
            seen.insert(fp);
        }

        /*
         * Step 2: top-level fields. Location falls back to the innermost
         * frame when the exception itself carries none.
         */
        let innermost = stack_trace.first();
        let file_path = exception
            .file
            .clone()
            .or_else(|| innermost.and_then(|f| f.file_path.clone()));
        let line_number = if exception.line > 0 {
            exception.line
        } else {
            innermost.map(|f| f.line_number).unwrap_or(0)
        };

        let request_context = self.resolve_request_context(context);

        let record = ExceptionRecord {
            exception_type: exception.type_name.clone(),
            message: Some(truncate_plain(&exception.message, MESSAGE_VALUE_CAP).0),
            file_path,
            line_number,
            method_name: innermost.and_then(|f| f.method_name.clone()),
            class_name: innermost.and_then(|f| f.class_name.clone()),
            severity,
            runtime: RUNTIME.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
            stack_trace,
            local_variables: Some(self.exception_as_variables(exception, 0)),
            request_context,
        };

        Some(record)
    }

    /**
     * Error-hook entry point: severity mapping plus sampling.
     *
     * Fatal-class kinds are parked for the shutdown path and return
     * `None` here. Non-fatal kinds are dropped when the sampling draw
     * exceeds the configured rate.
     */
    pub fn capture_error(&self, kind: ErrorKind, message: &str) -> Option<ExceptionRecord> {
        let exception = Exception::new(kind.label(), message);

        if kind.is_fatal_class() {
            self.record_last_error(exception);
            return None;
        }

        if rand::random::<f64>() > self.config.sampling_rate {
            return None;
        }

        self.capture(&exception, kind.severity(), None)
    }

    /// Remembers the most recent fatal-class error for the shutdown hook.
    pub fn record_last_error(&self, exception: Exception) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(exception);
        }
    }

    /// Takes the pending fatal, if any. Called once during shutdown.
    pub fn take_last_fatal(&self) -> Option<Exception> {
        self.last_error.lock().ok().and_then(|mut slot| slot.take())
    }

    fn resolve_request_context(&self, context: Option<Value>) -> Option<Value> {
        let mut resolved = match context {
            Some(value) => value,
            None => Value::Object(self.request_source.snapshot()?.meta),
        };

        if let Value::Object(map) = &mut resolved {
            redact_map(map);
        }
        Some(resolved)
    }

    // -----------------------------------------------------------------------
    // Exception-as-variables
    // -----------------------------------------------------------------------

    /**
     * Reflects the exception itself into a variable tree: the standard
     * accessors first, then declared fields under `prop:` keys, then the
     * cause chain under `previous`, and at the root the sanitized
     * request superglobals.
     */
    fn exception_as_variables(
        &self,
        exception: &Exception,
        depth: u32,
    ) -> BTreeMap<String, VariableNode> {
        let mut vars = BTreeMap::new();

        let (message, message_truncated) = truncate_plain(&exception.message, MESSAGE_VALUE_CAP);
        vars.insert(
            "message".to_string(),
            VariableNode {
                name: "message".into(),
                node_type: "string".into(),
                value: Some(message),
                is_null: false,
                is_truncated: message_truncated,
                children: None,
            },
        );

        vars.insert(
            "code".to_string(),
            VariableNode::leaf("code", "int", exception.code.to_string()),
        );

        vars.insert(
            "file".to_string(),
            match &exception.file {
                Some(file) => VariableNode::leaf("file", "string", file.clone()),
                None => self.reflector.reflect("file", &Value::Null, depth),
            },
        );

        vars.insert(
            "line".to_string(),
            VariableNode::leaf("line", "int", exception.line.to_string()),
        );

        /*
         * Declared fields, skipping the reserved names already covered
         * above. A field that fails to reflect is dropped alone.
         */
        for (name, value) in &exception.fields {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let key = format!("prop:{name}");
            vars.insert(key.clone(), self.reflector.reflect(&key, value, depth));
        }

        if let Some(previous) = &exception.previous {
            vars.insert("previous".to_string(), self.previous_node(previous, depth));
        }

        if depth == 0 {
            if let Some(snapshot) = self.request_source.snapshot() {
                self.attach_superglobals(&mut vars, &snapshot);
            }
        }

        vars
    }

    fn previous_node(&self, previous: &Exception, depth: u32) -> VariableNode {
        if depth >= self.reflector.max_depth() {
            return VariableNode {
                name: "previous".into(),
                node_type: previous.type_name.clone(),
                value: Some(MAX_DEPTH_MARKER.into()),
                is_null: false,
                is_truncated: true,
                children: None,
            };
        }

        let (value, truncated) = truncate_plain(&previous.message, SCALAR_VALUE_CAP);
        VariableNode {
            name: "previous".into(),
            node_type: previous.type_name.clone(),
            value: Some(value),
            is_null: false,
            is_truncated: truncated,
            children: Some(self.exception_as_variables(previous, depth + 1)),
        }
    }

    fn attach_superglobals(
        &self,
        vars: &mut BTreeMap<String, VariableNode>,
        snapshot: &RequestSnapshot,
    ) {
        for (key, source, child_cap) in [
            ("$GET", &snapshot.query, SUPERGLOBAL_CHILD_CAP),
            ("$POST", &snapshot.form, SUPERGLOBAL_CHILD_CAP),
            ("$SESSION", &snapshot.session, SESSION_CHILD_CAP),
        ] {
            if let Some(map) = source {
                vars.insert(key.to_string(), self.superglobal_node(key, map, child_cap));
            }
        }
    }

    /// A sanitized container view: redacted first, children walked only
    /// for containers within the per-view cap.
    fn superglobal_node(
        &self,
        name: &str,
        map: &Map<String, Value>,
        child_cap: usize,
    ) -> VariableNode {
        let mut sanitized = map.clone();
        redact_map(&mut sanitized);

        let children = if sanitized.len() <= child_cap {
            Some(
                sanitized
                    .iter()
                    .map(|(key, value)| (key.clone(), self.reflector.reflect(key, value, 1)))
                    .collect(),
            )
        } else {
            None
        };

        VariableNode {
            name: name.to_string(),
            node_type: "array".into(),
            value: Some(format!("Array({})", sanitized.len())),
            is_null: false,
            is_truncated: children.is_none(),
            children,
        }
    }
}
