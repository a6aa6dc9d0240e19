/**
 * Stack walking — converts runtime backtraces into ordered `StackFrame`s.
 *
 * Raw frames come from the `backtrace` crate (innermost first). Frames
 * that resolve neither a file nor a function carry no information and
 * are dropped, as are the agent's own frames so a capture points at the
 * host's code rather than at the capture machinery.
 */
use std::collections::BTreeMap;

use serde_json::Value;

use crate::capture::reflect::Reflector;
use crate::protocol::types::{StackFrame, VariableNode};

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Frames kept per capture.
pub const CAPTURE_FRAME_CAP: usize = 20;

/// Frames dropped from the top of a breakpoint walk: the capture helper
/// itself plus the `hit` entry point.
pub const BREAKPOINT_SKIP_FRAMES: usize = 2;

/// Arguments reflected per frame.
pub const ARGUMENT_CAP: usize = 10;

// ---------------------------------------------------------------------------
// RawFrame
// ---------------------------------------------------------------------------

/// One unconverted frame as reported by the runtime.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Demangled symbol, e.g. `app::orders::submit`.
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/**
 * Captures a backtrace at the current call site and converts it to raw
 * frames, innermost first. Frames with no file AND no function are
 * dropped, as are frames inside the agent and the backtrace machinery.
 */
pub fn collect_raw_frames() -> Vec<RawFrame> {
    let bt = backtrace::Backtrace::new();
    let mut frames = Vec::new();

    for frame in bt.frames() {
        for symbol in frame.symbols() {
            let function = symbol.name().map(|n| n.to_string());
            let file = symbol.filename().map(|p| p.display().to_string());

            if function.is_none() && file.is_none() {
                continue;
            }

            if function.as_deref().is_some_and(is_internal_symbol) {
                continue;
            }

            frames.push(RawFrame {
                function,
                file,
                line: symbol.lineno(),
                column: symbol.colno(),
            });
        }
    }

    frames
}

fn is_internal_symbol(symbol: &str) -> bool {
    symbol.starts_with("backtrace::")
        || symbol.starts_with("aivory_core::")
        || symbol.starts_with("aivory_panic::")
        || symbol.starts_with("aivory::")
        || symbol.starts_with("std::panicking::")
}

// ---------------------------------------------------------------------------
// StackWalker
// ---------------------------------------------------------------------------

/// Converts raw frames into wire frames, reflecting arguments when a
/// caller supplies them and the depth bound allows any reflection at all.
pub struct StackWalker<'a> {
    reflector: &'a Reflector,
}

impl<'a> StackWalker<'a> {
    pub fn new(reflector: &'a Reflector) -> Self {
        Self { reflector }
    }

    /// Converts frames in order, innermost first, capped at
    /// `CAPTURE_FRAME_CAP`.
    pub fn walk(&self, raw: &[RawFrame]) -> Vec<StackFrame> {
        raw.iter()
            .take(CAPTURE_FRAME_CAP)
            .map(convert_frame)
            .collect()
    }

    /// A walk that drops `skip` frames from the top first. Used for
    /// breakpoint hits, where the innermost frames are the capture
    /// machinery rather than the caller.
    pub fn walk_skipping(&self, raw: &[RawFrame], skip: usize) -> Vec<StackFrame> {
        self.walk(raw.get(skip..).unwrap_or(&[]))
    }

    /**
     * Reflects a caller-supplied argument list into a variable mapping.
     *
     * Positional values are named `arg0`, `arg1`, ...; string keys keep
     * their names. At most `ARGUMENT_CAP` entries are walked, and a depth
     * bound of zero disables argument reflection entirely.
     */
    pub fn reflect_arguments(&self, locals: &Value) -> Option<BTreeMap<String, VariableNode>> {
        if self.reflector.max_depth() == 0 {
            return None;
        }

        let mapped: BTreeMap<String, VariableNode> = match locals {
            Value::Array(items) => items
                .iter()
                .take(ARGUMENT_CAP)
                .enumerate()
                .map(|(i, item)| {
                    let name = format!("arg{i}");
                    let node = self.reflector.reflect(&name, item, 0);
                    (name, node)
                })
                .collect(),

            Value::Object(map) => map
                .iter()
                .take(ARGUMENT_CAP)
                .map(|(key, item)| (key.clone(), self.reflector.reflect(key, item, 0)))
                .collect(),

            other => {
                let node = self.reflector.reflect("arg0", other, 0);
                std::iter::once(("arg0".to_string(), node)).collect()
            }
        };

        if mapped.is_empty() {
            None
        } else {
            Some(mapped)
        }
    }
}

// ---------------------------------------------------------------------------
// Frame conversion
// ---------------------------------------------------------------------------

fn convert_frame(raw: &RawFrame) -> StackFrame {
    let (class_name, method_name) = match raw.function.as_deref() {
        Some(symbol) => split_symbol(symbol),
        None => (None, None),
    };

    StackFrame {
        class_name,
        method_name,
        file_name: raw.file.as_deref().map(basename),
        is_native: raw.file.is_none(),
        file_path: raw.file.clone(),
        line_number: raw.line.unwrap_or(0),
        column_number: raw.column.unwrap_or(0),
        local_variables: None,
    }
}

/**
 * Splits a demangled symbol into a class path and a method name.
 *
 * `app::orders::Order::submit::h1f2e3d4c` becomes
 * (`app::orders::Order`, `submit`); the trailing hash the demangler
 * leaves behind is stripped first. A bare symbol has no class part.
 */
fn split_symbol(symbol: &str) -> (Option<String>, Option<String>) {
    let trimmed = strip_symbol_hash(symbol);

    match trimmed.rfind("::") {
        Some(idx) => (
            Some(trimmed[..idx].to_string()),
            Some(trimmed[idx + 2..].to_string()),
        ),
        None => (None, Some(trimmed.to_string())),
    }
}

/// Drops a trailing `::h<16 hex>` disambiguator if present.
fn strip_symbol_hash(symbol: &str) -> &str {
    if let Some(idx) = symbol.rfind("::h") {
        let tail = &symbol[idx + 3..];
        if tail.len() == 16 && tail.bytes().all(|b| b.is_ascii_hexdigit()) {
            return &symbol[..idx];
        }
    }
    symbol
}

fn basename(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}
