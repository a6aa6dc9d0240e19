/*!
 * Aivory panic hook — automatic capture of uncaught panics.
 *
 * `install()` registers a custom `std::panic::set_hook` handler. When a
 * panic occurs, it:
 *
 * 1. Extracts the panic message, source location, and thread name.
 * 2. Builds a critical `Exception` with a backtrace from the panic site.
 * 3. Hands it to `aivory_core::capture` (deduplicated like any capture).
 * 4. Calls the previous panic hook, so default stderr output and any
 *    host-installed handler are preserved.
 *
 * `uninstall()` disables the capture step while keeping the chain to
 * the previous hook intact, which restores the pre-install behavior.
 *
 * # Recursion safety
 *
 * A `thread_local` flag breaks the loop if the capture path itself
 * were to panic.
 */

use std::cell::Cell;
use std::panic;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};

use aivory_core::{Exception, Severity};

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Ensures `install()` registers at most one hook per process, so one
/// panic never produces duplicate captures.
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Gates the capture step. `uninstall()` clears it; the chained call to
/// the previous hook always runs.
static ENABLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// Per-thread re-entrancy flag for the hook body.
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/**
 * Installs the panic hook, chaining to whatever hook was registered
 * before. Idempotent: repeat calls only re-enable the capture step.
 *
 * Call after `aivory_core::init`; captures from an uninitialized agent
 * are silent no-ops.
 */
pub fn install() {
    ENABLED.store(true, Ordering::SeqCst);

    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let previous_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        if ENABLED.load(Ordering::SeqCst) {
            let is_recursive = IN_HOOK.with(|flag| {
                if flag.get() {
                    true
                } else {
                    flag.set(true);
                    false
                }
            });

            if !is_recursive {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handle_panic(info);
                }));

                IN_HOOK.with(|flag| flag.set(false));
            }
        }

        previous_hook(info);
    }));
}

/**
 * Disables panic capture. The chained previous hook keeps running, so
 * observable panic behavior returns to what it was before `install()`.
 */
pub fn uninstall() {
    ENABLED.store(false, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Internal: build and send the panic capture
// ---------------------------------------------------------------------------

fn handle_panic(info: &PanicHookInfo) {
    let message = match info.payload().downcast_ref::<&str>() {
        Some(s) => (*s).to_string(),
        None => match info.payload().downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "<unknown panic>".to_string(),
        },
    };

    let thread_name = std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();

    let mut exception = Exception::new("panic", message.as_str())
        .with_field("thread", serde_json::Value::String(thread_name));

    if let Some(location) = info.location() {
        exception = exception.with_location(location.file(), location.line());
    }

    aivory_core::capture(&exception, Severity::Critical, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    /**
     * Installing twice keeps a single chained hook; panics still reach
     * the default (previous) hook and unwinding still works.
     */
    #[test]
    fn test_install_idempotent_and_chain_preserved() {
        install();
        install();

        let caught = std::panic::catch_unwind(|| panic!("expected test panic"));
        assert!(caught.is_err());

        uninstall();
        let caught = std::panic::catch_unwind(|| panic!("expected test panic"));
        assert!(caught.is_err());
    }
}
