/**
 * Minimal test harness for the Aivory Rust agent.
 *
 * Point AIVORY_BACKEND_URL at a collector (or leave the default),
 * export a real AIVORY_API_KEY, then run:
 *
 *   cargo run -p aivory_demo_basic
 */

use std::time::Duration;

fn main() {
    /*
     * Initialize from the environment — api key, backend URL, and the
     * rest come from the AIVORY_* variables. The panic hook is
     * installed automatically (catch_panics defaults to true).
     */
    let _guard = match aivory::init(aivory::InitOptions {
        debug: Some(true),
        ..Default::default()
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("[demo] init failed: {err}");
            return;
        }
    };

    println!("[demo] agent initialized, connected={}", aivory::is_connected());

    /*
     * A plain informational message.
     */
    aivory::capture_message("demo started");

    /*
     * Capture a real error with a cause chain (file not found).
     */
    if let Err(err) = std::fs::read_to_string("/nonexistent/path.txt") {
        aivory::capture_exception(&aivory::Exception::from_error(&err), None);
        println!("[demo] captured an io::Error: {err}");
    }

    /*
     * Attach ambient context, then capture a hand-built exception.
     * Note the password field is redacted before it leaves the process.
     */
    let mut context = serde_json::Map::new();
    context.insert("deployment".into(), "demo".into());
    aivory::set_context(context);
    aivory::set_user(aivory::User {
        id: Some("user-42".into()),
        ..Default::default()
    });

    let exception = aivory::Exception::new("CheckoutFailed", "card declined")
        .with_field("order_total", serde_json::json!(149.99))
        .with_field("password", serde_json::json!("hunter2"));
    aivory::capture_exception(&exception, None);

    /*
     * An error-hook event: subject to sampling, mapped to warning
     * severity.
     */
    aivory::capture_error(aivory::ErrorKind::UserWarning, "cache miss storm");

    /*
     * Pump the transport for a few seconds so registration completes,
     * queued envelopes flush, and any set_breakpoint commands arrive.
     * A real host calls process_messages from its own event loop.
     */
    for _ in 0..50 {
        aivory::process_messages();
        aivory::breakpoint("demo.loop");
        std::thread::sleep(Duration::from_millis(100));
    }

    aivory::heartbeat();

    println!("[demo] done, shutting down");
    /* _guard drops here: pending fatal emitted, transport closed */
}
