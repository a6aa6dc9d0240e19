/*!
 * Transport layer — the persistent framed link to the collector.
 *
 * Outbound: envelope wrapping, the upgrade handshake, registration, a
 * bounded FIFO queue that buffers messages while the link is down or
 * not yet authenticated, and best-effort frame writes.
 *
 * Inbound: a non-blocking read pump the host drives via
 * `process_messages()`, consuming at most one frame per call and
 * dispatching control envelopes.
 *
 * Reconnection: exponential backoff with a 60-second cap, recorded (not
 * slept); the next host call performs the dial once the delay elapses.
 * A credential rejection from the collector latches the transport down
 * for the life of the process.
 */
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::protocol::constants::{
    AGENT_VERSION, MSG_ERROR, MSG_HEARTBEAT, MSG_REGISTER, MSG_REGISTERED, MSG_REMOVE_BREAKPOINT,
    MSG_SET_BREAKPOINT, RUNTIME, RUNTIME_VERSION,
};
use crate::protocol::types::Envelope;

pub mod frame;
pub mod handshake;

use handshake::{parse_url, response_accepted, upgrade_key, upgrade_request, UrlParts};

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Outbound queue capacity; the oldest envelope is dropped on overflow.
pub const QUEUE_CAPACITY: usize = 100;

/// Socket connect and handshake budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const BASE_RECONNECT_DELAY_MS: u64 = 1_000;
const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// Bytes pulled off the socket per `process_messages` call.
const READ_CHUNK: usize = 4096;

/// Upgrade responses larger than this are treated as a handshake failure.
const MAX_HANDSHAKE_RESPONSE: usize = 8192;

// ---------------------------------------------------------------------------
// Link — the boxed byte stream under the framing
// ---------------------------------------------------------------------------

/// The socket abstraction: a plain TCP stream, a TLS stream, or (in
/// tests) an in-memory pipe.
pub(crate) trait Link: Read + Write + Send {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;
}

impl Link for TcpStream {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }
}

impl Link for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.sock.set_nonblocking(nonblocking)
    }
}

// ---------------------------------------------------------------------------
// ControlEvent — inbound commands surfaced to the agent
// ---------------------------------------------------------------------------

/// Collector commands that mutate local capture policy. `registered`
/// and `error` envelopes are consumed inside the transport; these are
/// handed to the subscriber (the agent) for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    SetBreakpoint(Value),
    RemoveBreakpoint(Value),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct Transport {
    config: Arc<Config>,
    agent_id: String,
    hostname: String,

    link: Option<Box<dyn Link>>,
    connected: bool,
    authenticated: bool,

    /// Serialized envelopes awaiting an authenticated link.
    queue: VecDeque<String>,

    /// Unconsumed inbound bytes, possibly a partial frame.
    read_buf: Vec<u8>,

    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    next_retry_at: Option<Instant>,

    /// Set on a credential rejection; terminal for this process.
    latched: bool,
}

impl Transport {
    pub fn new(config: Arc<Config>, agent_id: String, hostname: String) -> Self {
        let max_reconnect_attempts = config.max_reconnect_attempts;
        Self {
            config,
            agent_id,
            hostname,
            link: None,
            connected: false,
            authenticated: false,
            queue: VecDeque::new(),
            read_buf: Vec::new(),
            reconnect_attempts: 0,
            max_reconnect_attempts,
            next_retry_at: None,
            latched: false,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    /**
     * Dials the collector, performs the upgrade, and sends the
     * `register` envelope. On failure the next retry is scheduled with
     * exponential backoff and the error is returned.
     */
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        if self.latched {
            return Err(AgentError::TransportAuth(
                "credentials rejected; reconnect disabled".into(),
            ));
        }

        match self.try_connect() {
            Ok(()) => {
                self.reconnect_attempts = 0;
                self.next_retry_at = None;
                Ok(())
            }
            Err(err) => {
                self.debug_log(&format!("connect failed: {err}"));
                self.schedule_reconnect();
                Err(err)
            }
        }
    }

    fn try_connect(&mut self) -> Result<()> {
        let parts = parse_url(&self.config.backend_url)?;
        let mut link = dial(&parts)?;

        let remainder = perform_upgrade(link.as_mut(), &parts, &self.config.api_key)?;

        link.set_nonblocking(true)
            .map_err(|e| AgentError::TransportConnect(e.to_string()))?;

        self.link = Some(link);
        self.connected = true;
        self.read_buf = remainder;
        self.debug_log("connected to collector");

        self.send_register();
        Ok(())
    }

    /// Closes the socket without scheduling a retry. Any in-flight
    /// frame is discarded.
    pub fn disconnect(&mut self) {
        self.link = None;
        self.connected = false;
        self.authenticated = false;
        self.read_buf.clear();
        self.next_retry_at = None;
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /**
     * Wraps `payload` in an envelope and delivers it: straight to the
     * socket when authenticated, otherwise onto the bounded queue. A
     * serialization failure drops this one message.
     */
    pub fn send(&mut self, msg_type: &str, payload: Value) {
        let envelope = Envelope {
            msg_type: msg_type.to_string(),
            payload,
            timestamp: epoch_millis(),
        };

        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                self.debug_log(&format!("dropping {msg_type}: {err}"));
                return;
            }
        };

        if self.authenticated && self.link.is_some() {
            if !self.write_frame(json.as_bytes()) {
                self.handle_io_failure();
            }
        } else {
            self.enqueue(json);
        }
    }

    fn enqueue(&mut self, json: String) {
        self.queue.push_back(json);
        while self.queue.len() > QUEUE_CAPACITY {
            self.queue.pop_front();
        }
    }

    /// Drains the queue in FIFO order. A failed write drops that frame
    /// and stops; the remainder waits for the next link.
    fn flush_queue(&mut self) {
        while let Some(json) = self.queue.pop_front() {
            if !self.write_frame(json.as_bytes()) {
                self.handle_io_failure();
                break;
            }
        }
    }

    /// Best-effort masked write. Short writes count as success; a
    /// `WouldBlock` drops the frame without tearing the link down.
    fn write_frame(&mut self, payload: &[u8]) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };

        let bytes = frame::encode_text(payload);
        match link.write(&bytes) {
            Ok(_) => true,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    /// The one pre-auth write: announces this agent to the collector.
    fn send_register(&mut self) {
        let mut payload = json!({
            "api_key": self.config.api_key,
            "agent_id": self.agent_id,
            "hostname": self.hostname,
            "environment": self.config.environment,
            "runtime": RUNTIME,
            "runtime_version": RUNTIME_VERSION,
            "agent_version": AGENT_VERSION,
            "heartbeat_interval_ms": self.config.heartbeat_interval_ms,
        });
        if let Some(app) = &self.config.application_name {
            payload["application_name"] = Value::String(app.clone());
        }

        let envelope = Envelope {
            msg_type: MSG_REGISTER.to_string(),
            payload,
            timestamp: epoch_millis(),
        };

        match serde_json::to_string(&envelope) {
            Ok(json) => {
                if !self.write_frame(json.as_bytes()) {
                    self.handle_io_failure();
                }
            }
            Err(err) => self.debug_log(&format!("dropping register: {err}")),
        }
    }

    /// Emits the heartbeat envelope with current memory metrics.
    pub fn send_heartbeat(&mut self) {
        let (memory_mb, peak_memory_mb) = memory_metrics();
        let payload = json!({
            "timestamp": epoch_millis(),
            "agent_id": self.agent_id,
            "metrics": {
                "memory_mb": memory_mb,
                "peak_memory_mb": peak_memory_mb,
            },
        });
        self.send(MSG_HEARTBEAT, payload);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /**
     * One pump step, called by the host: retries a due reconnect, takes
     * one non-blocking read, and decodes at most one frame. Partial
     * frames stay buffered for the next call.
     */
    pub fn process_messages(&mut self) -> Vec<ControlEvent> {
        let mut events = Vec::new();

        self.try_reconnect_if_due();

        let Some(link) = self.link.as_mut() else {
            return events;
        };

        let mut failed = false;
        let mut chunk = [0u8; READ_CHUNK];
        match link.read(&mut chunk) {
            /* a zero-length read is the peer closing */
            Ok(0) => failed = true,
            Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(_) => failed = true,
        }

        if failed {
            self.handle_io_failure();
            return events;
        }

        if let Some((frame, used)) = frame::decode(&self.read_buf) {
            self.read_buf.drain(..used);

            match frame.opcode {
                frame::OPCODE_TEXT => {
                    if let Ok(envelope) = serde_json::from_slice::<Value>(&frame.payload) {
                        self.handle_envelope(envelope, &mut events);
                    }
                }
                frame::OPCODE_CLOSE => self.handle_io_failure(),
                _ => {}
            }
        }

        events
    }

    fn handle_envelope(&mut self, envelope: Value, events: &mut Vec<ControlEvent>) {
        let msg_type = envelope.get("type").and_then(Value::as_str).unwrap_or("");
        let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);

        match msg_type {
            MSG_REGISTERED => {
                /* the collector may rename us */
                if let Some(assigned) = payload.get("agent_id").and_then(Value::as_str) {
                    self.agent_id = assigned.to_string();
                }
                self.authenticated = true;
                self.debug_log(&format!("registered as {}", self.agent_id));
                self.flush_queue();
            }

            MSG_ERROR => {
                let code = payload.get("code").and_then(Value::as_str).unwrap_or("");
                let message = payload.get("message").and_then(Value::as_str).unwrap_or("");
                self.debug_log(&format!("collector error {code}: {message}"));

                if code == "auth_error" || code == "invalid_api_key" {
                    self.latched = true;
                    self.max_reconnect_attempts = 0;
                    self.disconnect();
                }
            }

            MSG_SET_BREAKPOINT => events.push(ControlEvent::SetBreakpoint(payload)),
            MSG_REMOVE_BREAKPOINT => events.push(ControlEvent::RemoveBreakpoint(payload)),

            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Reconnection
    // -----------------------------------------------------------------------

    /// Delay before retry `attempt` (1-based): doubles from one second,
    /// capped at one minute.
    pub fn reconnect_delay_ms(attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(16);
        (BASE_RECONNECT_DELAY_MS << exponent).min(MAX_RECONNECT_DELAY_MS)
    }

    /// Records the next retry instant; never sleeps. Once the attempt
    /// budget is spent the transport stays down and sends keep queueing.
    fn schedule_reconnect(&mut self) {
        if self.latched || self.reconnect_attempts >= self.max_reconnect_attempts {
            self.next_retry_at = None;
            return;
        }

        self.reconnect_attempts += 1;
        let delay = Self::reconnect_delay_ms(self.reconnect_attempts);
        self.next_retry_at = Some(Instant::now() + Duration::from_millis(delay));
        self.debug_log(&format!(
            "reconnect attempt {} in {delay} ms",
            self.reconnect_attempts
        ));
    }

    fn try_reconnect_if_due(&mut self) {
        if self.connected {
            return;
        }
        let due = self
            .next_retry_at
            .is_some_and(|at| Instant::now() >= at);
        if due {
            self.next_retry_at = None;
            let _ = self.connect();
        }
    }

    fn handle_io_failure(&mut self) {
        self.link = None;
        self.connected = false;
        self.authenticated = false;
        self.read_buf.clear();
        self.schedule_reconnect();
    }

    fn debug_log(&self, message: &str) {
        if self.config.debug {
            eprintln!("[Aivory] {message}");
        }
    }
}

// ---------------------------------------------------------------------------
// Dialing & upgrade
// ---------------------------------------------------------------------------

fn dial(parts: &UrlParts) -> Result<Box<dyn Link>> {
    let addr = (parts.host.as_str(), parts.port)
        .to_socket_addrs()
        .map_err(|e| AgentError::TransportConnect(e.to_string()))?
        .next()
        .ok_or_else(|| AgentError::TransportConnect("endpoint resolved to no addresses".into()))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| AgentError::TransportConnect(e.to_string()))?;
    let _ = tcp.set_read_timeout(Some(CONNECT_TIMEOUT));
    let _ = tcp.set_write_timeout(Some(CONNECT_TIMEOUT));
    let _ = tcp.set_nodelay(true);

    if !parts.secure {
        return Ok(Box::new(tcp));
    }

    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let server_name = rustls::pki_types::ServerName::try_from(parts.host.clone())
        .map_err(|e| AgentError::TransportConnect(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| AgentError::TransportConnect(e.to_string()))?;

    Ok(Box::new(rustls::StreamOwned::new(conn, tcp)))
}

/**
 * Writes the upgrade request and reads the response headers. Returns
 * any bytes that arrived after the header terminator; they belong to
 * the framed stream.
 */
fn perform_upgrade(link: &mut dyn Link, parts: &UrlParts, api_key: &str) -> Result<Vec<u8>> {
    let key = upgrade_key();
    let request = upgrade_request(parts, &key, api_key);
    link.write_all(request.as_bytes())
        .map_err(AgentError::TransportWrite)?;

    let mut response = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = link.read(&mut chunk).map_err(AgentError::TransportRead)?;
        if n == 0 {
            return Err(AgentError::TransportHandshake(
                "connection closed during upgrade".into(),
            ));
        }
        response.extend_from_slice(&chunk[..n]);

        if let Some(pos) = response.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if response.len() > MAX_HANDSHAKE_RESPONSE {
            return Err(AgentError::TransportHandshake("oversized upgrade response".into()));
        }
    };

    let headers = String::from_utf8_lossy(&response[..header_end]);
    if !response_accepted(&headers) {
        let status = headers.lines().next().unwrap_or("<empty>").to_string();
        return Err(AgentError::TransportHandshake(status));
    }

    Ok(response[header_end..].to_vec())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resident and peak-resident memory in megabytes, for the heartbeat.
/// Zero where the platform exposes no cheap counter.
fn memory_metrics() -> (f64, f64) {
    #[cfg(target_os = "linux")]
    {
        fn kb(line: &str) -> Option<f64> {
            line.split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<f64>().ok())
        }

        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let mut rss = 0.0;
            let mut peak = 0.0;
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    rss = kb(line).unwrap_or(0.0) / 1024.0;
                } else if line.starts_with("VmHWM:") {
                    peak = kb(line).unwrap_or(0.0) / 1024.0;
                }
            }
            return (rss, peak);
        }
    }

    (0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // -----------------------------------------------------------------------
    // In-memory link
    // -----------------------------------------------------------------------

    /// A fake socket: reads drain a shared input buffer (then report
    /// WouldBlock, like a non-blocking stream), writes land in a shared
    /// output buffer the test inspects.
    struct MemLink {
        input: Arc<Mutex<Vec<u8>>>,
        output: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for MemLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut input = self.input.lock().unwrap();
            if input.is_empty() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(input.len());
            buf[..n].copy_from_slice(&input[..n]);
            input.drain(..n);
            Ok(n)
        }
    }

    impl Write for MemLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for MemLink {
        fn set_nonblocking(&mut self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        transport: Transport,
        input: Arc<Mutex<Vec<u8>>>,
        output: Arc<Mutex<Vec<u8>>>,
    }

    fn harness(authenticated: bool) -> Harness {
        let config = Arc::new(Config {
            api_key: "k".into(),
            ..Config::default()
        });
        let mut transport = Transport::new(config, "agent-1".into(), "host-1".into());

        let input = Arc::new(Mutex::new(Vec::new()));
        let output = Arc::new(Mutex::new(Vec::new()));
        transport.link = Some(Box::new(MemLink {
            input: input.clone(),
            output: output.clone(),
        }));
        transport.connected = true;
        transport.authenticated = authenticated;

        Harness {
            transport,
            input,
            output,
        }
    }

    fn push_inbound(harness: &Harness, envelope: Value) {
        let json = serde_json::to_vec(&envelope).unwrap();
        let framed = frame::encode_text(&json);
        harness.input.lock().unwrap().extend_from_slice(&framed);
    }

    /// Decodes every complete frame written so far into envelopes.
    fn written_envelopes(harness: &Harness) -> Vec<Value> {
        let bytes = harness.output.lock().unwrap().clone();
        let mut envelopes = Vec::new();
        let mut offset = 0;
        while let Some((frame, used)) = frame::decode(&bytes[offset..]) {
            envelopes.push(serde_json::from_slice(&frame.payload).unwrap());
            offset += used;
        }
        envelopes
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    /**
     * Unauthenticated sends queue; `registered` flips the flag, adopts
     * the server-assigned id, and flushes in FIFO order.
     */
    #[test]
    fn test_queue_until_registered_then_flush_in_order() {
        let mut h = harness(false);

        h.transport.send("exception", json!({"seq": 1}));
        h.transport.send("exception", json!({"seq": 2}));
        h.transport.send("snapshot", json!({"seq": 3}));
        assert_eq!(h.transport.queue.len(), 3);
        assert!(h.output.lock().unwrap().is_empty());

        push_inbound(
            &h,
            json!({"type": "registered", "payload": {"agent_id": "server-name"}}),
        );
        let events = h.transport.process_messages();

        assert!(events.is_empty());
        assert!(h.transport.is_authenticated());
        assert_eq!(h.transport.agent_id(), "server-name");
        assert!(h.transport.queue.is_empty());

        let written = written_envelopes(&h);
        assert_eq!(written.len(), 3);
        assert_eq!(written[0]["payload"]["seq"], 1);
        assert_eq!(written[1]["payload"]["seq"], 2);
        assert_eq!(written[2]["payload"]["seq"], 3);
        assert_eq!(written[2]["type"], "snapshot");
    }

    /**
     * The queue never exceeds its capacity; overflow drops the oldest.
     */
    #[test]
    fn test_queue_overflow_drops_oldest() {
        let config = Arc::new(Config {
            api_key: "k".into(),
            ..Config::default()
        });
        let mut transport = Transport::new(config, "a".into(), "h".into());

        for i in 0..150 {
            transport.send("exception", json!({"seq": i}));
            assert!(transport.queue.len() <= QUEUE_CAPACITY);
        }

        assert_eq!(transport.queue.len(), QUEUE_CAPACITY);
        let oldest: Value = serde_json::from_str(transport.queue.front().unwrap()).unwrap();
        assert_eq!(oldest["payload"]["seq"], 50);
    }

    /**
     * Backoff doubles per attempt and caps at one minute.
     */
    #[test]
    fn test_reconnect_delay_schedule() {
        assert_eq!(Transport::reconnect_delay_ms(1), 1_000);
        assert_eq!(Transport::reconnect_delay_ms(2), 2_000);
        assert_eq!(Transport::reconnect_delay_ms(3), 4_000);
        assert_eq!(Transport::reconnect_delay_ms(6), 32_000);
        assert_eq!(Transport::reconnect_delay_ms(7), 60_000);
        assert_eq!(Transport::reconnect_delay_ms(40), 60_000);
    }

    /**
     * A credential rejection latches the transport: disconnected, no
     * retry scheduled, explicit connects refused.
     */
    #[test]
    fn test_auth_error_latches() {
        let mut h = harness(true);

        push_inbound(
            &h,
            json!({"type": "error", "payload": {"code": "invalid_api_key", "message": "bad key"}}),
        );
        let events = h.transport.process_messages();

        assert!(events.is_empty());
        assert!(!h.transport.is_connected());
        assert!(h.transport.next_retry_at.is_none());
        assert!(matches!(
            h.transport.connect(),
            Err(AgentError::TransportAuth(_))
        ));

        /* still down, still unscheduled */
        h.transport.schedule_reconnect();
        assert!(h.transport.next_retry_at.is_none());
    }

    /**
     * Non-auth collector errors are logged and ignored.
     */
    #[test]
    fn test_non_auth_error_ignored() {
        let mut h = harness(true);

        push_inbound(
            &h,
            json!({"type": "error", "payload": {"code": "throttled", "message": "slow down"}}),
        );
        h.transport.process_messages();

        assert!(h.transport.is_connected());
        assert!(h.transport.is_authenticated());
    }

    /**
     * Breakpoint commands surface as control events, one frame per
     * pump call; unknown types are ignored.
     */
    #[test]
    fn test_inbound_dispatch() {
        let mut h = harness(true);

        push_inbound(
            &h,
            json!({"type": "set_breakpoint", "payload": {"id": "X", "file_path": "f", "line_number": 7}}),
        );
        push_inbound(&h, json!({"type": "resize", "payload": {}}));
        push_inbound(&h, json!({"type": "remove_breakpoint", "payload": {"id": "X"}}));

        let first = h.transport.process_messages();
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], ControlEvent::SetBreakpoint(_)));

        /* unknown type: consumed, nothing surfaced */
        assert!(h.transport.process_messages().is_empty());

        let third = h.transport.process_messages();
        assert!(matches!(third[0], ControlEvent::RemoveBreakpoint(_)));
    }

    /**
     * A partial frame is buffered across pump calls and completes once
     * the rest arrives.
     */
    #[test]
    fn test_partial_frame_resumes() {
        let mut h = harness(true);

        let json = serde_json::to_vec(
            &json!({"type": "set_breakpoint", "payload": {"id": "X", "file_path": "f", "line_number": 1}}),
        )
        .unwrap();
        let framed = frame::encode_text(&json);
        let (head, tail) = framed.split_at(5);

        h.input.lock().unwrap().extend_from_slice(head);
        assert!(h.transport.process_messages().is_empty());
        assert!(!h.transport.read_buf.is_empty());

        h.input.lock().unwrap().extend_from_slice(tail);
        let events = h.transport.process_messages();
        assert_eq!(events.len(), 1);
        assert!(h.transport.read_buf.is_empty());
    }

    /**
     * A close frame (and a peer hangup) tears the link down and
     * schedules a retry.
     */
    #[test]
    fn test_close_frame_schedules_reconnect() {
        let mut h = harness(true);

        h.input.lock().unwrap().extend_from_slice(&[0x88, 0x00]);
        h.transport.process_messages();

        assert!(!h.transport.is_connected());
        assert!(h.transport.link.is_none());
        assert_eq!(h.transport.reconnect_attempts, 1);
        assert!(h.transport.next_retry_at.is_some());
    }

    /**
     * Heartbeats carry the agent id and the memory metrics object.
     */
    #[test]
    fn test_heartbeat_shape() {
        let mut h = harness(true);

        h.transport.send_heartbeat();

        let written = written_envelopes(&h);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["type"], "heartbeat");
        assert_eq!(written[0]["payload"]["agent_id"], "agent-1");
        assert!(written[0]["payload"]["metrics"]["memory_mb"].is_number());
        assert!(written[0]["payload"]["metrics"]["peak_memory_mb"].is_number());
        assert!(written[0]["timestamp"].is_u64());
    }

    /**
     * The retry budget is finite: once spent, nothing further is
     * scheduled and sends keep queueing.
     */
    #[test]
    fn test_reconnect_budget_exhausts() {
        let config = Arc::new(Config {
            api_key: "k".into(),
            max_reconnect_attempts: 2,
            ..Config::default()
        });
        let mut transport = Transport::new(config, "a".into(), "h".into());

        transport.schedule_reconnect();
        transport.schedule_reconnect();
        assert_eq!(transport.reconnect_attempts, 2);
        assert!(transport.next_retry_at.is_some());

        transport.schedule_reconnect();
        assert_eq!(transport.reconnect_attempts, 2);
        assert!(transport.next_retry_at.is_none());

        transport.send("exception", json!({"seq": 1}));
        assert_eq!(transport.queue.len(), 1);
    }
}
