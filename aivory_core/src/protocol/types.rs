/**
 * Wire type definitions for the Aivory monitoring agent.
 *
 * These structures match the JSON schema the collector expects. Field
 * names on the wire are snake_case and map 1:1 to the struct fields,
 * so no serde renames are needed beyond the reserved word `type`.
 *
 * The outermost structure is `Envelope`, which wraps every message in
 * `{ type, payload, timestamp }`.
 */
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Envelope — the outer structure for every message on the socket
// ---------------------------------------------------------------------------

/**
 * The outer envelope exchanged with the collector in both directions:
 * ```json
 * { "type": "exception", "payload": { ... }, "timestamp": 1712345678901 }
 * ```
 *
 * `timestamp` is milliseconds since the Unix epoch, stamped when the
 * envelope is handed to the transport.
 */
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Message type, e.g. `"exception"`, `"breakpoint_hit"`, `"heartbeat"`.
    #[serde(rename = "type")]
    pub msg_type: String,

    /// The message body. Shape depends on `msg_type`.
    pub payload: Value,

    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity attached to every exception record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// VariableNode — one node of a captured variable tree
// ---------------------------------------------------------------------------

/**
 * A size-bounded, depth-bounded view of one captured value.
 *
 * Scalars carry a stringified `value`; containers carry `value = "Array(N)"`
 * plus an optional `children` mapping. `is_truncated` is set whenever the
 * source exceeded a size bound (string cap, depth cap, child-count cap).
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableNode {
    pub name: String,

    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    pub is_null: bool,

    pub is_truncated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, VariableNode>>,
}

impl VariableNode {
    /// A childless node with the given type and value.
    pub fn leaf(name: impl Into<String>, node_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            value: Some(value.into()),
            is_null: false,
            is_truncated: false,
            children: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StackFrame
// ---------------------------------------------------------------------------

/**
 * One frame of a captured stack trace, innermost first.
 *
 * `file_name` is the basename of `file_path`. `is_native` marks frames
 * with no resolvable source file (synthetic or runtime-internal code).
 */
#[derive(Debug, Clone, Serialize)]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    pub line_number: u32,

    pub column_number: u32,

    pub is_native: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_variables: Option<BTreeMap<String, VariableNode>>,
}

// ---------------------------------------------------------------------------
// ExceptionRecord
// ---------------------------------------------------------------------------

/**
 * The payload of an `exception` envelope.
 *
 * Built once per capture and handed to the transport; never retained.
 * The transport layer adds `agent_id`, `environment`, and `hostname`
 * before the record leaves the process.
 */
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionRecord {
    pub exception_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    pub line_number: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    pub severity: Severity,

    pub runtime: String,

    pub runtime_version: String,

    pub stack_trace: Vec<StackFrame>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_variables: Option<BTreeMap<String, VariableNode>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_context: Option<Value>,
}

// ---------------------------------------------------------------------------
// SnapshotRecord
// ---------------------------------------------------------------------------

/**
 * The payload of a `snapshot` or `breakpoint_hit` envelope: a point-in-time
 * capture not caused by an exception. The transport adds `agent_id`.
 */
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_id: Option<String>,

    /// Milliseconds since the Unix epoch at capture time.
    pub captured_at: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    pub line_number: u32,

    pub stack_trace: Vec<StackFrame>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_variables: Option<BTreeMap<String, VariableNode>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_context: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u32>,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// The affected user attached to captures after `set_user`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /**
     * Verifies the envelope serializes with the reserved `type` key.
     */
    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope {
            msg_type: "heartbeat".into(),
            payload: serde_json::json!({"agent_id": "a"}),
            timestamp: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["payload"]["agent_id"], "a");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
    }

    /**
     * Verifies severity serializes lowercase and optional frame fields
     * are omitted rather than null.
     */
    #[test]
    fn test_frame_and_severity_wire_shape() {
        let frame = StackFrame {
            class_name: Some("app::Service".into()),
            method_name: Some("run".into()),
            file_path: None,
            file_name: None,
            line_number: 0,
            column_number: 0,
            is_native: true,
            local_variables: None,
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["class_name"], "app::Service");
        assert_eq!(json["is_native"], true);
        assert!(json.get("file_path").is_none());

        assert_eq!(serde_json::to_value(Severity::Critical).unwrap(), "critical");
        assert_eq!(serde_json::to_value(Severity::Info).unwrap(), "info");
    }
}
