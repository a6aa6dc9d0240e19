/*!
 * Protocol layer — data structures and constants.
 *
 * Everything related to *what* we send to the Aivory collector:
 * - `types` — Envelope, ExceptionRecord, SnapshotRecord, StackFrame, VariableNode
 * - `constants` — runtime/agent identifiers, message types, defaults
 */

pub mod constants;
pub mod types;
