/*!
 * Error types for the agent engine.
 *
 * These never reach the host application through a capture path; the
 * public free functions swallow internal failures (logging them only in
 * debug mode). They do surface from `init`, where a bad configuration is
 * a programmer error worth failing loudly on.
 */
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration failed validation at construction.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// Opening the socket (or resolving the endpoint) failed.
    #[error("connect to collector failed: {0}")]
    TransportConnect(String),

    /// The full-duplex upgrade was refused or malformed.
    #[error("collector handshake failed: {0}")]
    TransportHandshake(String),

    /// The collector rejected our credentials. This latches: no further
    /// reconnect attempts are made for the life of the process.
    #[error("collector rejected authentication: {0}")]
    TransportAuth(String),

    #[error("socket write failed")]
    TransportWrite(#[source] io::Error),

    #[error("socket read failed")]
    TransportRead(#[source] io::Error),

    /// A payload could not be encoded; the single message is dropped.
    #[error("payload serialization failed")]
    Serialize(#[from] serde_json::Error),

    /// One field could not be reflected; the field is dropped, the
    /// capture proceeds.
    #[error("variable reflection failed: {0}")]
    ReflectFailure(String),

    /// The breakpoint capture budget for the current window is spent.
    #[error("breakpoint capture rate limit exceeded")]
    RateLimited,
}
