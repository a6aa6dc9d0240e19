/*!
 * Capture pipeline — everything between a live error and a wire-ready
 * record:
 *
 * - `reflect` — bounded variable reflection
 * - `stack` — backtrace conversion and argument reflection
 * - `fingerprint` — stable exception identity for deduplication
 * - `redact` — sensitive-key rewriting
 * - `request` — request-context probing
 * - `exception` — record assembly, dedup, sampling, severity mapping
 */

pub mod exception;
pub mod fingerprint;
pub mod redact;
pub mod reflect;
pub mod request;
pub mod stack;

pub use exception::{ErrorKind, Exception, ExceptionCapture};
pub use redact::REDACTED;
pub use reflect::Reflector;
pub use request::{EnvRequestSource, RequestSnapshot, RequestSource};
pub use stack::{collect_raw_frames, RawFrame, StackWalker};
