/**
 * Exception fingerprinting.
 *
 * Structurally identical exceptions (same type, same top three frames)
 * must hash to the same value so the capture pipeline can suppress
 * duplicates. The identity string is
 *
 * ```text
 * <type>:<class0>::<method0>:<class1>::<method1>:<class2>::<method2>
 * ```
 *
 * hashed with SHA-256 and hex-encoded. Missing classes, methods, or
 * whole frames contribute empty strings, keeping the layout stable.
 */
use sha2::{Digest, Sha256};

use crate::protocol::types::StackFrame;

/// Frames that participate in the identity.
pub const FINGERPRINT_FRAME_COUNT: usize = 3;

pub fn fingerprint(exception_type: &str, frames: &[StackFrame]) -> String {
    let mut identity = String::from(exception_type);

    for i in 0..FINGERPRINT_FRAME_COUNT {
        identity.push(':');
        if let Some(frame) = frames.get(i) {
            identity.push_str(frame.class_name.as_deref().unwrap_or(""));
            identity.push_str("::");
            identity.push_str(frame.method_name.as_deref().unwrap_or(""));
        } else {
            identity.push_str("::");
        }
    }

    hex::encode(Sha256::digest(identity.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(class: Option<&str>, method: Option<&str>) -> StackFrame {
        StackFrame {
            class_name: class.map(str::to_string),
            method_name: method.map(str::to_string),
            file_path: None,
            file_name: None,
            line_number: 0,
            column_number: 0,
            is_native: true,
            local_variables: None,
        }
    }

    /**
     * Same type + same top three frames hash identically, regardless of
     * anything deeper in the stack.
     */
    #[test]
    fn test_fingerprint_deterministic() {
        let top = vec![
            frame(Some("app::A"), Some("m")),
            frame(Some("app::B"), Some("n")),
            frame(Some("app::C"), Some("o")),
        ];

        let mut longer = top.clone();
        longer.push(frame(Some("app::D"), Some("p")));

        assert_eq!(fingerprint("T", &top), fingerprint("T", &longer));
    }

    #[test]
    fn test_fingerprint_distinguishes_type_and_frames() {
        let frames = vec![frame(Some("app::A"), Some("m"))];

        assert_ne!(fingerprint("T", &frames), fingerprint("U", &frames));
        assert_ne!(
            fingerprint("T", &frames),
            fingerprint("T", &[frame(Some("app::A"), Some("other"))])
        );
    }

    /**
     * Missing pieces contribute empty strings rather than shifting the
     * layout, so a one-frame trace and an empty trace still differ.
     */
    #[test]
    fn test_fingerprint_missing_parts() {
        let partial = vec![frame(None, Some("m"))];

        let a = fingerprint("T", &partial);
        let b = fingerprint("T", &[]);
        assert_ne!(a, b);

        /* 64 hex chars of sha256 */
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
