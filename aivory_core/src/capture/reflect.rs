/**
 * Variable reflection — converts live values into size-bounded,
 * depth-bounded `VariableNode` trees.
 *
 * Anything `Serialize` enters the reflector as a `serde_json::Value`
 * (the same dynamic currency the context layer uses), which keeps the
 * policy deterministic:
 *
 * - past the depth bound: a truncated `<max depth exceeded>` leaf
 * - scalars: stringified, strings capped at 200 bytes with a `...`
 *   suffix counted inside the cap
 * - containers: `value = "Array(N)"`, children walked only while under
 *   the depth bound and only for containers of at most 10 elements;
 *   positional elements are named `arg0`, `arg1`, ...
 */
use std::collections::BTreeMap;

use serde_json::Value;

use crate::protocol::types::VariableNode;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Byte cap on stringified scalar values in generic captures.
pub const SCALAR_VALUE_CAP: usize = 200;

/// Byte cap on an exception's own message (no ellipsis on this path).
pub const MESSAGE_VALUE_CAP: usize = 500;

/// Containers larger than this keep their summary but lose their children.
pub const CONTAINER_CHILD_CAP: usize = 10;

/// Leaf value emitted when reflection runs past the depth bound.
pub const MAX_DEPTH_MARKER: &str = "<max depth exceeded>";

// ---------------------------------------------------------------------------
// Reflector
// ---------------------------------------------------------------------------

/// Stateless apart from the configured depth bound.
#[derive(Debug, Clone, Copy)]
pub struct Reflector {
    max_depth: u32,
}

impl Reflector {
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /**
     * Reflects one value at the given depth.
     *
     * `depth` counts from 0 at the roots of a variable tree; every call
     * past `max_depth` yields the truncated marker leaf instead of
     * descending further.
     */
    pub fn reflect(&self, name: &str, value: &Value, depth: u32) -> VariableNode {
        if depth > self.max_depth {
            return VariableNode {
                name: name.to_string(),
                node_type: "unknown".into(),
                value: Some(MAX_DEPTH_MARKER.into()),
                is_null: false,
                is_truncated: true,
                children: None,
            };
        }

        match value {
            Value::Null => VariableNode {
                name: name.to_string(),
                node_type: "null".into(),
                value: Some("null".into()),
                is_null: true,
                is_truncated: false,
                children: None,
            },

            Value::Bool(b) => VariableNode::leaf(name, "bool", if *b { "true" } else { "false" }),

            Value::Number(n) => {
                let node_type = if n.is_f64() { "float" } else { "int" };
                VariableNode::leaf(name, node_type, n.to_string())
            }

            Value::String(s) => {
                let (value, truncated) = truncate_with_ellipsis(s, SCALAR_VALUE_CAP);
                VariableNode {
                    name: name.to_string(),
                    node_type: "string".into(),
                    value: Some(value),
                    is_null: false,
                    is_truncated: truncated,
                    children: None,
                }
            }

            Value::Array(items) => {
                let children = if depth < self.max_depth && items.len() <= CONTAINER_CHILD_CAP {
                    Some(
                        items
                            .iter()
                            .enumerate()
                            .map(|(i, item)| {
                                let child_name = format!("arg{i}");
                                let node = self.reflect(&child_name, item, depth + 1);
                                (child_name, node)
                            })
                            .collect(),
                    )
                } else {
                    None
                };

                self.container_node(name, "array", items.len(), children)
            }

            Value::Object(map) => {
                let children = if depth < self.max_depth && map.len() <= CONTAINER_CHILD_CAP {
                    Some(
                        map.iter()
                            .map(|(key, item)| (key.clone(), self.reflect(key, item, depth + 1)))
                            .collect(),
                    )
                } else {
                    None
                };

                self.container_node(name, "object", map.len(), children)
            }
        }
    }

    fn container_node(
        &self,
        name: &str,
        node_type: &str,
        len: usize,
        children: Option<BTreeMap<String, VariableNode>>,
    ) -> VariableNode {
        VariableNode {
            name: name.to_string(),
            node_type: node_type.into(),
            value: Some(format!("Array({len})")),
            is_null: false,
            /* an elided child walk is a truncation the collector should see */
            is_truncated: children.is_none() && len > 0,
            children,
        }
    }
}

// ---------------------------------------------------------------------------
// Truncation helpers
// ---------------------------------------------------------------------------

/**
 * Caps `s` at `cap` bytes with a `...` suffix counted inside the cap,
 * so the emitted value never exceeds `cap`. Backs off to a char
 * boundary so multi-byte text cannot be split mid-character.
 */
pub fn truncate_with_ellipsis(s: &str, cap: usize) -> (String, bool) {
    if s.len() <= cap {
        return (s.to_string(), false);
    }
    let cut = floor_char_boundary(s, cap.saturating_sub(3));
    (format!("{}...", &s[..cut]), true)
}

/**
 * Caps `s` at `cap` bytes with no suffix. Used for the exception's own
 * message field.
 */
pub fn truncate_plain(s: &str, cap: usize) -> (String, bool) {
    if s.len() <= cap {
        return (s.to_string(), false);
    }
    let cut = floor_char_boundary(s, cap);
    (s[..cut].to_string(), true)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reflector() -> Reflector {
        Reflector::new(3)
    }

    /**
     * Null becomes an explicit null leaf.
     */
    #[test]
    fn test_reflect_null() {
        let node = reflector().reflect("x", &Value::Null, 0);
        assert!(node.is_null);
        assert_eq!(node.node_type, "null");
        assert_eq!(node.value.as_deref(), Some("null"));
    }

    #[test]
    fn test_reflect_scalars() {
        let r = reflector();

        assert_eq!(r.reflect("b", &json!(true), 0).value.as_deref(), Some("true"));
        assert_eq!(r.reflect("i", &json!(42), 0).node_type, "int");
        assert_eq!(r.reflect("i", &json!(42), 0).value.as_deref(), Some("42"));
        assert_eq!(r.reflect("f", &json!(1.5), 0).node_type, "float");
    }

    /**
     * A 600-char string collapses to exactly 200 bytes ending in `...`.
     */
    #[test]
    fn test_reflect_long_string_truncated() {
        let long = "a".repeat(600);
        let node = reflector().reflect("s", &json!(long), 0);

        let value = node.value.unwrap();
        assert_eq!(value.len(), SCALAR_VALUE_CAP);
        assert!(value.ends_with("..."));
        assert!(node.is_truncated);
    }

    /**
     * Containers summarize as Array(N); small ones keep reflected children.
     */
    #[test]
    fn test_reflect_array_children() {
        let node = reflector().reflect("v", &json!([1, "two", null]), 0);

        assert_eq!(node.value.as_deref(), Some("Array(3)"));
        let children = node.children.unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(children["arg0"].value.as_deref(), Some("1"));
        assert!(children["arg2"].is_null);
    }

    /**
     * Containers over the child cap keep the summary but drop children.
     */
    #[test]
    fn test_reflect_oversized_container_has_no_children() {
        let big: Vec<u32> = (0..11).collect();
        let node = reflector().reflect("v", &json!(big), 0);

        assert_eq!(node.value.as_deref(), Some("Array(11)"));
        assert!(node.children.is_none());
        assert!(node.is_truncated);
    }

    /**
     * The tree never descends past the configured depth; nesting stops
     * at the bound and calls past it yield the marker leaf.
     */
    #[test]
    fn test_reflect_depth_bound() {
        let r = Reflector::new(1);
        let nested = json!({ "a": { "b": { "c": 1 } } });

        let node = r.reflect("root", &nested, 0);
        let a = &node.children.as_ref().unwrap()["a"];
        /* depth 1 == max: summary only, no grandchildren */
        assert!(a.children.is_none());

        let marker = r.reflect("deep", &json!(1), 2);
        assert_eq!(marker.value.as_deref(), Some(MAX_DEPTH_MARKER));
        assert!(marker.is_truncated);
    }

    #[test]
    fn test_truncate_plain_no_suffix() {
        let (v, truncated) = truncate_plain(&"x".repeat(700), MESSAGE_VALUE_CAP);
        assert_eq!(v.len(), MESSAGE_VALUE_CAP);
        assert!(!v.ends_with("..."));
        assert!(truncated);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        /* 2-byte chars; a naive byte slice at 199 would panic */
        let s = "é".repeat(300);
        let (v, truncated) = truncate_with_ellipsis(&s, SCALAR_VALUE_CAP);
        assert!(truncated);
        assert!(v.len() <= SCALAR_VALUE_CAP);
        assert!(v.ends_with("..."));
    }
}
