//! Stack-trace formatting.
//!
//! Walks the frames an unwind collected while crossing generated methods
//! (the method lookup table maps compiled handles back to user-defined
//! functions) and renders `at <function> (<path>:<line>)` lines.

use marten_core::StackFrame;

/// Render a stack string, innermost frame first.
pub fn format_stack(frames: &[StackFrame], path: &str) -> String {
    let mut out = String::new();
    for frame in frames {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("    at ");
        out.push_str(&frame.function);
        out.push_str(" (");
        out.push_str(path);
        out.push(':');
        out.push_str(&frame.line.to_string());
        out.push(')');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let frames = vec![
            StackFrame {
                function: "inner".to_string(),
                line: 3,
            },
            StackFrame {
                function: "<script>".to_string(),
                line: 10,
            },
        ];
        let stack = format_stack(&frames, "test.js");
        assert_eq!(
            stack,
            "    at inner (test.js:3)\n    at <script> (test.js:10)"
        );
    }
}
