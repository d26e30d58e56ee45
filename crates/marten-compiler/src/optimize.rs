//! Per-compilation scratch state.
//!
//! Holds the return protocol, the break/continue stack, the long-jump
//! machinery for `finally` regions, and the cached regex literal slots.
//! The generator consults this on every non-local control transfer.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use marten_code::{Label, SlotIndex};
use marten_parser::OptimizationHints;

/// A position control can long-jump to, with the lexical depths recorded
/// when the target was created. Crossing a `finally` boundary routes
/// through the staged state machine instead of branching directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpTarget {
    /// The destination label.
    pub label: Label,
    /// Open try regions at the target.
    pub try_depth: usize,
    /// Open finally contexts at the target.
    pub finally_depth: usize,
}

/// An entry on the break/continue stack.
#[derive(Debug)]
pub struct BreakFrame {
    /// Label names attached to this construct.
    pub labels: Vec<String>,
    /// Where `break` lands.
    pub break_target: JumpTarget,
    /// Where `continue` lands; `None` for non-loop constructs.
    pub continue_target: Option<JumpTarget>,
    /// True for plain labelled statements, which unlabelled
    /// `break`/`continue` skip over.
    pub labelled_only: bool,
}

/// The staged-exit bookkeeping of one `finally` block being compiled.
#[derive(Debug)]
pub struct FinallyFrame {
    /// Leased slot holding the pending-exit code (0 = normal).
    pub state_slot: SlotIndex,
    /// Entry label of the finally body.
    pub finally_label: Label,
    /// Try-region depth just outside this finally's region.
    pub outer_try_depth: usize,
    /// Registered non-local exits, dispatched after the body completes.
    pub exits: Vec<JumpTarget>,
}

impl FinallyFrame {
    /// Register an exit target, returning its dispatch code (codes start
    /// at 1; 0 is the normal fall-through).
    pub fn register_exit(&mut self, target: JumpTarget) -> i32 {
        if let Some(idx) = self.exits.iter().position(|t| *t == target) {
            return idx as i32 + 1;
        }
        self.exits.push(target);
        self.exits.len() as i32
    }
}

/// Per-compilation scratch state.
pub struct OptimizationInfo {
    /// Name of the function being compiled.
    pub function_name: Rc<str>,
    /// Source path of the script.
    pub source_path: Rc<str>,
    /// Strict-mode flag for the body.
    pub strict: bool,
    /// Target of the return protocol.
    pub return_target: JumpTarget,
    /// Slot the return value is staged in.
    pub return_slot: SlotIndex,
    /// Break/continue stack.
    pub break_stack: Vec<BreakFrame>,
    /// Long-jump callbacks for the `finally` blocks currently open.
    pub finally_stack: Vec<FinallyFrame>,
    /// Open try regions at the current emission point (the finally-depth
    /// threshold: tells "inside" from "outside" a region).
    pub try_depth: usize,
    /// Labels waiting to be attached to the next breakable construct.
    pub pending_labels: Vec<String>,
    /// Method-optimization hints from the parser.
    pub hints: OptimizationHints,
    /// Cached regex literal slots, keyed by pattern and flags.
    pub regex_slots: FxHashMap<(String, String), SlotIndex>,
}

impl OptimizationInfo {
    /// Create scratch state for one compilation.
    pub fn new(
        function_name: Rc<str>,
        source_path: Rc<str>,
        strict: bool,
        return_label: Label,
        return_slot: SlotIndex,
        hints: OptimizationHints,
    ) -> Self {
        Self {
            function_name,
            source_path,
            strict,
            return_target: JumpTarget {
                label: return_label,
                try_depth: 0,
                finally_depth: 0,
            },
            return_slot,
            break_stack: Vec::new(),
            finally_stack: Vec::new(),
            try_depth: 0,
            pending_labels: Vec::new(),
            hints,
            regex_slots: FxHashMap::default(),
        }
    }

    /// The current jump context (used when creating new targets).
    pub fn here(&self, label: Label) -> JumpTarget {
        JumpTarget {
            label,
            try_depth: self.try_depth,
            finally_depth: self.finally_stack.len(),
        }
    }

    /// Find the frame a `break` resolves to.
    pub fn break_frame(&self, label: Option<&str>) -> Option<&BreakFrame> {
        match label {
            Some(name) => self
                .break_stack
                .iter()
                .rev()
                .find(|f| f.labels.iter().any(|l| l == name)),
            None => self.break_stack.iter().rev().find(|f| !f.labelled_only),
        }
    }

    /// Find the frame a `continue` resolves to.
    pub fn continue_frame(&self, label: Option<&str>) -> Option<&BreakFrame> {
        match label {
            Some(name) => self
                .break_stack
                .iter()
                .rev()
                .find(|f| f.labels.iter().any(|l| l == name)),
            None => self
                .break_stack
                .iter()
                .rev()
                .find(|f| f.continue_target.is_some()),
        }
    }

    /// Whether a label name is already in scope.
    pub fn label_in_scope(&self, name: &str) -> bool {
        self.pending_labels.iter().any(|l| l == name)
            || self
                .break_stack
                .iter()
                .any(|f| f.labels.iter().any(|l| l == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> OptimizationInfo {
        OptimizationInfo::new(
            Rc::from("f"),
            Rc::from("test.js"),
            false,
            Label(0),
            SlotIndex(1),
            OptimizationHints::default(),
        )
    }

    #[test]
    fn test_unlabelled_break_skips_labelled_only_frames() {
        let mut info = info();
        info.break_stack.push(BreakFrame {
            labels: vec!["loop".to_string()],
            break_target: info.here(Label(1)),
            continue_target: Some(info.here(Label(2))),
            labelled_only: false,
        });
        info.break_stack.push(BreakFrame {
            labels: vec!["tag".to_string()],
            break_target: info.here(Label(3)),
            continue_target: None,
            labelled_only: true,
        });

        assert_eq!(info.break_frame(None).unwrap().break_target.label, Label(1));
        assert_eq!(
            info.break_frame(Some("tag")).unwrap().break_target.label,
            Label(3)
        );
        assert!(info.continue_frame(Some("tag")).unwrap().continue_target.is_none());
    }

    #[test]
    fn test_register_exit_dedups() {
        let mut frame = FinallyFrame {
            state_slot: SlotIndex(4),
            finally_label: Label(9),
            outer_try_depth: 0,
            exits: Vec::new(),
        };
        let target = JumpTarget {
            label: Label(5),
            try_depth: 0,
            finally_depth: 0,
        };
        assert_eq!(frame.register_exit(target), 1);
        assert_eq!(frame.register_exit(target), 1);
        let other = JumpTarget {
            label: Label(6),
            try_depth: 0,
            finally_depth: 0,
        };
        assert_eq!(frame.register_exit(other), 2);
    }
}
