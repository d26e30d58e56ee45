//! Lexical scope chain for local-variable resolution.
//!
//! `var` bindings live at the function scope, `let`/`const` at the
//! declaring block. Slot indices come from the method builder and stay
//! stable across emission passes.

use marten_code::SlotIndex;
use rustc_hash::FxHashMap;

/// A local binding.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    /// Frame slot.
    pub slot: SlotIndex,
    /// True for `const` bindings.
    pub is_const: bool,
}

/// One lexical scope.
#[derive(Debug)]
struct Scope {
    parent: Option<usize>,
    bindings: FxHashMap<String, Binding>,
    is_function: bool,
}

/// Chain of lexical scopes.
#[derive(Debug, Default)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
    current: Option<usize>,
}

impl ScopeChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a scope.
    pub fn enter(&mut self, is_function: bool) {
        let idx = self.scopes.len();
        self.scopes.push(Scope {
            parent: self.current,
            bindings: FxHashMap::default(),
            is_function,
        });
        self.current = Some(idx);
    }

    /// Exit the current scope.
    pub fn exit(&mut self) {
        if let Some(idx) = self.current {
            self.current = self.scopes[idx].parent;
        }
    }

    /// Bind a name in the current scope.
    pub fn declare(&mut self, name: &str, slot: SlotIndex, is_const: bool) {
        if let Some(idx) = self.current {
            self.scopes[idx]
                .bindings
                .insert(name.to_string(), Binding { slot, is_const });
        }
    }

    /// Bind a name in the function scope (for `var` hoisting).
    pub fn declare_hoisted(&mut self, name: &str, slot: SlotIndex) {
        let mut cursor = self.current;
        while let Some(idx) = cursor {
            if self.scopes[idx].is_function {
                self.scopes[idx]
                    .bindings
                    .insert(name.to_string(), Binding { slot, is_const: false });
                return;
            }
            cursor = self.scopes[idx].parent;
        }
    }

    /// Resolve a name through the chain.
    pub fn resolve(&self, name: &str) -> Option<Binding> {
        let mut cursor = self.current;
        while let Some(idx) = cursor {
            if let Some(binding) = self.scopes[idx].bindings.get(name) {
                return Some(*binding);
            }
            cursor = self.scopes[idx].parent;
        }
        None
    }

    /// Whether the name is bound in the innermost scope (redeclaration
    /// checks for `let`/`const`).
    pub fn declared_in_current(&self, name: &str) -> bool {
        self.current
            .is_some_and(|idx| self.scopes[idx].bindings.contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_scoping() {
        let mut chain = ScopeChain::new();
        chain.enter(true);
        chain.declare("x", SlotIndex(1), false);
        chain.enter(false);
        chain.declare("x", SlotIndex(2), true);
        assert_eq!(chain.resolve("x").unwrap().slot, SlotIndex(2));
        assert!(chain.resolve("x").unwrap().is_const);
        chain.exit();
        assert_eq!(chain.resolve("x").unwrap().slot, SlotIndex(1));
    }

    #[test]
    fn test_hoisted_binding_lands_in_function_scope() {
        let mut chain = ScopeChain::new();
        chain.enter(true);
        chain.enter(false);
        chain.declare_hoisted("v", SlotIndex(3));
        chain.exit();
        assert_eq!(chain.resolve("v").unwrap().slot, SlotIndex(3));
    }
}
