//! Per-method constant pool.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::ConstantIndex;

/// A pooled constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constant {
    /// A string literal or identifier name.
    String(String),
    /// A regex literal. Matching is a host concern; the compiler only
    /// caches the constructed literal per method.
    Regex {
        /// The pattern between the slashes.
        pattern: String,
        /// The trailing flags.
        flags: String,
    },
}

/// Deduplicating pool of constants for one method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    /// Dedup index; rebuilt lazily, not serialised.
    #[serde(skip)]
    index: FxHashMap<String, u32>,
}

impl ConstantPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string constant.
    pub fn add_string(&mut self, value: &str) -> ConstantIndex {
        let key = format!("s\u{0}{value}");
        self.add(key, || Constant::String(value.to_string()))
    }

    /// Intern a regex constant.
    pub fn add_regex(&mut self, pattern: &str, flags: &str) -> ConstantIndex {
        let key = format!("r\u{0}{pattern}\u{0}{flags}");
        self.add(key, || Constant::Regex {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
        })
    }

    fn add(&mut self, key: String, make: impl FnOnce() -> Constant) -> ConstantIndex {
        if let Some(&idx) = self.index.get(&key) {
            return ConstantIndex(idx);
        }
        let idx = self.constants.len() as u32;
        self.constants.push(make());
        self.index.insert(key, idx);
        ConstantIndex(idx)
    }

    /// Look up a constant.
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get(index.0 as usize)
    }

    /// The string value at `index`, when it is a string constant.
    pub fn get_string(&self, index: ConstantIndex) -> Option<&str> {
        match self.get(index) {
            Some(Constant::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Number of pooled constants.
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// True when nothing has been pooled.
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.add_string("hello");
        let b = pool.add_string("hello");
        let c = pool.add_string("world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get_string(a), Some("hello"));
    }

    #[test]
    fn test_regex_keyed_on_pattern_and_flags() {
        let mut pool = ConstantPool::new();
        let a = pool.add_regex("ab+", "g");
        let b = pool.add_regex("ab+", "i");
        let c = pool.add_regex("ab+", "g");

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_strings_and_regexes_do_not_collide() {
        let mut pool = ConstantPool::new();
        let s = pool.add_string("ab+\u{0}g");
        let r = pool.add_regex("ab+", "g");
        assert_ne!(s, r);
    }
}
