//! Interned strings and deferred concatenations.
//!
//! Flat strings are `Rc<str>` interned per realm for cheap equality on
//! property names. A [`ConcatString`] is a rope-like builder produced by
//! the `+` operator on string-typed operands; it materialises to a flat
//! string on first string-valued use and caches the result.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet;

/// Per-realm string intern table.
#[derive(Debug, Default)]
pub struct Interner {
    strings: FxHashSet<Rc<str>>,
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning a shared handle.
    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let rc: Rc<str> = Rc::from(s);
        self.strings.insert(rc.clone());
        rc
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// One side of a concatenation node.
#[derive(Debug, Clone)]
enum StrPart {
    Flat(Rc<str>),
    Rope(ConcatString),
}

impl StrPart {
    fn len(&self) -> usize {
        match self {
            Self::Flat(s) => s.len(),
            Self::Rope(r) => r.len(),
        }
    }

    fn write_into(&self, out: &mut String) {
        match self {
            Self::Flat(s) => out.push_str(s),
            Self::Rope(r) => r.write_into(out),
        }
    }
}

#[derive(Debug)]
struct ConcatInner {
    left: StrPart,
    right: StrPart,
    len: usize,
    cache: RefCell<Option<Rc<str>>>,
}

/// A deferred string concatenation.
#[derive(Debug, Clone)]
pub struct ConcatString(Rc<ConcatInner>);

impl ConcatString {
    /// Concatenate two flat strings.
    pub fn from_flat(left: Rc<str>, right: Rc<str>) -> Self {
        let len = left.len() + right.len();
        Self(Rc::new(ConcatInner {
            left: StrPart::Flat(left),
            right: StrPart::Flat(right),
            len,
            cache: RefCell::new(None),
        }))
    }

    /// Prepend a flat string to a rope.
    pub fn prepend_flat(self, left: Rc<str>) -> Self {
        let len = left.len() + self.len();
        Self(Rc::new(ConcatInner {
            left: StrPart::Flat(left),
            right: StrPart::Rope(self),
            len,
            cache: RefCell::new(None),
        }))
    }

    /// Append a flat string to a rope.
    pub fn append_flat(self, right: Rc<str>) -> Self {
        let len = self.len() + right.len();
        Self(Rc::new(ConcatInner {
            left: StrPart::Rope(self),
            right: StrPart::Flat(right),
            len,
            cache: RefCell::new(None),
        }))
    }

    /// Join two ropes.
    pub fn append(self, right: ConcatString) -> Self {
        let len = self.len() + right.len();
        Self(Rc::new(ConcatInner {
            left: StrPart::Rope(self),
            right: StrPart::Rope(right),
            len,
            cache: RefCell::new(None),
        }))
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.0.len
    }

    /// True for an empty result.
    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// Whether this rope has already been materialised.
    pub fn is_materialized(&self) -> bool {
        self.0.cache.borrow().is_some()
    }

    fn write_into(&self, out: &mut String) {
        if let Some(cached) = self.0.cache.borrow().as_ref() {
            out.push_str(cached);
            return;
        }
        self.0.left.write_into(out);
        self.0.right.write_into(out);
    }

    /// Materialise to a flat string, caching the result.
    pub fn materialize(&self) -> Rc<str> {
        if let Some(cached) = self.0.cache.borrow().as_ref() {
            return cached.clone();
        }
        let mut out = String::with_capacity(self.0.len);
        self.0.left.write_into(&mut out);
        self.0.right.write_into(&mut out);
        let flat: Rc<str> = Rc::from(out.as_str());
        *self.0.cache.borrow_mut() = Some(flat.clone());
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_storage() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        let c = interner.intern("world");

        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_concat_is_lazy() {
        let rope = ConcatString::from_flat(Rc::from("ab"), Rc::from("cd"));
        assert_eq!(rope.len(), 4);
        assert!(!rope.is_materialized());
        assert_eq!(&*rope.materialize(), "abcd");
        assert!(rope.is_materialized());
    }

    #[test]
    fn test_materialize_is_cached() {
        let rope = ConcatString::from_flat(Rc::from("x"), Rc::from("y"));
        let first = rope.materialize();
        let second = rope.materialize();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_nested_ropes() {
        let left = ConcatString::from_flat(Rc::from("a"), Rc::from("b"));
        let rope = left.append_flat(Rc::from("c"));
        let rope = rope.append(ConcatString::from_flat(Rc::from("d"), Rc::from("e")));
        assert_eq!(rope.len(), 5);
        assert_eq!(&*rope.materialize(), "abcde");
    }
}
