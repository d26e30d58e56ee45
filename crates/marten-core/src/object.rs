//! Object instances.

use marten_code::PrototypeId;

use crate::value::Value;

/// An object instance.
///
/// The field vector follows the owning prototype's record layout; it grows
/// lazily, so instances created before a field was materialised stay
/// valid. Arrays additionally carry an element vector.
#[derive(Debug)]
pub struct ScriptObject {
    /// The prototype whose layout this instance uses.
    pub proto: PrototypeId,
    /// Physical fields, indexed by the prototype chain's field offsets.
    pub fields: Vec<Value>,
    /// Dense elements, for arrays and the `arguments` object.
    pub elements: Option<Vec<Value>>,
}

impl ScriptObject {
    /// Create a plain instance of `proto`.
    pub fn new(proto: PrototypeId) -> Self {
        Self {
            proto,
            fields: Vec::new(),
            elements: None,
        }
    }

    /// Create an array-like instance of `proto`.
    pub fn new_array(proto: PrototypeId, elements: Vec<Value>) -> Self {
        Self {
            proto,
            fields: Vec::new(),
            elements: Some(elements),
        }
    }

    /// Read a field; absent slots read as `undefined`.
    pub fn field(&self, index: usize) -> Value {
        self.fields.get(index).cloned().unwrap_or(Value::Undefined)
    }

    /// Write a field, growing the vector as needed.
    pub fn set_field(&mut self, index: usize, value: Value) {
        if index >= self.fields.len() {
            self.fields.resize(index + 1, Value::Undefined);
        }
        self.fields[index] = value;
    }

    /// Read an element; out-of-range reads are `undefined`.
    pub fn element(&self, index: usize) -> Value {
        self.elements
            .as_ref()
            .and_then(|e| e.get(index).cloned())
            .unwrap_or(Value::Undefined)
    }

    /// Write an element, growing with holes as needed.
    pub fn set_element(&mut self, index: usize, value: Value) {
        let elements = self.elements.get_or_insert_with(Vec::new);
        if index >= elements.len() {
            elements.resize(index + 1, Value::Undefined);
        }
        elements[index] = value;
    }

    /// Array length, when this is array-like.
    pub fn length(&self) -> Option<usize> {
        self.elements.as_ref().map(|e| e.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_grow_lazily() {
        let mut obj = ScriptObject::new(PrototypeId(0));
        assert_eq!(obj.field(3), Value::Undefined);
        obj.set_field(3, Value::Int(7));
        assert_eq!(obj.field(3), Value::Int(7));
        assert_eq!(obj.field(1), Value::Undefined);
        assert_eq!(obj.fields.len(), 4);
    }

    #[test]
    fn test_elements() {
        let mut arr = ScriptObject::new_array(PrototypeId(0), vec![Value::Int(1)]);
        assert_eq!(arr.length(), Some(1));
        arr.set_element(2, Value::Int(3));
        assert_eq!(arr.length(), Some(3));
        assert_eq!(arr.element(1), Value::Undefined);
    }
}
