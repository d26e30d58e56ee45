//! Per-engine runtime state.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use marten_code::{NativeId, PrototypeId, StaticType};

use crate::error::{ErrorKind, Unwind};
use crate::object::ScriptObject;
use crate::proto::{PropertyAttributes, PropertyBacking, PropertyValue, PrototypeRegistry};
use crate::string::Interner;
use crate::value::{FunctionKind, FunctionObject, FunctionRef, ObjectRef, Value};

/// Signature of a host native: `(realm, this, args) → value`.
pub type NativeFn = Rc<dyn Fn(&mut Realm, &Value, &[Value]) -> Result<Value, Unwind>>;

/// A registered host native.
pub struct NativeFunction {
    /// Display name.
    pub name: Rc<str>,
    /// Declared arity.
    pub arity: u8,
    /// Declared parameter types (drives call-site conversions and
    /// method-group dispatch).
    pub param_types: Vec<StaticType>,
    /// Declared return type.
    pub return_type: StaticType,
    /// The entry point.
    pub func: NativeFn,
    /// The function object exposing this native to script (stable
    /// identity).
    pub object: FunctionRef,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// The per-engine runtime: prototype registry, native table, interner,
/// and the global object.
pub struct Realm {
    /// Prototype registry.
    pub registry: PrototypeRegistry,
    /// String interner.
    pub interner: Interner,
    /// Host natives.
    pub natives: Vec<NativeFunction>,
    /// The global object instance.
    pub global: ObjectRef,
    /// Prototype of the global object.
    pub global_proto: PrototypeId,
    /// Root object prototype.
    pub object_proto: PrototypeId,
    /// Prototype of function values.
    pub function_proto: PrototypeId,
    /// Prototype resolved for string primitives.
    pub string_proto: PrototypeId,
    /// Prototype resolved for number primitives.
    pub number_proto: PrototypeId,
    /// Prototype resolved for boolean primitives.
    pub boolean_proto: PrototypeId,
    /// Prototype of array instances.
    pub array_proto: PrototypeId,
    /// Prototype of `arguments` objects.
    pub arguments_proto: PrototypeId,
    /// Prototype of regex literals.
    pub regexp_proto: PrototypeId,
    /// Instance prototypes of the error kinds.
    pub error_protos: FxHashMap<ErrorKind, PrototypeId>,
}

impl Realm {
    /// Create a realm with the well-known prototype skeleton. Properties
    /// (built-in methods) are populated by the embedding layer.
    pub fn new() -> Self {
        let mut registry = PrototypeRegistry::new();
        let mut interner = Interner::new();

        let object_proto = registry.create(interner.intern("Object"), None);
        let function_proto = registry.create(interner.intern("Function"), Some(object_proto));
        let string_proto = registry.create(interner.intern("String"), Some(object_proto));
        let number_proto = registry.create(interner.intern("Number"), Some(object_proto));
        let boolean_proto = registry.create(interner.intern("Boolean"), Some(object_proto));
        let array_proto = registry.create(interner.intern("Array"), Some(object_proto));
        let arguments_proto = registry.create(interner.intern("Arguments"), Some(object_proto));
        // Fixed layout: callee and caller occupy the first two fields.
        registry.add_property(
            arguments_proto,
            interner.intern("callee"),
            PropertyValue::Field(StaticType::Any),
            PropertyAttributes::method(),
        );
        registry.add_property(
            arguments_proto,
            interner.intern("caller"),
            PropertyValue::Field(StaticType::Any),
            PropertyAttributes::method(),
        );

        let regexp_proto = registry.create(interner.intern("RegExp"), Some(object_proto));
        // Fixed layout: source and flags occupy the first two fields.
        registry.add_property(
            regexp_proto,
            interner.intern("source"),
            PropertyValue::Field(StaticType::String),
            PropertyAttributes::method(),
        );
        registry.add_property(
            regexp_proto,
            interner.intern("flags"),
            PropertyValue::Field(StaticType::String),
            PropertyAttributes::method(),
        );

        // Error prototypes: message and stack are physical fields on the
        // base, each kind pins its `name` as a constant.
        let error_base = registry.create(interner.intern("Error"), Some(object_proto));
        registry.add_property(
            error_base,
            interner.intern("message"),
            PropertyValue::Field(StaticType::String),
            PropertyAttributes::data(),
        );
        registry.add_property(
            error_base,
            interner.intern("stack"),
            PropertyValue::Field(StaticType::String),
            PropertyAttributes::data(),
        );
        registry.add_property(
            error_base,
            interner.intern("name"),
            PropertyValue::Value(Value::Str(interner.intern("Error"))),
            PropertyAttributes::method(),
        );

        let mut error_protos = FxHashMap::default();
        error_protos.insert(ErrorKind::Generic, error_base);
        for kind in [
            ErrorKind::Syntax,
            ErrorKind::Type,
            ErrorKind::Range,
            ErrorKind::Reference,
            ErrorKind::Uri,
            ErrorKind::Eval,
        ] {
            let proto = registry.create(interner.intern(kind.name()), Some(error_base));
            registry.add_property(
                proto,
                interner.intern("name"),
                PropertyValue::Value(Value::Str(interner.intern(kind.name()))),
                PropertyAttributes::method(),
            );
            error_protos.insert(kind, proto);
        }

        let global_proto = registry.create(interner.intern("global"), Some(object_proto));
        let global = Rc::new(RefCell::new(ScriptObject::new(global_proto)));

        Self {
            registry,
            interner,
            natives: Vec::new(),
            global,
            global_proto,
            object_proto,
            function_proto,
            string_proto,
            number_proto,
            boolean_proto,
            array_proto,
            arguments_proto,
            regexp_proto,
            error_protos,
        }
    }

    /// Intern a string.
    pub fn intern(&mut self, s: &str) -> Rc<str> {
        self.interner.intern(s)
    }

    /// Register a host native.
    pub fn add_native(
        &mut self,
        name: Rc<str>,
        arity: u8,
        param_types: Vec<StaticType>,
        return_type: StaticType,
        func: NativeFn,
    ) -> NativeId {
        let id = NativeId(self.natives.len() as u32);
        let object = Rc::new(FunctionObject::new(
            FunctionKind::Native(id),
            name.clone(),
            None,
        ));
        self.natives.push(NativeFunction {
            name,
            arity,
            param_types,
            return_type,
            func,
            object,
        });
        id
    }

    /// Invoke a native.
    pub fn call_native(
        &mut self,
        id: NativeId,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        let func = self.natives[id.0 as usize].func.clone();
        func(self, this, args)
    }

    /// The prototype resolved for property access on a value.
    pub fn prototype_of(&self, value: &Value) -> Option<PrototypeId> {
        match value {
            Value::Object(obj) => Some(obj.borrow().proto),
            Value::Str(_) | Value::Concat(_) => Some(self.string_proto),
            Value::Int(_) | Value::Number(_) => Some(self.number_proto),
            Value::Bool(_) => Some(self.boolean_proto),
            Value::Function(_) => Some(self.function_proto),
            Value::Undefined | Value::Null => None,
        }
    }

    /// Construct a JS error object of the given kind.
    pub fn make_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        let proto = self.error_protos[&kind];
        let mut obj = ScriptObject::new(proto);
        let message_field = match self.registry.resolve(proto, "message") {
            Some((_, var)) => match var.backing {
                PropertyBacking::Field(index) => index.0 as usize,
                _ => 0,
            },
            None => 0,
        };
        obj.set_field(message_field, Value::Str(self.intern(message)));
        Value::Object(Rc::new(RefCell::new(obj)))
    }

    /// Construct and wrap a JS error for the unwind channel.
    pub fn throw_error(&mut self, kind: ErrorKind, message: &str) -> Unwind {
        Unwind::new(self.make_error(kind, message))
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_skeleton() {
        let realm = Realm::new();
        assert!(realm.registry.len() >= 10);
        assert_eq!(realm.registry.get(realm.object_proto).parent, None);
        assert_eq!(
            realm.registry.get(realm.string_proto).parent,
            Some(realm.object_proto)
        );
    }

    #[test]
    fn test_make_error_carries_message_and_name() {
        let mut realm = Realm::new();
        let err = realm.make_error(ErrorKind::Type, "nope");
        let obj = err.as_object().unwrap().borrow();
        let proto = obj.proto;
        assert_eq!(proto, realm.error_protos[&ErrorKind::Type]);
        // name resolves through the kind prototype's constant.
        let (_, name_var) = realm.registry.resolve(proto, "name").unwrap();
        match &name_var.backing {
            PropertyBacking::Constant(Value::Str(s)) => assert_eq!(&**s, "TypeError"),
            other => panic!("unexpected backing {other:?}"),
        }
    }

    #[test]
    fn test_prototype_of_primitives() {
        let realm = Realm::new();
        assert_eq!(
            realm.prototype_of(&Value::Str(Rc::from("x"))),
            Some(realm.string_proto)
        );
        assert_eq!(realm.prototype_of(&Value::Undefined), None);
    }
}
