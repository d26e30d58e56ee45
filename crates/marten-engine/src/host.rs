//! Host type registration.
//!
//! Exposes a host record type as a JS prototype: methods become native
//! jump-table groups, accessors become virtual accessor pairs, and the
//! constructor (unless suppressed) becomes a global function whose
//! instances use the new prototype.

use std::cell::RefCell;
use std::rc::Rc;

use marten_code::{PrototypeId, StaticType};
use marten_core::proto::{
    MethodOverload, MethodTarget, PropertyAttributes, PropertyValue,
};
use marten_core::realm::NativeFn;
use marten_core::{ScriptObject, Value};

use crate::engine::ScriptEngine;

/// First-character conventions for exported names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseConvention {
    /// Lowercase the first character of methods for standard-library
    /// types; preserve everything else.
    #[default]
    Auto,
    /// Uppercase the first character.
    Upper,
    /// Lowercase the first character.
    Lower,
    /// Preserve the spelling.
    Unchanged,
}

impl CaseConvention {
    fn apply(self, name: &str, standard_library: bool, is_method: bool) -> String {
        let change_first = |upper: bool| {
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => {
                    let first: String = if upper {
                        first.to_uppercase().collect()
                    } else {
                        first.to_lowercase().collect()
                    };
                    first + chars.as_str()
                }
                None => String::new(),
            }
        };
        match self {
            Self::Unchanged => name.to_string(),
            Self::Upper => change_first(true),
            Self::Lower => change_first(false),
            Self::Auto => {
                if standard_library && is_method {
                    change_first(false)
                } else {
                    name.to_string()
                }
            }
        }
    }
}

/// A native method exposed by a host type.
pub struct HostMethod {
    /// Exported name (before case conversion).
    pub name: String,
    /// Declared arity.
    pub arity: u8,
    /// Declared parameter types.
    pub param_types: Vec<StaticType>,
    /// Declared return type.
    pub return_type: StaticType,
    /// The entry point.
    pub func: NativeFn,
}

impl HostMethod {
    /// Create a method with an untyped signature.
    pub fn new(name: impl Into<String>, arity: u8, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            arity,
            param_types: Vec::new(),
            return_type: StaticType::Any,
            func,
        }
    }

    /// Declare the signature the compiler dispatches and types against.
    pub fn typed(mut self, param_types: Vec<StaticType>, return_type: StaticType) -> Self {
        self.param_types = param_types;
        self.return_type = return_type;
        self
    }
}

/// Description of a host record type (the `typeHandle` of the embedding
/// API).
pub struct HostTypeBuilder {
    name: String,
    standard_library: bool,
    constructor: Option<HostMethod>,
    methods: Vec<HostMethod>,
    fields: Vec<(String, StaticType)>,
    accessors: Vec<(String, Option<HostMethod>, Option<HostMethod>)>,
}

impl HostTypeBuilder {
    /// Start a description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            standard_library: false,
            constructor: None,
            methods: Vec::new(),
            fields: Vec::new(),
            accessors: Vec::new(),
        }
    }

    /// Mark as a standard-library type (`Auto` casing applies).
    pub fn standard_library(mut self) -> Self {
        self.standard_library = true;
        self
    }

    /// Set the constructor implementation.
    pub fn constructor(mut self, method: HostMethod) -> Self {
        self.constructor = Some(method);
        self
    }

    /// Add an instance method. Methods sharing a name form a jump-table
    /// group dispatched on static argument types.
    pub fn method(mut self, method: HostMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Add a typed instance field.
    pub fn field(mut self, name: impl Into<String>, static_type: StaticType) -> Self {
        self.fields.push((name.into(), static_type));
        self
    }

    /// Add an accessor pair.
    pub fn accessor(
        mut self,
        name: impl Into<String>,
        getter: Option<HostMethod>,
        setter: Option<HostMethod>,
    ) -> Self {
        self.accessors.push((name.into(), getter, setter));
        self
    }
}

/// Registration options.
pub struct HostTypeOptions {
    /// Override the exported name.
    pub name: Option<String>,
    /// Do not install a global binding.
    pub hidden: bool,
    /// Expose as a namespace object instead of a constructor.
    pub no_constructors: bool,
    /// Attribute defaults for exported fields.
    pub is_enumerable: bool,
    /// Attribute defaults for exported fields.
    pub is_configurable: bool,
    /// Attribute defaults for exported fields.
    pub is_writable: bool,
    /// Casing of method names.
    pub first_character: CaseConvention,
    /// Casing of field names.
    pub first_field_character: CaseConvention,
}

impl Default for HostTypeOptions {
    fn default() -> Self {
        Self {
            name: None,
            hidden: false,
            no_constructors: false,
            is_enumerable: false,
            is_configurable: true,
            is_writable: true,
            first_character: CaseConvention::Auto,
            first_field_character: CaseConvention::Auto,
        }
    }
}

impl ScriptEngine {
    /// Expose a host record type as a JS prototype.
    pub fn register_host_type(
        &mut self,
        ty: HostTypeBuilder,
        options: HostTypeOptions,
    ) -> PrototypeId {
        let display = options.name.clone().unwrap_or_else(|| ty.name.clone());
        let proto_name = self.realm.intern(&display);
        let object_proto = self.realm.object_proto;
        let proto = self.realm.registry.create(proto_name, Some(object_proto));

        for method in ty.methods {
            let exported =
                options
                    .first_character
                    .apply(&method.name, ty.standard_library, true);
            let interned = self.realm.intern(&exported);
            let native = self.realm.add_native(
                interned.clone(),
                method.arity,
                method.param_types.clone(),
                method.return_type,
                method.func,
            );
            self.realm.registry.add_property(
                proto,
                interned,
                PropertyValue::Method(MethodOverload {
                    target: MethodTarget::Native(native),
                    param_types: method.param_types,
                    return_type: method.return_type,
                }),
                PropertyAttributes::method(),
            );
        }

        for (name, getter, setter) in ty.accessors {
            let exported = options
                .first_character
                .apply(&name, ty.standard_library, true);
            let interned = self.realm.intern(&exported);
            let getter = getter.map(|g| {
                MethodTarget::Native(self.realm.add_native(
                    interned.clone(),
                    0,
                    Vec::new(),
                    g.return_type,
                    g.func,
                ))
            });
            let setter = setter.map(|s| {
                MethodTarget::Native(self.realm.add_native(
                    interned.clone(),
                    1,
                    s.param_types.clone(),
                    StaticType::Undefined,
                    s.func,
                ))
            });
            self.realm.registry.add_property(
                proto,
                interned,
                PropertyValue::Accessor { getter, setter },
                PropertyAttributes::accessor(),
            );
        }

        let field_attrs = PropertyAttributes {
            enumerable: options.is_enumerable,
            configurable: options.is_configurable,
            writable: options.is_writable,
            is_accessor: false,
        };
        for (name, static_type) in ty.fields {
            let exported =
                options
                    .first_field_character
                    .apply(&name, ty.standard_library, false);
            let interned = self.realm.intern(&exported);
            self.realm.registry.add_property(
                proto,
                interned,
                PropertyValue::Field(static_type),
                field_attrs,
            );
        }

        if options.no_constructors {
            if !options.hidden {
                let namespace =
                    Value::Object(Rc::new(RefCell::new(ScriptObject::new(proto))));
                self.set_global_value(&display, namespace);
            }
        } else {
            let ctor = ty.constructor.unwrap_or_else(|| {
                HostMethod::new(display.clone(), 0, Rc::new(|_, _, _| Ok(Value::Undefined)))
            });
            let interned = self.realm.intern(&display);
            let native = self.realm.add_native(
                interned,
                ctor.arity,
                ctor.param_types,
                ctor.return_type,
                ctor.func,
            );
            let object = self.realm.natives[native.0 as usize].object.clone();
            *object.instance_proto.borrow_mut() = Some(proto);
            if !options.hidden {
                self.set_global_value(&display, Value::Function(object));
            }
        }

        proto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_conventions() {
        assert_eq!(CaseConvention::Upper.apply("charAt", false, true), "CharAt");
        assert_eq!(CaseConvention::Lower.apply("CharAt", false, true), "charAt");
        assert_eq!(
            CaseConvention::Unchanged.apply("CharAt", true, true),
            "CharAt"
        );
        // Auto lowercases standard-library methods only.
        assert_eq!(CaseConvention::Auto.apply("CharAt", true, true), "charAt");
        assert_eq!(CaseConvention::Auto.apply("CharAt", false, true), "CharAt");
        assert_eq!(CaseConvention::Auto.apply("Value", true, false), "Value");
    }
}
