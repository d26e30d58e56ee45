//! Minimal built-in surface.
//!
//! The core treats the standard library as an external collaborator; this
//! module installs just enough of it for scripts to exercise member
//! access over primitives: the primitive prototypes' most common methods,
//! the error constructors, and a handful of global functions. Everything
//! goes through the same registry protocol host types use.

use std::cell::RefCell;
use std::rc::Rc;

use marten_code::{NativeId, StaticType};
use marten_compiler::FunctionTable;
use marten_core::convert::{to_boolean, to_flat_string, to_integer, to_number};
use marten_core::proto::{
    MethodOverload, MethodTarget, PropertyAttributes, PropertyBacking, PropertyValue,
};
use marten_core::{Realm, ScriptObject, Unwind, Value};

/// Install the built-in surface into a fresh realm.
pub fn install(realm: &mut Realm, _functions: &mut FunctionTable) {
    install_global_constants(realm);
    install_global_functions(realm);
    install_object_proto(realm);
    install_string_proto(realm);
    install_number_proto(realm);
    install_boolean_proto(realm);
    install_array_proto(realm);
    install_error_constructors(realm);
}

// ==================== Registration helpers ====================

fn native(
    realm: &mut Realm,
    name: &str,
    arity: u8,
    param_types: Vec<StaticType>,
    return_type: StaticType,
    func: impl Fn(&mut Realm, &Value, &[Value]) -> Result<Value, Unwind> + 'static,
) -> NativeId {
    let name = realm.intern(name);
    realm.add_native(name, arity, param_types, return_type, Rc::new(func))
}

fn method(
    realm: &mut Realm,
    proto: marten_code::PrototypeId,
    name: &str,
    native_id: NativeId,
) {
    let interned = realm.intern(name);
    let entry = &realm.natives[native_id.0 as usize];
    let overload = MethodOverload {
        target: MethodTarget::Native(native_id),
        param_types: entry.param_types.clone(),
        return_type: entry.return_type,
    };
    realm.registry.add_property(
        proto,
        interned,
        PropertyValue::Method(overload),
        PropertyAttributes::method(),
    );
}

fn accessor(
    realm: &mut Realm,
    proto: marten_code::PrototypeId,
    name: &str,
    getter: NativeId,
) {
    let interned = realm.intern(name);
    realm.registry.add_property(
        proto,
        interned,
        PropertyValue::Accessor {
            getter: Some(MethodTarget::Native(getter)),
            setter: None,
        },
        PropertyAttributes::accessor(),
    );
}

fn global_constant(realm: &mut Realm, name: &str, value: Value) {
    let interned = realm.intern(name);
    let global_proto = realm.global_proto;
    realm.registry.add_property(
        global_proto,
        interned,
        PropertyValue::Value(value),
        PropertyAttributes::frozen(),
    );
}

fn global_value(realm: &mut Realm, name: &str, value: Value) {
    let interned = realm.intern(name);
    let global_proto = realm.global_proto;
    let field = {
        let var = realm.registry.add_property(
            global_proto,
            interned,
            PropertyValue::Value(value.clone()),
            PropertyAttributes::method(),
        );
        match &var.backing {
            PropertyBacking::Field(index) => Some(*index),
            _ => None,
        }
    };
    if let Some(index) = field {
        realm.global.borrow_mut().set_field(index.0 as usize, value);
    }
}

fn global_function(realm: &mut Realm, name: &str, native_id: NativeId) {
    let interned = realm.intern(name);
    let global_proto = realm.global_proto;
    let entry = &realm.natives[native_id.0 as usize];
    let overload = MethodOverload {
        target: MethodTarget::Native(native_id),
        param_types: entry.param_types.clone(),
        return_type: entry.return_type,
    };
    realm.registry.add_property(
        global_proto,
        interned,
        PropertyValue::Method(overload),
        PropertyAttributes::method(),
    );
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

// ==================== Globals ====================

fn install_global_constants(realm: &mut Realm) {
    global_constant(realm, "undefined", Value::Undefined);
    global_constant(realm, "NaN", Value::Number(f64::NAN));
    global_constant(realm, "Infinity", Value::Number(f64::INFINITY));
    let global = Value::Object(realm.global.clone());
    global_constant(realm, "globalThis", global);
}

fn install_global_functions(realm: &mut Realm) {
    let parse_int = native(
        realm,
        "parseInt",
        2,
        vec![StaticType::String, StaticType::Int32],
        StaticType::Number,
        |_, _, args| {
            let text = to_flat_string(&arg(args, 0));
            let radix = to_integer(&arg(args, 1));
            Ok(Value::Number(parse_int_impl(&text, radix)))
        },
    );
    global_function(realm, "parseInt", parse_int);

    let parse_float = native(
        realm,
        "parseFloat",
        1,
        vec![StaticType::String],
        StaticType::Number,
        |_, _, args| {
            let text = to_flat_string(&arg(args, 0));
            Ok(Value::Number(parse_float_impl(&text)))
        },
    );
    global_function(realm, "parseFloat", parse_float);

    let is_nan = native(
        realm,
        "isNaN",
        1,
        vec![StaticType::Number],
        StaticType::Boolean,
        |_, _, args| Ok(Value::Bool(to_number(&arg(args, 0)).is_nan())),
    );
    global_function(realm, "isNaN", is_nan);

    let is_finite = native(
        realm,
        "isFinite",
        1,
        vec![StaticType::Number],
        StaticType::Boolean,
        |_, _, args| Ok(Value::Bool(to_number(&arg(args, 0)).is_finite())),
    );
    global_function(realm, "isFinite", is_finite);
}

/// ES `parseInt`: optional sign, optional 0x prefix, digit prefix in the
/// requested radix.
fn parse_int_impl(text: &str, radix: i32) -> f64 {
    let mut s = text.trim();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    let mut radix = radix;
    if radix == 16 || radix == 0 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut seen = false;
    for c in s.chars() {
        match c.to_digit(radix as u32) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                seen = true;
            }
            None => break,
        }
    }
    if seen { sign * value } else { f64::NAN }
}

/// ES `parseFloat`: longest numeric prefix.
fn parse_float_impl(text: &str) -> f64 {
    let s = text.trim();
    if s.starts_with("Infinity") || s.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let mut end = 0;
    let bytes = s.as_bytes();
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '0'..='9' => seen_digit = true,
            '+' | '-' if end == 0 => {}
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_exp => {
                seen_exp = true;
                if matches!(bytes.get(end + 1), Some(b'+') | Some(b'-')) {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return f64::NAN;
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

// ==================== Object ====================

fn install_object_proto(realm: &mut Realm) {
    let proto = realm.object_proto;
    let to_string = native(
        realm,
        "toString",
        0,
        vec![],
        StaticType::String,
        |realm, _, _| Ok(Value::Str(realm.intern("[object Object]"))),
    );
    method(realm, proto, "toString", to_string);

    let has_own = native(
        realm,
        "hasOwnProperty",
        1,
        vec![StaticType::String],
        StaticType::Boolean,
        |realm, this, args| {
            let name = to_flat_string(&arg(args, 0));
            let Some(obj) = this.as_object() else {
                return Ok(Value::Bool(false));
            };
            if let Some(len) = obj.borrow().length()
                && let Ok(index) = name.parse::<usize>()
            {
                return Ok(Value::Bool(index < len));
            }
            let proto = obj.borrow().proto;
            let own = realm
                .registry
                .get(proto)
                .properties
                .get(name.as_ref())
                .is_some_and(|var| !matches!(var.backing, PropertyBacking::Unassigned));
            Ok(Value::Bool(own))
        },
    );
    method(realm, proto, "hasOwnProperty", has_own);
}

// ==================== String ====================

fn install_string_proto(realm: &mut Realm) {
    let proto = realm.string_proto;

    let length = native(
        realm,
        "length",
        0,
        vec![],
        StaticType::Int32,
        |_, this, _| {
            let s = to_flat_string(this);
            Ok(Value::Int(utf16_len(&s) as i32))
        },
    );
    accessor(realm, proto, "length", length);

    let char_code_at = native(
        realm,
        "charCodeAt",
        1,
        vec![StaticType::Int32],
        StaticType::Number,
        |_, this, args| {
            let s = to_flat_string(this);
            let index = to_integer(&arg(args, 0));
            if index < 0 {
                return Ok(Value::Number(f64::NAN));
            }
            Ok(match s.encode_utf16().nth(index as usize) {
                Some(unit) => Value::Int(unit as i32),
                None => Value::Number(f64::NAN),
            })
        },
    );
    method(realm, proto, "charCodeAt", char_code_at);

    let char_at = native(
        realm,
        "charAt",
        1,
        vec![StaticType::Int32],
        StaticType::String,
        |realm, this, args| {
            let s = to_flat_string(this);
            let index = to_integer(&arg(args, 0));
            if index < 0 {
                return Ok(Value::Str(realm.intern("")));
            }
            Ok(match s.encode_utf16().nth(index as usize) {
                Some(unit) => Value::Str(realm.intern(&String::from_utf16_lossy(&[unit]))),
                None => Value::Str(realm.intern("")),
            })
        },
    );
    method(realm, proto, "charAt", char_at);

    let index_of = native(
        realm,
        "indexOf",
        1,
        vec![StaticType::String],
        StaticType::Int32,
        |_, this, args| {
            let s = to_flat_string(this);
            let search = to_flat_string(&arg(args, 0));
            Ok(Value::Int(match s.find(search.as_ref()) {
                Some(byte_pos) => utf16_len(&s[..byte_pos]) as i32,
                None => -1,
            }))
        },
    );
    method(realm, proto, "indexOf", index_of);

    let substring = native(
        realm,
        "substring",
        2,
        vec![StaticType::Int32, StaticType::Int32],
        StaticType::String,
        |realm, this, args| {
            let s = to_flat_string(this);
            let units: Vec<u16> = s.encode_utf16().collect();
            let len = units.len() as i32;
            let mut start = to_integer(&arg(args, 0)).clamp(0, len);
            let mut end = if arg(args, 1).is_undefined() {
                len
            } else {
                to_integer(&arg(args, 1)).clamp(0, len)
            };
            if start > end {
                std::mem::swap(&mut start, &mut end);
            }
            let slice = &units[start as usize..end as usize];
            Ok(Value::Str(realm.intern(&String::from_utf16_lossy(slice))))
        },
    );
    method(realm, proto, "substring", substring);

    let to_string = native(
        realm,
        "toString",
        0,
        vec![],
        StaticType::String,
        |_, this, _| Ok(Value::Str(to_flat_string(this))),
    );
    method(realm, proto, "toString", to_string);
}

// ==================== Number and Boolean ====================

fn install_number_proto(realm: &mut Realm) {
    let proto = realm.number_proto;
    let to_string = native(
        realm,
        "toString",
        0,
        vec![],
        StaticType::String,
        |_, this, _| Ok(Value::Str(to_flat_string(this))),
    );
    method(realm, proto, "toString", to_string);
}

fn install_boolean_proto(realm: &mut Realm) {
    let proto = realm.boolean_proto;
    let to_string = native(
        realm,
        "toString",
        0,
        vec![],
        StaticType::String,
        |realm, this, _| {
            Ok(Value::Str(realm.intern(if to_boolean(this) {
                "true"
            } else {
                "false"
            })))
        },
    );
    method(realm, proto, "toString", to_string);
}

// ==================== Array ====================

fn install_array_proto(realm: &mut Realm) {
    let proto = realm.array_proto;

    let length = native(
        realm,
        "length",
        0,
        vec![],
        StaticType::Int32,
        |_, this, _| {
            let len = this
                .as_object()
                .and_then(|obj| obj.borrow().length())
                .unwrap_or(0);
            Ok(Value::Int(len as i32))
        },
    );
    accessor(realm, proto, "length", length);

    let push = native(
        realm,
        "push",
        1,
        vec![StaticType::Any],
        StaticType::Int32,
        |_, this, args| {
            let Some(obj) = this.as_object() else {
                return Ok(Value::Int(0));
            };
            let mut borrowed = obj.borrow_mut();
            let elements = borrowed.elements.get_or_insert_with(Vec::new);
            elements.extend(args.iter().cloned());
            Ok(Value::Int(elements.len() as i32))
        },
    );
    method(realm, proto, "push", push);

    let join = native(
        realm,
        "join",
        1,
        vec![StaticType::String],
        StaticType::String,
        |realm, this, args| {
            let separator = if arg(args, 0).is_undefined() {
                Rc::from(",")
            } else {
                to_flat_string(&arg(args, 0))
            };
            let Some(obj) = this.as_object() else {
                return Ok(Value::Str(realm.intern("")));
            };
            let parts: Vec<String> = obj
                .borrow()
                .elements
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .map(|e| {
                    if e.is_nullish() {
                        String::new()
                    } else {
                        to_flat_string(e).to_string()
                    }
                })
                .collect();
            Ok(Value::Str(realm.intern(&parts.join(separator.as_ref()))))
        },
    );
    method(realm, proto, "join", join);
}

// ==================== Errors ====================

fn install_error_constructors(realm: &mut Realm) {
    let kinds: Vec<(marten_core::ErrorKind, marten_code::PrototypeId)> = realm
        .error_protos
        .iter()
        .map(|(kind, proto)| (*kind, *proto))
        .collect();

    for (kind, proto) in kinds {
        // message is the first field of the error layout.
        let message_field = match realm.registry.resolve(proto, "message") {
            Some((_, var)) => match var.backing {
                PropertyBacking::Field(index) => index.0 as usize,
                _ => 0,
            },
            None => 0,
        };
        let ctor = native(
            realm,
            kind.name(),
            1,
            vec![StaticType::String],
            StaticType::Any,
            move |realm, this, args| {
                let message = arg(args, 0);
                // Invoked as a constructor the allocation is `this`; a
                // plain call allocates its own instance.
                let target = match this.as_object() {
                    Some(obj) if obj.borrow().proto == proto => this.clone(),
                    _ => Value::Object(Rc::new(RefCell::new(ScriptObject::new(proto)))),
                };
                if !message.is_undefined() {
                    let text = to_flat_string(&message);
                    target
                        .as_object()
                        .unwrap()
                        .borrow_mut()
                        .set_field(message_field, Value::Str(realm.intern(&text)));
                }
                Ok(match this.as_object() {
                    Some(obj) if obj.borrow().proto == proto => Value::Undefined,
                    _ => target,
                })
            },
        );
        let object = realm.natives[ctor.0 as usize].object.clone();
        *object.instance_proto.borrow_mut() = Some(proto);
        global_value(realm, kind.name(), Value::Function(object));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int_impl("42", 0), 42.0);
        assert_eq!(parse_int_impl("  -10  ", 0), -10.0);
        assert_eq!(parse_int_impl("0x1f", 0), 31.0);
        assert_eq!(parse_int_impl("12abc", 0), 12.0);
        assert_eq!(parse_int_impl("ff", 16), 255.0);
        assert!(parse_int_impl("abc", 10).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float_impl("3.25rest"), 3.25);
        assert_eq!(parse_float_impl("  -1e2"), -100.0);
        assert_eq!(parse_float_impl("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float_impl("x").is_nan());
    }
}
