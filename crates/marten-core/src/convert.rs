//! Runtime type-conversion fallbacks.
//!
//! The conversion emitter resolves most coercions statically; these are
//! the entry points emitted code calls when a value's type is only known
//! at runtime. Semantics follow the ECMAScript abstract operations.

use std::rc::Rc;

use crate::number::{int_to_string, number_to_string};
use crate::string::ConcatString;
use crate::value::Value;

/// `ToBoolean`.
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Concat(c) => !c.is_empty(),
        Value::Object(_) | Value::Function(_) => true,
    }
}

/// `ToNumber`.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Int(i) => *i as f64,
        Value::Number(n) => *n,
        Value::Str(s) => string_to_number(s),
        Value::Concat(c) => string_to_number(&c.materialize()),
        Value::Object(_) | Value::Function(_) => string_to_number(&to_flat_string(value)),
    }
}

/// `StringToNumber`: trimmed, empty → 0, hex accepted, else decimal.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return match u64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// `ToInteger`: NaN → 0, infinities clamp to the int32 extremes, doubles
/// truncate and clamp.
pub fn to_integer(value: &Value) -> i32 {
    let n = to_number(value);
    if n.is_nan() {
        return 0;
    }
    if n >= i32::MAX as f64 {
        return i32::MAX;
    }
    if n <= i32::MIN as f64 {
        return i32::MIN;
    }
    n.trunc() as i32
}

/// `ToInt32`: wrap modulo 2^32, signed.
pub fn to_int32(value: &Value) -> i32 {
    if let Value::Int(i) = value {
        return *i;
    }
    f64_to_int32(to_number(value))
}

/// `ToUint32`: wrap modulo 2^32, unsigned.
pub fn to_uint32(value: &Value) -> u32 {
    if let Value::Int(i) = value {
        return *i as u32;
    }
    f64_to_uint32(to_number(value))
}

/// `ToInt32` on a double.
pub fn f64_to_int32(n: f64) -> i32 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return 0;
    }
    let i = n.trunc() as i64;
    (i % (1_i64 << 32)) as i32
}

/// `ToUint32` on a double.
pub fn f64_to_uint32(n: f64) -> u32 {
    f64_to_int32(n) as u32
}

/// `ToString`, materialising deferred concatenations.
pub fn to_flat_string(value: &Value) -> Rc<str> {
    match value {
        Value::Undefined => Rc::from("undefined"),
        Value::Null => Rc::from("null"),
        Value::Bool(true) => Rc::from("true"),
        Value::Bool(false) => Rc::from("false"),
        Value::Int(i) => Rc::from(int_to_string(*i).as_str()),
        Value::Number(n) => Rc::from(number_to_string(*n).as_str()),
        Value::Str(s) => s.clone(),
        Value::Concat(c) => c.materialize(),
        Value::Object(obj) => {
            // ToPrimitive without re-entering script code: arrays join
            // their elements, plain objects render their class.
            let obj = obj.borrow();
            match &obj.elements {
                Some(elements) => {
                    let parts: Vec<String> = elements
                        .iter()
                        .map(|e| {
                            if e.is_nullish() {
                                String::new()
                            } else {
                                to_flat_string(e).to_string()
                            }
                        })
                        .collect();
                    Rc::from(parts.join(",").as_str())
                }
                None => Rc::from("[object Object]"),
            }
        }
        Value::Function(f) => Rc::from(format!("function {}() {{ [native code] }}", f.name).as_str()),
    }
}

/// `ToConcatenatedString`: wrap a string, coerce anything else first.
pub fn to_concat(value: &Value) -> ConcatString {
    match value {
        Value::Concat(c) => c.clone(),
        other => ConcatString::from_flat(Rc::from(""), to_flat_string(other)),
    }
}

/// `ToPrimitive`: objects and functions resolve through their string
/// rendering (arrays join, plain objects report their class); primitives
/// pass through.
pub fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Function(_) => Value::Str(to_flat_string(value)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_to_boolean_boundaries() {
        assert!(!to_boolean(&Value::Str(Rc::from(""))));
        assert!(to_boolean(&Value::Str(Rc::from("0"))));
        assert!(!to_boolean(&Value::Number(f64::NAN)));
        assert!(!to_boolean(&Value::Int(0)));
        assert!(to_boolean(&Value::Int(-1)));
        assert!(!to_boolean(&Value::Null));
    }

    #[test]
    fn test_to_number_strings() {
        assert_eq!(to_number(&Value::Str(Rc::from("  42 "))), 42.0);
        assert_eq!(to_number(&Value::Str(Rc::from(""))), 0.0);
        assert_eq!(to_number(&Value::Str(Rc::from("0x10"))), 16.0);
        assert!(to_number(&Value::Str(Rc::from("4x"))).is_nan());
        assert_eq!(to_number(&Value::Str(Rc::from("-Infinity"))), f64::NEG_INFINITY);
    }

    #[test]
    fn test_to_int32_wraps() {
        let wrapped = f64_to_int32(4294967296.0 + 5.0);
        assert_eq!(wrapped, 5);
        assert_eq!(f64_to_int32(-1.0), -1);
        assert_eq!(f64_to_int32(2147483648.0), -2147483648);
        assert_eq!(f64_to_int32(f64::NAN), 0);
        assert_eq!(f64_to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn test_to_integer_clamps() {
        assert_eq!(to_integer(&Value::Number(f64::INFINITY)), i32::MAX);
        assert_eq!(to_integer(&Value::Number(f64::NEG_INFINITY)), i32::MIN);
        assert_eq!(to_integer(&Value::Number(f64::NAN)), 0);
        assert_eq!(to_integer(&Value::Number(3.9)), 3);
        assert_eq!(to_integer(&Value::Number(-3.9)), -3);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(&*to_flat_string(&Value::Undefined), "undefined");
        assert_eq!(&*to_flat_string(&Value::Null), "null");
        assert_eq!(&*to_flat_string(&Value::Bool(true)), "true");
        assert_eq!(&*to_flat_string(&Value::Int(-3)), "-3");
        assert_eq!(&*to_flat_string(&Value::Number(1.5)), "1.5");
    }

    proptest! {
        #[test]
        fn prop_to_int32_wraps_mod_2_32(k in 0u32..u32::MAX) {
            // ToInt32(2^32 + k) == ToInt32(k)
            let wrapped = f64_to_int32(4294967296.0 + k as f64);
            prop_assert_eq!(wrapped, k as i32);
        }

        #[test]
        fn prop_int32_double_roundtrip(i in i32::MIN..i32::MAX) {
            // int32 → double → int32 is the identity (lossless pair).
            prop_assert_eq!(f64_to_int32(i as f64), i);
        }
    }
}
