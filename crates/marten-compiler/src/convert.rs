//! The type-conversion emitter.
//!
//! Emits the minimal instruction sequence coercing the value on top of
//! the stack from one static type to another, per the ECMAScript
//! conversion rules. `Convert(T, T)` emits nothing; conversions to `any`
//! are purely static and also emit nothing (the executor's value
//! representation is uniform).

use marten_code::{CoerceKind, ErrorClass, Instruction, MethodBuilder, StaticType};

/// Emit the conversion `from → to` for the value on top of the stack.
pub fn emit_convert(builder: &mut MethodBuilder, from: StaticType, to: StaticType) {
    if from == to || to == StaticType::Any {
        return;
    }
    match to {
        StaticType::Boolean => match from {
            // undefined and null are statically false.
            StaticType::Undefined | StaticType::Null => {
                builder.emit(Instruction::Pop);
                builder.emit(Instruction::LoadBool { value: false });
            }
            _ => builder.emit(Instruction::Coerce {
                to: CoerceKind::Boolean,
            }),
        },
        StaticType::Int32 => match from {
            StaticType::Undefined | StaticType::Null => {
                builder.emit(Instruction::Pop);
                builder.emit(Instruction::LoadInt { value: 0 });
            }
            _ => builder.emit(Instruction::Coerce {
                to: CoerceKind::Int32,
            }),
        },
        StaticType::Uint32 => builder.emit(Instruction::Coerce {
            to: CoerceKind::Uint32,
        }),
        StaticType::Number => match from {
            StaticType::Undefined => {
                builder.emit(Instruction::Pop);
                builder.emit(Instruction::LoadNumber { value: f64::NAN });
            }
            StaticType::Null => {
                builder.emit(Instruction::Pop);
                builder.emit(Instruction::LoadNumber { value: 0.0 });
            }
            _ => builder.emit(Instruction::Coerce {
                to: CoerceKind::Number,
            }),
        },
        StaticType::String => match from {
            StaticType::Undefined => emit_constant_string(builder, "undefined"),
            StaticType::Null => emit_constant_string(builder, "null"),
            _ => builder.emit(Instruction::Coerce {
                to: CoerceKind::String,
            }),
        },
        StaticType::ConcatString => builder.emit(Instruction::Coerce {
            to: CoerceKind::ConcatString,
        }),
        StaticType::Object(_) => match from {
            StaticType::Undefined | StaticType::Null => {
                // Statically known failure; the throw carries this
                // node's own source position through the method map.
                builder.emit(Instruction::Pop);
                let message = builder
                    .constants_mut()
                    .add_string("Cannot convert undefined or null to object");
                builder.emit(Instruction::ThrowError {
                    class: ErrorClass::Type,
                    message,
                });
            }
            _ => builder.emit(Instruction::Coerce {
                to: CoerceKind::Object,
            }),
        },
        StaticType::Undefined | StaticType::Null => {
            debug_assert!(false, "no conversion targets undefined or null");
        }
        StaticType::Any => unreachable!("handled above"),
    }
}

/// Emit a `ToInteger` (used by index-taking natives).
pub fn emit_to_integer(builder: &mut MethodBuilder, from: StaticType) {
    if from == StaticType::Int32 {
        return;
    }
    builder.emit(Instruction::Coerce {
        to: CoerceKind::Integer,
    });
}

fn emit_constant_string(builder: &mut MethodBuilder, text: &str) {
    builder.emit(Instruction::Pop);
    let index = builder.constants_mut().add_string(text);
    builder.emit(Instruction::LoadConst { index });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(from: StaticType, to: StaticType) -> Vec<Instruction> {
        let mut builder = MethodBuilder::new("t", None, 0);
        builder.emit(Instruction::LoadUndefined); // placeholder operand
        emit_convert(&mut builder, from, to);
        let method = builder
            .finish(vec![StaticType::Any], StaticType::Any, None)
            .unwrap();
        method.instructions[1..].to_vec()
    }

    #[test]
    fn test_identity_is_a_no_op() {
        assert!(emitted(StaticType::Int32, StaticType::Int32).is_empty());
        assert!(emitted(StaticType::String, StaticType::String).is_empty());
    }

    #[test]
    fn test_boxing_is_static() {
        assert!(emitted(StaticType::Int32, StaticType::Any).is_empty());
        assert!(emitted(StaticType::ConcatString, StaticType::Any).is_empty());
    }

    #[test]
    fn test_nullish_to_boolean_is_constant_false() {
        assert_eq!(
            emitted(StaticType::Undefined, StaticType::Boolean),
            vec![Instruction::Pop, Instruction::LoadBool { value: false }]
        );
    }

    #[test]
    fn test_undefined_to_number_is_nan() {
        let instrs = emitted(StaticType::Undefined, StaticType::Number);
        assert_eq!(instrs.len(), 2);
        assert!(matches!(
            instrs[1],
            Instruction::LoadNumber { value } if value.is_nan()
        ));
    }

    #[test]
    fn test_nullish_to_object_throws() {
        let instrs = emitted(StaticType::Null, StaticType::Object(marten_code::PrototypeId(0)));
        assert!(matches!(
            instrs[1],
            Instruction::ThrowError {
                class: ErrorClass::Type,
                ..
            }
        ));
    }

    #[test]
    fn test_runtime_coercions() {
        assert_eq!(
            emitted(StaticType::Any, StaticType::Int32),
            vec![Instruction::Coerce {
                to: CoerceKind::Int32
            }]
        );
        assert_eq!(
            emitted(StaticType::Number, StaticType::String),
            vec![Instruction::Coerce {
                to: CoerceKind::String
            }]
        );
    }
}
