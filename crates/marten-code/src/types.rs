//! Static types and handles.
//!
//! The compiler tracks a static type for every value on the emission stack
//! and for every variable. The lattice is flat:
//!
//! ```text
//! ⊥ (undefined, "no observation yet")
//!   ⊑ concrete primitive or prototype record
//!     ⊑ ⊤ (any)
//! ```
//!
//! Adoption of a first observed type (the ⊥ transitions) is handled
//! explicitly at the observation sites; [`StaticType::join`] computes the
//! merge used everywhere else (branch joins, widened variables), which is
//! why `undefined ⊔ T = any` here: a merged value may genuinely be
//! `undefined` at runtime.

use serde::{Deserialize, Serialize};

/// Handle of a prototype record in the engine's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrototypeId(pub u32);

/// Handle of a user-defined function in the engine's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// Handle of a host-provided native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeId(pub u32);

/// A local slot in a method frame. Slot 0 is `this`, parameters follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub u16);

/// A physical field offset in a prototype's record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldIndex(pub u16);

/// Index into a method's constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstantIndex(pub u32);

/// A branch target. Resolved to an instruction index via `Method::labels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub u32);

/// The static type of a value on the emission stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticType {
    /// Bottom of the lattice; also the type of the `undefined` value.
    Undefined,
    /// The `null` value.
    Null,
    /// A boolean.
    Boolean,
    /// A 32-bit signed integer.
    Int32,
    /// A 32-bit unsigned integer (produced only by `>>>`).
    Uint32,
    /// A double-precision number.
    Number,
    /// A materialised string.
    String,
    /// A deferred concatenation handle (rope), materialised on first
    /// string-valued use.
    ConcatString,
    /// An instance of a known prototype record.
    Object(PrototypeId),
    /// Top of the lattice: any JS value.
    Any,
}

impl StaticType {
    /// True for the numeric members of the lattice.
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int32 | Self::Uint32 | Self::Number)
    }

    /// True for string-valued members (materialised or deferred).
    #[inline]
    pub fn is_string(self) -> bool {
        matches!(self, Self::String | Self::ConcatString)
    }

    /// True when a value of this type can never be `null` or `undefined`.
    #[inline]
    pub fn is_coercible(self) -> bool {
        !matches!(self, Self::Undefined | Self::Null | Self::Any)
    }

    /// Merge two branch types into the least type covering both.
    ///
    /// Distinct numerics merge to `number`, distinct string forms merge to
    /// `string` (the executor accepts deferred concatenations wherever a
    /// string is expected); everything else collapses to `any`.
    pub fn join(self, other: StaticType) -> StaticType {
        if self == other {
            return self;
        }
        if self.is_numeric() && other.is_numeric() {
            return Self::Number;
        }
        if self.is_string() && other.is_string() {
            return Self::String;
        }
        Self::Any
    }

    /// The result of the `typeof` operator when it is statically known.
    pub fn type_of_name(self) -> Option<&'static str> {
        match self {
            Self::Undefined => Some("undefined"),
            Self::Null => Some("object"),
            Self::Boolean => Some("boolean"),
            Self::Int32 | Self::Uint32 | Self::Number => Some("number"),
            Self::String | Self::ConcatString => Some("string"),
            Self::Object(_) => Some("object"),
            Self::Any => None,
        }
    }

    /// Whether converting `self` to `to` and back is the identity for every
    /// representable value (the lossless pairs of the conversion matrix).
    pub fn lossless_to(self, to: StaticType) -> bool {
        matches!(
            (self, to),
            (Self::Int32, Self::Number)
                | (Self::Uint32, Self::Number)
                | (Self::Boolean, Self::Int32)
                | (Self::String, Self::ConcatString)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_identity() {
        assert_eq!(StaticType::Int32.join(StaticType::Int32), StaticType::Int32);
        let p = StaticType::Object(PrototypeId(3));
        assert_eq!(p.join(p), p);
    }

    #[test]
    fn test_join_numeric_widens() {
        assert_eq!(
            StaticType::Int32.join(StaticType::Number),
            StaticType::Number
        );
        assert_eq!(
            StaticType::Uint32.join(StaticType::Int32),
            StaticType::Number
        );
    }

    #[test]
    fn test_join_strings() {
        assert_eq!(
            StaticType::String.join(StaticType::ConcatString),
            StaticType::String
        );
    }

    #[test]
    fn test_join_collapses_to_any() {
        assert_eq!(StaticType::Int32.join(StaticType::String), StaticType::Any);
        assert_eq!(
            StaticType::Undefined.join(StaticType::Int32),
            StaticType::Any
        );
        assert_eq!(
            StaticType::Object(PrototypeId(1)).join(StaticType::Object(PrototypeId(2))),
            StaticType::Any
        );
    }

    #[test]
    fn test_type_of_name() {
        assert_eq!(StaticType::Null.type_of_name(), Some("object"));
        assert_eq!(StaticType::Uint32.type_of_name(), Some("number"));
        assert_eq!(StaticType::Any.type_of_name(), None);
    }
}
