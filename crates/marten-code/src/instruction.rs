//! Stack-machine instructions.
//!
//! Stack-based instruction set. Expressions leave exactly one value on the
//! operand stack, statements leave zero; the compiler guarantees the stack
//! shape, the executor only checks it in debug builds.

use serde::{Deserialize, Serialize};

use crate::types::{ConstantIndex, FieldIndex, FunctionId, Label, NativeId, PrototypeId, SlotIndex};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `==`
    Equal,
    /// `===`
    StrictEqual,
    /// `!=`
    NotEqual,
    /// `!==`
    StrictNotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

/// Statically selected operand kind for a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareKind {
    /// Both operands coerced to int32.
    Int32,
    /// Both operands coerced to double.
    Number,
    /// Both operands are strings.
    String,
    /// Untyped; full abstract comparison at runtime.
    Generic,
}

/// Error class of an emitted `ThrowError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// TypeError
    Type,
    /// RangeError
    Range,
    /// ReferenceError
    Reference,
}

/// Target of a `Coerce` instruction (the runtime-visible conversions of the
/// conversion emitter; conversions to `any` are static and emit nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoerceKind {
    /// ES ToBoolean.
    Boolean,
    /// ES ToNumber.
    Number,
    /// ES ToInt32 (wrap modulo 2^32, signed).
    Int32,
    /// ES ToUint32.
    Uint32,
    /// ES ToInteger (clamp to int32 range, NaN → 0).
    Integer,
    /// ES ToString, materialising deferred concatenations.
    String,
    /// Wrap into a deferred-concatenation handle.
    ConcatString,
    /// ES ToObject; throws TypeError on undefined/null.
    Object,
}

/// A single stack-machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Constants and stack ====================
    /// Push `undefined`.
    LoadUndefined,
    /// Push `null`.
    LoadNull,
    /// Push a boolean.
    LoadBool {
        /// The value to push.
        value: bool,
    },
    /// Push an int32.
    LoadInt {
        /// The value to push.
        value: i32,
    },
    /// Push a double.
    LoadNumber {
        /// The value to push.
        value: f64,
    },
    /// Push a pooled constant (string or regex literal).
    LoadConst {
        /// Pool index.
        index: ConstantIndex,
    },
    /// Duplicate the top of stack.
    Dup,
    /// Discard the top of stack.
    Pop,

    // ==================== Slots ====================
    /// Push `slots[slot]`. Slot 0 is `this`, parameters follow, then locals
    /// and leased temporaries.
    GetSlot {
        /// Frame slot.
        slot: SlotIndex,
    },
    /// Pop into `slots[slot]`.
    SetSlot {
        /// Frame slot.
        slot: SlotIndex,
    },
    /// Push the engine's global object.
    LoadGlobalObject,

    // ==================== Arithmetic ====================
    /// Integer addition; promotes to double on overflow.
    AddInt,
    /// Integer subtraction; promotes to double on overflow.
    SubInt,
    /// Integer multiplication; promotes to double on overflow.
    MulInt,
    /// Integer negation.
    NegInt,
    /// Double addition.
    AddNumber,
    /// Double subtraction.
    SubNumber,
    /// Double multiplication.
    MulNumber,
    /// Double division.
    DivNumber,
    /// Double remainder (ES semantics, sign of dividend).
    ModNumber,
    /// Double negation.
    NegNumber,
    /// The full abstract `+`: ToPrimitive both operands, then string
    /// concatenation or numeric addition. Emitted when operand types are
    /// only known at runtime.
    AddGeneric,

    // ==================== Bitwise (int32) ====================
    /// `lhs & rhs`
    BitAnd,
    /// `lhs | rhs`
    BitOr,
    /// `lhs ^ rhs`
    BitXor,
    /// `~src`
    BitNot,
    /// `lhs << rhs`
    Shl,
    /// `lhs >> rhs` (sign-propagating)
    Shr,
    /// `lhs >>> rhs` (zero-fill, result is uint32)
    Ushr,

    // ==================== Strings ====================
    /// Pop two string-like values, push a deferred concatenation.
    Concat,

    // ==================== Comparison and logic ====================
    /// Typed comparison; pushes a boolean.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Statically selected operand kind.
        kind: CompareKind,
    },
    /// Logical not of a boolean.
    Not,

    // ==================== Conversions ====================
    /// Runtime coercion of the top of stack.
    Coerce {
        /// Conversion target.
        to: CoerceKind,
    },

    // ==================== Type operators ====================
    /// `typeof` of an arbitrary value.
    TypeOf,
    /// `typeof identifier` for an unresolvable name; never throws
    /// ReferenceError.
    TypeOfName {
        /// Pooled identifier name.
        name: ConstantIndex,
    },
    /// `lhs instanceof rhs`
    InstanceOf,
    /// `lhs in rhs`
    In,
    /// `delete obj[key]`; pops key and object, pushes a boolean.
    Delete,

    // ==================== Objects ====================
    /// Allocate an instance of a known prototype record.
    NewObject {
        /// The prototype whose record layout the instance uses.
        proto: PrototypeId,
    },
    /// Pop `length` values and allocate an array holding them.
    NewArray {
        /// Element count.
        length: u16,
    },
    /// Typed field load: pop an instance, push its field.
    GetField {
        /// Field offset in the record layout.
        field: FieldIndex,
    },
    /// Typed field store: pop a value, then an instance.
    SetField {
        /// Field offset in the record layout.
        field: FieldIndex,
    },
    /// Dynamic property load; pops an object, pushes `any`.
    GetProp {
        /// Pooled property name.
        name: ConstantIndex,
    },
    /// Dynamic property store; pops a value, then an object.
    SetProp {
        /// Pooled property name.
        name: ConstantIndex,
    },
    /// Dynamic indexed load; pops key then object.
    GetElem,
    /// Dynamic indexed store; pops value, key, object.
    SetElem,
    /// Pop an object, push an array of its enumerable property names
    /// (own chain, insertion order).
    PropNames,
    /// Dynamic global load; throws ReferenceError when the name is absent.
    GetGlobalDyn {
        /// Pooled identifier name.
        name: ConstantIndex,
    },
    /// Dynamic global store; creates the property when absent.
    SetGlobalDyn {
        /// Pooled identifier name.
        name: ConstantIndex,
    },

    // ==================== Functions and calls ====================
    /// Push a function object for a user-defined function.
    MakeFunction {
        /// The function to wrap.
        function: FunctionId,
    },
    /// Dynamic call. Stack: callee, this, args...
    Call {
        /// Argument count.
        argc: u8,
    },
    /// Statically resolved call. Stack: this, args... (already coerced to
    /// the callee's parameter types).
    CallDirect {
        /// Callee.
        function: FunctionId,
        /// Argument count.
        argc: u8,
    },
    /// Call of a host native. Stack: this, args...
    CallNative {
        /// The native entry.
        native: NativeId,
        /// Argument count.
        argc: u8,
    },
    /// Dynamic construction. Stack: callee, args...
    New {
        /// Argument count.
        argc: u8,
    },
    /// Statically resolved construction. Stack: args...
    NewDirect {
        /// Constructor.
        function: FunctionId,
        /// Argument count.
        argc: u8,
    },
    /// Materialise the `arguments` object for the current frame.
    CreateArguments,
    /// Pop the return value and unwind the frame.
    Return,

    // ==================== Control flow ====================
    /// Unconditional branch.
    Jump {
        /// Branch target.
        target: Label,
    },
    /// Pop a boolean; branch when true.
    JumpIfTrue {
        /// Branch target.
        target: Label,
    },
    /// Pop a boolean; branch when false.
    JumpIfFalse {
        /// Branch target.
        target: Label,
    },

    // ==================== Exception regions ====================
    /// Open a catch-handling try region; the handler receives the thrown
    /// value on the stack.
    EnterTry {
        /// Catch handler label.
        catch: Label,
    },
    /// Open a finally-handling try region. On an exception the executor
    /// stores `-1` into `state_slot`, the thrown value into
    /// `pending_slot`, and enters at `finally`; the emitted dispatch after
    /// the finally body rethrows or routes staged exits.
    EnterFinally {
        /// Finally entry label.
        finally: Label,
        /// Scratch slot holding the pending-exit code.
        state_slot: SlotIndex,
        /// Scratch slot holding a pending thrown value.
        pending_slot: SlotIndex,
    },
    /// Close the innermost try region on the normal path (the region-exit
    /// primitive; branches across region boundaries are not permitted).
    LeaveTry,
    /// Pop a value and throw it.
    Throw,
    /// Construct and throw a runtime error with a fixed message.
    ThrowError {
        /// Error class.
        class: ErrorClass,
        /// Pooled message text.
        message: ConstantIndex,
    },
}

impl Instruction {
    /// True for instructions that transfer control unconditionally.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::Return | Self::Throw | Self::ThrowError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(Instruction::Return.is_terminator());
        assert!(Instruction::Jump { target: Label(0) }.is_terminator());
        assert!(!Instruction::Pop.is_terminator());
        assert!(
            !Instruction::JumpIfTrue { target: Label(0) }.is_terminator()
        );
    }

    #[test]
    fn test_serialize_roundtrip() {
        let instr = Instruction::Compare {
            op: CompareOp::Less,
            kind: CompareKind::Int32,
        };
        let json = serde_json::to_string(&instr).unwrap();
        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instr);
    }
}
