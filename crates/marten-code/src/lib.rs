//! Typed stack-machine code format for the Marten compiler.
//!
//! This crate defines the data layer of the code emitter: the static type
//! lattice the compiler specialises against, the instruction set emitted
//! methods are made of, the constant pool, and the [`MethodBuilder`] that
//! the method generator drives (labels, leased slots, source mapping).

pub mod constant;
pub mod error;
pub mod instruction;
pub mod method;
pub mod types;

pub use constant::{Constant, ConstantPool};
pub use error::{CodeError, CodeResult};
pub use instruction::{CompareKind, CompareOp, CoerceKind, ErrorClass, Instruction};
pub use method::{Method, MethodBuilder, MethodSymbols, SourceMap, SourceMapEntry};
pub use types::{
    ConstantIndex, FieldIndex, FunctionId, Label, NativeId, PrototypeId, SlotIndex, StaticType,
};
