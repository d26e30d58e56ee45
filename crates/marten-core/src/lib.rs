//! Runtime support for Marten.
//!
//! Holds everything emitted code links against: the uniform runtime
//! [`Value`], interned and deferred-concatenation strings, the prototype
//! registry with its type-tracked property variables, the runtime type
//! converter fallbacks, JS error objects, and the typed stack-machine
//! executor the finalised methods run on.

pub mod convert;
pub mod error;
pub mod exec;
pub mod number;
pub mod object;
pub mod proto;
pub mod realm;
pub mod string;
pub mod value;

pub use error::{ErrorKind, JsError, StackFrame, Unwind};
pub use exec::{CallHost, run_method};
pub use object::ScriptObject;
pub use proto::{
    MethodOverload, MethodTarget, PropertyAttributes, PropertyBacking, PropertyValue,
    PropertyVariable, Prototype, PrototypeRegistry, WriteOutcome,
};
pub use realm::{NativeFn, NativeFunction, Realm};
pub use string::{ConcatString, Interner};
pub use value::{FunctionKind, FunctionObject, FunctionRef, ObjectRef, Value};
