//! The type-tracking ahead-of-time compiler.
//!
//! Each function body is compiled into a typed stack-machine [`Method`]
//! specialised over the static types observed for its parameters, globals,
//! and property accesses. When a later observation widens one of those
//! types, every dependent method is marked `recompile-needed` and rebuilt
//! from its cached AST at the next call.
//!
//! [`Method`]: marten_code::Method

pub mod convert;
pub mod error;
pub mod functions;
pub mod generator;
pub mod optimize;
pub mod scope;
pub mod variables;

mod expr;

pub use error::{CompileError, CompileResult};
pub use functions::{FunctionRecord, FunctionTable};
pub use generator::{CompileOptions, MethodGenerator, compile_function};
pub use optimize::OptimizationInfo;
