//! The embeddable engine surface.
//!
//! [`ScriptEngine`] owns a realm, the function table, and the compiled
//! method cache; it parses and compiles scripts at load time, runs them,
//! and silently recompiles function bodies when an inferred type is
//! invalidated. The host API is the only public surface: everything else
//! is reachable through values returned by it.

mod builtins;
mod engine;
mod error;
mod host;
mod stack;

pub use engine::{EngineOptions, ScriptEngine};
pub use error::{EngineError, EngineResult};
pub use host::{CaseConvention, HostMethod, HostTypeBuilder, HostTypeOptions};
pub use marten_code::StaticType;
pub use marten_core::realm::NativeFn;
pub use marten_core::{ErrorKind, JsError, Value};
