//! The script engine.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use marten_code::{FunctionId, PrototypeId, StaticType};
use marten_compiler::{CompileOptions, FunctionTable, compile_function};
use marten_core::exec::{CallHost, run_method};
use marten_core::proto::{MethodTarget, PropertyBacking, SlotAction};
use marten_core::value::FunctionRef;
use marten_core::{ErrorKind, JsError, Realm, ScriptObject, Unwind, Value};
use marten_parser::{FunctionNode, Parser, Script, SourcePosition};

use crate::builtins;
use crate::error::EngineResult;
use crate::stack::format_stack;

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Treat every script as strict.
    pub strict_by_default: bool,
    /// Retain slot names and source paths on compiled methods.
    pub debug_symbols: bool,
    /// Values installed on the global object before the first script.
    pub host_globals: Vec<(String, Value)>,
}

/// Recursion limit for generated-method calls.
const MAX_CALL_DEPTH: usize = 256;

/// A JavaScript engine instance: one realm, one function table, one
/// thread. Scripts are compiled at load time; function bodies recompile
/// silently when a type they inlined is invalidated.
pub struct ScriptEngine {
    pub(crate) realm: Realm,
    pub(crate) functions: FunctionTable,
    options: EngineOptions,
    call_stack: Vec<FunctionId>,
}

impl ScriptEngine {
    /// Create an engine.
    pub fn new(options: EngineOptions) -> Self {
        let mut realm = Realm::new();
        let mut functions = FunctionTable::new();
        builtins::install(&mut realm, &mut functions);
        let mut engine = Self {
            realm,
            functions,
            options,
            call_stack: Vec::new(),
        };
        let globals = std::mem::take(&mut engine.options.host_globals);
        for (name, value) in globals {
            engine.set_global_value(&name, value);
        }
        engine
    }

    /// Parse, compile, and run a script; returns its completion value.
    pub fn execute(&mut self, source: &str, path: Option<&str>) -> EngineResult<Value> {
        let script = Parser::new(source)?.parse_script(self.options.strict_by_default)?;
        self.run_script(script, path.unwrap_or("<script>"))
    }

    /// Like [`execute`](Self::execute), treating the source as a single
    /// expression statement.
    pub fn evaluate(&mut self, source: &str) -> EngineResult<Value> {
        let script =
            Parser::new(source)?.parse_expression_script(self.options.strict_by_default)?;
        self.run_script(script, "<eval>")
    }

    fn run_script(&mut self, script: Script, path: &str) -> EngineResult<Value> {
        let compile_options = CompileOptions {
            debug_symbols: self.options.debug_symbols,
            source_path: Rc::from(path),
        };
        let node = Rc::new(FunctionNode {
            name: Some("<script>".to_string()),
            params: Vec::new(),
            body: script.statements,
            strict: script.strict,
            hints: script.hints,
            pos: SourcePosition::new(1, 1),
        });
        let name = self.realm.intern("<script>");
        let script_id = self.functions.declare(node, name, true);

        // Load-time compilation: the script body, then every function it
        // declared (their bodies may declare more).
        compile_function(&mut self.realm, &mut self.functions, script_id, &compile_options)?;
        let mut next = script_id.0 as usize + 1;
        while next < self.functions.len() {
            let id = FunctionId(next as u32);
            if self.functions.get(id).code.is_none() {
                compile_function(&mut self.realm, &mut self.functions, id, &compile_options)?;
            }
            next += 1;
        }
        debug!(path, functions = self.functions.len(), "script compiled");

        let global_this = Value::Object(self.realm.global.clone());
        let mut host = EngineHost {
            functions: &mut self.functions,
            compile_options: &compile_options,
            call_stack: &mut self.call_stack,
        };
        match host.invoke(&mut self.realm, script_id, global_this, &[]) {
            Ok(value) => Ok(value),
            Err(unwind) => Err(self.unwind_to_error(unwind, path).into()),
        }
    }

    /// Install a value as a global. Overwrites constant-backed globals
    /// (only the host API may do that).
    pub fn set_global_value(&mut self, name: &str, value: Value) {
        let global_proto = self.realm.global_proto;
        let is_constant = matches!(
            self.realm.registry.resolve(global_proto, name),
            Some((owner, var))
                if owner == global_proto && matches!(var.backing, PropertyBacking::Constant(_))
        );
        if is_constant {
            let static_type = value.static_type();
            let var = self
                .realm
                .registry
                .get_mut(global_proto)
                .properties
                .get_mut(name)
                .unwrap();
            let dependents: Vec<FunctionId> = var.dependents.iter().copied().collect();
            var.backing = PropertyBacking::Constant(value);
            var.static_type = static_type;
            self.functions.mark_recompile(&dependents);
            return;
        }
        let (action, invalidated) =
            self.realm
                .registry
                .write_slot(global_proto, name, value.static_type());
        self.functions.mark_recompile(&invalidated);
        match action {
            SlotAction::Field(index) => {
                self.realm.global.borrow_mut().set_field(index.0 as usize, value);
            }
            SlotAction::Cell(cell) => *cell.borrow_mut() = value,
            SlotAction::CallSetter(_) | SlotAction::Ignore => {}
        }
    }

    /// Read a global value; absent names read as `undefined`.
    pub fn get_global_value(&mut self, name: &str) -> Value {
        let Some((_, var)) = self.realm.registry.resolve(self.realm.global_proto, name) else {
            return Value::Undefined;
        };
        let backing = var.backing.clone();
        match backing {
            PropertyBacking::Field(index) => self.realm.global.borrow().field(index.0 as usize),
            PropertyBacking::Constant(value) => value,
            PropertyBacking::Cell(cell) => cell.borrow().clone(),
            PropertyBacking::MethodGroup(group) => match group[0].target {
                MethodTarget::Script(function) => {
                    Value::Function(self.functions.function_object(function))
                }
                MethodTarget::Native(native) => {
                    Value::Function(self.realm.natives[native.0 as usize].object.clone())
                }
            },
            PropertyBacking::Unassigned | PropertyBacking::Accessor { .. } => Value::Undefined,
        }
    }

    /// Borrow the realm (host extensions and tests).
    pub fn realm_mut(&mut self) -> &mut Realm {
        &mut self.realm
    }

    // ==================== Optimisation introspection ====================

    /// The specialised parameter types of a named global function.
    pub fn function_parameter_types(&self, name: &str) -> Option<Vec<StaticType>> {
        let id = self.named_function(name)?;
        Some(self.functions.get(id).param_types.clone())
    }

    /// How many times a named global function has been compiled.
    pub fn function_compile_count(&self, name: &str) -> Option<u32> {
        let id = self.named_function(name)?;
        Some(self.functions.get(id).compile_count)
    }

    /// The tracked static type of a property on a named global object's
    /// prototype.
    pub fn property_static_type(&self, object_name: &str, property: &str) -> Option<StaticType> {
        let (_, var) = self
            .realm
            .registry
            .resolve(self.realm.global_proto, object_name)?;
        let PropertyBacking::Field(index) = var.backing else {
            return None;
        };
        let value = self.realm.global.borrow().field(index.0 as usize);
        let proto = value.as_object()?.borrow().proto;
        let (_, var) = self.realm.registry.resolve(proto, property)?;
        Some(var.static_type)
    }

    fn named_function(&self, name: &str) -> Option<FunctionId> {
        let (_, var) = self
            .realm
            .registry
            .resolve(self.realm.global_proto, name)?;
        match &var.backing {
            PropertyBacking::MethodGroup(group) => match group.first()?.target {
                MethodTarget::Script(id) => Some(id),
                MethodTarget::Native(_) => None,
            },
            _ => None,
        }
    }

    // ==================== Error conversion ====================

    fn unwind_to_error(&self, unwind: Unwind, path: &str) -> JsError {
        let (kind, message) = self.classify_thrown(&unwind.value);
        let top = unwind.stack.first();
        JsError {
            kind,
            message,
            line: top.map(|f| f.line).unwrap_or(0),
            source: path.to_string(),
            function: top.map(|f| f.function.clone()).unwrap_or_default(),
            stack: format_stack(&unwind.stack, path),
        }
    }

    fn classify_thrown(&self, value: &Value) -> (ErrorKind, String) {
        if let Some(obj) = value.as_object() {
            let own_proto = obj.borrow().proto;
            // Walk the chain and match the most-derived error prototype.
            let mut cursor = Some(own_proto);
            while let Some(proto) = cursor {
                if let Some(kind) = self.error_kind_of(proto) {
                    let message = self
                        .error_field(own_proto, obj, "message")
                        .unwrap_or_default();
                    return (kind, message);
                }
                cursor = self.realm.registry.get(proto).parent;
            }
        }
        (
            ErrorKind::Generic,
            marten_core::convert::to_flat_string(value).to_string(),
        )
    }

    fn error_kind_of(&self, proto: PrototypeId) -> Option<ErrorKind> {
        self.realm
            .error_protos
            .iter()
            .find(|(_, p)| **p == proto)
            .map(|(kind, _)| *kind)
    }

    fn error_field(
        &self,
        proto: PrototypeId,
        obj: &Rc<RefCell<ScriptObject>>,
        name: &str,
    ) -> Option<String> {
        let (_, var) = self.realm.registry.resolve(proto, name)?;
        let PropertyBacking::Field(index) = var.backing else {
            return None;
        };
        let value = obj.borrow().field(index.0 as usize);
        if value.is_undefined() {
            return None;
        }
        Some(marten_core::convert::to_flat_string(&value).to_string())
    }
}

/// The engine side of the executor's [`CallHost`] seam: compiles function
/// bodies on demand, swaps method handles after invalidation, and tracks
/// the generated-method call chain.
struct EngineHost<'a> {
    functions: &'a mut FunctionTable,
    compile_options: &'a CompileOptions,
    call_stack: &'a mut Vec<FunctionId>,
}

impl CallHost for EngineHost<'_> {
    fn invoke(
        &mut self,
        realm: &mut Realm,
        function: FunctionId,
        this: Value,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(realm.throw_error(
                ErrorKind::Range,
                "Maximum call stack size exceeded",
            ));
        }

        // Observe the concrete argument types; widening marks the body
        // for recompilation before the call proceeds.
        let arg_types: Vec<StaticType> = args.iter().map(Value::static_type).collect();
        self.functions.observe_call_types(function, &arg_types);

        let needs_compile = {
            let record = self.functions.get(function);
            record.code.is_none() || record.recompile_needed
        };
        if needs_compile {
            debug!(
                function = %self.functions.get(function).name,
                "rebuilding invalidated method"
            );
            compile_function(realm, self.functions, function, self.compile_options)
                .map_err(|e| realm.throw_error(ErrorKind::Syntax, &e.to_string()))?;
        }
        let record = self.functions.get(function);
        let method = record.code.clone().expect("compiled above");
        let this = match this {
            // Sloppy-mode calls receive the global object.
            Value::Undefined if !record.ast.strict => Value::Object(realm.global.clone()),
            other => other,
        };

        self.call_stack.push(function);
        let result = run_method(&method, realm, self, this, args);
        self.call_stack.pop();
        result
    }

    fn construct(
        &mut self,
        realm: &mut Realm,
        function: FunctionId,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        let proto = self.functions.ensure_instance_proto(function, realm);
        let instance = Value::Object(Rc::new(RefCell::new(ScriptObject::new(proto))));
        let result = self.invoke(realm, function, instance.clone(), args)?;
        // An explicit object return replaces the allocation.
        Ok(match result {
            Value::Object(_) => result,
            _ => instance,
        })
    }

    fn function_object(&mut self, _realm: &mut Realm, function: FunctionId) -> FunctionRef {
        self.functions.function_object(function)
    }

    fn invalidate(&mut self, functions: &[FunctionId]) {
        self.functions.mark_recompile(functions);
    }

    fn calling_function(&mut self, _realm: &mut Realm) -> Option<FunctionRef> {
        let len = self.call_stack.len();
        if len >= 2 {
            Some(self.functions.function_object(self.call_stack[len - 2]))
        } else {
            None
        }
    }
}
