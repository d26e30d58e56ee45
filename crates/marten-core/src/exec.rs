//! The typed stack-machine executor.
//!
//! Runs one finalised [`Method`] per frame. Calls back into the engine
//! through [`CallHost`] so function bodies can be compiled (and silently
//! recompiled) on demand. Typed instructions are the compiler's fast
//! paths; every one of them tolerates the wider value a deopt may have
//! produced (an `int32` slot may hold a double after overflow).

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use marten_code::{
    CompareKind, CompareOp, CoerceKind, Constant, ErrorClass, FunctionId, Instruction, Method,
};

use crate::convert;
use crate::error::{ErrorKind, Unwind};
use crate::object::ScriptObject;
use crate::proto::{MethodTarget, PropertyBacking, SlotAction};
use crate::realm::Realm;
use crate::string::ConcatString;
use crate::value::{FunctionKind, FunctionRef, Value};

/// The engine-side services emitted code needs at runtime.
pub trait CallHost {
    /// Call a user-defined function, compiling it first when needed.
    fn invoke(
        &mut self,
        realm: &mut Realm,
        function: FunctionId,
        this: Value,
        args: &[Value],
    ) -> Result<Value, Unwind>;

    /// Construct an instance: allocate from the function's instance
    /// prototype, run the body, honour an explicit object return.
    fn construct(
        &mut self,
        realm: &mut Realm,
        function: FunctionId,
        args: &[Value],
    ) -> Result<Value, Unwind>;

    /// The stable function object for a user-defined function.
    fn function_object(&mut self, realm: &mut Realm, function: FunctionId) -> FunctionRef;

    /// Mark functions for recompilation after a type collapse.
    fn invalidate(&mut self, functions: &[FunctionId]);

    /// The function that called the currently-executing one, via the
    /// method lookup table (drives `arguments.caller`).
    fn calling_function(&mut self, realm: &mut Realm) -> Option<FunctionRef>;
}

/// Execute a method body.
pub fn run_method(
    method: &Method,
    realm: &mut Realm,
    host: &mut dyn CallHost,
    this: Value,
    args: &[Value],
) -> Result<Value, Unwind> {
    let mut slots = vec![Value::Undefined; method.slot_count as usize];
    slots[0] = this.clone();
    for (i, arg) in args.iter().enumerate() {
        let slot = i + 1;
        if slot < method.param_count as usize {
            slots[slot] = arg.clone();
        }
    }

    let mut exec = Executor {
        method,
        realm,
        host,
        stack: Vec::with_capacity(8),
        slots,
        regions: Vec::new(),
        args: args.to_vec(),
    };

    let mut pc = 0usize;
    loop {
        if pc >= method.instructions.len() {
            return Ok(Value::Undefined);
        }
        match exec.step(pc) {
            Ok(Flow::Next) => pc += 1,
            Ok(Flow::Jump(target)) => pc = target,
            Ok(Flow::Return(value)) => return Ok(value),
            Err(unwind) => match exec.handle_unwind(unwind) {
                Ok(handler) => pc = handler,
                Err(mut unwind) => {
                    unwind.push_frame(method.name.clone(), method.line_of(pc));
                    return Err(unwind);
                }
            },
        }
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

struct TryRegion {
    catch: Option<usize>,
    finally: Option<FinallyHandler>,
    stack_len: usize,
}

#[derive(Clone, Copy)]
struct FinallyHandler {
    target: usize,
    state_slot: usize,
    pending_slot: usize,
}

struct Executor<'a> {
    method: &'a Method,
    realm: &'a mut Realm,
    host: &'a mut dyn CallHost,
    stack: Vec<Value>,
    slots: Vec<Value>,
    regions: Vec<TryRegion>,
    /// The caller-supplied arguments, for `arguments` materialisation.
    args: Vec<Value>,
}

impl<'a> Executor<'a> {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        debug_assert!(!self.stack.is_empty(), "operand stack underflow");
        self.stack.pop().unwrap_or(Value::Undefined)
    }

    fn pop_args(&mut self, argc: usize) -> SmallVec<[Value; 8]> {
        debug_assert!(self.stack.len() >= argc);
        let at = self.stack.len().saturating_sub(argc);
        self.stack.drain(at..).collect()
    }

    fn const_str(&mut self, index: marten_code::ConstantIndex) -> Rc<str> {
        match self.method.constants.get(index) {
            Some(Constant::String(s)) => self.realm.intern(s),
            _ => Rc::from(""),
        }
    }

    fn type_error(&mut self, message: &str) -> Unwind {
        self.realm.throw_error(ErrorKind::Type, message)
    }

    fn handle_unwind(&mut self, unwind: Unwind) -> Result<usize, Unwind> {
        while let Some(region) = self.regions.pop() {
            self.stack.truncate(region.stack_len);
            if let Some(catch) = region.catch {
                self.push(unwind.value);
                return Ok(catch);
            }
            if let Some(finally) = region.finally {
                // Stage the throw for the emitted dispatch after the
                // finally body.
                self.slots[finally.state_slot] = Value::Int(-1);
                self.slots[finally.pending_slot] = unwind.value;
                return Ok(finally.target);
            }
        }
        Err(unwind)
    }

    fn step(&mut self, pc: usize) -> Result<Flow, Unwind> {
        use Instruction::*;
        match self.method.instructions[pc] {
            // ==================== Constants and stack ====================
            LoadUndefined => self.push(Value::Undefined),
            LoadNull => self.push(Value::Null),
            LoadBool { value } => self.push(Value::Bool(value)),
            LoadInt { value } => self.push(Value::Int(value)),
            LoadNumber { value } => self.push(Value::Number(value)),
            LoadConst { index } => {
                let constant = self.method.constants.get(index).cloned();
                let value = match constant {
                    Some(Constant::String(s)) => Value::Str(self.realm.intern(&s)),
                    Some(Constant::Regex { pattern, flags }) => self.make_regex(&pattern, &flags),
                    None => Value::Undefined,
                };
                self.push(value);
            }
            Dup => {
                let top = self.stack.last().cloned().unwrap_or(Value::Undefined);
                self.push(top);
            }
            Pop => {
                self.pop();
            }

            // ==================== Slots ====================
            GetSlot { slot } => {
                let value = self.slots[slot.0 as usize].clone();
                self.push(value);
            }
            SetSlot { slot } => {
                let value = self.pop();
                self.slots[slot.0 as usize] = value;
            }
            LoadGlobalObject => {
                let global = self.realm.global.clone();
                self.push(Value::Object(global));
            }

            // ==================== Arithmetic ====================
            AddInt => self.int_binop(|x, y| x.checked_add(y), |x, y| x + y),
            SubInt => self.int_binop(|x, y| x.checked_sub(y), |x, y| x - y),
            MulInt => self.int_binop(|x, y| x.checked_mul(y), |x, y| x * y),
            NegInt => {
                let v = self.pop();
                match v {
                    // -0 is a double, not an int.
                    Value::Int(x) if x != 0 => match x.checked_neg() {
                        Some(n) => self.push(Value::Int(n)),
                        None => self.push(Value::Number(-(x as f64))),
                    },
                    other => self.push(Value::Number(-convert::to_number(&other))),
                }
            }
            AddNumber => self.num_binop(|x, y| x + y),
            SubNumber => self.num_binop(|x, y| x - y),
            MulNumber => self.num_binop(|x, y| x * y),
            DivNumber => self.num_binop(|x, y| x / y),
            ModNumber => self.num_binop(ecma_rem),
            NegNumber => {
                let v = self.pop();
                self.push(Value::Number(-convert::to_number(&v)));
            }
            AddGeneric => {
                let b = self.pop();
                let a = self.pop();
                let result = add_generic(a, b);
                self.push(result);
            }

            // ==================== Bitwise ====================
            BitAnd => self.bit_binop(|x, y| x & y),
            BitOr => self.bit_binop(|x, y| x | y),
            BitXor => self.bit_binop(|x, y| x ^ y),
            BitNot => {
                let v = self.pop();
                self.push(Value::Int(!convert::to_int32(&v)));
            }
            Shl => self.bit_binop(|x, y| x.wrapping_shl(y as u32 & 31)),
            Shr => self.bit_binop(|x, y| x.wrapping_shr(y as u32 & 31)),
            Ushr => {
                let b = self.pop();
                let a = self.pop();
                let shifted = convert::to_uint32(&a).wrapping_shr(convert::to_uint32(&b) & 31);
                self.push(uint_value(shifted));
            }

            // ==================== Strings ====================
            Concat => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Concat(concat_values(a, b)));
            }

            // ==================== Comparison and logic ====================
            Compare { op, kind } => {
                let b = self.pop();
                let a = self.pop();
                let result = self.compare(op, kind, a, b);
                self.push(Value::Bool(result));
            }
            Not => {
                let v = self.pop();
                self.push(Value::Bool(!convert::to_boolean(&v)));
            }

            // ==================== Conversions ====================
            Coerce { to } => {
                let v = self.pop();
                let converted = match to {
                    CoerceKind::Boolean => Value::Bool(convert::to_boolean(&v)),
                    CoerceKind::Number => Value::Number(convert::to_number(&v)),
                    CoerceKind::Int32 => Value::Int(convert::to_int32(&v)),
                    CoerceKind::Uint32 => uint_value(convert::to_uint32(&v)),
                    CoerceKind::Integer => Value::Int(convert::to_integer(&v)),
                    CoerceKind::String => Value::Str(convert::to_flat_string(&v)),
                    CoerceKind::ConcatString => Value::Concat(convert::to_concat(&v)),
                    CoerceKind::Object => {
                        if v.is_nullish() {
                            return Err(self.type_error(&format!(
                                "Cannot convert {} to object",
                                v.type_of()
                            )));
                        }
                        v
                    }
                };
                self.push(converted);
            }

            // ==================== Type operators ====================
            TypeOf => {
                let v = self.pop();
                let name = self.realm.intern(v.type_of());
                self.push(Value::Str(name));
            }
            TypeOfName { name } => {
                let name = self.const_str(name);
                let value = self.read_global(&name);
                let text = match value {
                    Some(v) => v?.type_of(),
                    None => "undefined",
                };
                let interned = self.realm.intern(text);
                self.push(Value::Str(interned));
            }
            InstanceOf => {
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.instance_of(&lhs, &rhs)?;
                self.push(Value::Bool(result));
            }
            In => {
                let rhs = self.pop();
                let lhs = self.pop();
                let Some(obj) = rhs.as_object().cloned() else {
                    return Err(
                        self.type_error("Cannot use 'in' operator on a non-object")
                    );
                };
                let key = convert::to_flat_string(&lhs);
                let found = match element_index(&key) {
                    Some(i) if obj.borrow().elements.is_some() => {
                        i < obj.borrow().length().unwrap_or(0)
                    }
                    _ => {
                        let proto = obj.borrow().proto;
                        self.realm.registry.resolve(proto, &key).is_some()
                    }
                };
                self.push(Value::Bool(found));
            }
            Delete => {
                let key = self.pop();
                let target = self.pop();
                let result = match target.as_object() {
                    Some(obj) => {
                        let key = convert::to_flat_string(&key);
                        match element_index(&key) {
                            Some(i) if obj.borrow().elements.is_some() => {
                                let mut borrowed = obj.borrow_mut();
                                if let Some(elements) = borrowed.elements.as_mut()
                                    && i < elements.len()
                                {
                                    elements[i] = Value::Undefined;
                                }
                                true
                            }
                            _ => {
                                let proto = obj.borrow().proto;
                                let (deleted, invalidated) =
                                    self.realm.registry.delete_property(proto, &key);
                                if !invalidated.is_empty() {
                                    self.host.invalidate(&invalidated);
                                }
                                deleted
                            }
                        }
                    }
                    None => true,
                };
                self.push(Value::Bool(result));
            }

            // ==================== Objects ====================
            NewObject { proto } => {
                let obj = ScriptObject::new(proto);
                self.push(Value::Object(Rc::new(RefCell::new(obj))));
            }
            NewArray { length } => {
                let elements: Vec<Value> = self.pop_args(length as usize).into_vec();
                let obj = ScriptObject::new_array(self.realm.array_proto, elements);
                self.push(Value::Object(Rc::new(RefCell::new(obj))));
            }
            GetField { field } => {
                let target = self.pop();
                let Some(obj) = target.as_object() else {
                    return Err(self.type_error(&format!(
                        "Cannot read fields of {}",
                        target.type_of()
                    )));
                };
                let value = obj.borrow().field(field.0 as usize);
                self.push(value);
            }
            SetField { field } => {
                let value = self.pop();
                let target = self.pop();
                let Some(obj) = target.as_object() else {
                    return Err(self.type_error(&format!(
                        "Cannot write fields of {}",
                        target.type_of()
                    )));
                };
                obj.borrow_mut().set_field(field.0 as usize, value);
            }
            GetProp { name } => {
                let name = self.const_str(name);
                let target = self.pop();
                let value = self.get_property(&target, &name)?;
                self.push(value);
            }
            SetProp { name } => {
                let name = self.const_str(name);
                let value = self.pop();
                let target = self.pop();
                self.set_property(&target, &name, value)?;
            }
            GetElem => {
                let key = self.pop();
                let target = self.pop();
                let value = self.get_element(&target, &key)?;
                self.push(value);
            }
            SetElem => {
                let value = self.pop();
                let key = self.pop();
                let target = self.pop();
                self.set_element(&target, &key, value)?;
            }
            PropNames => {
                let target = self.pop();
                let names = self.enumerate_names(&target);
                let elements: Vec<Value> = names.into_iter().map(Value::Str).collect();
                let obj = ScriptObject::new_array(self.realm.array_proto, elements);
                self.push(Value::Object(Rc::new(RefCell::new(obj))));
            }
            GetGlobalDyn { name } => {
                let name = self.const_str(name);
                match self.read_global(&name) {
                    Some(value) => {
                        let value = value?;
                        self.push(value);
                    }
                    None => {
                        return Err(self
                            .realm
                            .throw_error(ErrorKind::Reference, &format!("{name} is not defined")));
                    }
                }
            }
            SetGlobalDyn { name } => {
                let name = self.const_str(name);
                let value = self.pop();
                let global = Value::Object(self.realm.global.clone());
                self.set_property(&global, &name, value)?;
            }

            // ==================== Functions and calls ====================
            MakeFunction { function } => {
                let func = self.host.function_object(self.realm, function);
                self.push(Value::Function(func));
            }
            Call { argc } => {
                let args = self.pop_args(argc as usize);
                let this = self.pop();
                let callee = self.pop();
                let result = self.call_value(&callee, this, &args)?;
                self.push(result);
            }
            CallDirect { function, argc } => {
                let args = self.pop_args(argc as usize);
                let this = self.pop();
                let result = self.host.invoke(self.realm, function, this, &args)?;
                self.push(result);
            }
            CallNative { native, argc } => {
                let args = self.pop_args(argc as usize);
                let this = self.pop();
                let result = self.realm.call_native(native, &this, &args)?;
                self.push(result);
            }
            New { argc } => {
                let args = self.pop_args(argc as usize);
                let callee = self.pop();
                let result = self.construct_value(&callee, &args)?;
                self.push(result);
            }
            NewDirect { function, argc } => {
                let args = self.pop_args(argc as usize);
                let result = self.host.construct(self.realm, function, &args)?;
                self.push(result);
            }
            CreateArguments => {
                let mut obj =
                    ScriptObject::new_array(self.realm.arguments_proto, self.args.clone());
                if let Some(function) = self.method.function {
                    let callee = self.host.function_object(self.realm, function);
                    obj.set_field(0, Value::Function(callee));
                }
                if let Some(caller) = self.host.calling_function(self.realm) {
                    obj.set_field(1, Value::Function(caller));
                }
                self.push(Value::Object(Rc::new(RefCell::new(obj))));
            }
            Return => {
                let value = self.pop();
                return Ok(Flow::Return(value));
            }

            // ==================== Control flow ====================
            Jump { target } => return Ok(Flow::Jump(self.method.label_target(target))),
            JumpIfTrue { target } => {
                let v = self.pop();
                if convert::to_boolean(&v) {
                    return Ok(Flow::Jump(self.method.label_target(target)));
                }
            }
            JumpIfFalse { target } => {
                let v = self.pop();
                if !convert::to_boolean(&v) {
                    return Ok(Flow::Jump(self.method.label_target(target)));
                }
            }

            // ==================== Exception regions ====================
            EnterTry { catch } => {
                self.regions.push(TryRegion {
                    catch: Some(self.method.label_target(catch)),
                    finally: None,
                    stack_len: self.stack.len(),
                });
            }
            EnterFinally {
                finally,
                state_slot,
                pending_slot,
            } => {
                self.regions.push(TryRegion {
                    catch: None,
                    finally: Some(FinallyHandler {
                        target: self.method.label_target(finally),
                        state_slot: state_slot.0 as usize,
                        pending_slot: pending_slot.0 as usize,
                    }),
                    stack_len: self.stack.len(),
                });
            }
            LeaveTry => {
                self.regions.pop();
            }
            Throw => {
                let value = self.pop();
                return Err(Unwind::new(value));
            }
            ThrowError { class, message } => {
                let message = self.const_str(message);
                let kind = match class {
                    ErrorClass::Type => ErrorKind::Type,
                    ErrorClass::Range => ErrorKind::Range,
                    ErrorClass::Reference => ErrorKind::Reference,
                };
                return Err(self.realm.throw_error(kind, &message));
            }
        }
        Ok(Flow::Next)
    }

    // ==================== Operation helpers ====================

    fn int_binop(&mut self, int_op: fn(i32, i32) -> Option<i32>, f64_op: fn(f64, f64) -> f64) {
        let b = self.pop();
        let a = self.pop();
        if let (Value::Int(x), Value::Int(y)) = (&a, &b)
            && let Some(r) = int_op(*x, *y)
        {
            self.push(Value::Int(r));
            return;
        }
        // Overflow or a deopt-widened operand: promote to double.
        self.push(Value::Number(f64_op(
            convert::to_number(&a),
            convert::to_number(&b),
        )));
    }

    fn num_binop(&mut self, op: fn(f64, f64) -> f64) {
        let b = self.pop();
        let a = self.pop();
        self.push(Value::Number(op(
            convert::to_number(&a),
            convert::to_number(&b),
        )));
    }

    fn bit_binop(&mut self, op: fn(i32, i32) -> i32) {
        let b = self.pop();
        let a = self.pop();
        self.push(Value::Int(op(
            convert::to_int32(&a),
            convert::to_int32(&b),
        )));
    }

    fn compare(&mut self, op: CompareOp, kind: CompareKind, a: Value, b: Value) -> bool {
        match kind {
            CompareKind::Int32 | CompareKind::Number => {
                let x = convert::to_number(&a);
                let y = convert::to_number(&b);
                numeric_compare(op, x, y)
            }
            CompareKind::String => {
                let x = convert::to_flat_string(&a);
                let y = convert::to_flat_string(&b);
                ordered_compare(op, x.as_ref().cmp(y.as_ref()))
            }
            CompareKind::Generic => generic_compare(op, &a, &b),
        }
    }

    fn make_regex(&mut self, pattern: &str, flags: &str) -> Value {
        let mut obj = ScriptObject::new(self.realm.regexp_proto);
        obj.set_field(0, Value::Str(self.realm.intern(pattern)));
        obj.set_field(1, Value::Str(self.realm.intern(flags)));
        Value::Object(Rc::new(RefCell::new(obj)))
    }

    /// Dynamic global read. `None` means the name is unknown (the caller
    /// chooses between ReferenceError and `typeof`'s `"undefined"`).
    fn read_global(&mut self, name: &str) -> Option<Result<Value, Unwind>> {
        let proto = self.realm.global_proto;
        self.realm.registry.resolve(proto, name)?;
        let global = Value::Object(self.realm.global.clone());
        Some(self.get_property(&global, name))
    }

    /// Dynamic property read over any value.
    fn get_property(&mut self, target: &Value, name: &str) -> Result<Value, Unwind> {
        // length is special-cased for strings and array-likes.
        if name == "length" {
            if let Some(s) = target.as_str() {
                return Ok(Value::Int(s.encode_utf16().count() as i32));
            }
            if let Some(obj) = target.as_object()
                && let Some(len) = obj.borrow().length()
            {
                return Ok(Value::Int(len as i32));
            }
        }
        if let Some(obj) = target.as_object()
            && obj.borrow().elements.is_some()
            && let Some(index) = element_index(name)
        {
            return Ok(obj.borrow().element(index));
        }

        let Some(proto) = self.realm.prototype_of(target) else {
            return Err(self.type_error(&format!(
                "Cannot read properties of {} (reading '{name}')",
                target.type_of()
            )));
        };
        let Some((_, var)) = self.realm.registry.resolve(proto, name) else {
            return Ok(Value::Undefined);
        };
        let backing = var.backing.clone();
        match backing {
            PropertyBacking::Unassigned => Ok(Value::Undefined),
            PropertyBacking::Constant(v) => Ok(v),
            PropertyBacking::Cell(cell) => Ok(cell.borrow().clone()),
            PropertyBacking::Field(index) => Ok(match target.as_object() {
                Some(obj) => obj.borrow().field(index.0 as usize),
                // Primitives carry no instance fields.
                None => Value::Undefined,
            }),
            PropertyBacking::MethodGroup(group) => {
                let overload = &group[0];
                Ok(Value::Function(self.target_object(overload.target)))
            }
            PropertyBacking::Accessor { getter, .. } => match getter {
                Some(target_fn) => self.call_target(target_fn, target.clone(), &[]),
                None => Ok(Value::Undefined),
            },
        }
    }

    /// Dynamic property write.
    fn set_property(&mut self, target: &Value, name: &str, value: Value) -> Result<(), Unwind> {
        let Some(obj) = target.as_object() else {
            // Sloppy-mode writes to primitives are dropped.
            return Ok(());
        };
        if obj.borrow().elements.is_some() {
            if let Some(index) = element_index(name) {
                obj.borrow_mut().set_element(index, value);
                return Ok(());
            }
            if name == "length" {
                let new_len = convert::to_uint32(&value) as usize;
                let mut borrowed = obj.borrow_mut();
                if let Some(elements) = borrowed.elements.as_mut() {
                    elements.resize(new_len, Value::Undefined);
                }
                return Ok(());
            }
        }
        let proto = obj.borrow().proto;
        let (action, invalidated) =
            self.realm
                .registry
                .write_slot(proto, name, value.static_type());
        if !invalidated.is_empty() {
            self.host.invalidate(&invalidated);
        }
        match action {
            SlotAction::Field(index) => {
                obj.borrow_mut().set_field(index.0 as usize, value);
                Ok(())
            }
            SlotAction::Cell(cell) => {
                *cell.borrow_mut() = value;
                Ok(())
            }
            SlotAction::CallSetter(setter) => {
                self.call_target(setter, target.clone(), &[value])?;
                Ok(())
            }
            SlotAction::Ignore => Ok(()),
        }
    }

    fn get_element(&mut self, target: &Value, key: &Value) -> Result<Value, Unwind> {
        if let Some(index) = value_index(key) {
            if let Some(obj) = target.as_object()
                && obj.borrow().elements.is_some()
            {
                return Ok(obj.borrow().element(index));
            }
            if let Some(s) = target.as_str() {
                let unit = s.encode_utf16().nth(index);
                return Ok(match unit {
                    Some(u) => Value::Str(
                        self.realm
                            .intern(&String::from_utf16_lossy(&[u])),
                    ),
                    None => Value::Undefined,
                });
            }
        }
        let name = convert::to_flat_string(key);
        self.get_property(target, &name)
    }

    fn set_element(&mut self, target: &Value, key: &Value, value: Value) -> Result<(), Unwind> {
        if let Some(index) = value_index(key)
            && let Some(obj) = target.as_object()
            && obj.borrow().elements.is_some()
        {
            obj.borrow_mut().set_element(index, value);
            return Ok(());
        }
        let name = convert::to_flat_string(key);
        self.set_property(target, &name, value)
    }

    fn enumerate_names(&mut self, target: &Value) -> Vec<Rc<str>> {
        let mut names = Vec::new();
        if let Some(obj) = target.as_object() {
            if let Some(len) = obj.borrow().length() {
                for i in 0..len {
                    names.push(self.realm.intern(&i.to_string()));
                }
            }
            let proto = obj.borrow().proto;
            names.extend(self.realm.registry.enumerable_names(proto));
        } else if let Some(s) = target.as_str() {
            for i in 0..s.encode_utf16().count() {
                names.push(self.realm.intern(&i.to_string()));
            }
        }
        names
    }

    fn instance_of(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, Unwind> {
        let Some(ctor) = rhs.as_function() else {
            return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
        };
        let Some(instance_proto) = *ctor.instance_proto.borrow() else {
            return Ok(false);
        };
        let Some(obj) = lhs.as_object() else {
            return Ok(false);
        };
        let mut cursor = Some(obj.borrow().proto);
        while let Some(id) = cursor {
            if id == instance_proto {
                return Ok(true);
            }
            cursor = self.realm.registry.get(id).parent;
        }
        Ok(false)
    }

    fn target_object(&mut self, target: MethodTarget) -> FunctionRef {
        match target {
            MethodTarget::Script(fid) => self.host.function_object(self.realm, fid),
            MethodTarget::Native(nid) => self.realm.natives[nid.0 as usize].object.clone(),
        }
    }

    fn call_target(
        &mut self,
        target: MethodTarget,
        this: Value,
        args: &[Value],
    ) -> Result<Value, Unwind> {
        match target {
            MethodTarget::Script(fid) => self.host.invoke(self.realm, fid, this, args),
            MethodTarget::Native(nid) => self.realm.call_native(nid, &this, args),
        }
    }

    fn call_value(&mut self, callee: &Value, this: Value, args: &[Value]) -> Result<Value, Unwind> {
        let Some(func) = callee.as_function() else {
            return Err(self.type_error(&format!("{} is not a function", callee.type_of())));
        };
        match func.kind {
            FunctionKind::Script(fid) => self.host.invoke(self.realm, fid, this, args),
            FunctionKind::Native(nid) => self.realm.call_native(nid, &this, args),
        }
    }

    fn construct_value(&mut self, callee: &Value, args: &[Value]) -> Result<Value, Unwind> {
        let Some(func) = callee.as_function() else {
            return Err(self.type_error(&format!("{} is not a constructor", callee.type_of())));
        };
        match func.kind {
            FunctionKind::Script(fid) => self.host.construct(self.realm, fid, args),
            FunctionKind::Native(nid) => {
                let Some(proto) = *func.instance_proto.borrow() else {
                    return Err(self.type_error(&format!("{} is not a constructor", func.name)));
                };
                let instance =
                    Value::Object(Rc::new(RefCell::new(ScriptObject::new(proto))));
                let result = self.realm.call_native(nid, &instance, args)?;
                Ok(match result {
                    Value::Object(_) => result,
                    _ => instance,
                })
            }
        }
    }
}

// ==================== Value algebra ====================

fn uint_value(v: u32) -> Value {
    if v <= i32::MAX as u32 {
        Value::Int(v as i32)
    } else {
        Value::Number(v as f64)
    }
}

/// ES `%`: the sign follows the dividend.
fn ecma_rem(x: f64, y: f64) -> f64 {
    let r = x % y;
    if r == 0.0 && x.is_sign_negative() { -0.0 } else { r }
}

fn concat_values(a: Value, b: Value) -> ConcatString {
    match (a, b) {
        (Value::Concat(left), Value::Concat(right)) => left.append(right),
        (Value::Concat(left), right) => left.append_flat(convert::to_flat_string(&right)),
        (left, Value::Concat(right)) => right.prepend_flat(convert::to_flat_string(&left)),
        (left, right) => ConcatString::from_flat(
            convert::to_flat_string(&left),
            convert::to_flat_string(&right),
        ),
    }
}

/// Abstract `+`: if either operand is string-like after ToPrimitive the
/// result is a deferred concatenation, otherwise a numeric sum.
fn add_generic(a: Value, b: Value) -> Value {
    let pa = convert::to_primitive(&a);
    let pb = convert::to_primitive(&b);
    if matches!(pa, Value::Str(_) | Value::Concat(_)) || matches!(pb, Value::Str(_) | Value::Concat(_))
    {
        return Value::Concat(concat_values(pa, pb));
    }
    if let (Value::Int(x), Value::Int(y)) = (&pa, &pb)
        && let Some(r) = x.checked_add(*y)
    {
        return Value::Int(r);
    }
    Value::Number(convert::to_number(&pa) + convert::to_number(&pb))
}

fn numeric_compare(op: CompareOp, x: f64, y: f64) -> bool {
    use CompareOp::*;
    match op {
        Equal | StrictEqual => x == y,
        NotEqual | StrictNotEqual => x != y,
        Less => x < y,
        LessEqual => x <= y,
        Greater => x > y,
        GreaterEqual => x >= y,
    }
}

fn ordered_compare(op: CompareOp, ordering: std::cmp::Ordering) -> bool {
    use CompareOp::*;
    match op {
        Equal | StrictEqual => ordering.is_eq(),
        NotEqual | StrictNotEqual => ordering.is_ne(),
        Less => ordering.is_lt(),
        LessEqual => ordering.is_le(),
        Greater => ordering.is_gt(),
        GreaterEqual => ordering.is_ge(),
    }
}

fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => {
            if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
                return x == y;
            }
            match (a, b) {
                (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
                (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
                _ => false,
            }
        }
    }
}

fn abstract_equals(a: &Value, b: &Value) -> bool {
    if same_family(a, b) {
        return strict_equals(a, b);
    }
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Object(_) | Value::Function(_), Value::Str(_) | Value::Concat(_))
        | (Value::Str(_) | Value::Concat(_), Value::Object(_) | Value::Function(_)) => {
            let pa = convert::to_primitive(a);
            let pb = convert::to_primitive(b);
            pa.as_str() == pb.as_str()
        }
        _ => {
            convert::to_number(&convert::to_primitive(a))
                == convert::to_number(&convert::to_primitive(b))
        }
    }
}

fn same_family(a: &Value, b: &Value) -> bool {
    use Value::*;
    matches!(
        (a, b),
        (Undefined, Undefined)
            | (Null, Null)
            | (Bool(_), Bool(_))
            | (Int(_) | Number(_), Int(_) | Number(_))
            | (Str(_) | Concat(_), Str(_) | Concat(_))
            | (Object(_), Object(_))
            | (Function(_), Function(_))
    )
}

fn generic_compare(op: CompareOp, a: &Value, b: &Value) -> bool {
    use CompareOp::*;
    match op {
        Equal => abstract_equals(a, b),
        NotEqual => !abstract_equals(a, b),
        StrictEqual => strict_equals(a, b),
        StrictNotEqual => !strict_equals(a, b),
        Less | LessEqual | Greater | GreaterEqual => {
            let pa = convert::to_primitive(a);
            let pb = convert::to_primitive(b);
            if let (Some(x), Some(y)) = (pa.as_str(), pb.as_str()) {
                ordered_compare(op, x.as_ref().cmp(y.as_ref()))
            } else {
                numeric_compare(op, convert::to_number(&pa), convert::to_number(&pb))
            }
        }
    }
}

/// Parse an array index from a property key.
fn element_index(name: &str) -> Option<usize> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    name.parse::<usize>().ok()
}

fn value_index(key: &Value) -> Option<usize> {
    match key {
        Value::Int(i) if *i >= 0 => Some(*i as usize),
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n < u32::MAX as f64 => {
            Some(*n as usize)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_generic_concatenates_strings() {
        let result = add_generic(Value::Str(Rc::from("a")), Value::Int(1));
        assert_eq!(result.as_str().as_deref(), Some("a1"));
        let result = add_generic(Value::Int(1), Value::Int(2));
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn test_abstract_equality() {
        assert!(abstract_equals(&Value::Null, &Value::Undefined));
        assert!(abstract_equals(
            &Value::Int(1),
            &Value::Str(Rc::from("1"))
        ));
        assert!(!abstract_equals(&Value::Null, &Value::Int(0)));
        assert!(!strict_equals(&Value::Int(1), &Value::Str(Rc::from("1"))));
        assert!(strict_equals(&Value::Int(1), &Value::Number(1.0)));
    }

    #[test]
    fn test_nan_compares_false() {
        assert!(!numeric_compare(CompareOp::Less, f64::NAN, 1.0));
        assert!(!numeric_compare(CompareOp::Equal, f64::NAN, f64::NAN));
        assert!(numeric_compare(CompareOp::NotEqual, f64::NAN, f64::NAN));
    }

    #[test]
    fn test_ecma_rem_sign() {
        assert_eq!(ecma_rem(5.0, 3.0), 2.0);
        assert_eq!(ecma_rem(-5.0, 3.0), -2.0);
    }

    #[test]
    fn test_element_index_rejects_non_canonical() {
        assert_eq!(element_index("0"), Some(0));
        assert_eq!(element_index("12"), Some(12));
        assert_eq!(element_index("01"), None);
        assert_eq!(element_index("x"), None);
    }
}
