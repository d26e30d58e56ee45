//! Expression code generation.
//!
//! Every emitter leaves exactly one value of the returned static type on
//! the stack. Operator lowering defers instruction selection until both
//! operands are emitted: the typed instructions tolerate wider operands,
//! so only observable coercions (tests, stores, string materialisation)
//! go through the conversion emitter.

use marten_code::{
    CompareKind, CompareOp, Instruction, PrototypeId, SlotIndex, StaticType,
};
use marten_core::proto::{MethodOverload, MethodTarget, PropertyBacking};
use marten_parser::{
    AssignOp, BinaryOp, Expression, LiteralValue, LogicalOp, SourcePosition, UnaryOp, UpdateOp,
};

use crate::error::{CompileError, CompileResult};
use crate::generator::MethodGenerator;

impl MethodGenerator<'_> {
    /// Emit an expression; leaves exactly one value on the stack.
    pub(crate) fn emit_expression(&mut self, expr: &Expression) -> CompileResult<StaticType> {
        match expr {
            Expression::Literal { value, pos } => self.emit_literal(value, *pos),
            Expression::This { .. } => {
                self.builder.emit(Instruction::GetSlot { slot: SlotIndex(0) });
                Ok(self.this_type)
            }
            Expression::Identifier { name, pos } => self.emit_identifier_read(name, *pos),
            Expression::Member { object, name, pos } => self.emit_member_read(object, name, *pos),
            Expression::Index { object, index, pos } => {
                self.emit_expression(object)?;
                self.emit_expression(index)?;
                self.mark(*pos);
                self.builder.emit(Instruction::GetElem);
                Ok(StaticType::Any)
            }
            Expression::Call {
                callee,
                arguments,
                pos,
            } => self.emit_call(callee, arguments, *pos),
            Expression::New {
                callee,
                arguments,
                pos,
            } => self.emit_new(callee, arguments, *pos),
            Expression::Unary { op, operand, pos } => self.emit_unary(*op, operand, *pos),
            Expression::Update {
                op,
                prefix,
                target,
                pos,
            } => self.emit_update(*op, *prefix, target, *pos, true),
            Expression::Binary { op, lhs, rhs, .. } => {
                let lhs_type = self.emit_expression(lhs)?;
                let rhs_type = self.emit_expression(rhs)?;
                self.emit_binary_values(*op, lhs_type, rhs_type)
            }
            Expression::Logical { op, lhs, rhs, .. } => self.emit_logical(*op, lhs, rhs),
            Expression::Conditional {
                test,
                consequent,
                alternate,
                ..
            } => self.emit_conditional(test, consequent, alternate),
            Expression::Assignment {
                op, target, value, ..
            } => self.emit_assignment(*op, target, value, true),
            Expression::Array { elements, .. } => {
                for element in elements {
                    match element {
                        Some(element) => {
                            self.emit_expression(element)?;
                        }
                        None => self.builder.emit(Instruction::LoadUndefined),
                    }
                }
                self.builder.emit(Instruction::NewArray {
                    length: elements.len() as u16,
                });
                Ok(StaticType::Object(self.realm.array_proto))
            }
            Expression::Object { properties, .. } => {
                let proto = self.literal_proto();
                self.builder.emit(Instruction::NewObject { proto });
                for property in properties {
                    self.builder.emit(Instruction::Dup);
                    let value_type = self.emit_expression(&property.value)?;
                    let (action, invalidated) =
                        self.realm
                            .registry
                            .write_slot(proto, &property.name, value_type);
                    self.note_invalidated(&invalidated);
                    match action {
                        marten_core::proto::SlotAction::Field(field) => {
                            self.builder.emit(Instruction::SetField { field });
                        }
                        _ => {
                            let index =
                                self.builder.constants_mut().add_string(&property.name);
                            self.builder.emit(Instruction::SetProp { name: index });
                        }
                    }
                }
                Ok(StaticType::Object(proto))
            }
            Expression::Function { function, .. } => {
                let name = match &function.name {
                    Some(name) => self.realm.intern(name),
                    None => self.realm.intern("<anonymous>"),
                };
                let fid = self.functions.declare_for_node(function, name);
                self.builder.emit(Instruction::MakeFunction { function: fid });
                Ok(StaticType::Any)
            }
            Expression::Sequence { expressions, .. } => {
                let (last, init) = expressions
                    .split_last()
                    .ok_or_else(|| CompileError::internal("empty sequence expression"))?;
                for expression in init {
                    self.emit_discarded(expression)?;
                }
                self.emit_expression(last)
            }
        }
    }

    /// Emit an expression whose result is discarded; leaves nothing.
    pub(crate) fn emit_discarded(&mut self, expr: &Expression) -> CompileResult<()> {
        match expr {
            Expression::Assignment {
                op, target, value, ..
            } => {
                self.emit_assignment(*op, target, value, false)?;
                Ok(())
            }
            Expression::Update {
                op,
                prefix,
                target,
                pos,
            } => {
                self.emit_update(*op, *prefix, target, *pos, false)?;
                Ok(())
            }
            _ => {
                self.emit_expression(expr)?;
                self.builder.emit(Instruction::Pop);
                Ok(())
            }
        }
    }

    fn emit_literal(&mut self, value: &LiteralValue, pos: SourcePosition) -> CompileResult<StaticType> {
        self.mark(pos);
        match value {
            LiteralValue::Null => {
                self.builder.emit(Instruction::LoadNull);
                Ok(StaticType::Null)
            }
            LiteralValue::Bool(b) => {
                self.builder.emit(Instruction::LoadBool { value: *b });
                Ok(StaticType::Boolean)
            }
            LiteralValue::Number(n) => {
                if is_int32_literal(*n) {
                    self.builder.emit(Instruction::LoadInt { value: *n as i32 });
                    Ok(StaticType::Int32)
                } else {
                    self.builder.emit(Instruction::LoadNumber { value: *n });
                    Ok(StaticType::Number)
                }
            }
            LiteralValue::Str(s) => {
                let index = self.builder.constants_mut().add_string(s);
                self.builder.emit(Instruction::LoadConst { index });
                Ok(StaticType::String)
            }
            LiteralValue::Regex { pattern, flags } => {
                // One construction per method; the compiled literal is
                // cached in a dedicated slot.
                let key = (pattern.clone(), flags.clone());
                let slot = match self.info.regex_slots.get(&key) {
                    Some(slot) => *slot,
                    None => {
                        let slot = self.builder.declare_local()?;
                        self.info.regex_slots.insert(key, slot);
                        slot
                    }
                };
                let have = self.builder.create_label();
                self.builder.emit(Instruction::GetSlot { slot });
                self.builder.emit(Instruction::Dup);
                self.builder.emit(Instruction::Coerce {
                    to: marten_code::CoerceKind::Boolean,
                });
                self.builder.emit(Instruction::JumpIfTrue { target: have });
                self.builder.emit(Instruction::Pop);
                let index = self.builder.constants_mut().add_regex(pattern, flags);
                self.builder.emit(Instruction::LoadConst { index });
                self.builder.emit(Instruction::Dup);
                self.builder.emit(Instruction::SetSlot { slot });
                self.builder.place_label(have);
                Ok(StaticType::Object(self.realm.regexp_proto))
            }
        }
    }

    /// The stable prototype for the object literal at the current site.
    fn literal_proto(&mut self) -> PrototypeId {
        let ordinal = self.literal_counter;
        self.literal_counter += 1;
        if let Some(proto) = self.functions.get(self.function).literal_protos.get(ordinal) {
            return *proto;
        }
        let name = self.realm.intern("Object");
        let proto = self.realm.registry.create(name, Some(self.realm.object_proto));
        self.functions
            .get_mut(self.function)
            .literal_protos
            .push(proto);
        proto
    }

    // ==================== Calls ====================

    fn emit_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        pos: SourcePosition,
    ) -> CompileResult<StaticType> {
        let argc = arguments.len() as u8;

        // Method call through a statically resolved member.
        if let Expression::Member {
            object,
            name,
            pos: member_pos,
        } = callee
        {
            let object_type = self.emit_expression(object)?;
            self.mark(*member_pos);
            if let Some(proto) = self.static_proto_of(object_type) {
                let group = match self.realm.registry.resolve(proto, name) {
                    Some((owner, var)) => match &var.backing {
                        PropertyBacking::MethodGroup(group) => Some((owner, group.clone())),
                        _ => None,
                    },
                    None => None,
                };
                if let Some((owner, group)) = group {
                    self.realm.registry.add_dependent(owner, name, self.function);
                    return self.emit_resolved_call(&group, arguments, argc);
                }
            }
            // Dynamic member call: callee below `this` on the stack.
            let this_slot = self.builder.lease_slot()?;
            self.builder.emit(Instruction::SetSlot { slot: this_slot });
            self.builder.emit(Instruction::GetSlot { slot: this_slot });
            let index = self.builder.constants_mut().add_string(name);
            self.builder.emit(Instruction::GetProp { name: index });
            self.builder.emit(Instruction::GetSlot { slot: this_slot });
            self.builder.release_slot(this_slot);
            for argument in arguments {
                self.emit_expression(argument)?;
            }
            self.mark(pos);
            self.builder.emit(Instruction::Call { argc });
            self.note_call();
            return Ok(StaticType::Any);
        }

        // Global function call through a statically resolved identifier.
        if let Expression::Identifier { name, .. } = callee
            && self.scopes.resolve(name).is_none()
        {
            let group = match self.realm.registry.resolve(self.realm.global_proto, name) {
                Some((owner, var)) => match &var.backing {
                    PropertyBacking::MethodGroup(group) => Some((owner, group.clone())),
                    _ => None,
                },
                None => None,
            };
            if let Some((owner, group)) = group {
                self.realm
                    .registry
                    .add_dependent(owner, name, self.function);
                self.builder.emit(Instruction::LoadUndefined);
                return self.emit_resolved_call(&group, arguments, argc);
            }
        }

        // Fully dynamic call.
        self.emit_expression(callee)?;
        self.builder.emit(Instruction::LoadUndefined);
        for argument in arguments {
            self.emit_expression(argument)?;
        }
        self.mark(pos);
        self.builder.emit(Instruction::Call { argc });
        self.note_call();
        Ok(StaticType::Any)
    }

    /// Emit a call whose callee resolved to a method group; `this` is
    /// already on the stack.
    fn emit_resolved_call(
        &mut self,
        group: &[MethodOverload],
        arguments: &[Expression],
        argc: u8,
    ) -> CompileResult<StaticType> {
        let mut arg_types = Vec::with_capacity(arguments.len());
        for argument in arguments {
            arg_types.push(self.emit_expression(argument)?);
        }
        let overload = pick_overload(group, &arg_types);
        match overload.target {
            MethodTarget::Native(native) => {
                self.builder.emit(Instruction::CallNative { native, argc });
                self.note_call();
                Ok(overload.return_type)
            }
            MethodTarget::Script(function) => {
                // Specialise the callee over this site's argument types
                // and record the return-type dependency.
                self.functions.observe_call_types(function, &arg_types);
                self.functions
                    .get_mut(function)
                    .dependents
                    .insert(self.function);
                self.builder.emit(Instruction::CallDirect { function, argc });
                self.note_call();
                Ok(self.functions.get(function).return_type)
            }
        }
    }

    fn emit_new(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        pos: SourcePosition,
    ) -> CompileResult<StaticType> {
        let argc = arguments.len() as u8;

        if let Expression::Identifier { name, .. } = callee
            && self.scopes.resolve(name).is_none()
        {
            let target = match self.realm.registry.resolve(self.realm.global_proto, name) {
                Some((_, var)) => match &var.backing {
                    PropertyBacking::MethodGroup(group) => match group.as_slice() {
                        [
                            MethodOverload {
                                target: MethodTarget::Script(function),
                                ..
                            },
                        ] => Some(*function),
                        _ => None,
                    },
                    _ => None,
                },
                None => None,
            };
            if let Some(function) = target {
                let proto = self.functions.ensure_instance_proto(function, self.realm);
                let mut arg_types = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    arg_types.push(self.emit_expression(argument)?);
                }
                self.functions.observe_call_types(function, &arg_types);
                self.functions
                    .get_mut(function)
                    .dependents
                    .insert(self.function);
                self.mark(pos);
                self.builder.emit(Instruction::NewDirect { function, argc });
                self.note_call();
                return Ok(StaticType::Object(proto));
            }
        }

        self.emit_expression(callee)?;
        for argument in arguments {
            self.emit_expression(argument)?;
        }
        self.mark(pos);
        self.builder.emit(Instruction::New { argc });
        self.note_call();
        Ok(StaticType::Any)
    }

    /// After a call anything can have widened; script-mode field reads
    /// stop inlining types.
    fn note_call(&mut self) {
        if self.script_mode {
            self.globals_dirty = true;
        }
    }

    // ==================== Operators ====================

    fn emit_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expression,
        pos: SourcePosition,
    ) -> CompileResult<StaticType> {
        match op {
            UnaryOp::Minus => {
                let ty = self.emit_expression(operand)?;
                if ty == StaticType::Int32 {
                    self.builder.emit(Instruction::NegInt);
                    Ok(StaticType::Int32)
                } else {
                    self.convert_top(ty, StaticType::Number);
                    self.builder.emit(Instruction::NegNumber);
                    Ok(StaticType::Number)
                }
            }
            UnaryOp::Plus => {
                let ty = self.emit_expression(operand)?;
                if ty.is_numeric() {
                    Ok(ty)
                } else {
                    self.convert_top(ty, StaticType::Number);
                    Ok(StaticType::Number)
                }
            }
            UnaryOp::Not => {
                let ty = self.emit_expression(operand)?;
                self.convert_top(ty, StaticType::Boolean);
                self.builder.emit(Instruction::Not);
                Ok(StaticType::Boolean)
            }
            UnaryOp::BitNot => {
                let ty = self.emit_expression(operand)?;
                self.convert_top(ty, StaticType::Int32);
                self.builder.emit(Instruction::BitNot);
                Ok(StaticType::Int32)
            }
            UnaryOp::Void => {
                self.emit_discarded(operand)?;
                self.builder.emit(Instruction::LoadUndefined);
                Ok(StaticType::Undefined)
            }
            UnaryOp::TypeOf => self.emit_typeof(operand),
            UnaryOp::Delete => self.emit_delete(operand, pos),
        }
    }

    fn emit_typeof(&mut self, operand: &Expression) -> CompileResult<StaticType> {
        // `typeof unresolvable` never throws ReferenceError.
        if let Expression::Identifier { name, .. } = operand
            && self.scopes.resolve(name).is_none()
            && self
                .realm
                .registry
                .resolve(self.realm.global_proto, name)
                .is_none()
        {
            let index = self.builder.constants_mut().add_string(name);
            self.builder.emit(Instruction::TypeOfName { name: index });
            return Ok(StaticType::String);
        }
        let ty = self.emit_expression(operand)?;
        match ty.type_of_name() {
            Some(text) => {
                // Statically known: the operand is evaluated for effects
                // only.
                self.builder.emit(Instruction::Pop);
                let index = self.builder.constants_mut().add_string(text);
                self.builder.emit(Instruction::LoadConst { index });
            }
            None => self.builder.emit(Instruction::TypeOf),
        }
        Ok(StaticType::String)
    }

    fn emit_delete(&mut self, operand: &Expression, _pos: SourcePosition) -> CompileResult<StaticType> {
        match operand {
            Expression::Member { object, name, .. } => {
                self.emit_expression(object)?;
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::LoadConst { index });
                self.builder.emit(Instruction::Delete);
                // A delete un-assigns a tracked property; later reads in
                // this script must not inline the stale type.
                self.note_call();
            }
            Expression::Index { object, index, .. } => {
                self.emit_expression(object)?;
                self.emit_expression(index)?;
                self.builder.emit(Instruction::Delete);
                self.note_call();
            }
            Expression::Identifier { name, .. } => {
                if self.scopes.resolve(name).is_some() {
                    // Locals are not deletable.
                    self.builder.emit(Instruction::LoadBool { value: false });
                } else {
                    self.builder.emit(Instruction::LoadGlobalObject);
                    let index = self.builder.constants_mut().add_string(name);
                    self.builder.emit(Instruction::LoadConst { index });
                    self.builder.emit(Instruction::Delete);
                    self.note_call();
                }
            }
            other => {
                self.emit_discarded(other)?;
                self.builder.emit(Instruction::LoadBool { value: true });
            }
        }
        Ok(StaticType::Boolean)
    }

    /// Emit the operator for two already-emitted operands.
    pub(crate) fn emit_binary_values(
        &mut self,
        op: BinaryOp,
        lhs: StaticType,
        rhs: StaticType,
    ) -> CompileResult<StaticType> {
        use BinaryOp::*;
        let both_int = lhs == StaticType::Int32 && rhs == StaticType::Int32;
        let both_numeric = lhs.is_numeric() && rhs.is_numeric();
        match op {
            Add => {
                if lhs.is_string() || rhs.is_string() {
                    self.builder.emit(Instruction::Concat);
                    Ok(StaticType::ConcatString)
                } else if both_int {
                    self.builder.emit(Instruction::AddInt);
                    Ok(StaticType::Int32)
                } else if both_numeric {
                    self.builder.emit(Instruction::AddNumber);
                    Ok(StaticType::Number)
                } else {
                    self.builder.emit(Instruction::AddGeneric);
                    Ok(StaticType::Any)
                }
            }
            Sub | Mul => {
                let (int_op, num_op) = match op {
                    Sub => (Instruction::SubInt, Instruction::SubNumber),
                    _ => (Instruction::MulInt, Instruction::MulNumber),
                };
                if both_int {
                    self.builder.emit(int_op);
                    Ok(StaticType::Int32)
                } else {
                    self.builder.emit(num_op);
                    Ok(StaticType::Number)
                }
            }
            Div => {
                self.builder.emit(Instruction::DivNumber);
                Ok(StaticType::Number)
            }
            Mod => {
                self.builder.emit(Instruction::ModNumber);
                Ok(StaticType::Number)
            }
            BitAnd | BitOr | BitXor | Shl | Shr => {
                self.builder.emit(match op {
                    BitAnd => Instruction::BitAnd,
                    BitOr => Instruction::BitOr,
                    BitXor => Instruction::BitXor,
                    Shl => Instruction::Shl,
                    _ => Instruction::Shr,
                });
                Ok(StaticType::Int32)
            }
            Ushr => {
                self.builder.emit(Instruction::Ushr);
                Ok(StaticType::Uint32)
            }
            Equal | NotEqual | StrictEqual | StrictNotEqual | Less | LessEqual | Greater
            | GreaterEqual => {
                let compare_op = match op {
                    Equal => CompareOp::Equal,
                    NotEqual => CompareOp::NotEqual,
                    StrictEqual => CompareOp::StrictEqual,
                    StrictNotEqual => CompareOp::StrictNotEqual,
                    Less => CompareOp::Less,
                    LessEqual => CompareOp::LessEqual,
                    Greater => CompareOp::Greater,
                    _ => CompareOp::GreaterEqual,
                };
                let kind = if both_int {
                    CompareKind::Int32
                } else if both_numeric {
                    CompareKind::Number
                } else if lhs.is_string() && rhs.is_string() {
                    CompareKind::String
                } else {
                    CompareKind::Generic
                };
                self.builder.emit(Instruction::Compare {
                    op: compare_op,
                    kind,
                });
                Ok(StaticType::Boolean)
            }
            InstanceOf => {
                self.builder.emit(Instruction::InstanceOf);
                Ok(StaticType::Boolean)
            }
            In => {
                self.builder.emit(Instruction::In);
                Ok(StaticType::Boolean)
            }
        }
    }

    fn emit_logical(
        &mut self,
        op: LogicalOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> CompileResult<StaticType> {
        let lhs_type = self.emit_expression(lhs)?;
        let join = lhs_type.join(self.infer_type(rhs));

        let short_label = self.builder.create_label();
        let end_label = self.builder.create_label();
        self.builder.emit(Instruction::Dup);
        self.convert_top(lhs_type, StaticType::Boolean);
        match op {
            LogicalOp::And => self.builder.emit(Instruction::JumpIfFalse {
                target: short_label,
            }),
            LogicalOp::Or => self.builder.emit(Instruction::JumpIfTrue {
                target: short_label,
            }),
        }
        self.builder.emit(Instruction::Pop);
        let rhs_type = self.emit_expression(rhs)?;
        let join = join.join(rhs_type);
        self.convert_top(rhs_type, join);
        self.builder.emit(Instruction::Jump { target: end_label });
        self.builder.place_label(short_label);
        self.convert_top(lhs_type, join);
        self.builder.place_label(end_label);
        Ok(join)
    }

    fn emit_conditional(
        &mut self,
        test: &Expression,
        consequent: &Expression,
        alternate: &Expression,
    ) -> CompileResult<StaticType> {
        let test_type = self.emit_expression(test)?;
        self.convert_top(test_type, StaticType::Boolean);
        let else_label = self.builder.create_label();
        let end_label = self.builder.create_label();
        self.builder.emit(Instruction::JumpIfFalse { target: else_label });

        let join = self.infer_type(consequent).join(self.infer_type(alternate));
        let consequent_type = self.emit_expression(consequent)?;
        self.convert_top(consequent_type, join.join(consequent_type));
        self.builder.emit(Instruction::Jump { target: end_label });
        self.builder.place_label(else_label);
        let alternate_type = self.emit_expression(alternate)?;
        self.convert_top(alternate_type, join.join(alternate_type));
        self.builder.place_label(end_label);
        Ok(join.join(consequent_type).join(alternate_type))
    }

    // ==================== Assignments ====================

    pub(crate) fn emit_assignment(
        &mut self,
        op: AssignOp,
        target: &Expression,
        value: &Expression,
        result_used: bool,
    ) -> CompileResult<StaticType> {
        match op {
            AssignOp::Assign => {
                let mut thunk =
                    |generator: &mut MethodGenerator| generator.emit_expression(value);
                self.emit_store_target(target, result_used, &mut thunk)
            }
            AssignOp::Compound(bin) => match target {
                Expression::Identifier { name, pos } => {
                    let name = name.clone();
                    let pos = *pos;
                    let mut thunk = |generator: &mut MethodGenerator| {
                        let old_type = generator.emit_identifier_read(&name, pos)?;
                        let value_type = generator.emit_expression(value)?;
                        generator.emit_binary_values(bin, old_type, value_type)
                    };
                    self.emit_identifier_store(&name, pos, result_used, &mut thunk)
                }
                Expression::Member { object, name, pos } => {
                    self.emit_member_compound(object, name, *pos, bin, value, result_used)
                }
                Expression::Index { object, index, pos } => {
                    self.emit_index_compound(object, index, *pos, bin, value, result_used)
                }
                other => Err(CompileError::syntax(
                    "invalid assignment target",
                    other.position().line,
                    other.position().column,
                )),
            },
        }
    }

    fn emit_store_target<F>(
        &mut self,
        target: &Expression,
        result_used: bool,
        thunk: &mut F,
    ) -> CompileResult<StaticType>
    where
        F: FnMut(&mut Self) -> CompileResult<StaticType>,
    {
        match target {
            Expression::Identifier { name, pos } => {
                self.emit_identifier_store(name, *pos, result_used, thunk)
            }
            Expression::Member { object, name, pos } => {
                self.emit_member_store(object, name, *pos, result_used, thunk)
            }
            Expression::Index { object, index, pos } => {
                self.emit_index_store(object, index, *pos, result_used, thunk)
            }
            other => Err(CompileError::syntax(
                "invalid assignment target",
                other.position().line,
                other.position().column,
            )),
        }
    }

    /// `obj.name op= value` with the object evaluated once.
    fn emit_member_compound(
        &mut self,
        object: &Expression,
        name: &str,
        pos: SourcePosition,
        bin: BinaryOp,
        value: &Expression,
        result_used: bool,
    ) -> CompileResult<StaticType> {
        self.emit_expression(object)?;
        self.mark(pos);
        let object_slot = self.stash_top()?;
        let index = self.builder.constants_mut().add_string(name);
        self.builder.emit(Instruction::GetProp { name: index });
        let value_type = self.emit_expression(value)?;
        let result_type = self.emit_binary_values(bin, StaticType::Any, value_type)?;

        let value_slot = self.builder.lease_slot()?;
        self.builder.emit(Instruction::SetSlot { slot: value_slot });
        self.builder.emit(Instruction::GetSlot { slot: object_slot });
        self.builder.emit(Instruction::GetSlot { slot: value_slot });
        self.builder.emit(Instruction::SetProp { name: index });
        if result_used {
            self.builder.emit(Instruction::GetSlot { slot: value_slot });
        }
        self.builder.release_slot(value_slot);
        self.builder.release_slot(object_slot);
        Ok(result_type)
    }

    /// `obj[key] op= value` with object and key evaluated once.
    fn emit_index_compound(
        &mut self,
        object: &Expression,
        index: &Expression,
        pos: SourcePosition,
        bin: BinaryOp,
        value: &Expression,
        result_used: bool,
    ) -> CompileResult<StaticType> {
        self.emit_expression(object)?;
        let object_slot = self.stash_top()?;
        self.emit_expression(index)?;
        self.mark(pos);
        let key_slot = self.stash_top()?;
        self.builder.emit(Instruction::GetElem);
        let value_type = self.emit_expression(value)?;
        let result_type = self.emit_binary_values(bin, StaticType::Any, value_type)?;

        let value_slot = self.builder.lease_slot()?;
        self.builder.emit(Instruction::SetSlot { slot: value_slot });
        self.builder.emit(Instruction::GetSlot { slot: object_slot });
        self.builder.emit(Instruction::GetSlot { slot: key_slot });
        self.builder.emit(Instruction::GetSlot { slot: value_slot });
        self.builder.emit(Instruction::SetElem);
        if result_used {
            self.builder.emit(Instruction::GetSlot { slot: value_slot });
        }
        self.builder.release_slot(value_slot);
        self.builder.release_slot(key_slot);
        self.builder.release_slot(object_slot);
        Ok(result_type)
    }

    /// Prefix/postfix `++`/`--`.
    pub(crate) fn emit_update(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        target: &Expression,
        pos: SourcePosition,
        result_used: bool,
    ) -> CompileResult<StaticType> {
        // Fast path: an int-typed local stays int-typed.
        if let Expression::Identifier { name, .. } = target
            && let Some(binding) = self.scopes.resolve(name)
            && !binding.is_const
        {
            let slot = binding.slot;
            let old_type = self.local_type(slot);
            let numeric = if old_type == StaticType::Int32 {
                StaticType::Int32
            } else {
                StaticType::Number
            };
            self.builder.emit(Instruction::GetSlot { slot });
            self.convert_top(old_type, numeric);
            let stash = if !prefix && result_used {
                Some(self.stash_top()?)
            } else {
                None
            };
            self.emit_increment(op, numeric);
            self.widen_local(slot, numeric);
            self.convert_top(numeric, self.local_type(slot));
            if prefix && result_used {
                self.builder.emit(Instruction::Dup);
            }
            self.builder.emit(Instruction::SetSlot { slot });
            if let Some(stash) = stash {
                self.unstash(stash);
            }
            return Ok(numeric);
        }

        // General path: read, coerce numeric, store back through the
        // variable protocol. Member and index bases are evaluated once.
        let old_type = match target {
            Expression::Identifier { name, .. } => self.emit_identifier_read(name, pos)?,
            Expression::Member { object, name, .. } => {
                self.emit_expression(object)?;
                self.mark(pos);
                let object_slot = self.stash_top()?;
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::GetProp { name: index });
                self.convert_top(StaticType::Any, StaticType::Number);
                let stash = if !prefix && result_used {
                    Some(self.stash_top()?)
                } else {
                    None
                };
                self.emit_increment(op, StaticType::Number);
                if prefix && result_used {
                    self.builder.emit(Instruction::Dup);
                }
                let value_slot = self.builder.lease_slot()?;
                self.builder.emit(Instruction::SetSlot { slot: value_slot });
                self.builder.emit(Instruction::GetSlot { slot: object_slot });
                self.builder.emit(Instruction::GetSlot { slot: value_slot });
                self.builder.emit(Instruction::SetProp { name: index });
                self.builder.release_slot(value_slot);
                self.builder.release_slot(object_slot);
                if let Some(stash) = stash {
                    self.unstash(stash);
                }
                return Ok(StaticType::Number);
            }
            Expression::Index { object, index, .. } => {
                self.emit_expression(object)?;
                let object_slot = self.stash_top()?;
                self.emit_expression(index)?;
                let key_slot = self.stash_top()?;
                self.builder.emit(Instruction::GetElem);
                self.convert_top(StaticType::Any, StaticType::Number);
                let stash = if !prefix && result_used {
                    Some(self.stash_top()?)
                } else {
                    None
                };
                self.emit_increment(op, StaticType::Number);
                if prefix && result_used {
                    self.builder.emit(Instruction::Dup);
                }
                let value_slot = self.builder.lease_slot()?;
                self.builder.emit(Instruction::SetSlot { slot: value_slot });
                self.builder.emit(Instruction::GetSlot { slot: object_slot });
                self.builder.emit(Instruction::GetSlot { slot: key_slot });
                self.builder.emit(Instruction::GetSlot { slot: value_slot });
                self.builder.emit(Instruction::SetElem);
                self.builder.release_slot(value_slot);
                self.builder.release_slot(key_slot);
                self.builder.release_slot(object_slot);
                if let Some(stash) = stash {
                    self.unstash(stash);
                }
                return Ok(StaticType::Number);
            }
            other => {
                return Err(CompileError::syntax(
                    "invalid update target",
                    other.position().line,
                    other.position().column,
                ));
            }
        };

        // Only identifier targets reach here (globals and `eval`-tainted
        // locals).
        let Expression::Identifier { name, .. } = target else {
            unreachable!("member and index targets handled above");
        };
        let numeric = if old_type == StaticType::Int32 {
            StaticType::Int32
        } else {
            StaticType::Number
        };
        self.convert_top(old_type, numeric);
        let stash = if !prefix && result_used {
            Some(self.stash_top()?)
        } else {
            None
        };
        self.emit_increment(op, numeric);
        let value_slot = self.builder.lease_slot()?;
        self.builder.emit(Instruction::SetSlot { slot: value_slot });
        let mut thunk = |generator: &mut MethodGenerator| -> CompileResult<StaticType> {
            generator.builder.emit(Instruction::GetSlot { slot: value_slot });
            Ok(numeric)
        };
        self.emit_identifier_store(name, pos, prefix && result_used, &mut thunk)?;
        self.builder.release_slot(value_slot);
        if let Some(stash) = stash {
            self.unstash(stash);
        }
        Ok(numeric)
    }

    fn emit_increment(&mut self, op: UpdateOp, numeric: StaticType) {
        if numeric == StaticType::Int32 {
            self.builder.emit(Instruction::LoadInt { value: 1 });
            self.builder.emit(match op {
                UpdateOp::Increment => Instruction::AddInt,
                UpdateOp::Decrement => Instruction::SubInt,
            });
        } else {
            self.builder.emit(Instruction::LoadNumber { value: 1.0 });
            self.builder.emit(match op {
                UpdateOp::Increment => Instruction::AddNumber,
                UpdateOp::Decrement => Instruction::SubNumber,
            });
        }
    }

    // ==================== Inference ====================

    /// A conservative, side-effect-free `ResultType` for an expression:
    /// exact for literals and resolved identifiers, `Any` wherever
    /// emission could produce something wider. Used for branch joins, so
    /// over-approximation is always sound.
    pub(crate) fn infer_type(&self, expr: &Expression) -> StaticType {
        match expr {
            Expression::Literal { value, .. } => match value {
                LiteralValue::Null => StaticType::Null,
                LiteralValue::Bool(_) => StaticType::Boolean,
                LiteralValue::Number(n) => {
                    if is_int32_literal(*n) {
                        StaticType::Int32
                    } else {
                        StaticType::Number
                    }
                }
                LiteralValue::Str(_) => StaticType::String,
                LiteralValue::Regex { .. } => StaticType::Object(self.realm.regexp_proto),
            },
            Expression::This { .. } => self.this_type,
            Expression::Identifier { name, .. } => match self.scopes.resolve(name) {
                Some(binding) => self.local_type(binding.slot),
                None => match self.realm.registry.resolve(self.realm.global_proto, name) {
                    Some((_, var)) => match &var.backing {
                        PropertyBacking::Field(_) if !(self.script_mode && self.globals_dirty) => {
                            var.static_type
                        }
                        PropertyBacking::Constant(_) => var.static_type,
                        PropertyBacking::Unassigned => StaticType::Undefined,
                        _ => StaticType::Any,
                    },
                    None => StaticType::Any,
                },
            },
            Expression::Unary { op, operand, .. } => match op {
                UnaryOp::Not => StaticType::Boolean,
                UnaryOp::TypeOf => StaticType::String,
                UnaryOp::Void => StaticType::Undefined,
                UnaryOp::Delete => StaticType::Boolean,
                UnaryOp::BitNot => StaticType::Int32,
                UnaryOp::Minus | UnaryOp::Plus => {
                    if self.infer_type(operand) == StaticType::Int32 {
                        StaticType::Int32
                    } else {
                        StaticType::Number
                    }
                }
            },
            Expression::Binary { op, lhs, rhs, .. } => {
                use BinaryOp::*;
                match op {
                    Equal | NotEqual | StrictEqual | StrictNotEqual | Less | LessEqual
                    | Greater | GreaterEqual | InstanceOf | In => StaticType::Boolean,
                    BitAnd | BitOr | BitXor | Shl | Shr => StaticType::Int32,
                    Ushr => StaticType::Uint32,
                    Div | Mod => StaticType::Number,
                    Sub | Mul => {
                        let l = self.infer_type(lhs);
                        let r = self.infer_type(rhs);
                        if l == StaticType::Int32 && r == StaticType::Int32 {
                            StaticType::Int32
                        } else {
                            StaticType::Number
                        }
                    }
                    Add => {
                        let l = self.infer_type(lhs);
                        let r = self.infer_type(rhs);
                        if l.is_string() || r.is_string() {
                            StaticType::ConcatString
                        } else if l == StaticType::Int32 && r == StaticType::Int32 {
                            StaticType::Int32
                        } else if l.is_numeric() && r.is_numeric() {
                            StaticType::Number
                        } else {
                            StaticType::Any
                        }
                    }
                }
            }
            Expression::Logical { lhs, rhs, .. } => {
                self.infer_type(lhs).join(self.infer_type(rhs))
            }
            Expression::Conditional {
                consequent,
                alternate,
                ..
            } => self.infer_type(consequent).join(self.infer_type(alternate)),
            Expression::Array { .. } => StaticType::Object(self.realm.array_proto),
            _ => StaticType::Any,
        }
    }
}

/// Whether a numeric literal is an exact int32 (negative zero is not).
fn is_int32_literal(n: f64) -> bool {
    n.fract() == 0.0
        && n >= i32::MIN as f64
        && n <= i32::MAX as f64
        && !(n == 0.0 && n.is_sign_negative())
}

/// Most-specific overload for the observed argument types; ties break by
/// declaration order, unknown signatures match last.
fn pick_overload(group: &[MethodOverload], arg_types: &[StaticType]) -> MethodOverload {
    let mut best = 0usize;
    let mut best_score = -1i32;
    for (i, overload) in group.iter().enumerate() {
        let mut score = 0i32;
        if !overload.param_types.is_empty() {
            if overload.param_types.len() == arg_types.len() {
                score += 1;
            }
            for (want, have) in overload.param_types.iter().zip(arg_types) {
                if want == have {
                    score += 2;
                } else if want.is_numeric() && have.is_numeric() {
                    score += 1;
                }
            }
        }
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    group[best].clone()
}
