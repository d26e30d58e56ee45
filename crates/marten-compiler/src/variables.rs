//! The uniform variable model.
//!
//! Arguments, locals, globals, and property accesses all write through the
//! same protocol: the value thunk runs exactly once, the stored type is
//! observed against the variable's lattice (first write adopts, later
//! mismatches widen and mark dependents), and when the surrounding
//! expression needs the assigned value a second copy is stashed in a
//! leased local and reloaded after the store.

use marten_code::{ErrorClass, Instruction, PrototypeId, SlotIndex, StaticType};
use marten_core::proto::{
    MethodTarget, PropertyAttributes, PropertyBacking, PropertyValue, SlotAction,
};
use marten_core::value::Value;
use marten_parser::{Expression, SourcePosition};

use crate::error::CompileResult;
use crate::generator::MethodGenerator;

impl MethodGenerator<'_> {
    /// Emit the conversion `from → to` for the top of stack.
    pub(crate) fn convert_top(&mut self, from: StaticType, to: StaticType) {
        crate::convert::emit_convert(&mut self.builder, from, to);
    }

    /// Stash a copy of the top of stack into a leased slot.
    pub(crate) fn stash_top(&mut self) -> CompileResult<SlotIndex> {
        let slot = self.builder.lease_slot()?;
        self.builder.emit(Instruction::Dup);
        self.builder.emit(Instruction::SetSlot { slot });
        Ok(slot)
    }

    /// Reload and release a stashed value.
    pub(crate) fn unstash(&mut self, slot: SlotIndex) {
        self.builder.emit(Instruction::GetSlot { slot });
        self.builder.release_slot(slot);
    }

    /// The prototype statically resolved for values of a type.
    pub(crate) fn static_proto_of(&self, ty: StaticType) -> Option<PrototypeId> {
        match ty {
            StaticType::Object(proto) => Some(proto),
            StaticType::String | StaticType::ConcatString => Some(self.realm.string_proto),
            StaticType::Int32 | StaticType::Uint32 | StaticType::Number => {
                Some(self.realm.number_proto)
            }
            StaticType::Boolean => Some(self.realm.boolean_proto),
            _ => None,
        }
    }

    /// Functions invalidated by a write this generator emitted; a
    /// self-invalidation means a type this pass already inlined widened,
    /// so the pass restarts.
    pub(crate) fn note_invalidated(&mut self, invalidated: &[marten_code::FunctionId]) {
        if invalidated.is_empty() {
            return;
        }
        if invalidated.contains(&self.function) {
            self.types_dirty = true;
        }
        self.functions.mark_recompile(invalidated);
    }

    // ==================== Reads ====================

    /// Emit an identifier read, leaving one value of the returned type.
    pub(crate) fn emit_identifier_read(
        &mut self,
        name: &str,
        _pos: SourcePosition,
    ) -> CompileResult<StaticType> {
        if let Some(binding) = self.scopes.resolve(name) {
            self.builder.emit(Instruction::GetSlot { slot: binding.slot });
            return Ok(self.local_type(binding.slot));
        }

        let global_proto = self.realm.global_proto;
        let resolved = self
            .realm
            .registry
            .resolve(global_proto, name)
            .map(|(owner, var)| (owner, var.backing.clone(), var.static_type));
        match resolved {
            Some((_, PropertyBacking::Constant(value), _)) => Ok(self.emit_constant(name, &value)),
            Some((owner, PropertyBacking::Field(field), static_type)) => {
                if self.script_mode && self.globals_dirty {
                    // A call may have widened this since; read untyped.
                    let index = self.builder.constants_mut().add_string(name);
                    self.builder.emit(Instruction::LoadGlobalObject);
                    self.builder.emit(Instruction::GetProp { name: index });
                    return Ok(StaticType::Any);
                }
                self.realm.registry.add_dependent(owner, name, self.function);
                self.builder.emit(Instruction::LoadGlobalObject);
                self.builder.emit(Instruction::GetField { field });
                Ok(static_type)
            }
            Some((owner, PropertyBacking::MethodGroup(group), _)) => {
                if let [overload] = group.as_slice()
                    && let MethodTarget::Script(function) = overload.target
                {
                    self.realm.registry.add_dependent(owner, name, self.function);
                    self.builder.emit(Instruction::MakeFunction { function });
                    return Ok(StaticType::Any);
                }
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::LoadGlobalObject);
                self.builder.emit(Instruction::GetProp { name: index });
                Ok(StaticType::Any)
            }
            Some((_, PropertyBacking::Unassigned, _)) => {
                self.builder.emit(Instruction::LoadUndefined);
                Ok(StaticType::Undefined)
            }
            Some(_) => {
                // Cell or accessor backing: dynamic.
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::LoadGlobalObject);
                self.builder.emit(Instruction::GetProp { name: index });
                Ok(StaticType::Any)
            }
            None => {
                // Unknown name; ReferenceError at runtime.
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::GetGlobalDyn { name: index });
                Ok(StaticType::Any)
            }
        }
    }

    /// Inline a constant-backed variable's value.
    fn emit_constant(&mut self, name: &str, value: &Value) -> StaticType {
        match value {
            Value::Undefined => {
                self.builder.emit(Instruction::LoadUndefined);
                StaticType::Undefined
            }
            Value::Null => {
                self.builder.emit(Instruction::LoadNull);
                StaticType::Null
            }
            Value::Bool(b) => {
                self.builder.emit(Instruction::LoadBool { value: *b });
                StaticType::Boolean
            }
            Value::Int(i) => {
                self.builder.emit(Instruction::LoadInt { value: *i });
                StaticType::Int32
            }
            Value::Number(n) => {
                self.builder.emit(Instruction::LoadNumber { value: *n });
                StaticType::Number
            }
            Value::Str(s) => {
                let index = self.builder.constants_mut().add_string(s);
                self.builder.emit(Instruction::LoadConst { index });
                StaticType::String
            }
            _ => {
                // Non-primitive constants read through the global object.
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::LoadGlobalObject);
                self.builder.emit(Instruction::GetProp { name: index });
                StaticType::Any
            }
        }
    }

    /// Emit `object.name`, resolving against the prototype registry when
    /// the object's static type names a prototype.
    pub(crate) fn emit_member_read(
        &mut self,
        object: &Expression,
        name: &str,
        pos: SourcePosition,
    ) -> CompileResult<StaticType> {
        let object_type = self.emit_expression(object)?;
        self.mark(pos);

        if let Some(proto) = self.static_proto_of(object_type) {
            let resolved = self
                .realm
                .registry
                .resolve(proto, name)
                .map(|(owner, var)| (owner, var.backing.clone(), var.static_type));
            match resolved {
                Some((owner, PropertyBacking::Field(field), static_type))
                    if matches!(object_type, StaticType::Object(_))
                        && !(self.script_mode && self.globals_dirty) =>
                {
                    self.realm.registry.add_dependent(owner, name, self.function);
                    self.builder.emit(Instruction::GetField { field });
                    return Ok(static_type);
                }
                Some((owner, PropertyBacking::Constant(value), _)) => {
                    self.realm.registry.add_dependent(owner, name, self.function);
                    self.builder.emit(Instruction::Pop);
                    return Ok(self.emit_constant(name, &value));
                }
                Some((owner, PropertyBacking::Unassigned, _)) => {
                    self.realm.registry.add_dependent(owner, name, self.function);
                    self.builder.emit(Instruction::Pop);
                    self.builder.emit(Instruction::LoadUndefined);
                    return Ok(StaticType::Undefined);
                }
                Some((
                    _,
                    PropertyBacking::Accessor {
                        getter: Some(MethodTarget::Native(native)),
                        ..
                    },
                    _,
                )) => {
                    let return_type = self.realm.natives[native.0 as usize].return_type;
                    self.builder.emit(Instruction::CallNative { native, argc: 0 });
                    return Ok(return_type);
                }
                Some((
                    _,
                    PropertyBacking::Accessor {
                        getter: Some(MethodTarget::Script(function)),
                        ..
                    },
                    _,
                )) => {
                    self.functions.get_mut(function).dependents.insert(self.function);
                    self.builder.emit(Instruction::CallDirect { function, argc: 0 });
                    return Ok(self.functions.get(function).return_type);
                }
                _ => {}
            }
        }

        let index = self.builder.constants_mut().add_string(name);
        self.builder.emit(Instruction::GetProp { name: index });
        Ok(StaticType::Any)
    }

    // ==================== Writes ====================

    /// Store through an identifier (argument, local, or global). The
    /// value thunk runs exactly once.
    pub(crate) fn emit_identifier_store<F>(
        &mut self,
        name: &str,
        pos: SourcePosition,
        result_used: bool,
        thunk: &mut F,
    ) -> CompileResult<StaticType>
    where
        F: FnMut(&mut Self) -> CompileResult<StaticType>,
    {
        if let Some(binding) = self.scopes.resolve(name) {
            let value_type = thunk(self)?;
            if binding.is_const {
                // The value is still evaluated for its effects.
                self.builder.emit(Instruction::Pop);
                let message = self
                    .builder
                    .constants_mut()
                    .add_string("Assignment to constant variable.");
                self.builder.emit(Instruction::ThrowError {
                    class: ErrorClass::Type,
                    message,
                });
                return Ok(value_type);
            }
            self.widen_local(binding.slot, value_type);
            let slot_type = self.local_type(binding.slot);
            self.convert_top(value_type, slot_type);
            if result_used {
                self.builder.emit(Instruction::Dup);
            }
            self.builder.emit(Instruction::SetSlot { slot: binding.slot });
            return Ok(slot_type);
        }
        self.emit_global_store(name, pos, result_used, thunk)
    }

    fn emit_global_store<F>(
        &mut self,
        name: &str,
        _pos: SourcePosition,
        result_used: bool,
        thunk: &mut F,
    ) -> CompileResult<StaticType>
    where
        F: FnMut(&mut Self) -> CompileResult<StaticType>,
    {
        let global_proto = self.realm.global_proto;
        if self.realm.registry.resolve(global_proto, name).is_none() {
            let interned = self.realm.intern(name);
            self.realm.registry.add_property(
                global_proto,
                interned,
                PropertyValue::Field(StaticType::Undefined),
                PropertyAttributes::data(),
            );
        }

        self.builder.emit(Instruction::LoadGlobalObject);
        let value_type = thunk(self)?;
        let (action, invalidated) = self
            .realm
            .registry
            .write_slot(global_proto, name, value_type);
        self.note_invalidated(&invalidated);
        self.emit_slot_action(name, action, result_used)?;
        Ok(value_type)
    }

    /// Store through `object.name`.
    pub(crate) fn emit_member_store<F>(
        &mut self,
        object: &Expression,
        name: &str,
        pos: SourcePosition,
        result_used: bool,
        thunk: &mut F,
    ) -> CompileResult<StaticType>
    where
        F: FnMut(&mut Self) -> CompileResult<StaticType>,
    {
        let object_type = self.emit_expression(object)?;
        self.mark(pos);

        if let StaticType::Object(proto) = object_type {
            let value_type = thunk(self)?;
            let (action, invalidated) = self.realm.registry.write_slot(proto, name, value_type);
            self.note_invalidated(&invalidated);
            self.emit_slot_action(name, action, result_used)?;
            return Ok(value_type);
        }

        // Dynamic store; primitives drop the write at runtime.
        let value_type = thunk(self)?;
        let stash = if result_used { Some(self.stash_top()?) } else { None };
        let index = self.builder.constants_mut().add_string(name);
        self.builder.emit(Instruction::SetProp { name: index });
        if let Some(slot) = stash {
            self.unstash(slot);
        }
        Ok(value_type)
    }

    /// Store through `object[index]`.
    pub(crate) fn emit_index_store<F>(
        &mut self,
        object: &Expression,
        index: &Expression,
        pos: SourcePosition,
        result_used: bool,
        thunk: &mut F,
    ) -> CompileResult<StaticType>
    where
        F: FnMut(&mut Self) -> CompileResult<StaticType>,
    {
        self.emit_expression(object)?;
        self.emit_expression(index)?;
        self.mark(pos);
        let value_type = thunk(self)?;
        let stash = if result_used { Some(self.stash_top()?) } else { None };
        self.builder.emit(Instruction::SetElem);
        if let Some(slot) = stash {
            self.unstash(slot);
        }
        Ok(value_type)
    }

    /// Emit the store matching a resolved slot action. Expects
    /// `[object, value]` on the stack; leaves the value when
    /// `result_used`.
    fn emit_slot_action(
        &mut self,
        name: &str,
        action: SlotAction,
        result_used: bool,
    ) -> CompileResult<()> {
        let stash = if result_used { Some(self.stash_top()?) } else { None };
        match action {
            SlotAction::Field(field) => {
                self.builder.emit(Instruction::SetField { field });
            }
            SlotAction::Cell(_) => {
                // Cell storage is re-resolved dynamically.
                let index = self.builder.constants_mut().add_string(name);
                self.builder.emit(Instruction::SetProp { name: index });
            }
            SlotAction::CallSetter(MethodTarget::Native(native)) => {
                self.builder.emit(Instruction::CallNative { native, argc: 1 });
                self.builder.emit(Instruction::Pop);
            }
            SlotAction::CallSetter(MethodTarget::Script(function)) => {
                self.builder.emit(Instruction::CallDirect { function, argc: 1 });
                self.builder.emit(Instruction::Pop);
            }
            SlotAction::Ignore => {
                self.builder.emit(Instruction::Pop);
                self.builder.emit(Instruction::Pop);
            }
        }
        if let Some(slot) = stash {
            self.unstash(slot);
        }
        Ok(())
    }
}
