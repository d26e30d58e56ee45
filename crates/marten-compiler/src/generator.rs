//! The per-function compilation driver.
//!
//! Binds parameter types, hoists declarations, drives statement emission
//! through the code builder, and finalises the callable method. Types are
//! settled by re-running emission until no local or global widened during
//! the pass (the same machinery that rebuilds a method when a property
//! type collapses at runtime, applied eagerly within one compilation).

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use marten_code::{
    CompareKind, CompareOp, FunctionId, Instruction, Method, MethodBuilder, SlotIndex, StaticType,
};
use marten_core::Realm;
use marten_core::proto::{
    MethodOverload, MethodTarget, PropertyAttributes, PropertyBacking, PropertyValue,
};
use marten_parser::{
    DeclarationKind, Expression, ForInTarget, FunctionNode, SourcePosition, Statement,
};

use crate::error::{CompileError, CompileResult};
use crate::functions::FunctionTable;
use crate::optimize::{BreakFrame, FinallyFrame, JumpTarget, OptimizationInfo};
use crate::scope::ScopeChain;

/// Engine-supplied compilation options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Annotate emitted statements with source positions and retain slot
    /// names.
    pub debug_symbols: bool,
    /// Source path used in symbols and stack traces.
    pub source_path: Rc<str>,
}

/// Maximum emission passes before declaring non-convergence. The type
/// lattice has height three, so real inputs settle in two or three.
const MAX_TYPE_PASSES: u32 = 8;

/// Compile (or recompile) a function from its cached AST with the
/// currently observed types, and install the result.
pub fn compile_function(
    realm: &mut Realm,
    functions: &mut FunctionTable,
    id: FunctionId,
    options: &CompileOptions,
) -> CompileResult<Rc<Method>> {
    let mut local_types = std::mem::take(&mut functions.get_mut(id).local_types);
    let mut finished = None;

    for pass in 0..MAX_TYPE_PASSES {
        let ast = functions.get(id).ast.clone();
        let mut generator =
            MethodGenerator::new(realm, functions, id, &ast, options, local_types)?;
        generator.emit_program(&ast)?;
        let dirty = generator.types_dirty;
        let (method, types) = generator.finish(options)?;
        local_types = types;
        if !dirty {
            finished = Some((method, pass + 1));
            break;
        }
    }

    let Some((method, passes)) = finished else {
        return Err(CompileError::internal("type inference did not converge"));
    };
    functions.get_mut(id).local_types = local_types;
    let method = Rc::new(method);
    let invalidated = functions.install_code(id, method.clone());
    functions.mark_recompile(&invalidated);
    debug!(
        function = %functions.get(id).name,
        passes,
        compile_count = functions.get(id).compile_count,
        "compiled method"
    );
    Ok(method)
}

/// One emission pass over one function body.
pub struct MethodGenerator<'a> {
    pub(crate) realm: &'a mut Realm,
    pub(crate) functions: &'a mut FunctionTable,
    pub(crate) builder: MethodBuilder,
    pub(crate) info: OptimizationInfo,
    pub(crate) scopes: ScopeChain,
    pub(crate) function: FunctionId,
    pub(crate) script_mode: bool,
    pub(crate) this_type: StaticType,
    /// Parameter types for this pass (`this` excluded).
    pub(crate) param_types: Vec<StaticType>,
    /// Local slot types settled so far; widening sets `types_dirty`.
    pub(crate) local_types: FxHashMap<u16, StaticType>,
    pub(crate) types_dirty: bool,
    /// Join of emitted return-site types.
    pub(crate) return_type: StaticType,
    pub(crate) has_return: bool,
    /// Slot tracking the script completion value.
    pub(crate) completion_slot: Option<SlotIndex>,
    /// Non-zero while emitting a finally body (its completion is
    /// discarded).
    pub(crate) suppress_completion: usize,
    /// Set in script mode once a call was emitted; later field-backed
    /// reads stop inlining narrow types (a call can widen anything).
    pub(crate) globals_dirty: bool,
    /// Object-literal site counter (indexes the record's stable list).
    pub(crate) literal_counter: usize,
}

impl<'a> MethodGenerator<'a> {
    fn new(
        realm: &'a mut Realm,
        functions: &'a mut FunctionTable,
        function: FunctionId,
        ast: &FunctionNode,
        options: &CompileOptions,
        mut local_types: FxHashMap<u16, StaticType>,
    ) -> CompileResult<Self> {
        let record = functions.get(function);
        let name = record.name.clone();
        let script_mode = record.is_script;
        let this_type = record.this_type;
        // `eval` in the body defeats argument specialisation.
        let param_types: Vec<StaticType> = if ast.hints.has_eval {
            vec![StaticType::Any; ast.params.len()]
        } else {
            record.param_types.clone()
        };

        let mut builder = MethodBuilder::new(name.as_ref(), Some(function), ast.params.len() as u16);
        let return_slot = builder.declare_local()?;
        let return_label = builder.create_label();

        let mut scopes = ScopeChain::new();
        scopes.enter(true);
        for (i, param) in ast.params.iter().enumerate() {
            let slot = SlotIndex(i as u16 + 1);
            builder.name_slot(slot, param);
            scopes.declare(param, slot, false);
            // Seed the slot with the observed parameter type, keeping any
            // widening a previous pass applied (joins are monotone, so
            // the emission loop converges).
            let observed = param_types[i];
            let seeded = match local_types.get(&slot.0) {
                None => observed,
                Some(&existing) if existing == StaticType::Undefined => observed,
                Some(&existing) if observed == StaticType::Undefined => existing,
                Some(&existing) => existing.join(observed),
            };
            local_types.insert(slot.0, seeded);
        }

        let completion_slot = if script_mode {
            Some(builder.declare_local()?)
        } else {
            None
        };

        let info = OptimizationInfo::new(
            name,
            options.source_path.clone(),
            ast.strict,
            return_label,
            return_slot,
            ast.hints,
        );

        Ok(Self {
            realm,
            functions,
            builder,
            info,
            scopes,
            function,
            script_mode,
            this_type,
            param_types,
            local_types,
            types_dirty: false,
            return_type: StaticType::Undefined,
            has_return: false,
            completion_slot,
            suppress_completion: 0,
            globals_dirty: false,
            literal_counter: 0,
        })
    }

    /// Hoist declarations, run the prologue, emit every statement.
    fn emit_program(&mut self, ast: &FunctionNode) -> CompileResult<()> {
        let mut vars = Vec::new();
        let mut funcs = Vec::new();
        collect_hoisted(&ast.body, &mut vars, &mut funcs);

        if self.script_mode {
            for (name, node) in &funcs {
                let interned = self.realm.intern(name);
                let fid = self.functions.declare_for_node(node, interned);
                self.define_global_function(name, fid);
            }
            for name in &vars {
                self.ensure_global_var(name);
            }
        } else {
            for name in &vars {
                if self.scopes.resolve(name).is_none() {
                    let slot = self.builder.declare_local()?;
                    self.builder.name_slot(slot, name);
                    self.scopes.declare_hoisted(name, slot);
                }
            }
            for (name, node) in &funcs {
                let interned = self.realm.intern(name);
                let fid = self.functions.declare_for_node(node, interned);
                let slot = match self.scopes.resolve(name) {
                    Some(binding) => binding.slot,
                    None => {
                        let slot = self.builder.declare_local()?;
                        self.builder.name_slot(slot, name);
                        self.scopes.declare_hoisted(name, slot);
                        slot
                    }
                };
                self.widen_local(slot, StaticType::Any);
                self.builder.emit(Instruction::MakeFunction { function: fid });
                self.builder.emit(Instruction::SetSlot { slot });
            }
            if ast.hints.has_arguments && self.scopes.resolve("arguments").is_none() {
                let slot = self.builder.declare_local()?;
                self.builder.name_slot(slot, "arguments");
                self.scopes.declare_hoisted("arguments", slot);
                self.widen_local(slot, StaticType::Any);
                self.builder.emit(Instruction::CreateArguments);
                self.builder.emit(Instruction::SetSlot { slot });
            }
        }

        self.emit_statements(&ast.body)
    }

    /// Finalise this pass into a method.
    fn finish(
        mut self,
        options: &CompileOptions,
    ) -> CompileResult<(Method, FxHashMap<u16, StaticType>)> {
        let fell_through = !self.builder.last_is_terminator();
        self.builder.place_label(self.info.return_target.label);
        let result_slot = match self.completion_slot {
            Some(slot) => slot,
            None => self.info.return_slot,
        };
        self.builder.emit(Instruction::GetSlot { slot: result_slot });
        self.builder.emit(Instruction::Return);

        let return_type = if self.script_mode {
            StaticType::Any
        } else if !self.has_return {
            StaticType::Undefined
        } else if fell_through {
            self.return_type.join(StaticType::Undefined)
        } else {
            self.return_type
        };

        let mut param_types = Vec::with_capacity(self.param_types.len() + 1);
        param_types.push(self.this_type);
        param_types.extend(self.param_types.iter().copied());

        let symbols = options
            .debug_symbols
            .then(|| options.source_path.to_string());
        let method = self.builder.finish(param_types, return_type, symbols)?;
        Ok((method, self.local_types))
    }

    // ==================== Shared helpers ====================

    pub(crate) fn mark(&mut self, pos: SourcePosition) {
        self.builder.mark_position(pos.line, pos.column);
    }

    pub(crate) fn local_type(&self, slot: SlotIndex) -> StaticType {
        self.local_types
            .get(&slot.0)
            .copied()
            .unwrap_or(StaticType::Undefined)
    }

    /// Widen a local's settled type; flags the pass dirty when it moves.
    pub(crate) fn widen_local(&mut self, slot: SlotIndex, observed: StaticType) {
        let current = self.local_type(slot);
        let widened = if current == StaticType::Undefined {
            observed
        } else if current == observed {
            current
        } else {
            current.join(observed)
        };
        if widened != current {
            self.local_types.insert(slot.0, widened);
            self.types_dirty = true;
        }
    }

    pub(crate) fn syntax_error(&self, message: impl Into<String>, pos: SourcePosition) -> CompileError {
        CompileError::syntax(message, pos.line, pos.column)
    }

    fn define_global_function(&mut self, name: &str, function: FunctionId) {
        let interned = self.realm.intern(name);
        let overload = MethodOverload {
            target: MethodTarget::Script(function),
            param_types: Vec::new(),
            return_type: StaticType::Any,
        };
        let global_proto = self.realm.global_proto;
        let existing = self
            .realm
            .registry
            .resolve(global_proto, name)
            .map(|(owner, _)| owner);
        if existing == Some(global_proto) {
            // Redeclaration replaces; only the host API builds overload
            // groups.
            let var = self
                .realm
                .registry
                .get_mut(global_proto)
                .properties
                .get_mut(name)
                .unwrap();
            var.backing = PropertyBacking::MethodGroup(vec![overload]);
            var.static_type = StaticType::Any;
        } else {
            self.realm.registry.add_property(
                global_proto,
                interned,
                PropertyValue::Method(overload),
                PropertyAttributes::data(),
            );
        }
    }

    fn ensure_global_var(&mut self, name: &str) {
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
    }

    /// Route a non-local jump, staging through `finally` state machines
    /// where the target lies outside the current region.
    pub(crate) fn emit_long_jump(&mut self, target: JumpTarget) {
        let current_depth = self.info.finally_stack.len();
        if current_depth > target.finally_depth {
            let idx = current_depth - 1;
            let code = self.info.finally_stack[idx].register_exit(target);
            let state_slot = self.info.finally_stack[idx].state_slot;
            let finally_label = self.info.finally_stack[idx].finally_label;
            let outer_depth = self.info.finally_stack[idx].outer_try_depth;
            self.builder.emit(Instruction::LoadInt { value: code });
            self.builder.emit(Instruction::SetSlot { slot: state_slot });
            for _ in outer_depth..self.info.try_depth {
                self.builder.emit(Instruction::LeaveTry);
            }
            self.builder.emit(Instruction::Jump {
                target: finally_label,
            });
        } else {
            for _ in target.try_depth..self.info.try_depth {
                self.builder.emit(Instruction::LeaveTry);
            }
            self.builder.emit(Instruction::Jump {
                target: target.label,
            });
        }
    }

    // ==================== Statements ====================

    pub(crate) fn emit_statements(&mut self, statements: &[Statement]) -> CompileResult<()> {
        for statement in statements {
            self.emit_statement(statement)?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        self.mark(statement.position());
        match statement {
            Statement::Empty { .. } | Statement::FunctionDeclaration { .. } => Ok(()),
            Statement::Expression { expression, .. } => self.emit_expression_statement(expression),
            Statement::Block { statements, .. } => {
                self.scopes.enter(false);
                let result = self.emit_statements(statements);
                self.scopes.exit();
                result
            }
            Statement::Declaration {
                kind,
                declarations,
                pos,
            } => self.emit_declaration(*kind, declarations, *pos),
            Statement::If {
                test,
                consequent,
                alternate,
                ..
            } => self.emit_if(test, consequent, alternate.as_deref()),
            Statement::While { test, body, .. } => self.emit_while(test, body),
            Statement::DoWhile { body, test, .. } => self.emit_do_while(body, test),
            Statement::For {
                init,
                test,
                update,
                body,
                ..
            } => self.emit_for(init.as_deref(), test.as_ref(), update.as_ref(), body),
            Statement::ForIn {
                target,
                object,
                body,
                ..
            } => self.emit_for_in(target, object, body),
            Statement::Switch {
                discriminant,
                cases,
                ..
            } => self.emit_switch(discriminant, cases),
            Statement::Throw { argument, .. } => {
                self.emit_expression(argument)?;
                self.builder.emit(Instruction::Throw);
                Ok(())
            }
            Statement::Try {
                block,
                handler,
                finalizer,
                ..
            } => self.emit_try(block, handler.as_ref(), finalizer.as_deref()),
            Statement::Labelled { label, body, pos } => self.emit_labelled(label, body, *pos),
            Statement::Break { label, pos } => self.emit_break(label.as_deref(), *pos),
            Statement::Continue { label, pos } => self.emit_continue(label.as_deref(), *pos),
            Statement::Return { argument, pos } => self.emit_return(argument.as_ref(), *pos),
        }
    }

    fn emit_expression_statement(&mut self, expression: &Expression) -> CompileResult<()> {
        if self.script_mode && self.suppress_completion == 0 {
            // The script's completion value tracks the last
            // value-producing expression statement.
            self.emit_expression(expression)?;
            let slot = self.completion_slot.expect("script mode has a completion slot");
            self.builder.emit(Instruction::SetSlot { slot });
            return Ok(());
        }
        match expression {
            // Side-effect-free roots of dead expression statements are
            // dropped entirely.
            Expression::Literal { .. } | Expression::This { .. } | Expression::Function { .. } => {
                Ok(())
            }
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
                self.emit_expression(expression)?;
                self.builder.emit(Instruction::Pop);
                Ok(())
            }
        }
    }

    fn emit_declaration(
        &mut self,
        kind: DeclarationKind,
        declarations: &[(String, Option<Expression>)],
        pos: SourcePosition,
    ) -> CompileResult<()> {
        for (name, init) in declarations {
            match kind {
                DeclarationKind::Let | DeclarationKind::Const => {
                    if self.scopes.declared_in_current(name) {
                        return Err(self.syntax_error(
                            format!("identifier '{name}' has already been declared"),
                            pos,
                        ));
                    }
                    let slot = self.builder.declare_local()?;
                    self.builder.name_slot(slot, name);
                    self.scopes
                        .declare(name, slot, kind == DeclarationKind::Const);
                    if let Some(init) = init {
                        let value_type = self.emit_expression(init)?;
                        self.widen_local(slot, value_type);
                        self.convert_top(value_type, self.local_type(slot));
                        self.builder.emit(Instruction::SetSlot { slot });
                    }
                }
                DeclarationKind::Var => {
                    if let Some(init) = init {
                        let mut thunk = |generator: &mut MethodGenerator| {
                            generator.emit_expression(init)
                        };
                        self.emit_identifier_store(name, pos, false, &mut thunk)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_if(
        &mut self,
        test: &Expression,
        consequent: &Statement,
        alternate: Option<&Statement>,
    ) -> CompileResult<()> {
        let test_type = self.emit_expression(test)?;
        self.convert_top(test_type, StaticType::Boolean);
        let else_label = self.builder.create_label();
        self.builder.emit(Instruction::JumpIfFalse { target: else_label });
        self.emit_statement(consequent)?;
        match alternate {
            Some(alternate) => {
                let end_label = self.builder.create_label();
                self.builder.emit(Instruction::Jump { target: end_label });
                self.builder.place_label(else_label);
                self.emit_statement(alternate)?;
                self.builder.place_label(end_label);
            }
            None => self.builder.place_label(else_label),
        }
        Ok(())
    }

    fn push_loop_frame(&mut self, break_label: marten_code::Label, continue_label: marten_code::Label) {
        let labels = std::mem::take(&mut self.info.pending_labels);
        let break_target = self.info.here(break_label);
        let continue_target = self.info.here(continue_label);
        self.info.break_stack.push(BreakFrame {
            labels,
            break_target,
            continue_target: Some(continue_target),
            labelled_only: false,
        });
    }

    fn emit_while(&mut self, test: &Expression, body: &Statement) -> CompileResult<()> {
        let test_label = self.builder.create_label();
        let break_label = self.builder.create_label();
        self.push_loop_frame(break_label, test_label);

        self.builder.place_label(test_label);
        let test_type = self.emit_expression(test)?;
        self.convert_top(test_type, StaticType::Boolean);
        self.builder.emit(Instruction::JumpIfFalse { target: break_label });
        self.emit_statement(body)?;
        self.builder.emit(Instruction::Jump { target: test_label });
        self.builder.place_label(break_label);

        self.info.break_stack.pop();
        Ok(())
    }

    fn emit_do_while(&mut self, body: &Statement, test: &Expression) -> CompileResult<()> {
        let start_label = self.builder.create_label();
        let continue_label = self.builder.create_label();
        let break_label = self.builder.create_label();
        self.push_loop_frame(break_label, continue_label);

        self.builder.place_label(start_label);
        self.emit_statement(body)?;
        self.builder.place_label(continue_label);
        let test_type = self.emit_expression(test)?;
        self.convert_top(test_type, StaticType::Boolean);
        self.builder.emit(Instruction::JumpIfTrue { target: start_label });
        self.builder.place_label(break_label);

        self.info.break_stack.pop();
        Ok(())
    }

    fn emit_for(
        &mut self,
        init: Option<&Statement>,
        test: Option<&Expression>,
        update: Option<&Expression>,
        body: &Statement,
    ) -> CompileResult<()> {
        self.scopes.enter(false);
        if let Some(init) = init {
            self.emit_statement(init)?;
        }

        let test_label = self.builder.create_label();
        let continue_label = self.builder.create_label();
        let break_label = self.builder.create_label();
        self.push_loop_frame(break_label, continue_label);

        self.builder.place_label(test_label);
        if let Some(test) = test {
            let test_type = self.emit_expression(test)?;
            self.convert_top(test_type, StaticType::Boolean);
            self.builder.emit(Instruction::JumpIfFalse { target: break_label });
        }
        self.emit_statement(body)?;
        self.builder.place_label(continue_label);
        if let Some(update) = update {
            self.emit_discarded(update)?;
        }
        self.builder.emit(Instruction::Jump { target: test_label });
        self.builder.place_label(break_label);

        self.info.break_stack.pop();
        self.scopes.exit();
        Ok(())
    }

    fn emit_for_in(
        &mut self,
        target: &ForInTarget,
        object: &Expression,
        body: &Statement,
    ) -> CompileResult<()> {
        self.scopes.enter(false);
        // A let/const head binds in the loop's own scope.
        if let ForInTarget::Declaration(
            DeclarationKind::Let | DeclarationKind::Const,
            name,
        ) = target
        {
            let slot = self.builder.declare_local()?;
            self.builder.name_slot(slot, name);
            self.scopes.declare(name, slot, false);
        }
        let names_slot = self.builder.lease_slot()?;
        let index_slot = self.builder.lease_slot()?;

        self.emit_expression(object)?;
        self.builder.emit(Instruction::PropNames);
        self.builder.emit(Instruction::SetSlot { slot: names_slot });
        self.builder.emit(Instruction::LoadInt { value: 0 });
        self.builder.emit(Instruction::SetSlot { slot: index_slot });

        let test_label = self.builder.create_label();
        let continue_label = self.builder.create_label();
        let break_label = self.builder.create_label();
        self.push_loop_frame(break_label, continue_label);

        self.builder.place_label(test_label);
        self.builder.emit(Instruction::GetSlot { slot: index_slot });
        self.builder.emit(Instruction::GetSlot { slot: names_slot });
        let length = self.builder.constants_mut().add_string("length");
        self.builder.emit(Instruction::GetProp { name: length });
        self.builder.emit(Instruction::Compare {
            op: CompareOp::Less,
            kind: CompareKind::Int32,
        });
        self.builder.emit(Instruction::JumpIfFalse { target: break_label });

        // Assign the current name to the loop target.
        let mut thunk = |generator: &mut MethodGenerator| -> CompileResult<StaticType> {
            generator.builder.emit(Instruction::GetSlot { slot: names_slot });
            generator.builder.emit(Instruction::GetSlot { slot: index_slot });
            generator.builder.emit(Instruction::GetElem);
            Ok(StaticType::String)
        };
        match target {
            ForInTarget::Declaration(_, name) => {
                let pos = body.position();
                self.emit_identifier_store(name, pos, false, &mut thunk)?;
            }
            ForInTarget::Expression(expr) => match expr.as_ref() {
                Expression::Identifier { name, pos } => {
                    self.emit_identifier_store(name, *pos, false, &mut thunk)?;
                }
                Expression::Member { object, name, pos } => {
                    self.emit_member_store(object, name, *pos, false, &mut thunk)?;
                }
                Expression::Index { object, index, pos } => {
                    self.emit_index_store(object, index, *pos, false, &mut thunk)?;
                }
                other => {
                    return Err(self.syntax_error("invalid for-in target", other.position()));
                }
            },
        }

        self.emit_statement(body)?;
        self.builder.place_label(continue_label);
        self.builder.emit(Instruction::GetSlot { slot: index_slot });
        self.builder.emit(Instruction::LoadInt { value: 1 });
        self.builder.emit(Instruction::AddInt);
        self.builder.emit(Instruction::SetSlot { slot: index_slot });
        self.builder.emit(Instruction::Jump { target: test_label });
        self.builder.place_label(break_label);

        self.info.break_stack.pop();
        self.builder.release_slot(index_slot);
        self.builder.release_slot(names_slot);
        self.scopes.exit();
        Ok(())
    }

    fn emit_switch(
        &mut self,
        discriminant: &Expression,
        cases: &[marten_parser::SwitchCase],
    ) -> CompileResult<()> {
        let disc_slot = self.builder.lease_slot()?;
        let disc_type = self.emit_expression(discriminant)?;
        self.builder.emit(Instruction::SetSlot { slot: disc_slot });

        let break_label = self.builder.create_label();
        let labels = std::mem::take(&mut self.info.pending_labels);
        let break_target = self.info.here(break_label);
        self.info.break_stack.push(BreakFrame {
            labels,
            break_target,
            continue_target: None,
            labelled_only: false,
        });

        // Dispatch: test every case in order, then fall back to default.
        let mut case_labels = Vec::with_capacity(cases.len());
        let mut default_index = None;
        for (i, case) in cases.iter().enumerate() {
            let label = self.builder.create_label();
            case_labels.push(label);
            match &case.test {
                Some(test) => {
                    self.builder.emit(Instruction::GetSlot { slot: disc_slot });
                    let test_type = self.emit_expression(test)?;
                    let kind = if disc_type == StaticType::Int32 && test_type == StaticType::Int32 {
                        CompareKind::Int32
                    } else if disc_type.is_numeric() && test_type.is_numeric() {
                        CompareKind::Number
                    } else if disc_type.is_string() && test_type.is_string() {
                        CompareKind::String
                    } else {
                        CompareKind::Generic
                    };
                    self.builder.emit(Instruction::Compare {
                        op: CompareOp::StrictEqual,
                        kind,
                    });
                    self.builder.emit(Instruction::JumpIfTrue { target: label });
                }
                None => default_index = Some(i),
            }
        }
        match default_index {
            Some(i) => self.builder.emit(Instruction::Jump {
                target: case_labels[i],
            }),
            None => self.builder.emit(Instruction::Jump {
                target: break_label,
            }),
        }

        for (case, label) in cases.iter().zip(&case_labels) {
            self.builder.place_label(*label);
            self.emit_statements(&case.body)?;
        }
        self.builder.place_label(break_label);

        self.info.break_stack.pop();
        self.builder.release_slot(disc_slot);
        Ok(())
    }

    fn emit_try(
        &mut self,
        block: &[Statement],
        handler: Option<&marten_parser::CatchClause>,
        finalizer: Option<&[Statement]>,
    ) -> CompileResult<()> {
        let finally = match finalizer {
            Some(statements) => {
                let state_slot = self.builder.lease_slot()?;
                let pending_slot = self.builder.lease_slot()?;
                let finally_label = self.builder.create_label();
                self.builder.emit(Instruction::LoadInt { value: 0 });
                self.builder.emit(Instruction::SetSlot { slot: state_slot });
                self.info.finally_stack.push(FinallyFrame {
                    state_slot,
                    finally_label,
                    outer_try_depth: self.info.try_depth,
                    exits: Vec::new(),
                });
                self.builder.emit(Instruction::EnterFinally {
                    finally: finally_label,
                    state_slot,
                    pending_slot,
                });
                self.info.try_depth += 1;
                Some((state_slot, pending_slot, finally_label, statements))
            }
            None => None,
        };

        match handler {
            Some(catch) => {
                let catch_label = self.builder.create_label();
                let after_label = self.builder.create_label();
                self.builder.emit(Instruction::EnterTry { catch: catch_label });
                self.info.try_depth += 1;
                self.emit_statements(block)?;
                self.builder.emit(Instruction::LeaveTry);
                self.info.try_depth -= 1;
                self.builder.emit(Instruction::Jump { target: after_label });

                self.builder.place_label(catch_label);
                self.scopes.enter(false);
                let slot = self.builder.declare_local()?;
                self.builder.name_slot(slot, &catch.param);
                self.scopes.declare(&catch.param, slot, false);
                self.widen_local(slot, StaticType::Any);
                self.builder.emit(Instruction::SetSlot { slot });
                self.emit_statements(&catch.body)?;
                self.scopes.exit();
                self.builder.place_label(after_label);
            }
            None => self.emit_statements(block)?,
        }

        if let Some((state_slot, pending_slot, finally_label, statements)) = finally {
            // Normal completion: state is still 0.
            self.builder.emit(Instruction::LeaveTry);
            self.info.try_depth -= 1;
            self.builder.emit(Instruction::Jump {
                target: finally_label,
            });
            let frame = self
                .info
                .finally_stack
                .pop()
                .expect("finally frame pushed above");

            self.builder.place_label(finally_label);
            self.suppress_completion += 1;
            self.emit_statements(statements)?;
            self.suppress_completion -= 1;

            // Pending-throw dispatch: state -1 rethrows.
            let no_throw = self.builder.create_label();
            self.builder.emit(Instruction::GetSlot { slot: state_slot });
            self.builder.emit(Instruction::LoadInt { value: -1 });
            self.builder.emit(Instruction::Compare {
                op: CompareOp::StrictEqual,
                kind: CompareKind::Int32,
            });
            self.builder.emit(Instruction::JumpIfFalse { target: no_throw });
            self.builder.emit(Instruction::GetSlot { slot: pending_slot });
            self.builder.emit(Instruction::Throw);
            self.builder.place_label(no_throw);

            // Staged-exit dispatch.
            for (i, target) in frame.exits.iter().enumerate() {
                let skip = self.builder.create_label();
                self.builder.emit(Instruction::GetSlot { slot: state_slot });
                self.builder.emit(Instruction::LoadInt {
                    value: i as i32 + 1,
                });
                self.builder.emit(Instruction::Compare {
                    op: CompareOp::StrictEqual,
                    kind: CompareKind::Int32,
                });
                self.builder.emit(Instruction::JumpIfFalse { target: skip });
                self.emit_long_jump(*target);
                self.builder.place_label(skip);
            }

            self.builder.release_slot(pending_slot);
            self.builder.release_slot(state_slot);
        }
        Ok(())
    }

    fn emit_labelled(
        &mut self,
        label: &str,
        body: &Statement,
        pos: SourcePosition,
    ) -> CompileResult<()> {
        if self.info.label_in_scope(label) {
            return Err(self.syntax_error(format!("label '{label}' has already been declared"), pos));
        }
        self.info.pending_labels.push(label.to_string());
        match body {
            Statement::While { .. }
            | Statement::DoWhile { .. }
            | Statement::For { .. }
            | Statement::ForIn { .. }
            | Statement::Switch { .. }
            | Statement::Labelled { .. } => self.emit_statement(body),
            _ => {
                let break_label = self.builder.create_label();
                let labels = std::mem::take(&mut self.info.pending_labels);
                let break_target = self.info.here(break_label);
                self.info.break_stack.push(BreakFrame {
                    labels,
                    break_target,
                    continue_target: None,
                    labelled_only: true,
                });
                let result = self.emit_statement(body);
                self.info.break_stack.pop();
                self.builder.place_label(break_label);
                result
            }
        }
    }

    fn emit_break(&mut self, label: Option<&str>, pos: SourcePosition) -> CompileResult<()> {
        let target = match self.info.break_frame(label) {
            Some(frame) => frame.break_target,
            None => {
                let message = match label {
                    Some(name) => format!("undefined label '{name}'"),
                    None => "illegal break statement".to_string(),
                };
                return Err(self.syntax_error(message, pos));
            }
        };
        self.emit_long_jump(target);
        Ok(())
    }

    fn emit_continue(&mut self, label: Option<&str>, pos: SourcePosition) -> CompileResult<()> {
        let frame = match self.info.continue_frame(label) {
            Some(frame) => frame,
            None => {
                let message = match label {
                    Some(name) => format!("undefined label '{name}'"),
                    None => "illegal continue statement".to_string(),
                };
                return Err(self.syntax_error(message, pos));
            }
        };
        let Some(target) = frame.continue_target else {
            return Err(self.syntax_error(
                "continue target is not a loop label",
                pos,
            ));
        };
        self.emit_long_jump(target);
        Ok(())
    }

    fn emit_return(
        &mut self,
        argument: Option<&Expression>,
        pos: SourcePosition,
    ) -> CompileResult<()> {
        if self.script_mode {
            return Err(self.syntax_error("illegal return statement", pos));
        }
        let value_type = match argument {
            Some(argument) => self.emit_expression(argument)?,
            None => {
                self.builder.emit(Instruction::LoadUndefined);
                StaticType::Undefined
            }
        };
        self.return_type = if self.has_return {
            self.return_type.join(value_type)
        } else {
            value_type
        };
        self.has_return = true;
        let return_slot = self.info.return_slot;
        self.builder.emit(Instruction::SetSlot { slot: return_slot });
        self.emit_long_jump(self.info.return_target);
        Ok(())
    }
}

/// Collect hoisted `var` names and function declarations (without
/// descending into nested functions).
fn collect_hoisted(
    statements: &[Statement],
    vars: &mut Vec<String>,
    funcs: &mut Vec<(String, Rc<FunctionNode>)>,
) {
    for statement in statements {
        match statement {
            Statement::Declaration {
                kind: DeclarationKind::Var,
                declarations,
                ..
            } => {
                for (name, _) in declarations {
                    if !vars.contains(name) {
                        vars.push(name.clone());
                    }
                }
            }
            Statement::FunctionDeclaration { function, .. } => {
                if let Some(name) = &function.name {
                    funcs.push((name.clone(), function.clone()));
                }
            }
            Statement::Block { statements, .. } => collect_hoisted(statements, vars, funcs),
            Statement::If {
                consequent,
                alternate,
                ..
            } => {
                collect_hoisted(std::slice::from_ref(consequent), vars, funcs);
                if let Some(alternate) = alternate {
                    collect_hoisted(std::slice::from_ref(alternate), vars, funcs);
                }
            }
            Statement::For { init, body, .. } => {
                if let Some(init) = init {
                    collect_hoisted(std::slice::from_ref(init), vars, funcs);
                }
                collect_hoisted(std::slice::from_ref(body), vars, funcs);
            }
            Statement::ForIn { target, body, .. } => {
                if let ForInTarget::Declaration(DeclarationKind::Var, name) = target
                    && !vars.contains(name)
                {
                    vars.push(name.clone());
                }
                collect_hoisted(std::slice::from_ref(body), vars, funcs);
            }
            Statement::While { body, .. } | Statement::DoWhile { body, .. } => {
                collect_hoisted(std::slice::from_ref(body), vars, funcs);
            }
            Statement::Labelled { body, .. } => {
                collect_hoisted(std::slice::from_ref(body), vars, funcs);
            }
            Statement::Switch { cases, .. } => {
                for case in cases {
                    collect_hoisted(&case.body, vars, funcs);
                }
            }
            Statement::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                collect_hoisted(block, vars, funcs);
                if let Some(handler) = handler {
                    collect_hoisted(&handler.body, vars, funcs);
                }
                if let Some(finalizer) = finalizer {
                    collect_hoisted(finalizer, vars, funcs);
                }
            }
            _ => {}
        }
    }
}
