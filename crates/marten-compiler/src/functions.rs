//! The function table: per-function compilation state and the call graph.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use marten_code::{FunctionId, Method, PrototypeId, StaticType};
use marten_core::value::{FunctionKind, FunctionObject, FunctionRef};
use marten_core::Realm;
use marten_parser::FunctionNode;

/// Per-function compilation state.
///
/// The record owns the compiled method handle and the specialisation
/// metadata: the join of every observed argument type, the inferred
/// return type, and the set of call sites that inlined it.
pub struct FunctionRecord {
    /// The cached AST the body recompiles from.
    pub ast: Rc<FunctionNode>,
    /// Display name.
    pub name: Rc<str>,
    /// True for top-level script bodies (vars bind to globals, the
    /// completion value is tracked).
    pub is_script: bool,
    /// The compiled method, once built. Pinned until replaced.
    pub code: Option<Rc<Method>>,
    /// Join of every observed argument static type, per declared
    /// parameter. `Undefined` is "no observation yet".
    pub param_types: Vec<StaticType>,
    /// Static type of `this` inside the body.
    pub this_type: StaticType,
    /// Join of every return site's type; `Any` until first compiled.
    pub return_type: StaticType,
    /// Set when an inlined type was invalidated; the next call rebuilds.
    pub recompile_needed: bool,
    /// Prototype record for `new` instances, created on first use.
    pub instance_proto: Option<PrototypeId>,
    /// Functions whose compiled bodies inlined this record's return type.
    pub dependents: FxHashSet<FunctionId>,
    /// Object-literal prototypes by site ordinal, stable across
    /// recompiles.
    pub literal_protos: Vec<PrototypeId>,
    /// Local slot types settled by previous emission passes, keyed by
    /// slot index.
    pub local_types: FxHashMap<u16, StaticType>,
    /// How many times this body has been compiled.
    pub compile_count: u32,
    /// The stable function object exposed to script.
    pub object: Option<FunctionRef>,
}

/// Table of user-defined functions.
#[derive(Default)]
pub struct FunctionTable {
    records: Vec<FunctionRecord>,
    /// Declarations keyed by AST node identity, so recompiles reuse the
    /// same handle.
    node_ids: FxHashMap<usize, FunctionId>,
}

impl FunctionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function, returning its handle.
    pub fn declare(&mut self, ast: Rc<FunctionNode>, name: Rc<str>, is_script: bool) -> FunctionId {
        let id = FunctionId(self.records.len() as u32);
        let param_count = ast.params.len();
        self.records.push(FunctionRecord {
            ast,
            name,
            is_script,
            code: None,
            param_types: vec![StaticType::Undefined; param_count],
            this_type: StaticType::Any,
            return_type: StaticType::Any,
            recompile_needed: false,
            instance_proto: None,
            dependents: FxHashSet::default(),
            literal_protos: Vec::new(),
            local_types: FxHashMap::default(),
            compile_count: 0,
            object: None,
        });
        id
    }

    /// Declare a function for an AST node, reusing the handle when the
    /// node was declared before (recompiles walk the same tree).
    pub fn declare_for_node(&mut self, ast: &Rc<FunctionNode>, name: Rc<str>) -> FunctionId {
        let key = Rc::as_ptr(ast) as usize;
        if let Some(id) = self.node_ids.get(&key) {
            return *id;
        }
        let id = self.declare(ast.clone(), name, false);
        self.node_ids.insert(key, id);
        id
    }

    /// Borrow a record.
    pub fn get(&self, id: FunctionId) -> &FunctionRecord {
        &self.records[id.0 as usize]
    }

    /// Borrow a record mutably.
    pub fn get_mut(&mut self, id: FunctionId) -> &mut FunctionRecord {
        &mut self.records[id.0 as usize]
    }

    /// Number of declared functions.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no function was declared.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Join observed argument types into the record. Returns true when a
    /// parameter type widened (a compiled body must be rebuilt).
    pub fn observe_call_types(&mut self, id: FunctionId, arg_types: &[StaticType]) -> bool {
        let record = self.get_mut(id);
        let mut changed = false;
        for (i, slot) in record.param_types.iter_mut().enumerate() {
            // A missing argument is an observed `undefined`.
            let observed = arg_types.get(i).copied().unwrap_or(StaticType::Undefined);
            let widened = if *slot == StaticType::Undefined {
                observed
            } else if observed == StaticType::Undefined {
                // An already-typed parameter receiving no argument (or an
                // undefined one) collapses.
                StaticType::Any
            } else {
                slot.join(observed)
            };
            if widened != *slot {
                *slot = widened;
                changed = true;
            }
        }
        if changed && record.code.is_some() {
            record.recompile_needed = true;
        }
        changed
    }

    /// Mark functions for recompilation (invariant: before the widening
    /// write is observable to any subsequent read).
    pub fn mark_recompile(&mut self, ids: &[FunctionId]) {
        for id in ids {
            let record = &mut self.records[id.0 as usize];
            if record.code.is_some() {
                record.recompile_needed = true;
            }
        }
    }

    /// The instance prototype of a constructor, created on first use.
    pub fn ensure_instance_proto(&mut self, id: FunctionId, realm: &mut Realm) -> PrototypeId {
        if let Some(proto) = self.records[id.0 as usize].instance_proto {
            return proto;
        }
        let name = self.records[id.0 as usize].name.clone();
        let proto = realm.registry.create(name, Some(realm.object_proto));
        realm.registry.get_mut(proto).constructor = Some(id);
        let record = self.get_mut(id);
        record.instance_proto = Some(proto);
        // The body specialises `this` against the instance record.
        record.this_type = StaticType::Object(proto);
        if record.code.is_some() {
            record.recompile_needed = true;
        }
        if let Some(object) = &record.object {
            *object.instance_proto.borrow_mut() = Some(proto);
        }
        proto
    }

    /// The stable function object for a function.
    pub fn function_object(&mut self, id: FunctionId) -> FunctionRef {
        let record = self.get_mut(id);
        if let Some(object) = &record.object {
            return object.clone();
        }
        let object = Rc::new(FunctionObject::new(
            FunctionKind::Script(id),
            record.name.clone(),
            record.instance_proto,
        ));
        record.object = Some(object.clone());
        object
    }

    /// Install a freshly compiled method, refreshing return-type
    /// dependents when the inferred return type changed.
    pub fn install_code(&mut self, id: FunctionId, method: Rc<Method>) -> Vec<FunctionId> {
        let record = self.get_mut(id);
        let new_return = method.return_type;
        let return_changed = record.code.is_some() && record.return_type != new_return;
        record.return_type = new_return;
        record.code = Some(method);
        record.recompile_needed = false;
        record.compile_count += 1;
        if return_changed {
            record.dependents.iter().copied().collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_parser::{OptimizationHints, SourcePosition};

    fn dummy_ast(params: &[&str]) -> Rc<FunctionNode> {
        Rc::new(FunctionNode {
            name: Some("f".to_string()),
            params: params.iter().map(|s| s.to_string()).collect(),
            body: vec![],
            strict: false,
            hints: OptimizationHints::default(),
            pos: SourcePosition::new(1, 1),
        })
    }

    #[test]
    fn test_observe_call_types_adopts_then_collapses() {
        let mut table = FunctionTable::new();
        let id = table.declare(dummy_ast(&["x"]), Rc::from("f"), false);

        assert!(table.observe_call_types(id, &[StaticType::Int32]));
        assert_eq!(table.get(id).param_types, vec![StaticType::Int32]);

        // Same type again: no change.
        assert!(!table.observe_call_types(id, &[StaticType::Int32]));

        // A string collapses the parameter to Any.
        assert!(table.observe_call_types(id, &[StaticType::String]));
        assert_eq!(table.get(id).param_types, vec![StaticType::Any]);
    }

    #[test]
    fn test_missing_argument_collapses_parameter() {
        let mut table = FunctionTable::new();
        let id = table.declare(dummy_ast(&["a", "b"]), Rc::from("f"), false);
        table.observe_call_types(id, &[StaticType::Int32, StaticType::Int32]);
        table.observe_call_types(id, &[StaticType::Int32]);
        assert_eq!(
            table.get(id).param_types,
            vec![StaticType::Int32, StaticType::Any]
        );
    }
}
