//! The prototype registry.
//!
//! Every JS object belongs to exactly one prototype record; prototypes
//! form a chain (no cycles) to a root. Each prototype owns an ordered set
//! of [`PropertyVariable`]s, the unit of type tracking: the compiler
//! inlines a variable's current static type, registers itself as a
//! dependent, and is recompiled when a later write widens or collapses
//! that type.
//!
//! Field offsets are chain-global: a child prototype's fields start after
//! its parent's, so an instance's field vector covers the whole chain.
//! Creating a child finalises the parent's layout; properties added to a
//! finalised prototype fall back to a shared-cell backing (the virtual
//! accessor pair of the record model).

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use thiserror::Error;

use marten_code::{FieldIndex, FunctionId, NativeId, PrototypeId, StaticType};

use crate::value::Value;

/// Property attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAttributes {
    /// Visible to `for-in` enumeration.
    pub enumerable: bool,
    /// Deletable / reconfigurable.
    pub configurable: bool,
    /// Writable by emitted code.
    pub writable: bool,
    /// Accessor property; has no direct value slot.
    pub is_accessor: bool,
}

impl PropertyAttributes {
    /// The default attributes of a script-created property.
    pub fn data() -> Self {
        Self {
            enumerable: true,
            configurable: true,
            writable: true,
            is_accessor: false,
        }
    }

    /// Non-enumerable attributes for built-in methods.
    pub fn method() -> Self {
        Self {
            enumerable: false,
            configurable: true,
            writable: true,
            is_accessor: false,
        }
    }

    /// Frozen value attributes (`undefined`, `NaN`, ...).
    pub fn frozen() -> Self {
        Self {
            enumerable: false,
            configurable: false,
            writable: false,
            is_accessor: false,
        }
    }

    /// Accessor attributes.
    pub fn accessor() -> Self {
        Self {
            enumerable: false,
            configurable: true,
            writable: true,
            is_accessor: true,
        }
    }
}

/// Dispatch target of a method or accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTarget {
    /// A user-defined function.
    Script(FunctionId),
    /// A host native.
    Native(NativeId),
}

/// One member of a method group.
#[derive(Debug, Clone)]
pub struct MethodOverload {
    /// Dispatch target.
    pub target: MethodTarget,
    /// Declared parameter types; empty when unknown (script functions
    /// declare through specialisation instead).
    pub param_types: Vec<StaticType>,
    /// Declared return type.
    pub return_type: StaticType,
}

/// How a property variable is backed.
#[derive(Debug, Clone)]
pub enum PropertyBacking {
    /// Known but never assigned; reads are `undefined`.
    Unassigned,
    /// A compile-time constant; never changes once sealed unless
    /// explicitly overwritten through the host API.
    Constant(Value),
    /// A physical field in the owner's record layout (per-instance
    /// storage).
    Field(FieldIndex),
    /// Several implementations behind one name, selected by static
    /// argument types at the call site.
    MethodGroup(Vec<MethodOverload>),
    /// A virtual accessor pair.
    Accessor {
        /// Getter, if any.
        getter: Option<MethodTarget>,
        /// Setter, if any.
        setter: Option<MethodTarget>,
    },
    /// Shared-cell storage for properties added after the owner's layout
    /// was finalised (prototype-level, not per-instance).
    Cell(Rc<RefCell<Value>>),
}

/// The unit of type tracking.
#[derive(Debug, Clone)]
pub struct PropertyVariable {
    /// Owning prototype.
    pub owner: PrototypeId,
    /// Property name.
    pub name: Rc<str>,
    /// Attribute flags.
    pub attributes: PropertyAttributes,
    /// Currently inferred type. `Undefined` is the lattice bottom.
    pub static_type: StaticType,
    /// Storage backing.
    pub backing: PropertyBacking,
    /// True when not keyed on an instance (statics on constructors).
    pub is_static: bool,
    /// Functions that inlined this variable's type.
    pub dependents: FxHashSet<FunctionId>,
}

/// What the host inserts through `add_property`.
pub enum PropertyValue {
    /// A plain value; synthesises a physical field of the value's type
    /// (or a constant when the attributes are non-writable).
    Value(Value),
    /// A method; merges into a jump-table group with any existing methods
    /// at the same name.
    Method(MethodOverload),
    /// A property-descriptor pair; virtual accessor backing.
    Accessor {
        /// Getter, if any.
        getter: Option<MethodTarget>,
        /// Setter, if any.
        setter: Option<MethodTarget>,
    },
    /// An uninitialised field of a declared type.
    Field(StaticType),
}

/// Result of observing a write through a property variable.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The type was already wide enough.
    Unchanged,
    /// First write; the variable adopted the value's type.
    Adopted,
    /// The type widened; every listed dependent must be recompiled before
    /// the write becomes observable to a subsequent read.
    Widened(Vec<FunctionId>),
}

/// Where a dynamic write must go.
#[derive(Debug, Clone)]
pub enum SlotAction {
    /// Store into the instance field.
    Field(FieldIndex),
    /// Store into the shared cell.
    Cell(Rc<RefCell<Value>>),
    /// Invoke the setter.
    CallSetter(MethodTarget),
    /// Read-only property; sloppy-mode writes are dropped.
    Ignore,
}

/// A dynamically built prototype record.
#[derive(Debug)]
pub struct Prototype {
    /// Stable handle.
    pub id: PrototypeId,
    /// Display name.
    pub name: Rc<str>,
    /// Parent prototype, if any.
    pub parent: Option<PrototypeId>,
    /// Ordered property variables (insertion order drives enumeration).
    pub properties: IndexMap<Rc<str>, PropertyVariable>,
    /// The constructor function, when this is an instance prototype.
    pub constructor: Option<FunctionId>,
    /// First field offset owned by this prototype (after the parent's).
    pub field_base: u16,
    /// Fields materialised so far.
    pub field_count: u16,
    /// Layout frozen; further fields use cell backing.
    pub finalized: bool,
}

impl Prototype {
    /// Total chain-global field count up to and including this prototype.
    pub fn total_fields(&self) -> u16 {
        self.field_base + self.field_count
    }
}

/// A prototype chain operation failed.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Linking would create a cycle.
    #[error("prototype chain cycle through '{0}'")]
    Cycle(String),
}

/// Per-engine table of prototypes.
#[derive(Debug, Default)]
pub struct PrototypeRegistry {
    prototypes: Vec<Prototype>,
}

impl PrototypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a prototype. Creating a child finalises the parent's field
    /// layout.
    pub fn create(&mut self, name: Rc<str>, parent: Option<PrototypeId>) -> PrototypeId {
        let field_base = match parent {
            Some(p) => {
                let parent = &mut self.prototypes[p.0 as usize];
                parent.finalized = true;
                parent.total_fields()
            }
            None => 0,
        };
        let id = PrototypeId(self.prototypes.len() as u32);
        self.prototypes.push(Prototype {
            id,
            name,
            parent,
            properties: IndexMap::new(),
            constructor: None,
            field_base,
            field_count: 0,
            finalized: false,
        });
        id
    }

    /// Borrow a prototype.
    pub fn get(&self, id: PrototypeId) -> &Prototype {
        &self.prototypes[id.0 as usize]
    }

    /// Borrow a prototype mutably.
    pub fn get_mut(&mut self, id: PrototypeId) -> &mut Prototype {
        &mut self.prototypes[id.0 as usize]
    }

    /// Re-link a prototype's parent, rejecting cycles.
    pub fn set_parent(
        &mut self,
        id: PrototypeId,
        parent: Option<PrototypeId>,
    ) -> Result<(), RegistryError> {
        let mut cursor = parent;
        while let Some(p) = cursor {
            if p == id {
                return Err(RegistryError::Cycle(self.get(id).name.to_string()));
            }
            cursor = self.get(p).parent;
        }
        self.get_mut(id).parent = parent;
        Ok(())
    }

    /// Resolve a name along the chain; returns the nearest defining
    /// prototype and the variable.
    pub fn resolve(&self, start: PrototypeId, name: &str) -> Option<(PrototypeId, &PropertyVariable)> {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let proto = self.get(id);
            if let Some(var) = proto.properties.get(name) {
                return Some((id, var));
            }
            cursor = proto.parent;
        }
        None
    }

    /// Insert or merge a property per the host protocol.
    pub fn add_property(
        &mut self,
        id: PrototypeId,
        name: Rc<str>,
        value: PropertyValue,
        attributes: PropertyAttributes,
    ) -> &mut PropertyVariable {
        // Methods merge with an existing method group instead of
        // replacing it.
        if let PropertyValue::Method(overload) = &value
            && let Some(var) = self.get_mut(id).properties.get_mut(&name)
            && let PropertyBacking::MethodGroup(group) = &mut var.backing
        {
            group.push(overload.clone());
            return self.get_mut(id).properties.get_mut(&name).unwrap();
        }

        let (backing, static_type, attributes) = match value {
            PropertyValue::Method(overload) => (
                PropertyBacking::MethodGroup(vec![overload]),
                StaticType::Any,
                attributes,
            ),
            PropertyValue::Accessor { getter, setter } => (
                PropertyBacking::Accessor { getter, setter },
                StaticType::Any,
                PropertyAttributes {
                    is_accessor: true,
                    ..attributes
                },
            ),
            PropertyValue::Field(static_type) => {
                let backing = self.alloc_field_or_cell(id, Value::Undefined);
                (backing, static_type, attributes)
            }
            PropertyValue::Value(v) => {
                let static_type = v.static_type();
                let backing = if attributes.writable {
                    self.alloc_field_or_cell(id, v)
                } else {
                    PropertyBacking::Constant(v)
                };
                (backing, static_type, attributes)
            }
        };

        let proto = self.get_mut(id);
        let var = PropertyVariable {
            owner: id,
            name: name.clone(),
            attributes,
            static_type,
            backing,
            is_static: false,
            dependents: FxHashSet::default(),
        };
        proto.properties.insert(name.clone(), var);
        proto.properties.get_mut(&name).unwrap()
    }

    fn alloc_field_or_cell(&mut self, id: PrototypeId, initial: Value) -> PropertyBacking {
        let proto = self.get_mut(id);
        if proto.finalized {
            PropertyBacking::Cell(Rc::new(RefCell::new(initial)))
        } else {
            let index = FieldIndex(proto.field_base + proto.field_count);
            proto.field_count += 1;
            PropertyBacking::Field(index)
        }
    }

    /// Register `function` as a dependent of the variable.
    pub fn add_dependent(&mut self, owner: PrototypeId, name: &str, function: FunctionId) {
        if let Some(var) = self.get_mut(owner).properties.get_mut(name) {
            var.dependents.insert(function);
        }
    }

    /// Observe a write of `value_type` through the variable at
    /// `owner.name`, applying the lattice transition.
    pub fn observe_write(
        &mut self,
        owner: PrototypeId,
        name: &str,
        value_type: StaticType,
    ) -> WriteOutcome {
        let Some(var) = self.get_mut(owner).properties.get_mut(name) else {
            return WriteOutcome::Unchanged;
        };
        if var.static_type == StaticType::Undefined {
            // First write adopts the value's type.
            var.static_type = value_type;
            return WriteOutcome::Adopted;
        }
        if var.static_type == value_type || var.static_type == StaticType::Any {
            return WriteOutcome::Unchanged;
        }
        let widened = var.static_type.join(value_type);
        if widened == var.static_type {
            return WriteOutcome::Unchanged;
        }
        var.static_type = widened;
        WriteOutcome::Widened(var.dependents.iter().copied().collect())
    }

    /// Find or create the slot a dynamic write lands in. Returns the
    /// action plus any dependents invalidated by the type transition.
    pub fn write_slot(
        &mut self,
        start: PrototypeId,
        name: &str,
        value_type: StaticType,
    ) -> (SlotAction, Vec<FunctionId>) {
        let resolved = self
            .resolve(start, name)
            .map(|(owner, var)| (owner, var.backing.clone(), var.attributes.writable));
        if let Some((owner, backing, writable)) = resolved {
            let action = match backing {
                PropertyBacking::Field(index) => SlotAction::Field(index),
                PropertyBacking::Cell(cell) => SlotAction::Cell(cell),
                PropertyBacking::Accessor { setter, .. } => match setter {
                    Some(target) => SlotAction::CallSetter(target),
                    None => SlotAction::Ignore,
                },
                PropertyBacking::Constant(_) | PropertyBacking::MethodGroup(_) => {
                    if !writable {
                        SlotAction::Ignore
                    } else {
                        // Overwriting a sealed backing collapses it to a
                        // shared cell.
                        let cell = Rc::new(RefCell::new(Value::Undefined));
                        let var = self.get_mut(owner).properties.get_mut(name).unwrap();
                        let dependents: Vec<FunctionId> = var.dependents.iter().copied().collect();
                        var.backing = PropertyBacking::Cell(cell.clone());
                        var.static_type = StaticType::Any;
                        return (SlotAction::Cell(cell), dependents);
                    }
                }
                PropertyBacking::Unassigned => {
                    let backing = self.alloc_field_or_cell(owner, Value::Undefined);
                    let var = self.get_mut(owner).properties.get_mut(name).unwrap();
                    var.backing = backing.clone();
                    match backing {
                        PropertyBacking::Field(index) => SlotAction::Field(index),
                        PropertyBacking::Cell(cell) => SlotAction::Cell(cell),
                        _ => unreachable!("alloc_field_or_cell yields field or cell"),
                    }
                }
            };
            let dependents = match self.observe_write(owner, name, value_type) {
                WriteOutcome::Widened(d) => d,
                _ => Vec::new(),
            };
            return (action, dependents);
        }

        // Unknown name: create it on the object's own prototype.
        let interned: Rc<str> = Rc::from(name);
        let var = self.add_property(
            start,
            interned,
            PropertyValue::Field(value_type),
            PropertyAttributes::data(),
        );
        let action = match &var.backing {
            PropertyBacking::Field(index) => SlotAction::Field(*index),
            PropertyBacking::Cell(cell) => SlotAction::Cell(cell.clone()),
            _ => unreachable!("fresh property is field- or cell-backed"),
        };
        (action, Vec::new())
    }

    /// Enumerable property names along the chain, own prototype first,
    /// insertion order preserved, shadowed names skipped.
    pub fn enumerable_names(&self, start: PrototypeId) -> Vec<Rc<str>> {
        let mut seen: FxHashSet<Rc<str>> = FxHashSet::default();
        let mut out = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let proto = self.get(id);
            for (name, var) in &proto.properties {
                if !seen.insert(name.clone()) {
                    continue;
                }
                if var.attributes.enumerable
                    && !matches!(var.backing, PropertyBacking::Unassigned)
                {
                    out.push(name.clone());
                }
            }
            cursor = proto.parent;
        }
        out
    }

    /// Remove a configurable property; returns whether the delete
    /// succeeded (absent names delete successfully) and the dependents
    /// invalidated by the transition.
    pub fn delete_property(&mut self, start: PrototypeId, name: &str) -> (bool, Vec<FunctionId>) {
        let Some((owner, var)) = self.resolve(start, name) else {
            return (true, Vec::new());
        };
        if !var.attributes.configurable {
            return (false, Vec::new());
        }
        // Field offsets stay allocated; the variable is tombstoned so
        // reads see `undefined` and enumeration skips it.
        let var = self.get_mut(owner).properties.get_mut(name).unwrap();
        var.backing = PropertyBacking::Unassigned;
        var.static_type = StaticType::Undefined;
        (true, var.dependents.iter().copied().collect())
    }

    /// Number of prototypes.
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// True when no prototype was created yet.
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_root() -> (PrototypeRegistry, PrototypeId) {
        let mut reg = PrototypeRegistry::new();
        let root = reg.create(Rc::from("Object"), None);
        (reg, root)
    }

    #[test]
    fn test_chain_resolution_finds_nearest() {
        let (mut reg, root) = registry_with_root();
        reg.add_property(
            root,
            Rc::from("x"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::data(),
        );
        let child = reg.create(Rc::from("Child"), Some(root));
        reg.add_property(
            child,
            Rc::from("x"),
            PropertyValue::Field(StaticType::String),
            PropertyAttributes::data(),
        );

        let (owner, var) = reg.resolve(child, "x").unwrap();
        assert_eq!(owner, child);
        assert_eq!(var.static_type, StaticType::String);
        let (owner, _) = reg.resolve(root, "x").unwrap();
        assert_eq!(owner, root);
    }

    #[test]
    fn test_child_fields_start_after_parent() {
        let (mut reg, root) = registry_with_root();
        reg.add_property(
            root,
            Rc::from("a"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::data(),
        );
        let child = reg.create(Rc::from("Child"), Some(root));
        let var = reg.add_property(
            child,
            Rc::from("b"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::data(),
        );
        assert!(matches!(var.backing, PropertyBacking::Field(FieldIndex(1))));
        assert!(reg.get(root).finalized);
    }

    #[test]
    fn test_finalized_prototype_uses_cell_backing() {
        let (mut reg, root) = registry_with_root();
        let _child = reg.create(Rc::from("Child"), Some(root));
        let var = reg.add_property(
            root,
            Rc::from("late"),
            PropertyValue::Value(Value::Int(1)),
            PropertyAttributes::data(),
        );
        assert!(matches!(var.backing, PropertyBacking::Cell(_)));
    }

    #[test]
    fn test_cycle_rejected() {
        let (mut reg, root) = registry_with_root();
        let child = reg.create(Rc::from("Child"), Some(root));
        assert!(reg.set_parent(root, Some(child)).is_err());
        assert!(reg.set_parent(child, None).is_ok());
    }

    #[test]
    fn test_method_group_merges() {
        let (mut reg, root) = registry_with_root();
        let overload = |id: u32| MethodOverload {
            target: MethodTarget::Native(NativeId(id)),
            param_types: vec![],
            return_type: StaticType::Any,
        };
        reg.add_property(
            root,
            Rc::from("m"),
            PropertyValue::Method(overload(0)),
            PropertyAttributes::method(),
        );
        let var = reg.add_property(
            root,
            Rc::from("m"),
            PropertyValue::Method(overload(1)),
            PropertyAttributes::method(),
        );
        let PropertyBacking::MethodGroup(group) = &var.backing else {
            panic!("expected method group");
        };
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn test_write_adopts_then_widens_and_reports_dependents() {
        let (mut reg, root) = registry_with_root();
        reg.add_property(
            root,
            Rc::from("p"),
            PropertyValue::Field(StaticType::Undefined),
            PropertyAttributes::data(),
        );
        assert!(matches!(
            reg.observe_write(root, "p", StaticType::Int32),
            WriteOutcome::Adopted
        ));
        reg.add_dependent(root, "p", FunctionId(7));
        assert!(matches!(
            reg.observe_write(root, "p", StaticType::Int32),
            WriteOutcome::Unchanged
        ));
        match reg.observe_write(root, "p", StaticType::String) {
            WriteOutcome::Widened(deps) => assert_eq!(deps, vec![FunctionId(7)]),
            other => panic!("expected widening, got {other:?}"),
        }
        let (_, var) = reg.resolve(root, "p").unwrap();
        assert_eq!(var.static_type, StaticType::Any);
    }

    #[test]
    fn test_write_slot_creates_missing_property() {
        let (mut reg, root) = registry_with_root();
        let (action, deps) = reg.write_slot(root, "fresh", StaticType::Int32);
        assert!(matches!(action, SlotAction::Field(FieldIndex(0))));
        assert!(deps.is_empty());
        let (_, var) = reg.resolve(root, "fresh").unwrap();
        assert_eq!(var.static_type, StaticType::Int32);
    }

    #[test]
    fn test_enumeration_order_and_shadowing() {
        let (mut reg, root) = registry_with_root();
        reg.add_property(
            root,
            Rc::from("a"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::data(),
        );
        reg.add_property(
            root,
            Rc::from("hidden"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::method(),
        );
        let child = reg.create(Rc::from("Child"), Some(root));
        reg.add_property(
            child,
            Rc::from("b"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::data(),
        );
        reg.add_property(
            child,
            Rc::from("a"),
            PropertyValue::Field(StaticType::Int32),
            PropertyAttributes::data(),
        );

        let names: Vec<String> = reg
            .enumerable_names(child)
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_delete_tombstones() {
        let (mut reg, root) = registry_with_root();
        reg.add_property(
            root,
            Rc::from("p"),
            PropertyValue::Value(Value::Int(3)),
            PropertyAttributes::data(),
        );
        assert!(reg.delete_property(root, "p").0);
        let (_, var) = reg.resolve(root, "p").unwrap();
        assert!(matches!(var.backing, PropertyBacking::Unassigned));
        assert!(reg.enumerable_names(root).is_empty());
        // Non-configurable properties refuse.
        reg.add_property(
            root,
            Rc::from("frozen"),
            PropertyValue::Value(Value::Int(1)),
            PropertyAttributes::frozen(),
        );
        assert!(!reg.delete_property(root, "frozen").0);
    }
}
