//! Finalised methods and the builder the method generator drives.

use serde::{Deserialize, Serialize};

use crate::constant::ConstantPool;
use crate::error::{CodeError, CodeResult};
use crate::instruction::Instruction;
use crate::types::{FunctionId, Label, SlotIndex, StaticType};

/// A compiled, callable method body.
///
/// Methods are immutable once finalised; recompilation builds a fresh
/// `Method` and swaps the handle on the owning function record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    /// Display name (`<script>` for top-level code).
    pub name: String,
    /// Owning function, when this is a user-defined function body.
    pub function: Option<FunctionId>,
    /// Slots occupied by `this` plus declared parameters.
    pub param_count: u16,
    /// Total frame slots (params, locals, leased temporaries).
    pub slot_count: u16,
    /// The parameter static types this body inlined (`this` at index 0).
    pub param_types: Vec<StaticType>,
    /// Join of every emitted return value type.
    pub return_type: StaticType,
    /// Instruction stream.
    pub instructions: Vec<Instruction>,
    /// Label table: `labels[l]` is the instruction index of label `l`.
    pub labels: Vec<u32>,
    /// Constant pool.
    pub constants: ConstantPool,
    /// Instruction → source line/column mapping.
    pub source_map: SourceMap,
    /// Slot names, retained when debug symbols are enabled.
    pub symbols: Option<MethodSymbols>,
}

impl Method {
    /// Resolve a label to its instruction index.
    #[inline]
    pub fn label_target(&self, label: Label) -> usize {
        self.labels[label.0 as usize] as usize
    }

    /// Source line attributed to the instruction at `index`.
    pub fn line_of(&self, index: usize) -> u32 {
        self.source_map
            .find(index as u32)
            .map(|e| e.line)
            .unwrap_or(0)
    }
}

/// Debug symbol information for a method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodSymbols {
    /// Name of each named frame slot, parallel to the slot index.
    pub slot_names: Vec<String>,
    /// Source path of the compiled script.
    pub source_path: String,
}

/// Instruction → source position mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    /// Entries ordered by instruction index.
    pub entries: Vec<SourceMapEntry>,
}

/// A single source map entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceMapEntry {
    /// Instruction index.
    pub instruction_index: u32,
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

impl SourceMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping entry. Consecutive entries for the same position
    /// are collapsed.
    pub fn add(&mut self, instruction_index: u32, line: u32, column: u32) {
        if let Some(last) = self.entries.last()
            && last.line == line
            && last.column == column
        {
            return;
        }
        self.entries.push(SourceMapEntry {
            instruction_index,
            line,
            column,
        });
    }

    /// Find the entry covering an instruction index.
    pub fn find(&self, instruction_index: u32) -> Option<&SourceMapEntry> {
        let idx = self
            .entries
            .binary_search_by_key(&instruction_index, |e| e.instruction_index);
        match idx {
            Ok(i) => Some(&self.entries[i]),
            Err(i) if i > 0 => Some(&self.entries[i - 1]),
            _ => None,
        }
    }
}

/// Frame slot allocator with leasing.
///
/// Parameters and locals are declared permanently; temporaries are leased
/// and may be released for reuse across non-overlapping lifetimes.
#[derive(Debug, Default)]
struct SlotAllocator {
    next: u16,
    free: Vec<u16>,
}

impl SlotAllocator {
    fn declare(&mut self) -> CodeResult<SlotIndex> {
        let slot = self.next;
        self.next = self.next.checked_add(1).ok_or(CodeError::TooManySlots)?;
        Ok(SlotIndex(slot))
    }

    fn lease(&mut self) -> CodeResult<SlotIndex> {
        if let Some(slot) = self.free.pop() {
            Ok(SlotIndex(slot))
        } else {
            self.declare()
        }
    }

    fn release(&mut self, slot: SlotIndex) {
        debug_assert!(slot.0 < self.next, "releasing slot that was never given out");
        self.free.push(slot.0);
    }
}

/// Builder for one method body.
pub struct MethodBuilder {
    name: String,
    function: Option<FunctionId>,
    param_count: u16,
    slots: SlotAllocator,
    slot_names: Vec<String>,
    instructions: Vec<Instruction>,
    labels: Vec<Option<u32>>,
    constants: ConstantPool,
    source_map: SourceMap,
    current_line: u32,
    current_column: u32,
}

impl MethodBuilder {
    /// Create a builder for a method with `param_count` declared parameters
    /// (slot 0 is `this`; parameter slots are pre-declared here).
    pub fn new(name: impl Into<String>, function: Option<FunctionId>, param_count: u16) -> Self {
        let mut slots = SlotAllocator::default();
        let mut slot_names = Vec::new();
        for i in 0..=param_count {
            // Cannot overflow: param_count + 1 <= 65536 is enforced by u16.
            let _ = slots.declare();
            slot_names.push(if i == 0 { "this".to_string() } else { String::new() });
        }
        Self {
            name: name.into(),
            function,
            param_count: param_count + 1,
            slots,
            slot_names,
            instructions: Vec::new(),
            labels: Vec::new(),
            constants: ConstantPool::new(),
            source_map: SourceMap::new(),
            current_line: 0,
            current_column: 0,
        }
    }

    /// Record the source position used for subsequently emitted instructions.
    pub fn mark_position(&mut self, line: u32, column: u32) {
        self.current_line = line;
        self.current_column = column;
    }

    /// Name a declared slot (for debug symbols).
    pub fn name_slot(&mut self, slot: SlotIndex, name: &str) {
        let idx = slot.0 as usize;
        if idx >= self.slot_names.len() {
            self.slot_names.resize(idx + 1, String::new());
        }
        self.slot_names[idx] = name.to_string();
    }

    /// Declare a permanent local slot.
    pub fn declare_local(&mut self) -> CodeResult<SlotIndex> {
        let slot = self.slots.declare()?;
        if slot.0 as usize >= self.slot_names.len() {
            self.slot_names.push(String::new());
        }
        Ok(slot)
    }

    /// Lease a transient slot.
    pub fn lease_slot(&mut self) -> CodeResult<SlotIndex> {
        let slot = self.slots.lease()?;
        if slot.0 as usize >= self.slot_names.len() {
            self.slot_names.push(String::new());
        }
        Ok(slot)
    }

    /// Release a leased slot for reuse.
    pub fn release_slot(&mut self, slot: SlotIndex) {
        self.slots.release(slot);
    }

    /// Create a fresh, unplaced label.
    pub fn create_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        Label(id)
    }

    /// Place a label at the current instruction position.
    pub fn place_label(&mut self, label: Label) {
        let slot = &mut self.labels[label.0 as usize];
        debug_assert!(slot.is_none(), "label {} placed twice", label.0);
        *slot = Some(self.instructions.len() as u32);
    }

    /// Append an instruction.
    pub fn emit(&mut self, instruction: Instruction) {
        self.source_map.add(
            self.instructions.len() as u32,
            self.current_line,
            self.current_column,
        );
        self.instructions.push(instruction);
    }

    /// Current instruction count.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Whether the last emitted instruction unconditionally transfers
    /// control (used to suppress unreachable fall-through code).
    pub fn last_is_terminator(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| i.is_terminator())
    }

    /// Mutable access to the constant pool.
    pub fn constants_mut(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Finalise the method.
    pub fn finish(
        self,
        param_types: Vec<StaticType>,
        return_type: StaticType,
        symbols: Option<String>,
    ) -> CodeResult<Method> {
        let mut labels = Vec::with_capacity(self.labels.len());
        for (id, target) in self.labels.iter().enumerate() {
            labels.push(target.ok_or(CodeError::UnplacedLabel(id as u32))?);
        }
        Ok(Method {
            name: self.name,
            function: self.function,
            param_count: self.param_count,
            slot_count: self.slots.next,
            param_types,
            return_type,
            instructions: self.instructions,
            labels,
            constants: self.constants,
            source_map: self.source_map,
            symbols: symbols.map(|source_path| MethodSymbols {
                slot_names: self.slot_names,
                source_path,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_leasing_reuses_released_slots() {
        let mut b = MethodBuilder::new("f", None, 2);
        // this + 2 params occupy slots 0..=2
        let a = b.lease_slot().unwrap();
        assert_eq!(a, SlotIndex(3));
        b.release_slot(a);
        let c = b.lease_slot().unwrap();
        assert_eq!(c, SlotIndex(3));
        let d = b.lease_slot().unwrap();
        assert_eq!(d, SlotIndex(4));
    }

    #[test]
    fn test_labels_resolve_to_instruction_indices() {
        let mut b = MethodBuilder::new("f", None, 0);
        let l = b.create_label();
        b.emit(Instruction::LoadUndefined);
        b.emit(Instruction::Jump { target: l });
        b.place_label(l);
        b.emit(Instruction::Return);
        let m = b
            .finish(vec![StaticType::Any], StaticType::Undefined, None)
            .unwrap();
        assert_eq!(m.label_target(l), 2);
    }

    #[test]
    fn test_unplaced_label_is_an_error() {
        let mut b = MethodBuilder::new("f", None, 0);
        let l = b.create_label();
        b.emit(Instruction::Jump { target: l });
        let err = b
            .finish(vec![StaticType::Any], StaticType::Undefined, None)
            .unwrap_err();
        assert!(matches!(err, CodeError::UnplacedLabel(0)));
    }

    #[test]
    fn test_source_map_tracks_positions() {
        let mut b = MethodBuilder::new("f", None, 0);
        b.mark_position(1, 1);
        b.emit(Instruction::LoadInt { value: 1 });
        b.mark_position(2, 5);
        b.emit(Instruction::LoadInt { value: 2 });
        b.emit(Instruction::AddInt);
        let m = b
            .finish(vec![StaticType::Any], StaticType::Int32, None)
            .unwrap();
        assert_eq!(m.line_of(0), 1);
        assert_eq!(m.line_of(1), 2);
        assert_eq!(m.line_of(2), 2);
    }
}
