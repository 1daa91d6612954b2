pub mod builder;

use super::cfg::{BlockId, ControlFlowGraph, Edge, Location, Slot};
use super::instruction::Instruction;
use super::signature::SignatureParser;
use super::value::{ValueFlags, ValueId, ValueNumbering};

/// Value ids handed out for field loads start here so they never collide with slot ids.
const FIELD_VALUE_BASE: ValueId = 1 << 20;
const MAX_VALUE_DEPTH: usize = 8;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// The method closes the annotated parameter.
    WillClose,
    WillNotClose,
    /// The method's result owns the annotated parameter and closes it when closed itself.
    WillCloseWhenClosed,
    CreatesObligation,
    DischargesObligation,
    /// The annotated class must be cleaned up by whoever creates it.
    CleanupObligation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

impl Program {
    pub fn new(classes: Vec<ClassDef>) -> Self {
        Self { classes }
    }

    pub fn merge(&mut self, other: Program) {
        self.classes.extend(other.classes);
    }

    /// Methods with a body in first-party classes, in program order.
    pub fn procedures(&self) -> Vec<(&ClassDef, &MethodDef)> {
        self.classes
            .iter()
            .filter(|class| class.application)
            .flat_map(|class| {
                class
                    .methods
                    .iter()
                    .filter(|method| method.body.is_some())
                    .map(move |method| (class, method))
            })
            .collect()
    }
}

fn default_application() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub super_class: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// First-party code; library classes only contribute declarations.
    #[serde(default = "default_application")]
    pub application: bool,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_class: Some("java.lang.Object".to_string()),
            interfaces: Vec::new(),
            annotations: Vec::new(),
            application: true,
            methods: Vec::new(),
        }
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn has_annotation(&self, annotation: Annotation) -> bool {
        self.annotations.contains(&annotation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub signature: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Indexed by declared parameter, `this` excluded.
    #[serde(default)]
    pub param_annotations: Vec<Vec<Annotation>>,
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl MethodDef {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            is_static: false,
            annotations: Vec::new(),
            param_annotations: Vec::new(),
            body: None,
        }
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn annotate_param(mut self, index: usize, annotation: Annotation) -> Self {
        if self.param_annotations.len() <= index {
            self.param_annotations.resize(index + 1, Vec::new());
        }
        self.param_annotations[index].push(annotation);
        self
    }

    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn has_annotation(&self, annotation: Annotation) -> bool {
        self.annotations.contains(&annotation)
    }

    pub fn is_main(&self) -> bool {
        self.is_static && self.name == "main" && self.signature == "([Ljava/lang/String;)V"
    }

    pub fn param_has_annotation(&self, index: usize, annotation: Annotation) -> bool {
        self.param_annotations
            .get(index)
            .map_or(false, |annotations| annotations.contains(&annotation))
    }

    pub fn has_param_annotations(&self, index: usize) -> bool {
        self.param_annotations.get(index).map_or(false, |annotations| !annotations.is_empty())
    }

    pub fn parameter_types(&self) -> Vec<String> {
        SignatureParser::new(&self.signature).parameter_types()
    }

    pub fn return_type(&self) -> Option<String> {
        SignatureParser::new(&self.signature).return_type()
    }

    pub fn full_name(&self, class: &str) -> String {
        format!("{}.{}{}", class, self.name, self.signature)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

/// An explicit value-numbering fact; without a location it holds in the whole method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueFact {
    #[serde(default)]
    pub location: Option<Location>,
    pub slot: Slot,
    pub value: ValueId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotFact {
    #[serde(default)]
    pub location: Option<Location>,
    pub slot: Slot,
}

impl SlotFact {
    fn holds(&self, location: Location, slot: Slot) -> bool {
        self.slot == slot && self.location.map_or(true, |at| at == location)
    }
}

/// A decoded procedure body: CFG plus the value facts the front end computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodBody {
    pub entry: BlockId,
    pub exit: BlockId,
    pub blocks: Vec<BasicBlock>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub values: Vec<ValueFact>,
    #[serde(default)]
    pub null_values: Vec<SlotFact>,
    #[serde(default)]
    pub non_null_values: Vec<SlotFact>,
    /// Value ids of the incoming parameters, `this` included.
    #[serde(default)]
    pub parameters: Vec<ValueId>,
}

impl MethodBody {
    fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }

    fn definitions(&self, slot: Slot) -> Vec<&Instruction> {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter())
            .filter(|ins| ins.def() == Some(slot))
            .collect()
    }

    fn explicit_value(&self, location: Location, slot: Slot) -> Option<ValueId> {
        let at = self
            .values
            .iter()
            .find(|fact| fact.slot == slot && fact.location == Some(location));
        at.or_else(|| self.values.iter().find(|fact| fact.slot == slot && fact.location.is_none()))
            .map(|fact| fact.value)
    }

    // Loads of the same field from the same object share one value id.
    fn value_of(&self, location: Location, slot: Slot, depth: usize) -> ValueId {
        if let Some(value) = self.explicit_value(location, slot) {
            return value;
        }
        if depth >= MAX_VALUE_DEPTH {
            return slot;
        }
        let defs = self.definitions(slot);
        if let [Instruction::Move { src, .. }] = defs.as_slice() {
            return self.value_of(location, *src, depth + 1);
        }
        if let [Instruction::GetField { class, field, object, .. }] = defs.as_slice() {
            let base = object.map(|object| self.value_of(location, object, depth + 1));
            let mut keys: Vec<(String, String)> = self
                .blocks
                .iter()
                .flat_map(|block| block.instructions.iter())
                .filter_map(|ins| match ins {
                    Instruction::GetField { class, field, .. } => Some((class.clone(), field.clone())),
                    _ => None,
                })
                .collect();
            keys.sort();
            keys.dedup();
            let index = keys
                .iter()
                .position(|(c, f)| c == class && f == field)
                .unwrap_or_default();
            return FIELD_VALUE_BASE + (index << 8) + base.unwrap_or(0xff).min(0xff);
        }
        slot
    }
}

impl ControlFlowGraph for MethodBody {
    fn blocks(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|block| block.id).collect()
    }

    fn edges(&self) -> &[Edge] {
        &self.edges
    }

    fn instructions_of(&self, block: BlockId) -> &[Instruction] {
        self.block(block).map_or(&[], |block| block.instructions.as_slice())
    }

    fn entry(&self) -> BlockId {
        self.entry
    }

    fn exit(&self) -> BlockId {
        self.exit
    }
}

impl ValueNumbering for MethodBody {
    fn value_id_at(&self, location: Location, slot: Slot) -> ValueId {
        self.value_of(location, slot, 0)
    }

    fn is_definitely_null(&self, location: Location, slot: Slot) -> bool {
        if self.null_values.iter().any(|fact| fact.holds(location, slot)) {
            return true;
        }
        let defs = self.definitions(slot);
        !defs.is_empty() && defs.iter().all(|ins| matches!(ins, Instruction::ConstNull { .. }))
    }

    fn is_definitely_non_null(&self, location: Location, slot: Slot) -> bool {
        if self.non_null_values.iter().any(|fact| fact.holds(location, slot)) {
            return true;
        }
        let defs = self.definitions(slot);
        !defs.is_empty() && defs.iter().all(|ins| matches!(ins, Instruction::New { .. }))
    }

    fn flags(&self, value: ValueId) -> ValueFlags {
        let mut flags = ValueFlags {
            parameter: self.parameters.contains(&value),
            field_load: value >= FIELD_VALUE_BASE,
            ..ValueFlags::default()
        };
        if value < FIELD_VALUE_BASE {
            let defs = self.definitions(value);
            flags.constant = !defs.is_empty() && defs.iter().all(|ins| matches!(ins, Instruction::ConstNull { .. }));
            flags.return_value = defs.iter().any(|ins| ins.as_invoke().is_some());
            flags.field_load |= !defs.is_empty() && defs.iter().all(|ins| matches!(ins, Instruction::GetField { .. }));
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::builder::BodyBuilder;
    use super::*;
    use crate::analysis::core::cfg::EdgeKind;

    #[test]
    fn field_loads_of_same_field_share_a_value() {
        let mut b = BodyBuilder::new();
        let first = b.block(vec![Instruction::get_field("C", "lock", "java.util.concurrent.locks.Lock", 0, 1)]);
        let second = b.block(vec![Instruction::get_field("C", "lock", "java.util.concurrent.locks.Lock", 0, 2)]);
        let exit = b.block(vec![]);
        b.edge(first, second, EdgeKind::Normal).edge(second, exit, EdgeKind::Normal);
        let body = b.parameters(vec![0]).build(first, exit);

        let v1 = body.value_id_at(Location::new(first, 0), 1);
        let v2 = body.value_id_at(Location::new(second, 0), 2);
        assert_eq!(v1, v2);
        assert!(body.flags(v1).field_load);
        assert!(body.flags(0).parameter);
    }

    #[test]
    fn copies_keep_the_source_value() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Move { dest: 2, src: 1 }]);
        let body = b.parameters(vec![0, 1]).build(entry, entry);

        let copy = body.value_id_at(Location::new(entry, 0), 2);
        assert_eq!(copy, body.value_id_at(Location::new(entry, 0), 1));
        assert!(body.flags(copy).parameter);
    }

    #[test]
    fn const_null_slots_are_definitely_null() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::ConstNull { dest: 3 },
            Instruction::new_object("java.io.FileInputStream", 4),
        ]);
        let body = b.build(entry, entry);
        assert!(body.is_definitely_null(Location::new(entry, 1), 3));
        assert!(!body.is_definitely_null(Location::new(entry, 1), 4));
        assert!(body.is_definitely_non_null(Location::new(entry, 1), 4));
    }

    #[test]
    fn explicit_value_facts_override_slots() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        b.value(None, 7, 2);
        let body = b.build(entry, entry);
        assert_eq!(body.value_id_at(Location::new(entry, 0), 7), 2);
        assert_eq!(body.value_id_at(Location::new(entry, 0), 8), 8);
    }
}
