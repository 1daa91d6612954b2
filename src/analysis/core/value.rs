use super::cfg::{ControlFlowGraph, Edge, EdgeKind, Location, Slot};
use super::instruction::{Instruction, Operand};

pub type ValueId = usize;

/// What the front end knows about where a value came from.
#[derive(Debug, Copy, Clone, Default, Hash, Eq, PartialEq)]
pub struct ValueFlags {
    pub constant: bool,
    pub parameter: bool,
    pub return_value: bool,
    pub field_load: bool,
}

impl ValueFlags {
    /// The value was obtained from outside this procedure's own allocations.
    pub fn is_foreign(&self) -> bool {
        self.parameter || self.field_load
    }
}

/// Alias/identity abstraction: two slots denote the same run-time value iff
/// they carry the same value id.
pub trait ValueNumbering {
    fn value_id_at(&self, location: Location, slot: Slot) -> ValueId;

    fn is_definitely_null(&self, location: Location, slot: Slot) -> bool;

    fn is_definitely_non_null(&self, _location: Location, _slot: Slot) -> bool {
        false
    }

    fn flags(&self, _value: ValueId) -> ValueFlags {
        ValueFlags::default()
    }
}

/// The operand proven null when control takes `edge`: the taken edge of IFNULL,
/// the fall-through of IFNONNULL, or the equal edge of a reference comparison
/// against a definitely-null value.
pub fn null_checked_operand<'c, G, V>(cfg: &'c G, values: &V, edge: &Edge) -> Option<(Location, &'c Operand)>
where
    G: ControlFlowGraph + ?Sized,
    V: ValueNumbering + ?Sized,
{
    if edge.is_exception_edge() {
        return None;
    }
    let (location, instruction) = cfg.last_instruction(edge.source)?;
    let (operand, negated) = match instruction {
        Instruction::IfNull { value, negated } => (value, *negated),
        Instruction::IfRefCmp { left, right, negated } => {
            match (values.is_definitely_null(location, left.slot), values.is_definitely_null(location, right.slot)) {
                (true, false) => (right, *negated),
                (false, true) => (left, *negated),
                _ => return None,
            }
        }
        _ => return None,
    };
    let null_edge = if negated { EdgeKind::FallThrough } else { EdgeKind::IfCmp };
    if edge.kind == null_edge {
        Some((location, operand))
    } else {
        None
    }
}
