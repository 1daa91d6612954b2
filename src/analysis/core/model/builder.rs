use crate::analysis::core::cfg::{BlockId, Edge, EdgeKind, Location, Slot};
use crate::analysis::core::instruction::Instruction;
use crate::analysis::core::value::ValueId;

use super::{BasicBlock, MethodBody, SlotFact, ValueFact};

/// Assembles a [`MethodBody`] block by block; block ids are handed out in order.
#[derive(Debug, Clone, Default)]
pub struct BodyBuilder {
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    values: Vec<ValueFact>,
    null_values: Vec<SlotFact>,
    non_null_values: Vec<SlotFact>,
    parameters: Vec<ValueId>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&mut self, instructions: Vec<Instruction>) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock { id, instructions });
        id
    }

    pub fn edge(&mut self, source: BlockId, target: BlockId, kind: EdgeKind) -> &mut Self {
        self.edges.push(Edge::new(source, target, kind));
        self
    }

    pub fn goto(&mut self, source: BlockId, target: BlockId) -> &mut Self {
        self.edge(source, target, EdgeKind::Normal)
    }

    /// Two-way branch out of `source`: `taken` on the IfCmp edge, `fall` on the fall-through edge.
    pub fn branch(&mut self, source: BlockId, taken: BlockId, fall: BlockId) -> &mut Self {
        self.edge(source, taken, EdgeKind::IfCmp).edge(source, fall, EdgeKind::FallThrough)
    }

    pub fn exception_edge(&mut self, source: BlockId, handler: BlockId, checked: bool) -> &mut Self {
        self.edges.push(Edge::exception(source, handler, checked));
        self
    }

    pub fn value(&mut self, location: Option<Location>, slot: Slot, value: ValueId) -> &mut Self {
        self.values.push(ValueFact { location, slot, value });
        self
    }

    pub fn null_at(&mut self, location: Option<Location>, slot: Slot) -> &mut Self {
        self.null_values.push(SlotFact { location, slot });
        self
    }

    pub fn parameters(&mut self, parameters: Vec<ValueId>) -> &mut Self {
        self.parameters = parameters;
        self
    }

    pub fn build(&self, entry: BlockId, exit: BlockId) -> MethodBody {
        MethodBody {
            entry,
            exit,
            blocks: self.blocks.clone(),
            edges: self.edges.clone(),
            values: self.values.clone(),
            null_values: self.null_values.clone(),
            non_null_values: self.non_null_values.clone(),
            parameters: self.parameters.clone(),
        }
    }
}
