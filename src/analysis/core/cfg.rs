use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::instruction::Instruction;

pub type BlockId = usize;
pub type Slot = usize;

/// A program point: the `index`-th instruction of `block`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Location {
    pub block: BlockId,
    pub index: usize,
}

impl Location {
    pub fn new(block: BlockId, index: usize) -> Self {
        Self { block, index }
    }

    pub fn block_start(block: BlockId) -> Self {
        Self { block, index: 0 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}[{}]", self.block, self.index)
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Unconditional transfer (goto, fall into the next block, return to exit).
    Normal,
    /// Conditional branch taken.
    IfCmp,
    /// Conditional branch not taken.
    FallThrough,
    /// Control transfer caused by the last instruction of the source block throwing.
    Exception,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: BlockId,
    pub target: BlockId,
    pub kind: EdgeKind,
    /// Exception edges only: the thrower declares or explicitly throws the exception.
    #[serde(default)]
    pub checked: bool,
}

impl Edge {
    pub fn new(source: BlockId, target: BlockId, kind: EdgeKind) -> Self {
        Self { source, target, kind, checked: false }
    }

    pub fn exception(source: BlockId, target: BlockId, checked: bool) -> Self {
        Self { source, target, kind: EdgeKind::Exception, checked }
    }

    pub fn is_exception_edge(&self) -> bool {
        self.kind == EdgeKind::Exception
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{} -{:?}-> bb{}", self.source, self.kind, self.target)
    }
}

/// The control-flow graph of one procedure, as decoded by the front end.
pub trait ControlFlowGraph {
    fn blocks(&self) -> Vec<BlockId>;

    fn edges(&self) -> &[Edge];

    fn instructions_of(&self, block: BlockId) -> &[Instruction];

    fn entry(&self) -> BlockId;

    fn exit(&self) -> BlockId;

    fn successors(&self, block: BlockId) -> Vec<&Edge> {
        self.edges().iter().filter(|edge| edge.source == block).collect()
    }

    fn predecessors(&self, block: BlockId) -> Vec<&Edge> {
        self.edges().iter().filter(|edge| edge.target == block).collect()
    }

    fn instruction_at(&self, location: Location) -> Option<&Instruction> {
        self.instructions_of(location.block).get(location.index)
    }

    /// The instruction that ends `block`; for exception edges this is the thrower.
    fn last_instruction(&self, block: BlockId) -> Option<(Location, &Instruction)> {
        let instructions = self.instructions_of(block);
        instructions
            .last()
            .map(|ins| (Location::new(block, instructions.len() - 1), ins))
    }

    /// The instruction executed right after `location` when control cannot branch away.
    fn next_instruction(&self, location: Location) -> Option<(Location, &Instruction)> {
        let instructions = self.instructions_of(location.block);
        if location.index + 1 < instructions.len() {
            let next = Location::new(location.block, location.index + 1);
            return Some((next, &instructions[next.index]));
        }
        let normal: Vec<&Edge> = self
            .successors(location.block)
            .into_iter()
            .filter(|edge| !edge.is_exception_edge())
            .collect();
        if normal.len() != 1 {
            return None;
        }
        let target = normal[0].target;
        self.instructions_of(target)
            .first()
            .map(|ins| (Location::block_start(target), ins))
    }

    /// Blocks reachable from the entry, in reverse post-order.
    fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut succs: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for edge in self.edges() {
            succs.entry(edge.source).or_default().push(edge.target);
        }

        let mut visited = BTreeSet::new();
        let mut post_order = Vec::new();
        let mut stack = vec![(self.entry(), 0usize)];
        visited.insert(self.entry());

        while let Some((block, child)) = stack.pop() {
            let next = succs.get(&block).and_then(|targets| targets.get(child)).copied();
            match next {
                Some(target) => {
                    stack.push((block, child + 1));
                    if visited.insert(target) {
                        stack.push((target, 0));
                    }
                }
                None => post_order.push(block),
            }
        }

        post_order.reverse();
        post_order
    }
}
