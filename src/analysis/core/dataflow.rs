use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use snafu::Snafu;

use super::cfg::{BlockId, ControlFlowGraph, Edge, Location};
use super::instruction::Instruction;

/// Why a procedure was given up on. Never escapes the procedure being analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Unanalyzable {
    #[snafu(display("obligation {} is acquired or released inside a loop at bb{}", obligation, block))]
    ObligationInLoop { obligation: String, block: BlockId },
    #[snafu(display("state set at bb{} grew past {} states", block, limit))]
    StateLimitExceeded { block: BlockId, limit: usize },
    #[snafu(display("no fixed point after {} block visits", limit))]
    IterationLimitExceeded { limit: usize },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JoinResult {
    Unchanged,
    Changed,
}

impl JoinResult {
    pub fn join(self, other: JoinResult) -> JoinResult {
        match (self, other) {
            (JoinResult::Unchanged, JoinResult::Unchanged) => JoinResult::Unchanged,
            _ => JoinResult::Changed,
        }
    }
}

/// Facts leaving a block: `result` after the whole block, `before_last` right
/// before the block's last instruction executed. Exception edges leave from
/// `before_last` since the thrower did not complete.
pub struct BlockExit<'f, F> {
    pub before_last: &'f F,
    pub result: &'f F,
}

/// A forward analysis over a procedure's CFG.
pub trait ForwardAnalysis {
    type Fact: Clone + fmt::Debug;

    fn entry_fact(&self) -> Self::Fact;

    fn transfer(&self, location: Location, instruction: &Instruction, fact: Self::Fact) -> Result<Self::Fact, Unanalyzable>;

    fn end_block(&self, _block: BlockId, fact: Self::Fact) -> Self::Fact {
        fact
    }

    /// `None` means the edge contributes nothing to its target.
    fn transfer_edge(&self, edge: &Edge, exit: BlockExit<'_, Self::Fact>) -> Result<Option<Self::Fact>, Unanalyzable>;

    fn join(&self, into: &mut Self::Fact, incoming: Self::Fact) -> JoinResult;

    fn check_fact(&self, _block: BlockId, _fact: &Self::Fact) -> Result<(), Unanalyzable> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BlockFacts<F> {
    pub start: F,
    pub result: F,
}

/// Fixed-point facts of one procedure; unreachable blocks have none.
#[derive(Debug, Clone)]
pub struct DataflowResult<F> {
    facts: BTreeMap<BlockId, BlockFacts<F>>,
    iterations: usize,
}

impl<F> DataflowResult<F> {
    pub fn start_fact(&self, block: BlockId) -> Option<&F> {
        self.facts.get(&block).map(|facts| &facts.start)
    }

    pub fn result_fact(&self, block: BlockId) -> Option<&F> {
        self.facts.get(&block).map(|facts| &facts.result)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &BlockFacts<F>)> {
        self.facts.iter()
    }
}

/// Worklist iteration in reverse post-order until no block's start fact changes.
pub fn solve<A, G>(analysis: &A, cfg: &G, max_iterations: usize) -> Result<DataflowResult<A::Fact>, Unanalyzable>
where
    A: ForwardAnalysis,
    G: ControlFlowGraph + ?Sized,
{
    let order = cfg.reverse_post_order();
    let rank: HashMap<BlockId, usize> = order.iter().enumerate().map(|(i, b)| (*b, i)).collect();

    let mut starts: BTreeMap<BlockId, A::Fact> = BTreeMap::new();
    let mut facts: BTreeMap<BlockId, BlockFacts<A::Fact>> = BTreeMap::new();
    let mut worklist = BTreeSet::new();

    starts.insert(cfg.entry(), analysis.entry_fact());
    worklist.insert(0usize);
    let mut iterations = 0;

    while let Some(&next) = worklist.iter().next() {
        worklist.remove(&next);
        iterations += 1;
        if iterations > max_iterations {
            return Err(Unanalyzable::IterationLimitExceeded { limit: max_iterations });
        }

        let block = order[next];
        let start = match starts.get(&block) {
            Some(start) => start.clone(),
            None => continue,
        };

        let instructions = cfg.instructions_of(block);
        let mut fact = start.clone();
        let mut before_last = None;
        for (index, ins) in instructions.iter().enumerate() {
            if index + 1 == instructions.len() {
                before_last = Some(fact.clone());
            }
            fact = analysis.transfer(Location::new(block, index), ins, fact)?;
        }
        let before_last = before_last.unwrap_or_else(|| start.clone());
        let result = analysis.end_block(block, fact);

        for edge in cfg.successors(block) {
            let target_rank = match rank.get(&edge.target) {
                Some(r) => *r,
                None => continue,
            };
            let exit = BlockExit { before_last: &before_last, result: &result };
            let incoming = match analysis.transfer_edge(edge, exit)? {
                Some(incoming) => incoming,
                None => continue,
            };
            let changed = match starts.get_mut(&edge.target) {
                Some(existing) => analysis.join(existing, incoming) == JoinResult::Changed,
                None => {
                    starts.insert(edge.target, incoming);
                    true
                }
            };
            if changed {
                if let Some(updated) = starts.get(&edge.target) {
                    analysis.check_fact(edge.target, updated)?;
                }
                worklist.insert(target_rank);
            }
        }

        facts.insert(block, BlockFacts { start, result });
    }

    Ok(DataflowResult { facts, iterations })
}
