use super::action_cache::{ActionOp, InstructionActionCache, ObligationAction};
use super::factory::{ObligationFactory, ObligationKind};
use super::policy::{Confidence, PolicyDatabase};
use super::state::{ObligationSet, Provenance, State, StateSet};
use crate::analysis::core::cfg::{BlockId, ControlFlowGraph, Edge, Location};
use crate::analysis::core::dataflow::{
    solve, BlockExit, DataflowResult, ForwardAnalysis, JoinResult, StateLimitExceededSnafu, Unanalyzable,
};
use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::instruction::Instruction;
use crate::analysis::core::value::{null_checked_operand, ValueNumbering};
use crate::RoaConfig;

/// Path-sensitive forward analysis of outstanding obligations in one procedure.
pub struct ObligationAnalysis<'a, G: ?Sized, V: ?Sized, H: ?Sized> {
    cfg: &'a G,
    values: &'a V,
    database: &'a PolicyDatabase,
    hierarchy: &'a H,
    cache: InstructionActionCache,
    entry_obligations: Vec<ObligationKind>,
    max_states: usize,
    max_iterations: usize,
}

impl<'a, G, V, H> ObligationAnalysis<'a, G, V, H>
where
    G: ControlFlowGraph + ?Sized,
    V: ValueNumbering + ?Sized,
    H: TypeHierarchy + ?Sized,
{
    pub fn new(
        cfg: &'a G,
        values: &'a V,
        database: &'a PolicyDatabase,
        hierarchy: &'a H,
        config: &RoaConfig,
        return_type: Option<&str>,
    ) -> Self {
        let cache = InstructionActionCache::build(
            cfg,
            values,
            database,
            hierarchy,
            return_type,
            config.heuristic_close_inference(),
        );
        Self {
            cfg,
            values,
            database,
            hierarchy,
            cache,
            entry_obligations: Vec::new(),
            max_states: config.max_states(),
            max_iterations: config.max_iterations(),
        }
    }

    /// Obligations the caller handed over, e.g. parameters the procedure promises to close.
    pub fn with_entry_obligations(mut self, kinds: Vec<ObligationKind>) -> Self {
        self.entry_obligations = kinds;
        self
    }

    pub fn cache(&self) -> &InstructionActionCache {
        &self.cache
    }

    pub fn factory(&self) -> &ObligationFactory {
        self.database.factory()
    }

    pub fn entry_obligations(&self) -> &[ObligationKind] {
        &self.entry_obligations
    }

    pub fn analyze(&self) -> Result<DataflowResult<StateSet>, Unanalyzable> {
        solve(self, self.cfg, self.max_iterations)
    }
}

impl<'a, G, V, H> ForwardAnalysis for ObligationAnalysis<'a, G, V, H>
where
    G: ControlFlowGraph + ?Sized,
    V: ValueNumbering + ?Sized,
    H: TypeHierarchy + ?Sized,
{
    type Fact = StateSet;

    fn entry_fact(&self) -> StateSet {
        let site = Provenance {
            location: Location::block_start(self.cfg.entry()),
            confidence: Confidence::Strong,
        };
        let mut obligations = ObligationSet::new();
        for kind in &self.entry_obligations {
            obligations.add(*kind, site);
        }
        StateSet::from_state(State::new(obligations))
    }

    fn transfer(&self, location: Location, _instruction: &Instruction, fact: StateSet) -> Result<StateSet, Unanalyzable> {
        fact.apply(location, self.cache.actions_at(location), self.factory())
    }

    fn end_block(&self, block: BlockId, fact: StateSet) -> StateSet {
        fact.append_block(block)
    }

    fn transfer_edge(&self, edge: &Edge, exit: BlockExit<'_, StateSet>) -> Result<Option<StateSet>, Unanalyzable> {
        if edge.is_exception_edge() {
            if !edge.checked {
                return Ok(None);
            }
            // The thrower's releases hold on its exception edge, its acquisitions do not.
            let thrower = self
                .cfg
                .last_instruction(edge.source)
                .map_or(Location::block_start(edge.source), |(location, _)| location);
            let releases: Vec<ObligationAction> = self
                .cache
                .actions_at(thrower)
                .iter()
                .filter(|action| action.op != ActionOp::Add)
                .copied()
                .collect();
            let fact = exit
                .before_last
                .clone()
                .on_exception_path()
                .apply(thrower, &releases, self.factory())?
                .append_block(edge.source);
            return Ok(Some(fact));
        }

        let fact = exit.result.clone();
        let kind = null_checked_operand(self.cfg, self.values, edge)
            .and_then(|(_, operand)| operand.ty.as_deref())
            .and_then(|ty| self.factory().kind_for_type(ty, self.hierarchy));
        Ok(Some(match kind {
            Some(kind) => fact.discharge(kind),
            None => fact,
        }))
    }

    fn join(&self, into: &mut StateSet, incoming: StateSet) -> JoinResult {
        into.join(incoming)
    }

    fn check_fact(&self, block: BlockId, fact: &StateSet) -> Result<(), Unanalyzable> {
        if fact.len() > self.max_states {
            return StateLimitExceededSnafu { block, limit: self.max_states }.fail();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::hierarchy::ClassHierarchy;
    use crate::analysis::core::instruction::Operand;
    use crate::analysis::core::model::builder::BodyBuilder;
    use crate::analysis::core::model::MethodBody;
    use crate::analysis::obligation::builder::PolicyDatabaseBuilder;
    use crate::analysis::obligation::matcher::Matcher;
    use crate::analysis::obligation::policy::{Action, PolicyEntry};

    const FIS: &str = "java.io.FileInputStream";
    const LOCK: &str = "java.util.concurrent.locks.Lock";

    fn open(dest: usize) -> Vec<Instruction> {
        vec![
            Instruction::new_object(FIS, dest),
            Instruction::construct(FIS, "(Ljava/lang/String;)V", dest, vec![Operand::new(9)]),
        ]
    }

    fn close(slot: usize) -> Instruction {
        Instruction::call_virtual(FIS, "close", "()V", slot, vec![], None)
    }

    fn exit_sets(body: &MethodBody) -> Result<Vec<ObligationSet>, Unanalyzable> {
        let hierarchy = ClassHierarchy::new();
        let database = PolicyDatabaseBuilder::with_builtins(true).finish();
        let config = RoaConfig::default();
        let analysis = ObligationAnalysis::new(body, body, &database, &hierarchy, &config, None);
        let result = analysis.analyze()?;
        Ok(result
            .result_fact(body.exit)
            .map(|fact| fact.states().map(|state| state.obligations.clone()).collect())
            .unwrap_or_default())
    }

    fn fis_count(sets: &[ObligationSet]) -> Vec<i32> {
        let factory = PolicyDatabaseBuilder::with_builtins(true).finish().factory().clone();
        let kind = factory.get_obligation_by_name(FIS).unwrap();
        let mut counts: Vec<i32> = sets.iter().map(|set| set.count(kind)).collect();
        counts.sort();
        counts
    }

    #[test]
    fn straight_line_leak_is_one_outstanding_obligation() {
        let mut b = BodyBuilder::new();
        let entry = b.block(open(1));
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(fis_count(&sets), vec![1]);
    }

    #[test]
    fn balanced_branches_do_not_leak() {
        let mut b = BodyBuilder::new();
        let entry = b.block(open(1));
        let test = b.block(vec![Instruction::Branch]);
        let left = b.block(vec![close(1)]);
        let right = b.block(vec![close(1)]);
        let exit = b.block(vec![]);
        b.goto(entry, test).branch(test, left, right).goto(left, exit).goto(right, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(fis_count(&sets), vec![0]);
    }

    #[test]
    fn unbalanced_branch_keeps_both_states() {
        let mut b = BodyBuilder::new();
        let entry = b.block(open(1));
        let test = b.block(vec![Instruction::Branch]);
        let closing = b.block(vec![close(1)]);
        let exit = b.block(vec![]);
        b.goto(entry, test).branch(test, closing, exit).goto(closing, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(fis_count(&sets), vec![0, 1]);
    }

    #[test]
    fn diamonds_grow_state_count_linearly() {
        // Each diamond either opens a stream or does nothing.
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        let mut previous = entry;
        let diamonds = 4;
        for i in 0..diamonds {
            let test = b.block(vec![Instruction::Branch]);
            let opening = b.block(open(10 + i));
            let join = b.block(vec![Instruction::Nop]);
            b.goto(previous, test).branch(test, opening, join).goto(opening, join);
            previous = join;
        }
        let exit = b.block(vec![]);
        b.goto(previous, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(sets.len(), diamonds + 1);
        assert_eq!(fis_count(&sets), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn second_close_is_a_negative_count() {
        let mut b = BodyBuilder::new();
        let mut instructions = open(1);
        instructions.push(close(1));
        instructions.push(close(1));
        let entry = b.block(instructions);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(fis_count(&sets), vec![-1]);
    }

    #[test]
    fn closing_a_copied_parameter_is_not_a_double_release() {
        let mut b = BodyBuilder::new();
        let mut code = open(3);
        code.push(close(3));
        code.push(Instruction::Move { dest: 2, src: 1 });
        code.push(close(2));
        let entry = b.block(code);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let body = b.parameters(vec![0, 1]).build(entry, exit);
        let sets = exit_sets(&body).unwrap();
        assert_eq!(fis_count(&sets), vec![0]);
    }

    #[test]
    fn acquisition_inside_loop_aborts() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        let head = b.block(vec![Instruction::Branch]);
        let body = b.block(open(1));
        let exit = b.block(vec![]);
        b.goto(entry, head).branch(head, body, exit).goto(body, head);
        let err = exit_sets(&b.build(entry, exit)).unwrap_err();
        assert_eq!(err, Unanalyzable::ObligationInLoop { obligation: FIS.to_string(), block: body });
    }

    #[test]
    fn loop_without_actions_converges() {
        let mut b = BodyBuilder::new();
        let entry = b.block(open(1));
        let head = b.block(vec![Instruction::Branch]);
        let body = b.block(vec![Instruction::Nop]);
        let after = b.block(vec![close(1)]);
        let exit = b.block(vec![]);
        b.goto(entry, head).branch(head, body, after).goto(body, head).goto(after, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(fis_count(&sets), vec![0]);
    }

    #[test]
    fn null_branch_discharges_checked_value() {
        let stream = Operand::typed(1, FIS);
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::call_static("com.example.Files", "open", "()Ljava/io/FileInputStream;", vec![], Some(1)),
            Instruction::IfNull { value: stream, negated: false },
        ]);
        let closing = b.block(vec![close(1)]);
        let exit = b.block(vec![]);
        // Taken edge: the stream is null, nothing to close.
        b.branch(entry, exit, closing).goto(closing, exit);
        let body = b.build(entry, exit);

        let hierarchy = ClassHierarchy::new();
        let mut builder = PolicyDatabaseBuilder::with_builtins(true);
        let fis = builder.factory_mut().add_obligation(FIS);
        builder.add_entry(PolicyEntry::new(
            Matcher::exact("com.example.Files"),
            Matcher::exact("open"),
            Matcher::Any,
            true,
            Action::Add,
            fis,
            Confidence::Strong,
        ));
        let database = builder.finish();
        let config = RoaConfig::default();
        let analysis = ObligationAnalysis::new(&body, &body, &database, &hierarchy, &config, None);
        let result = analysis.analyze().unwrap();
        let exit_fact = result.result_fact(exit).unwrap();
        assert!(exit_fact.states().all(|state| state.obligations.count(fis) == 0));
    }

    #[test]
    fn unchecked_exception_edges_are_ignored() {
        let mut b = BodyBuilder::new();
        let mut instructions = open(1);
        instructions.push(Instruction::call_virtual("java.lang.Object", "hashCode", "()I", 2, vec![], None));
        let entry = b.block(instructions);
        let handler = b.block(vec![close(1)]);
        let closing = b.block(vec![close(1)]);
        let exit = b.block(vec![]);
        b.goto(entry, closing)
            .exception_edge(entry, handler, false)
            .goto(handler, exit)
            .goto(closing, exit);
        let sets = exit_sets(&b.build(entry, exit)).unwrap();
        assert_eq!(fis_count(&sets), vec![0]);
    }

    #[test]
    fn checked_exception_from_close_counts_as_released() {
        let mut b = BodyBuilder::new();
        let entry = b.block(open(1));
        let closing = b.block(vec![close(1)]);
        let handler = b.block(vec![Instruction::Nop]);
        let exit = b.block(vec![]);
        b.goto(entry, closing)
            .goto(closing, exit)
            .exception_edge(closing, handler, true)
            .goto(handler, exit);
        let body = b.build(entry, exit);

        let hierarchy = ClassHierarchy::new();
        let database = PolicyDatabaseBuilder::with_builtins(true).finish();
        let config = RoaConfig::default();
        let analysis = ObligationAnalysis::new(&body, &body, &database, &hierarchy, &config, None);
        let result = analysis.analyze().unwrap();
        let handler_fact = result.start_fact(handler).unwrap();
        assert!(handler_fact.states().all(|state| state.on_exception_path && state.obligations.is_empty()));
        assert!(result.result_fact(exit).unwrap().states().all(|state| state.obligations.is_empty()));
    }

    #[test]
    fn lock_held_on_one_path_only() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::call_interface(LOCK, "lock", "()V", 1, vec![], None)]);
        let test = b.block(vec![Instruction::Branch]);
        let unlock = b.block(vec![Instruction::call_interface(LOCK, "unlock", "()V", 1, vec![], None)]);
        let exit = b.block(vec![]);
        b.goto(entry, test).branch(test, unlock, exit).goto(unlock, exit);
        let body = b.build(entry, exit);

        let hierarchy = ClassHierarchy::new();
        let database = PolicyDatabaseBuilder::with_builtins(true).finish();
        let lock = database.factory().get_obligation_by_name(LOCK).unwrap();
        let config = RoaConfig::default();
        let analysis = ObligationAnalysis::new(&body, &body, &database, &hierarchy, &config, None);
        let result = analysis.analyze().unwrap();
        let mut counts: Vec<i32> = result.result_fact(exit).unwrap().states().map(|s| s.obligations.count(lock)).collect();
        counts.sort();
        assert_eq!(counts, vec![0, 1]);
    }

    #[test]
    fn state_limit_aborts() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        let mut previous = entry;
        for i in 0..3 {
            let test = b.block(vec![Instruction::Branch]);
            let opening = b.block(open(10 + i));
            let join = b.block(vec![Instruction::Nop]);
            b.goto(previous, test).branch(test, opening, join).goto(opening, join);
            previous = join;
        }
        let exit = b.block(vec![]);
        b.goto(previous, exit);
        let body = b.build(entry, exit);

        let hierarchy = ClassHierarchy::new();
        let database = PolicyDatabaseBuilder::with_builtins(true).finish();
        let mut config = RoaConfig::default();
        config.set_max_states(2);
        let analysis = ObligationAnalysis::new(&body, &body, &database, &hierarchy, &config, None);
        assert!(matches!(analysis.analyze(), Err(Unanalyzable::StateLimitExceeded { limit: 2, .. })));
    }

    #[test]
    fn entry_obligations_seed_the_entry_state() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let body = b.build(entry, exit);

        let hierarchy = ClassHierarchy::new();
        let database = PolicyDatabaseBuilder::with_builtins(true).finish();
        let fis = database.factory().get_obligation_by_name(FIS).unwrap();
        let config = RoaConfig::default();
        let analysis =
            ObligationAnalysis::new(&body, &body, &database, &hierarchy, &config, None).with_entry_obligations(vec![fis]);
        let result = analysis.analyze().unwrap();
        assert!(result.result_fact(exit).unwrap().states().all(|state| state.obligations.count(fis) == 1));
    }
}
