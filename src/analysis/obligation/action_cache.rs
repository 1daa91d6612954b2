use std::collections::BTreeMap;

use super::factory::{ObligationFactory, ObligationKind};
use super::policy::{Action, Confidence, PolicyDatabase};
use crate::analysis::core::cfg::{ControlFlowGraph, Location};
use crate::analysis::core::instruction::{Instruction, Invoke, Operand};
use crate::analysis::core::signature::split_camel_case;
use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::value::ValueNumbering;

const RESULT_SET: &str = "java.sql.ResultSet";
const STATEMENT: &str = "java.sql.Statement";

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ActionOp {
    Add,
    Delete,
    /// The obligation leaves this procedure's responsibility; only discharges an outstanding count.
    Escape,
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ObligationAction {
    pub op: ActionOp,
    pub kind: ObligationKind,
    pub confidence: Confidence,
}

impl ObligationAction {
    fn new(op: ActionOp, kind: ObligationKind, confidence: Confidence) -> Self {
        Self { op, kind, confidence }
    }

    fn escape(kind: ObligationKind) -> Self {
        Self::new(ActionOp::Escape, kind, Confidence::Strong)
    }
}

/// Obligation actions of every instruction of one procedure, computed once before solving.
#[derive(Debug, Clone, Default)]
pub struct InstructionActionCache {
    actions: BTreeMap<Location, Vec<ObligationAction>>,
}

impl InstructionActionCache {
    pub fn build<G, V, H>(
        cfg: &G,
        values: &V,
        database: &PolicyDatabase,
        hierarchy: &H,
        return_type: Option<&str>,
        heuristic_close_inference: bool,
    ) -> Self
    where
        G: ControlFlowGraph + ?Sized,
        V: ValueNumbering + ?Sized,
        H: TypeHierarchy + ?Sized,
    {
        let collector = ActionCollector { values, database, hierarchy, return_type, heuristic_close_inference };
        let mut actions = BTreeMap::new();
        for block in cfg.blocks() {
            for (index, instruction) in cfg.instructions_of(block).iter().enumerate() {
                let location = Location::new(block, index);
                let found = collector.collect(location, instruction);
                if !found.is_empty() {
                    actions.insert(location, found);
                }
            }
        }
        Self { actions }
    }

    pub fn actions_at(&self, location: Location) -> &[ObligationAction] {
        self.actions.get(&location).map_or(&[], Vec::as_slice)
    }

    pub fn has_op(&self, op: ActionOp) -> bool {
        self.actions.values().flatten().any(|action| action.op == op)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Location, &Vec<ObligationAction>)> {
        self.actions.iter()
    }
}

struct ActionCollector<'a, V: ?Sized, H: ?Sized> {
    values: &'a V,
    database: &'a PolicyDatabase,
    hierarchy: &'a H,
    return_type: Option<&'a str>,
    heuristic_close_inference: bool,
}

impl<'a, V, H> ActionCollector<'a, V, H>
where
    V: ValueNumbering + ?Sized,
    H: TypeHierarchy + ?Sized,
{
    fn factory(&self) -> &ObligationFactory {
        self.database.factory()
    }

    fn kind_of(&self, ty: &str) -> Option<ObligationKind> {
        self.factory().kind_for_type(ty, self.hierarchy)
    }

    fn collect(&self, location: Location, instruction: &Instruction) -> Vec<ObligationAction> {
        match instruction {
            Instruction::Invoke(invoke) => self.invoke_actions(location, invoke),
            Instruction::PutField { ty, value, .. } => self.escape_actions(value.ty.as_deref().unwrap_or(ty)),
            Instruction::Return { value: Some(value) } => match value.ty.as_deref().or(self.return_type) {
                Some(ty) => self.escape_actions(ty),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn escape_actions(&self, ty: &str) -> Vec<ObligationAction> {
        let kind = match self.kind_of(ty) {
            Some(kind) => kind,
            None => return Vec::new(),
        };
        let mut actions = vec![ObligationAction::escape(kind)];
        // A result set keeps its statement alive.
        if self.factory().name(kind) == RESULT_SET {
            if let Some(statement) = self.factory().get_obligation_by_name(STATEMENT) {
                actions.push(ObligationAction::escape(statement));
            }
        }
        actions
    }

    fn invoke_actions(&self, location: Location, invoke: &Invoke) -> Vec<ObligationAction> {
        let matched = self.database.lookup(
            invoke.receiver_type(),
            invoke.method_name(),
            invoke.signature(),
            invoke.is_static(),
            self.hierarchy,
        );
        if !matched.is_empty() {
            return matched
                .into_iter()
                .map(|policy| match policy.action {
                    Action::Add => ObligationAction::new(ActionOp::Add, policy.kind, policy.confidence),
                    Action::Delete if self.releases_foreign_value(location, invoke, policy.kind) => {
                        ObligationAction::escape(policy.kind)
                    }
                    Action::Delete => ObligationAction::new(ActionOp::Delete, policy.kind, policy.confidence),
                })
                .collect();
        }

        let arg_kinds: Vec<ObligationKind> = (0..invoke.args.len())
            .filter_map(|index| invoke.arg_type(index))
            .filter_map(|ty| self.kind_of(&ty))
            .collect();
        if arg_kinds.is_empty() {
            return Vec::new();
        }

        let names_close = split_camel_case(invoke.method_name()).iter().any(|word| word == "close");
        if self.heuristic_close_inference && names_close && !self.database.is_strict() {
            return arg_kinds
                .into_iter()
                .map(|kind| ObligationAction::new(ActionOp::Delete, kind, Confidence::Weak))
                .collect();
        }
        if self.database.is_non_absorbing(&invoke.class, invoke.method_name(), self.hierarchy) {
            return Vec::new();
        }
        let mut actions: Vec<ObligationAction> = arg_kinds.into_iter().map(ObligationAction::escape).collect();
        actions.sort();
        actions.dedup();
        actions
    }

    /// Releasing a parameter or a field value settles an obligation this procedure never held.
    fn releases_foreign_value(&self, location: Location, invoke: &Invoke, kind: ObligationKind) -> bool {
        let mut targets: Vec<&Operand> = invoke
            .args
            .iter()
            .enumerate()
            .filter(|(index, _)| invoke.arg_type(*index).and_then(|ty| self.kind_of(&ty)) == Some(kind))
            .map(|(_, operand)| operand)
            .collect();
        if targets.is_empty() {
            targets.extend(invoke.receiver.iter());
        }
        !targets.is_empty()
            && targets.iter().all(|operand| {
                let value = self.values.value_id_at(location, operand.slot);
                self.values.flags(value).is_foreign()
            })
    }
}
