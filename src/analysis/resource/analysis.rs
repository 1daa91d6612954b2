use super::frame::{ResourceStatus, ResourceValue, ResourceValueFrame};
use super::tracker::{ResourceCreation, ResourceTracker};
use crate::analysis::core::cfg::{ControlFlowGraph, Edge, Location, Slot};
use crate::analysis::core::dataflow::{solve, BlockExit, DataflowResult, ForwardAnalysis, JoinResult, Unanalyzable};
use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::instruction::{Instruction, Invoke};
use crate::analysis::core::value::{null_checked_operand, ValueNumbering};
use crate::analysis::obligation::policy::PolicyDatabase;

/// Tracks the status of the resource created at one location through a procedure.
pub struct ResourceValueAnalysis<'a, G: ?Sized, V: ?Sized, H: ?Sized> {
    cfg: &'a G,
    values: &'a V,
    hierarchy: &'a H,
    tracker: &'a ResourceTracker,
    resource: &'a ResourceCreation,
    sinks: Option<&'a PolicyDatabase>,
}

impl<'a, G, V, H> ResourceValueAnalysis<'a, G, V, H>
where
    G: ControlFlowGraph + ?Sized,
    V: ValueNumbering + ?Sized,
    H: TypeHierarchy + ?Sized,
{
    pub fn new(cfg: &'a G, values: &'a V, hierarchy: &'a H, tracker: &'a ResourceTracker, resource: &'a ResourceCreation) -> Self {
        Self { cfg, values, hierarchy, tracker, resource, sinks: None }
    }

    /// Calls into the database's non-absorbing sinks do not take the resource over.
    pub fn with_sinks(mut self, database: &'a PolicyDatabase) -> Self {
        self.sinks = Some(database);
        self
    }

    pub fn analyze(&self, max_iterations: usize) -> Result<DataflowResult<ResourceValueFrame>, Unanalyzable> {
        solve(self, self.cfg, max_iterations)
    }

    fn is_instance(&self, location: Location, slot: Slot, frame: &ResourceValueFrame) -> bool {
        frame.status() != ResourceStatus::Nonexistent
            && (frame.value(slot) == ResourceValue::Instance || self.values.value_id_at(location, slot) == self.resource.value)
    }

    fn receiver_is_instance(&self, location: Location, invoke: &Invoke, frame: &ResourceValueFrame) -> bool {
        invoke
            .receiver
            .as_ref()
            .map_or(false, |receiver| self.is_instance(location, receiver.slot, frame))
    }

    fn argument_is_instance(&self, location: Location, invoke: &Invoke, frame: &ResourceValueFrame) -> bool {
        invoke.args.iter().any(|arg| self.is_instance(location, arg.slot, frame))
    }

    fn closes_instance(&self, location: Location, invoke: &Invoke, frame: &ResourceValueFrame) -> bool {
        self.tracker.is_close_method(invoke)
            && (self.receiver_is_instance(location, invoke, frame) || self.argument_is_instance(location, invoke, frame))
    }

    fn is_sink(&self, invoke: &Invoke) -> bool {
        self.sinks
            .map_or(false, |db| db.is_non_absorbing(&invoke.class, invoke.method_name(), self.hierarchy))
    }

    fn transfer_invoke(&self, location: Location, invoke: &Invoke, frame: &mut ResourceValueFrame) {
        let status = frame.status();
        if status == ResourceStatus::Nonexistent || status == ResourceStatus::Escaped {
            return;
        }
        if self.closes_instance(location, invoke, frame) {
            frame.set_status(ResourceStatus::Closed);
        } else if invoke.is_constructor() && self.receiver_is_instance(location, invoke, frame) {
            if status == ResourceStatus::Created {
                frame.set_status(ResourceStatus::Open);
            }
        } else if self.tracker.arguments_escape && self.argument_is_instance(location, invoke, frame) && !self.is_sink(invoke) {
            frame.set_status(ResourceStatus::Escaped);
        }
    }
}

impl<'a, G, V, H> ForwardAnalysis for ResourceValueAnalysis<'a, G, V, H>
where
    G: ControlFlowGraph + ?Sized,
    V: ValueNumbering + ?Sized,
    H: TypeHierarchy + ?Sized,
{
    type Fact = ResourceValueFrame;

    fn entry_fact(&self) -> ResourceValueFrame {
        ResourceValueFrame::new()
    }

    fn transfer(
        &self,
        location: Location,
        instruction: &Instruction,
        mut frame: ResourceValueFrame,
    ) -> Result<ResourceValueFrame, Unanalyzable> {
        if location == self.resource.location {
            let status = if self.resource.open_on_creation { ResourceStatus::Open } else { ResourceStatus::Created };
            frame.set_status(status);
            frame.set_value(self.resource.slot, ResourceValue::Instance);
            return Ok(frame);
        }

        match instruction {
            Instruction::Invoke(invoke) => self.transfer_invoke(location, invoke, &mut frame),
            Instruction::PutField { value, .. } | Instruction::Return { value: Some(value) } => {
                if self.is_instance(location, value.slot, &frame) {
                    frame.set_status(ResourceStatus::Escaped);
                }
            }
            Instruction::Move { dest, src } => {
                let value = if self.is_instance(location, *src, &frame) {
                    ResourceValue::Instance
                } else {
                    ResourceValue::NotInstance
                };
                frame.set_value(*dest, value);
                return Ok(frame);
            }
            _ => {}
        }
        if let Some(dest) = instruction.def() {
            frame.set_value(dest, ResourceValue::NotInstance);
        }
        Ok(frame)
    }

    fn transfer_edge(
        &self,
        edge: &Edge,
        exit: BlockExit<'_, ResourceValueFrame>,
    ) -> Result<Option<ResourceValueFrame>, Unanalyzable> {
        if edge.is_exception_edge() {
            if self.tracker.ignore_implicit_exceptions && !edge.checked {
                return Ok(None);
            }
            let mut frame = exit.before_last.clone();
            if let Some((location, thrower)) = self.cfg.last_instruction(edge.source) {
                let closes = thrower
                    .as_invoke()
                    .map_or(false, |invoke| self.closes_instance(location, invoke, &frame));
                if closes || self.tracker.is_exempt_thrower(location, thrower, self.values) {
                    return Ok(None);
                }
            }
            if frame.status() == ResourceStatus::Open {
                frame.set_status(ResourceStatus::OpenOnExceptionPath);
            }
            return Ok(Some(frame));
        }

        let mut frame = exit.result.clone();
        if let Some((location, operand)) = null_checked_operand(self.cfg, self.values, edge) {
            if self.is_instance(location, operand.slot, &frame) {
                frame.set_status(ResourceStatus::Nonexistent);
            }
        }
        Ok(Some(frame))
    }

    fn join(&self, into: &mut ResourceValueFrame, incoming: ResourceValueFrame) -> JoinResult {
        into.merge_with(&incoming)
    }
}
