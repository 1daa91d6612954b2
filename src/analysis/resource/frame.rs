use std::collections::BTreeSet;
use std::fmt;

use crate::analysis::core::cfg::Slot;
use crate::analysis::core::dataflow::JoinResult;

pub trait Lattice {
    fn join(&self, other: Self) -> Self;
    fn less_than(&self, other: Self) -> bool;
    fn equal(&self, other: Self) -> bool;
}

/// Lifecycle of one resource instance. Declaration order is the lattice order,
/// most pessimistic first; joining keeps the lower status.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub enum ResourceStatus {
    Escaped,
    Open,
    OpenOnExceptionPath,
    Closed,
    Created,
    Nonexistent,
}

impl Lattice for ResourceStatus {
    fn join(&self, other: Self) -> Self {
        (*self).min(other)
    }

    fn less_than(&self, other: Self) -> bool {
        *self < other
    }

    fn equal(&self, other: Self) -> bool {
        *self == other
    }
}

impl ResourceStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ResourceStatus::Open | ResourceStatus::OpenOnExceptionPath)
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum ResourceValue {
    Instance,
    NotInstance,
}

impl Lattice for ResourceValue {
    fn join(&self, other: Self) -> Self {
        match (*self, other) {
            (ResourceValue::Instance, ResourceValue::Instance) => ResourceValue::Instance,
            _ => ResourceValue::NotInstance,
        }
    }

    fn less_than(&self, other: Self) -> bool {
        *self == ResourceValue::Instance && other == ResourceValue::NotInstance
    }

    fn equal(&self, other: Self) -> bool {
        *self == other
    }
}

/// State of one tracked resource at a program point: which slots hold it and its status.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceValueFrame {
    instances: BTreeSet<Slot>,
    status: ResourceStatus,
}

impl Default for ResourceValueFrame {
    fn default() -> Self {
        Self { instances: BTreeSet::new(), status: ResourceStatus::Nonexistent }
    }
}

impl ResourceValueFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
    }

    pub fn value(&self, slot: Slot) -> ResourceValue {
        if self.instances.contains(&slot) {
            ResourceValue::Instance
        } else {
            ResourceValue::NotInstance
        }
    }

    pub fn set_value(&mut self, slot: Slot, value: ResourceValue) {
        match value {
            ResourceValue::Instance => self.instances.insert(slot),
            ResourceValue::NotInstance => self.instances.remove(&slot),
        };
    }

    pub fn instance_slots(&self) -> impl Iterator<Item = &Slot> {
        self.instances.iter()
    }

    /// A slot keeps `Instance` only when both sides agree; the status takes the lower bound.
    pub fn merge_with(&mut self, other: &ResourceValueFrame) -> JoinResult {
        let status = self.status.join(other.status);
        let instances: BTreeSet<Slot> = self
            .instances
            .iter()
            .filter(|slot| other.value(**slot).join(ResourceValue::Instance) == ResourceValue::Instance)
            .copied()
            .collect();
        if status.equal(self.status) && instances == self.instances {
            return JoinResult::Unchanged;
        }
        self.status = status;
        self.instances = instances;
        JoinResult::Changed
    }
}

impl fmt::Display for ResourceValueFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<String> = self.instances.iter().map(|slot| format!("_{}", slot)).collect();
        write!(f, "{:?} [{}]", self.status, slots.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_joined_with_closed_is_open() {
        assert_eq!(ResourceStatus::Open.join(ResourceStatus::Closed), ResourceStatus::Open);
        assert_eq!(ResourceStatus::Closed.join(ResourceStatus::OpenOnExceptionPath), ResourceStatus::OpenOnExceptionPath);
        assert_eq!(ResourceStatus::Nonexistent.join(ResourceStatus::Created), ResourceStatus::Created);
        assert_eq!(ResourceStatus::Escaped.join(ResourceStatus::Open), ResourceStatus::Escaped);
        assert!(ResourceStatus::Escaped.less_than(ResourceStatus::Nonexistent));
    }

    #[test]
    fn merge_keeps_agreeing_instance_slots() {
        let mut left = ResourceValueFrame::new();
        left.set_status(ResourceStatus::Closed);
        left.set_value(1, ResourceValue::Instance);
        left.set_value(2, ResourceValue::Instance);
        let mut right = ResourceValueFrame::new();
        right.set_status(ResourceStatus::Open);
        right.set_value(1, ResourceValue::Instance);

        assert_eq!(left.merge_with(&right), JoinResult::Changed);
        assert_eq!(left.status(), ResourceStatus::Open);
        assert_eq!(left.value(1), ResourceValue::Instance);
        assert_eq!(left.value(2), ResourceValue::NotInstance);
        assert_eq!(left.merge_with(&right), JoinResult::Unchanged);
    }
}
