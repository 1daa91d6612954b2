use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use super::action_cache::{ActionOp, ObligationAction};
use super::factory::{ObligationFactory, ObligationKind};
use super::policy::Confidence;
use crate::analysis::core::cfg::{BlockId, Location};
use crate::analysis::core::dataflow::{JoinResult, Unanalyzable};

/// Where and how confidently a kind's count last left zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub struct Provenance {
    pub location: Location,
    pub confidence: Confidence,
}

/// Multiset of outstanding obligations. Equality, order and hash look at the counts only.
#[derive(Debug, Clone, Default)]
pub struct ObligationSet {
    counts: SmallVec<[i32; 8]>,
    provenance: BTreeMap<ObligationKind, Provenance>,
}

impl ObligationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: ObligationKind) -> i32 {
        self.counts.get(kind.id()).copied().unwrap_or(0)
    }

    fn set_count(&mut self, kind: ObligationKind, count: i32) {
        if self.counts.len() <= kind.id() {
            self.counts.resize(kind.id() + 1, 0);
        }
        self.counts[kind.id()] = count;
        while self.counts.last() == Some(&0) {
            self.counts.pop();
        }
        if count == 0 {
            self.provenance.remove(&kind);
        }
    }

    pub fn add(&mut self, kind: ObligationKind, site: Provenance) {
        let count = self.count(kind) + 1;
        self.set_count(kind, count);
        if count == 1 {
            self.provenance.insert(kind, site);
        }
    }

    /// May go negative: a release without a matching acquire stays visible.
    pub fn remove(&mut self, kind: ObligationKind, site: Provenance) {
        let count = self.count(kind) - 1;
        self.set_count(kind, count);
        if count == -1 {
            self.provenance.insert(kind, site);
        }
    }

    /// Decrements only an outstanding obligation.
    pub fn discharge(&mut self, kind: ObligationKind) -> bool {
        let count = self.count(kind);
        if count > 0 {
            self.set_count(kind, count - 1);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn nonzero(&self) -> impl Iterator<Item = (ObligationKind, i32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .map(|(id, count)| (ObligationKind::from_id(id), *count))
    }

    pub fn provenance(&self, kind: ObligationKind) -> Option<&Provenance> {
        self.provenance.get(&kind)
    }
}

impl PartialEq for ObligationSet {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
    }
}

impl Eq for ObligationSet {}

impl PartialOrd for ObligationSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObligationSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counts.cmp(&other.counts)
    }
}

impl Hash for ObligationSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.counts.hash(state);
    }
}

/// Block ids traversed from the entry along one route.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Path(SmallVec<[BlockId; 16]>);

impl Path {
    pub fn append(&mut self, block: BlockId) {
        self.0.push(block);
    }

    pub fn has_component(&self, block: BlockId) -> bool {
        self.0.contains(&block)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.0
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blocks: Vec<String> = self.0.iter().map(|b| format!("bb{}", b)).collect();
        write!(f, "{}", blocks.join(" -> "))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct State {
    pub obligations: ObligationSet,
    pub path: Path,
    pub on_exception_path: bool,
}

impl State {
    pub fn new(obligations: ObligationSet) -> Self {
        Self { obligations, path: Path::default(), on_exception_path: false }
    }

    // A normal-path state beats an exception-path one, then the shorter path wins.
    fn preferred_over(&self, other: &State) -> bool {
        match (self.on_exception_path, other.on_exception_path) {
            (false, true) => true,
            (true, false) => false,
            _ => self.path.len() < other.path.len(),
        }
    }

    fn apply(&mut self, location: Location, action: &ObligationAction, factory: &ObligationFactory) -> Result<(), Unanalyzable> {
        let site = Provenance { location, confidence: action.confidence };
        match action.op {
            ActionOp::Add | ActionOp::Delete if self.path.has_component(location.block) => {
                Err(Unanalyzable::ObligationInLoop {
                    obligation: factory.name(action.kind).to_string(),
                    block: location.block,
                })
            }
            ActionOp::Add => {
                self.obligations.add(action.kind, site);
                Ok(())
            }
            ActionOp::Delete => {
                self.obligations.remove(action.kind, site);
                Ok(())
            }
            ActionOp::Escape => {
                self.obligations.discharge(action.kind);
                Ok(())
            }
        }
    }
}

/// Dataflow fact of the obligation analysis: states deduplicated by obligation set.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct StateSet {
    states: BTreeMap<ObligationSet, State>,
}

impl StateSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The procedure-entry fact: one state with no obligations.
    pub fn entry() -> Self {
        Self::from_state(State::new(ObligationSet::new()))
    }

    pub fn from_state(state: State) -> Self {
        let mut set = Self::empty();
        set.insert(state);
        set
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    pub fn contains(&self, obligations: &ObligationSet) -> bool {
        self.states.contains_key(obligations)
    }

    pub fn insert(&mut self, state: State) -> JoinResult {
        match self.states.get_mut(&state.obligations) {
            Some(existing) => {
                if state.preferred_over(existing) {
                    *existing = state;
                    JoinResult::Changed
                } else {
                    JoinResult::Unchanged
                }
            }
            None => {
                self.states.insert(state.obligations.clone(), state);
                JoinResult::Changed
            }
        }
    }

    pub fn join(&mut self, other: StateSet) -> JoinResult {
        other
            .states
            .into_iter()
            .fold(JoinResult::Unchanged, |result, (_, state)| result.join(self.insert(state)))
    }

    fn map_states<F>(self, mut f: F) -> Result<StateSet, Unanalyzable>
    where
        F: FnMut(&mut State) -> Result<(), Unanalyzable>,
    {
        let mut result = StateSet::empty();
        for (_, mut state) in self.states {
            f(&mut state)?;
            result.insert(state);
        }
        Ok(result)
    }

    /// Applies the actions of the instruction at `location` to every state.
    pub fn apply(self, location: Location, actions: &[ObligationAction], factory: &ObligationFactory) -> Result<StateSet, Unanalyzable> {
        if actions.is_empty() {
            return Ok(self);
        }
        self.map_states(|state| {
            actions
                .iter()
                .try_for_each(|action| state.apply(location, action, factory))
        })
    }

    pub fn append_block(self, block: BlockId) -> StateSet {
        let mut result = StateSet::empty();
        for (_, mut state) in self.states {
            state.path.append(block);
            result.insert(state);
        }
        result
    }

    pub fn on_exception_path(self) -> StateSet {
        let mut result = StateSet::empty();
        for (_, mut state) in self.states {
            state.on_exception_path = true;
            result.insert(state);
        }
        result
    }

    pub fn discharge(self, kind: ObligationKind) -> StateSet {
        let mut result = StateSet::empty();
        for (_, mut state) in self.states {
            state.obligations.discharge(kind);
            result.insert(state);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(block: BlockId) -> Provenance {
        Provenance { location: Location::new(block, 0), confidence: Confidence::Strong }
    }

    fn kinds() -> (ObligationFactory, ObligationKind, ObligationKind) {
        let mut factory = ObligationFactory::new();
        let file = factory.add_obligation("java.io.FileInputStream");
        let lock = factory.add_obligation("java.util.concurrent.locks.Lock");
        (factory, file, lock)
    }

    #[test]
    fn equality_ignores_provenance() {
        let (_, file, _) = kinds();
        let mut a = ObligationSet::new();
        let mut b = ObligationSet::new();
        a.add(file, site(1));
        b.add(file, site(7));
        assert_eq!(a, b);
        assert_ne!(a.provenance(file), b.provenance(file));
    }

    #[test]
    fn counts_go_negative_and_back() {
        let (_, file, lock) = kinds();
        let mut set = ObligationSet::new();
        set.remove(lock, site(2));
        assert_eq!(set.count(lock), -1);
        assert_eq!(set.provenance(lock).map(|p| p.location.block), Some(2));
        set.add(lock, site(3));
        assert!(set.is_empty());
        assert_eq!(set, ObligationSet::new());
        assert!(!set.discharge(file));
        assert_eq!(set.count(file), 0);
    }

    #[test]
    fn join_deduplicates_and_keeps_shorter_path() {
        let (_, file, _) = kinds();
        let mut long = State::new(ObligationSet::new());
        long.path.append(0);
        long.path.append(1);
        let mut short = State::new(ObligationSet::new());
        short.path.append(0);
        let mut open = State::new(ObligationSet::new());
        open.obligations.add(file, site(0));

        let mut set = StateSet::from_state(long);
        assert_eq!(set.join(StateSet::from_state(short.clone())), JoinResult::Changed);
        assert_eq!(set.join(StateSet::from_state(open)), JoinResult::Changed);
        assert_eq!(set.len(), 2);
        assert_eq!(set.join(StateSet::from_state(short)), JoinResult::Unchanged);
        let zero = set.states().find(|s| s.obligations.is_empty()).unwrap();
        assert_eq!(zero.path.len(), 1);
    }

    #[test]
    fn normal_path_state_replaces_exception_path_state() {
        let mut exceptional = State::new(ObligationSet::new());
        exceptional.on_exception_path = true;
        let mut normal = State::new(ObligationSet::new());
        normal.path.append(3);
        normal.path.append(4);

        let mut set = StateSet::from_state(exceptional);
        assert_eq!(set.join(StateSet::from_state(normal)), JoinResult::Changed);
        assert!(set.states().all(|s| !s.on_exception_path));
    }

    #[test]
    fn add_inside_visited_block_aborts() {
        let (factory, file, _) = kinds();
        let action = ObligationAction { op: ActionOp::Add, kind: file, confidence: Confidence::Strong };
        let set = StateSet::entry().append_block(0).append_block(1);
        let err = set.apply(Location::new(1, 0), &[action], &factory).unwrap_err();
        assert_eq!(
            err,
            Unanalyzable::ObligationInLoop { obligation: "java.io.FileInputStream".to_string(), block: 1 }
        );
    }

    #[test]
    fn escape_never_goes_negative() {
        let (factory, file, _) = kinds();
        let escape = ObligationAction { op: ActionOp::Escape, kind: file, confidence: Confidence::Strong };
        let set = StateSet::entry().apply(Location::new(0, 0), &[escape], &factory).unwrap();
        assert!(set.states().all(|s| s.obligations.is_empty()));
    }
}
