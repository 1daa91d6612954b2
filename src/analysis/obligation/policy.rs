use std::collections::BTreeMap;
use std::fmt;

use snafu::Snafu;

use super::factory::{ObligationFactory, ObligationKind};
use super::matcher::{Matcher, MatcherSpec};
use crate::analysis::core::hierarchy::TypeHierarchy;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Add,
    Delete,
}

/// Strong entries come from the built-in table or annotations; weak ones from heuristics.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Weak,
    Strong,
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Strong
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PolicyError {
    #[snafu(display("cannot infer the obligation created by {}", method))]
    UnresolvedObligation { method: String },
    #[snafu(display("{} has {} resource parameters and no way to tell which one it discharges", method, count))]
    AmbiguousParameter { method: String, count: usize },
    #[snafu(display("invalid matcher pattern in policy rule for {}: {}", kind, source))]
    InvalidPattern { kind: String, source: regex::Error },
}

/// One declarative rule: calls matching the three matchers and the static flag
/// add or delete one obligation.
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    pub receiver: Matcher,
    pub name: Matcher,
    pub signature: Matcher,
    pub is_static: bool,
    pub action: Action,
    pub kind: ObligationKind,
    pub confidence: Confidence,
}

impl PolicyEntry {
    pub fn new(
        receiver: Matcher,
        name: Matcher,
        signature: Matcher,
        is_static: bool,
        action: Action,
        kind: ObligationKind,
        confidence: Confidence,
    ) -> Self {
        Self { receiver, name, signature, is_static, action, kind, confidence }
    }

    pub fn matches<H>(&self, receiver_type: &str, method_name: &str, signature: &str, is_static: bool, hierarchy: &H) -> bool
    where
        H: TypeHierarchy + ?Sized,
    {
        self.is_static == is_static
            && self.name.matches_str(method_name)
            && self.signature.matches_str(signature)
            && self.receiver.matches_type(receiver_type, hierarchy)
    }
}

impl fmt::Display for PolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}{} -> {:?} {} ({:?})",
            self.receiver,
            self.name,
            self.signature,
            if self.is_static { " static" } else { "" },
            self.action,
            self.kind,
            self.confidence
        )
    }
}

/// The effect of a call site on one obligation kind.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PolicyAction {
    pub action: Action,
    pub kind: ObligationKind,
    pub confidence: Confidence,
}

/// A user rule as written in a JSON policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(rename = "type")]
    pub receiver: MatcherSpec,
    pub name: MatcherSpec,
    #[serde(default)]
    pub signature: MatcherSpec,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    pub action: Action,
    pub kind: String,
    #[serde(default)]
    pub confidence: Confidence,
}

/// The frozen rule table shared by every procedure analysis of a run.
#[derive(Debug, Clone)]
pub struct PolicyDatabase {
    factory: ObligationFactory,
    entries: Vec<PolicyEntry>,
    non_absorbing: Vec<(String, String)>,
    strict: bool,
}

impl PolicyDatabase {
    pub(crate) fn new(
        factory: ObligationFactory,
        entries: Vec<PolicyEntry>,
        non_absorbing: Vec<(String, String)>,
        strict: bool,
    ) -> Self {
        Self { factory, entries, non_absorbing, strict }
    }

    pub fn factory(&self) -> &ObligationFactory {
        &self.factory
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    /// Annotations were observed in first-party code; weak entries no longer apply.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Every applicable action, at most one per (action, kind), carrying the strongest confidence seen.
    pub fn lookup<H>(&self, receiver_type: &str, method_name: &str, signature: &str, is_static: bool, hierarchy: &H) -> Vec<PolicyAction>
    where
        H: TypeHierarchy + ?Sized,
    {
        let mut applicable: BTreeMap<(Action, ObligationKind), Confidence> = BTreeMap::new();
        for entry in &self.entries {
            if self.strict && entry.confidence == Confidence::Weak {
                continue;
            }
            if !entry.matches(receiver_type, method_name, signature, is_static, hierarchy) {
                continue;
            }
            let confidence = applicable.entry((entry.action, entry.kind)).or_insert(entry.confidence);
            if entry.confidence > *confidence {
                *confidence = entry.confidence;
            }
        }
        applicable
            .into_iter()
            .map(|((action, kind), confidence)| PolicyAction { action, kind, confidence })
            .collect()
    }

    /// Passing a resource to this method does not hand over its ownership.
    pub fn is_non_absorbing<H>(&self, class: &str, method_name: &str, hierarchy: &H) -> bool
    where
        H: TypeHierarchy + ?Sized,
    {
        self.non_absorbing.iter().any(|(sink, name)| {
            name == method_name && Matcher::subtype_of(sink.as_str()).matches_type(class, hierarchy)
        })
    }
}

impl fmt::Display for PolicyDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "strict: {}", self.strict)?;
        for kind in self.factory.kinds() {
            writeln!(f, "obligation {} = {}", kind, self.factory.name(kind))?;
        }
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::hierarchy::ClassHierarchy;

    fn close_entry(kind: ObligationKind, class: &str, confidence: Confidence) -> PolicyEntry {
        PolicyEntry::new(
            Matcher::subtype_of(class),
            Matcher::exact("close"),
            Matcher::exact("()V"),
            false,
            Action::Delete,
            kind,
            confidence,
        )
    }

    #[test]
    fn duplicate_entries_apply_once() {
        let hierarchy = ClassHierarchy::new();
        let mut factory = ObligationFactory::new();
        let stream = factory.add_obligation("java.io.InputStream");
        let entries = vec![
            close_entry(stream, "java.io.InputStream", Confidence::Weak),
            close_entry(stream, "java.io.FileInputStream", Confidence::Strong),
        ];
        let database = PolicyDatabase::new(factory, entries, Vec::new(), false);

        let actions = database.lookup("java.io.FileInputStream", "close", "()V", false, &hierarchy);
        assert_eq!(
            actions,
            vec![PolicyAction { action: Action::Delete, kind: stream, confidence: Confidence::Strong }]
        );
    }

    #[test]
    fn strict_mode_ignores_weak_entries() {
        let hierarchy = ClassHierarchy::new();
        let mut factory = ObligationFactory::new();
        let stream = factory.add_obligation("java.io.InputStream");
        let entries = vec![close_entry(stream, "java.io.InputStream", Confidence::Weak)];
        let database = PolicyDatabase::new(factory, entries, Vec::new(), true);
        assert!(database.lookup("java.io.InputStream", "close", "()V", false, &hierarchy).is_empty());
    }

    #[test]
    fn static_flag_must_agree() {
        let hierarchy = ClassHierarchy::new();
        let mut factory = ObligationFactory::new();
        let stream = factory.add_obligation("java.io.InputStream");
        let entries = vec![close_entry(stream, "java.io.InputStream", Confidence::Strong)];
        let database = PolicyDatabase::new(factory, entries, Vec::new(), false);
        assert!(database.lookup("java.io.InputStream", "close", "()V", true, &hierarchy).is_empty());
    }

    #[test]
    fn policy_rule_parses_with_defaults() {
        let rule: PolicyRule = serde_json::from_str(
            r#"{"type": {"subtype": "com.example.Pool"}, "name": {"exact": "borrow"}, "action": "add", "kind": "com.example.Pool"}"#,
        )
        .unwrap();
        assert_eq!(rule.signature, MatcherSpec::Any);
        assert!(!rule.is_static);
        assert_eq!(rule.confidence, Confidence::Strong);
    }
}
