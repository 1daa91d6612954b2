use std::collections::BTreeMap;

use super::factory::{ObligationFactory, ObligationKind};
use super::policy::Confidence;
use super::state::StateSet;
use crate::analysis::core::cfg::Location;
use crate::analysis::diagnostics::{
    exception_path_variant, Diagnostic, DiagnosticKind, Priority, OBL_DOUBLE_RELEASE, OBL_UNSATISFIED_OBLIGATION,
};

#[derive(Debug, Clone)]
struct Finding {
    count: i32,
    confidence: Confidence,
    exception_only: bool,
    contributing: Vec<Location>,
}

/// Turns the exit fact of a solved procedure into leak and double-release reports,
/// one per obligation kind and creation site.
pub fn check_exit(exit_fact: &StateSet, factory: &ObligationFactory, method: &str) -> Vec<Diagnostic> {
    let mut findings: BTreeMap<(ObligationKind, bool, Location), Finding> = BTreeMap::new();
    for state in exit_fact.states() {
        for (kind, count) in state.obligations.nonzero() {
            let provenance = match state.obligations.provenance(kind) {
                Some(provenance) => *provenance,
                None => continue,
            };
            let key = (kind, count > 0, provenance.location);
            let finding = findings.entry(key).or_insert_with(|| Finding {
                count,
                confidence: provenance.confidence,
                exception_only: true,
                contributing: state.path.blocks().iter().map(|block| Location::block_start(*block)).collect(),
            });
            finding.exception_only &= state.on_exception_path;
            if count.abs() > finding.count.abs() {
                finding.count = count;
            }
        }
    }

    findings
        .into_iter()
        .filter(|(_, finding)| finding.confidence == Confidence::Strong)
        .map(|((kind, leak, site), finding)| {
            let resource = factory.name(kind).to_string();
            let (diagnostic_kind, bug_type, message) = if leak {
                let bug_type = if finding.exception_only {
                    exception_path_variant(OBL_UNSATISFIED_OBLIGATION)
                } else {
                    OBL_UNSATISFIED_OBLIGATION
                };
                let message = format!("{} obligation(s) to clean up {} not satisfied", finding.count, resource);
                (DiagnosticKind::Leak, bug_type, message)
            } else {
                let message = format!("{} released {} more time(s) than acquired", resource, -finding.count);
                (DiagnosticKind::DoubleRelease, OBL_DOUBLE_RELEASE, message)
            };
            let priority = if finding.exception_only { Priority::Normal.lower() } else { Priority::Normal };
            Diagnostic {
                kind: diagnostic_kind,
                bug_type: bug_type.to_string(),
                resource,
                priority,
                exception_path: finding.exception_only,
                method: method.to_string(),
                creation_site: Some(site),
                contributing: finding.contributing,
                message,
            }
        })
        .collect()
}
