pub mod analysis;
pub mod components;
pub mod utils;

extern crate serde;
extern crate serde_json;

#[macro_use]
extern crate serde_derive;

use rayon::prelude::*;
use stopwatch::Stopwatch;

use crate::analysis::core::model::{ClassDef, MethodDef, Program};
use crate::analysis::diagnostics::{AnalysisReport, ProcedureReport};
use crate::analysis::obligation::policy::PolicyRule;
use crate::analysis::obligation::ObligationDetector;
use crate::analysis::resource::ResourceDetector;
use crate::components::context::RoaGlobalCtxt;
use crate::components::display::StateDisplay;
use crate::components::log::Verbosity;

pub type Elapsed = (i64, i64);

#[derive(Debug, Copy, Clone, Hash)]
struct Detectors {
    obligations: bool,
    streams: bool,
    locks: bool,
}

impl Default for Detectors {
    fn default() -> Self {
        Self { obligations: true, streams: true, locks: true }
    }
}

#[derive(Debug, Copy, Clone, Hash)]
pub struct RoaConfig {
    verbose: Verbosity,
    state_display: StateDisplay,
    detectors: Detectors,
    heuristic_close_inference: bool,
    parallel: bool,
    max_states: usize,
    max_iterations: usize,
}

impl Default for RoaConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Info,
            state_display: StateDisplay::Disabled,
            detectors: Detectors::default(),
            heuristic_close_inference: true,
            parallel: true,
            max_states: 256,
            max_iterations: 10_000,
        }
    }
}

impl RoaConfig {
    pub fn verbose(&self) -> Verbosity { self.verbose }

    pub fn set_verbose(&mut self, verbose: Verbosity) { self.verbose = verbose; }

    pub fn state_display(&self) -> StateDisplay { self.state_display }

    pub fn set_state_display(&mut self, state_display: StateDisplay) { self.state_display = state_display; }

    pub fn heuristic_close_inference(&self) -> bool { self.heuristic_close_inference }

    pub fn set_heuristic_close_inference(&mut self, enable: bool) { self.heuristic_close_inference = enable; }

    pub fn parallel(&self) -> bool { self.parallel }

    pub fn set_parallel(&mut self, parallel: bool) { self.parallel = parallel; }

    pub fn max_states(&self) -> usize { self.max_states }

    pub fn set_max_states(&mut self, max_states: usize) { self.max_states = max_states; }

    pub fn max_iterations(&self) -> usize { self.max_iterations }

    pub fn set_max_iterations(&mut self, max_iterations: usize) { self.max_iterations = max_iterations; }

    pub fn obligations(&self) -> bool { self.detectors.obligations }

    pub fn set_obligations(&mut self, enable: bool) { self.detectors.obligations = enable; }

    pub fn streams(&self) -> bool { self.detectors.streams }

    pub fn set_streams(&mut self, enable: bool) { self.detectors.streams = enable; }

    pub fn locks(&self) -> bool { self.detectors.locks }

    pub fn set_locks(&mut self, enable: bool) { self.detectors.locks = enable; }
}

pub fn run_analyzer<F, R>(name: &str, func: F) -> R
where
    F: FnOnce() -> R,
{
    roa_info!("{} Start", name);
    let res = func();
    roa_info!("{} Done", name);
    res
}

fn check_procedure<'p>(rcx: &RoaGlobalCtxt<'p>, class: &ClassDef, method: &MethodDef) -> ProcedureReport {
    let config = rcx.config();
    let mut report = ProcedureReport::new(method.full_name(&class.name));
    if config.obligations() {
        let detector = ObligationDetector::new(rcx.database(), rcx.hierarchy(), config);
        report.extend(detector.check_procedure(class, method));
    }
    if config.streams() || config.locks() {
        let detector = ResourceDetector::new(rcx.database(), rcx.hierarchy(), config);
        report.extend(detector.check_procedure(class, method));
    }
    report
}

pub fn start_analyzer(program: &Program, config: RoaConfig) -> AnalysisReport {
    start_analyzer_with_policy(program, &[], config)
}

/// Builds the hierarchy and policy database, then checks every procedure against them.
pub fn start_analyzer_with_policy(program: &Program, rules: &[PolicyRule], config: RoaConfig) -> AnalysisReport {
    let mut rcx = run_analyzer("Policy Database", || RoaGlobalCtxt::new(program, rules, config));
    let strict = rcx.database().is_strict();
    roa_debug!("Policy database ({} obligation kinds, strict: {})", rcx.database().factory().len(), strict);

    let sw = Stopwatch::start_new();
    let procedures = rcx.program().procedures();
    let procedures = run_analyzer("Resource Analysis", || {
        if config.parallel() {
            procedures
                .par_iter()
                .map(|(class, method)| check_procedure(&rcx, class, method))
                .collect::<Vec<_>>()
        } else {
            procedures
                .iter()
                .map(|(class, method)| check_procedure(&rcx, class, method))
                .collect::<Vec<_>>()
        }
    });
    rcx.add_time_solve(sw.elapsed_ms());

    roa_info!(
        "Checked {} procedures in {}ms (build {}ms)",
        procedures.len(),
        rcx.get_time_solve(),
        rcx.get_time_build()
    );
    AnalysisReport { procedures, strict, elapsed: rcx.elapsed() }
}
