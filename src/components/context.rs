use stopwatch::Stopwatch;

use crate::analysis::core::hierarchy::ClassHierarchy;
use crate::analysis::core::model::Program;
use crate::analysis::obligation::builder::PolicyDatabaseBuilder;
use crate::analysis::obligation::policy::{PolicyDatabase, PolicyRule};
use crate::{Elapsed, RoaConfig};

/// Everything shared by the procedure analyses of one run. Built once, then
/// only read, so it can be borrowed from every worker.
pub struct RoaGlobalCtxt<'p> {
    program: &'p Program,
    config: RoaConfig,
    hierarchy: ClassHierarchy,
    database: PolicyDatabase,
    elapsed: Elapsed,
}

impl<'p> RoaGlobalCtxt<'p> {
    pub fn new(program: &'p Program, rules: &[PolicyRule], config: RoaConfig) -> Self {
        let sw = Stopwatch::start_new();
        let hierarchy = ClassHierarchy::from_program(program);
        let database = PolicyDatabaseBuilder::build(program, rules, &hierarchy, config.heuristic_close_inference());
        let mut rcx = Self {
            program,
            config,
            hierarchy,
            database,
            elapsed: (0, 0),
        };
        rcx.add_time_build(sw.elapsed_ms());
        rcx
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn config(&self) -> RoaConfig {
        self.config
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hierarchy
    }

    pub fn database(&self) -> &PolicyDatabase {
        &self.database
    }

    pub fn elapsed(&self) -> Elapsed {
        self.elapsed
    }

    pub fn get_time_build(&self) -> i64 {
        self.elapsed.0
    }

    pub fn add_time_build(&mut self, time: i64) {
        self.elapsed.0 += time;
    }

    pub fn get_time_solve(&self) -> i64 {
        self.elapsed.1
    }

    pub fn add_time_solve(&mut self, time: i64) {
        self.elapsed.1 += time;
    }
}
