pub mod analysis;
pub mod frame;
pub mod lock;
pub mod stream;
pub mod tracker;

use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::model::{ClassDef, MethodBody, MethodDef};
use crate::analysis::diagnostics::Diagnostic;
use crate::analysis::obligation::policy::PolicyDatabase;
use crate::components::display::{is_display, Display, StateDisplay};
use crate::{roa_debug, RoaConfig};

use self::analysis::ResourceValueAnalysis;
use self::frame::ResourceStatus;
use self::stream::StreamEscapes;
use self::tracker::{ResourceCreation, ResourceTracker};

/// A tracked resource with its status at the procedure exit; `None` when
/// the exit is unreachable or the analysis gave up.
#[derive(Debug, Clone)]
pub struct ResourceOutcome {
    pub creation: ResourceCreation,
    pub status: Option<ResourceStatus>,
}

/// Single-resource detectors for streams and locks.
pub struct ResourceDetector<'a, H: ?Sized> {
    database: &'a PolicyDatabase,
    hierarchy: &'a H,
    config: RoaConfig,
    streams: ResourceTracker,
    locks: ResourceTracker,
}

impl<'a, H> ResourceDetector<'a, H>
where
    H: TypeHierarchy + ?Sized,
{
    pub fn new(database: &'a PolicyDatabase, hierarchy: &'a H, config: RoaConfig) -> Self {
        Self {
            database,
            hierarchy,
            config,
            streams: ResourceTracker::streams(),
            locks: ResourceTracker::locks(),
        }
    }

    fn outcomes(&self, name: &str, body: &MethodBody, tracker: &ResourceTracker, creations: Vec<ResourceCreation>) -> Vec<ResourceOutcome> {
        creations
            .into_iter()
            .map(|creation| {
                let analysis =
                    ResourceValueAnalysis::new(body, body, self.hierarchy, tracker, &creation).with_sinks(self.database);
                let status = match analysis.analyze(self.config.max_iterations()) {
                    Ok(result) => {
                        if self.config.state_display() == StateDisplay::Verbose || is_display() {
                            for (block, facts) in result.iter() {
                                roa_debug!("{} {} bb{}: {}", name, creation.location, block, facts.result.display());
                            }
                        }
                        result.result_fact(body.exit).map(|frame| frame.status())
                    }
                    Err(err) => {
                        roa_debug!("Skipping {} at {} in {}: {}", creation.class, creation.location, name, err);
                        None
                    }
                };
                ResourceOutcome { creation, status }
            })
            .collect()
    }

    pub fn check_procedure(&self, class: &ClassDef, method: &MethodDef) -> Vec<Diagnostic> {
        let body = match &method.body {
            Some(body) => body,
            None => return Vec::new(),
        };
        let name = method.full_name(&class.name);
        let mut diagnostics = Vec::new();

        if self.config.streams() {
            let creations = self.streams.find_creations(body, body, self.hierarchy);
            if !creations.is_empty() {
                let escapes = StreamEscapes::collect(body, body, self.hierarchy, &self.streams, &creations);
                let outcomes = self.outcomes(&name, body, &self.streams, creations);
                diagnostics.extend(stream::inspect_streams(method, &name, &escapes, &outcomes));
            }
        }

        if self.config.locks() && !lock::skips_method(method) {
            let creations = self.locks.find_creations(body, body, self.hierarchy);
            if !creations.is_empty() {
                let outcomes = self.outcomes(&name, body, &self.locks, creations);
                diagnostics.extend(lock::inspect_locks(body, &name, &outcomes));
            }
        }

        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::hierarchy::ClassHierarchy;
    use crate::analysis::core::instruction::{Instruction, Operand};
    use crate::analysis::core::model::builder::BodyBuilder;
    use crate::analysis::diagnostics::{Priority, ODR_OPEN_DATABASE_RESOURCE, OS_OPEN_STREAM, UL_UNRELEASED_LOCK};
    use crate::analysis::obligation::builder::PolicyDatabaseBuilder;

    const LOCK: &str = "java.util.concurrent.locks.ReentrantLock";

    fn detect(class: &ClassDef) -> Vec<Diagnostic> {
        let hierarchy = ClassHierarchy::new();
        let database = PolicyDatabaseBuilder::with_builtins(true).finish();
        let detector = ResourceDetector::new(&database, &hierarchy, RoaConfig::default());
        class
            .methods
            .iter()
            .flat_map(|method| detector.check_procedure(class, method))
            .collect()
    }

    #[test]
    fn unclosed_reader_is_reported() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::new_object("java.io.FileReader", 1),
            Instruction::construct("java.io.FileReader", "(Ljava/lang/String;)V", 1, vec![Operand::new(9)]),
            Instruction::call_virtual("java.io.FileReader", "read", "()I", 1, vec![], Some(3)),
        ]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let method = MethodDef::new("first", "()I").with_body(b.build(entry, exit));
        let class = ClassDef::new("com.example.Files").with_method(method);

        let diagnostics = detect(&class);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].bug_type, OS_OPEN_STREAM);
        assert_eq!(diagnostics[0].priority, Priority::Normal);
    }

    #[test]
    fn unclosed_connection_is_a_database_resource() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::call_static(
            "java.sql.DriverManager",
            "getConnection",
            "(Ljava/lang/String;)Ljava/sql/Connection;",
            vec![Operand::new(0)],
            Some(1),
        )]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let method = MethodDef::new("connect", "(Ljava/lang/String;)V").static_method().with_body(b.build(entry, exit));
        let class = ClassDef::new("com.example.Dao").with_method(method);

        let diagnostics = detect(&class);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].bug_type, ODR_OPEN_DATABASE_RESOURCE);
        assert_eq!(diagnostics[0].resource, "java.sql.Connection");
    }

    #[test]
    fn lock_released_only_on_one_branch() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::get_field("com.example.Account", "mutex", LOCK, 0, 1),
            Instruction::call_virtual(LOCK, "lock", "()V", 1, vec![], None),
            Instruction::Branch,
        ]);
        let release = b.block(vec![Instruction::call_virtual(LOCK, "unlock", "()V", 1, vec![], None)]);
        let exit = b.block(vec![Instruction::ret(None)]);
        b.branch(entry, release, exit).goto(release, exit);
        let method = MethodDef::new("withdraw", "()V").with_body(b.build(entry, exit));
        let helper = MethodDef::new("lockAccount", "()V").with_body(b.build(entry, exit));
        let class = ClassDef::new("com.example.Account").with_method(method).with_method(helper);

        let diagnostics = detect(&class);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].bug_type, UL_UNRELEASED_LOCK);
        assert_eq!(diagnostics[0].priority, Priority::High);
        assert_eq!(diagnostics[0].method, "com.example.Account.withdraw()V");
    }
}
