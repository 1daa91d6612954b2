pub mod action_cache;
pub mod builder;
pub mod check_bugs;
pub mod engine;
pub mod factory;
pub mod matcher;
pub mod policy;
pub mod state;

use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::model::{Annotation, ClassDef, MethodDef};
use crate::analysis::diagnostics::{Diagnostic, DiagnosticKind, Priority, OBL_UNANALYZABLE};
use crate::components::display::{is_display, Display, StateDisplay};
use crate::{roa_debug, RoaConfig};

use self::action_cache::ActionOp;
use self::engine::ObligationAnalysis;
use self::factory::ObligationKind;
use self::policy::PolicyDatabase;

/// Runs the obligation engine over single procedures against a frozen policy database.
pub struct ObligationDetector<'a, H: ?Sized> {
    database: &'a PolicyDatabase,
    hierarchy: &'a H,
    config: RoaConfig,
}

impl<'a, H> ObligationDetector<'a, H>
where
    H: TypeHierarchy + ?Sized,
{
    pub fn new(database: &'a PolicyDatabase, hierarchy: &'a H, config: RoaConfig) -> Self {
        Self { database, hierarchy, config }
    }

    /// Parameters the method promises to close are outstanding from its first instruction.
    fn entry_obligations(&self, method: &MethodDef) -> Vec<ObligationKind> {
        let kinds = self
            .database
            .factory()
            .get_parameter_obligation_types(&method.parameter_types(), self.hierarchy);
        kinds
            .into_iter()
            .enumerate()
            .filter(|(index, _)| method.param_has_annotation(*index, Annotation::WillClose))
            .filter_map(|(_, kind)| kind)
            .collect()
    }

    pub fn check_procedure(&self, class: &ClassDef, method: &MethodDef) -> Vec<Diagnostic> {
        let body = match &method.body {
            Some(body) => body,
            None => return Vec::new(),
        };
        let name = method.full_name(&class.name);
        let return_type = method.return_type();
        let analysis = ObligationAnalysis::new(
            body,
            body,
            self.database,
            self.hierarchy,
            &self.config,
            return_type.as_deref(),
        )
        .with_entry_obligations(self.entry_obligations(method));

        if !analysis.cache().has_op(ActionOp::Add) && analysis.entry_obligations().is_empty() {
            return Vec::new();
        }

        match analysis.analyze() {
            Ok(result) => {
                if self.config.state_display() == StateDisplay::Verbose || is_display() {
                    roa_debug!("{}:\n{}", name, body.display());
                    for (block, facts) in result.iter() {
                        roa_debug!("{} bb{}: {}", name, block, facts.result.display());
                    }
                }
                match result.result_fact(body.exit) {
                    Some(exit) => check_bugs::check_exit(exit, self.database.factory(), &name),
                    None => Vec::new(),
                }
            }
            Err(err) => {
                roa_debug!("Giving up on {}: {}", name, err);
                vec![Diagnostic {
                    kind: DiagnosticKind::UnreleasableAnalysis,
                    bug_type: OBL_UNANALYZABLE.to_string(),
                    resource: String::new(),
                    priority: Priority::Low,
                    exception_path: false,
                    method: name,
                    creation_site: None,
                    contributing: Vec::new(),
                    message: err.to_string(),
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::hierarchy::ClassHierarchy;
    use crate::analysis::core::instruction::{Instruction, Operand};
    use crate::analysis::core::model::builder::BodyBuilder;
    use crate::analysis::core::model::Program;
    use crate::analysis::obligation::builder::PolicyDatabaseBuilder;

    const FIS: &str = "java.io.FileInputStream";

    fn detect(program: &Program) -> Vec<Diagnostic> {
        let hierarchy = ClassHierarchy::from_program(program);
        let database = PolicyDatabaseBuilder::build(program, &[], &hierarchy, true);
        let detector = ObligationDetector::new(&database, &hierarchy, RoaConfig::default());
        program
            .procedures()
            .into_iter()
            .flat_map(|(class, method)| detector.check_procedure(class, method))
            .collect()
    }

    #[test]
    fn will_close_parameter_must_be_closed() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        let exit = b.block(vec![]);
        b.goto(entry, exit).parameters(vec![0]);
        let method = MethodDef::new("consume", "(Ljava/io/FileInputStream;)V")
            .static_method()
            .annotate_param(0, Annotation::WillClose)
            .with_body(b.build(entry, exit));
        let program = Program::new(vec![ClassDef::new("com.example.Sink").with_method(method)]);

        let diagnostics = detect(&program);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Leak);
        assert_eq!(diagnostics[0].resource, FIS);
    }

    fn looping(body: Vec<Instruction>) -> Program {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::Nop]);
        let head = b.block(vec![Instruction::Branch]);
        let body = b.block(body);
        let exit = b.block(vec![]);
        b.goto(entry, head).branch(head, body, exit).goto(body, head);
        let method = MethodDef::new("run", "()V").with_body(b.build(entry, exit));
        Program::new(vec![ClassDef::new("com.example.Loop").with_method(method)])
    }

    #[test]
    fn loop_acquisition_becomes_a_note() {
        let program = looping(vec![
            Instruction::new_object(FIS, 1),
            Instruction::construct(FIS, "(Ljava/lang/String;)V", 1, vec![Operand::new(2)]),
        ]);

        let diagnostics = detect(&program);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnreleasableAnalysis);
        assert!(!diagnostics[0].is_bug());
    }

    #[test]
    fn balanced_loop_body_converges() {
        let program = looping(vec![
            Instruction::new_object(FIS, 1),
            Instruction::construct(FIS, "(Ljava/lang/String;)V", 1, vec![Operand::new(2)]),
            Instruction::call_virtual(FIS, "close", "()V", 1, vec![], None),
        ]);
        assert!(detect(&program).is_empty());
    }

    #[test]
    fn procedures_without_acquisitions_are_skipped() {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![Instruction::call_virtual(FIS, "close", "()V", 1, vec![], None)]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let method = MethodDef::new("close", "()V").with_body(b.build(entry, exit));
        let program = Program::new(vec![ClassDef::new("com.example.Holder").with_method(method)]);
        assert!(detect(&program).is_empty());
    }
}
