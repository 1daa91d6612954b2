use super::frame::ResourceStatus;
use super::ResourceOutcome;
use crate::analysis::core::cfg::ControlFlowGraph;
use crate::analysis::core::model::MethodDef;
use crate::analysis::diagnostics::{exception_path_variant, Diagnostic, DiagnosticKind, Priority, UL_UNRELEASED_LOCK};

/// Lock helpers legitimately return with the lock held.
pub fn skips_method(method: &MethodDef) -> bool {
    method.name.to_lowercase().contains("lock")
}

/// Locks still held at the exit of a procedure.
pub fn inspect_locks<G>(cfg: &G, name: &str, outcomes: &[ResourceOutcome]) -> Vec<Diagnostic>
where
    G: ControlFlowGraph + ?Sized,
{
    outcomes
        .iter()
        .filter_map(|outcome| {
            let (priority, exception_path) = match outcome.status? {
                ResourceStatus::Open => (Priority::High, false),
                ResourceStatus::OpenOnExceptionPath => (Priority::Normal, true),
                _ => return None,
            };
            let creation = &outcome.creation;
            // lock(); return; hands the held lock to the caller.
            if cfg
                .next_instruction(creation.location)
                .map_or(false, |(_, next)| next.is_return())
            {
                return None;
            }
            let bug_type = if exception_path { exception_path_variant(UL_UNRELEASED_LOCK) } else { UL_UNRELEASED_LOCK };
            Some(Diagnostic {
                kind: DiagnosticKind::Leak,
                bug_type: bug_type.to_string(),
                resource: creation.class.clone(),
                priority,
                exception_path,
                method: name.to_string(),
                creation_site: Some(creation.location),
                contributing: Vec::new(),
                message: format!("{} acquired at {} is not released on all paths", creation.class, creation.location),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::cfg::Location;
    use crate::analysis::core::hierarchy::ClassHierarchy;
    use crate::analysis::core::instruction::Instruction;
    use crate::analysis::core::model::builder::BodyBuilder;
    use crate::analysis::diagnostics::UL_UNRELEASED_LOCK_EXCEPTION_PATH;
    use crate::analysis::resource::tracker::ResourceTracker;

    const LOCK: &str = "java.util.concurrent.locks.ReentrantLock";

    #[test]
    fn lock_then_return_is_handed_over() {
        let hierarchy = ClassHierarchy::new();
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::get_field("com.example.Gate", "mutex", LOCK, 0, 1),
            Instruction::call_virtual(LOCK, "lock", "()V", 1, vec![], None),
        ]);
        let exit = b.block(vec![Instruction::ret(None)]);
        b.goto(entry, exit);
        let body = b.build(entry, exit);
        let creations = ResourceTracker::locks().find_creations(&body, &body, &hierarchy);
        let outcomes: Vec<ResourceOutcome> = creations
            .into_iter()
            .map(|creation| ResourceOutcome { creation, status: Some(ResourceStatus::Open) })
            .collect();
        assert!(inspect_locks(&body, "Gate.acquire()V", &outcomes).is_empty());
    }

    #[test]
    fn held_lock_priorities() {
        let hierarchy = ClassHierarchy::new();
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::get_field("com.example.Gate", "mutex", LOCK, 0, 1),
            Instruction::call_virtual(LOCK, "lock", "()V", 1, vec![], None),
            Instruction::Nop,
        ]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let body = b.build(entry, exit);
        let creation = ResourceTracker::locks().find_creations(&body, &body, &hierarchy).remove(0);

        let open = vec![ResourceOutcome { creation: creation.clone(), status: Some(ResourceStatus::Open) }];
        let diagnostics = inspect_locks(&body, "Gate.run()V", &open);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].priority, Priority::High);
        assert_eq!(diagnostics[0].creation_site, Some(Location::new(entry, 1)));

        let exceptional = vec![ResourceOutcome { creation, status: Some(ResourceStatus::OpenOnExceptionPath) }];
        let diagnostics = inspect_locks(&body, "Gate.run()V", &exceptional);
        assert_eq!(diagnostics[0].priority, Priority::Normal);
        assert_eq!(diagnostics[0].bug_type, UL_UNRELEASED_LOCK_EXCEPTION_PATH);
    }

    #[test]
    fn lock_helpers_are_skipped() {
        assert!(skips_method(&MethodDef::new("acquireLock", "()V")));
        assert!(skips_method(&MethodDef::new("unlockAll", "()V")));
        assert!(!skips_method(&MethodDef::new("transfer", "()V")));
    }
}
