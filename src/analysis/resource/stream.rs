use std::collections::BTreeSet;

use super::frame::ResourceStatus;
use super::tracker::{ResourceCreation, ResourceFactory, ResourceTracker};
use super::ResourceOutcome;
use crate::analysis::core::cfg::{ControlFlowGraph, Location};
use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::instruction::Instruction;
use crate::analysis::core::model::MethodDef;
use crate::analysis::core::value::{ValueId, ValueNumbering};
use crate::analysis::diagnostics::{exception_path_variant, Diagnostic, DiagnosticKind, Priority};
use crate::analysis::obligation::matcher::Matcher;
use crate::roa_trace;

const MAIN_STREAM_BASES: [&str; 2] = ["java.io.InputStream", "java.io.Reader"];

/// Which streams of a procedure wrap which, by index into its creations.
#[derive(Debug, Clone, Default)]
pub struct StreamEscapes {
    /// `(wrapped, wrapper)`: the first stream was passed to the second's constructor.
    edges: Vec<(usize, usize)>,
    /// Wrappers built around a stream the procedure received as a parameter.
    poisoned: BTreeSet<usize>,
}

impl StreamEscapes {
    pub fn collect<G, V, H>(cfg: &G, values: &V, hierarchy: &H, tracker: &ResourceTracker, creations: &[ResourceCreation]) -> Self
    where
        G: ControlFlowGraph + ?Sized,
        V: ValueNumbering + ?Sized,
        H: TypeHierarchy + ?Sized,
    {
        let mut escapes = Self::default();
        if !tracker.wraps_resources {
            return escapes;
        }
        let index_of = |value: ValueId| creations.iter().position(|creation| creation.value == value);

        let mut blocks = cfg.blocks();
        blocks.sort();
        for block in blocks {
            for (index, instruction) in cfg.instructions_of(block).iter().enumerate() {
                let location = Location::new(block, index);
                let invoke = match instruction {
                    Instruction::Invoke(invoke) if invoke.is_constructor() => invoke,
                    _ => continue,
                };
                let wrapper = match invoke
                    .receiver
                    .as_ref()
                    .and_then(|receiver| index_of(values.value_id_at(location, receiver.slot)))
                {
                    Some(wrapper) => wrapper,
                    None => continue,
                };
                for (arg_index, arg) in invoke.args.iter().enumerate() {
                    let value = values.value_id_at(location, arg.slot);
                    if let Some(wrapped) = index_of(value) {
                        if wrapped != wrapper {
                            roa_trace!("Stream at {} escapes into {}", creations[wrapped].location, creations[wrapper].location);
                            escapes.edges.push((wrapped, wrapper));
                        }
                    } else if values.flags(value).parameter
                        && invoke
                            .arg_type(arg_index)
                            .map_or(false, |ty| is_stream_type(tracker, &ty, hierarchy))
                    {
                        escapes.poisoned.insert(wrapper);
                    }
                }
            }
        }
        escapes
    }

    /// Representative of each stream's wrapping class.
    fn classes(&self, len: usize) -> Vec<usize> {
        let mut parent: Vec<usize> = (0..len).collect();
        for (wrapped, wrapper) in &self.edges {
            let a = find(&mut parent, *wrapped);
            let b = find(&mut parent, *wrapper);
            if a != b {
                parent[a] = b;
            }
        }
        (0..len).map(|i| find(&mut parent, i)).collect()
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn is_stream_type<H>(tracker: &ResourceTracker, ty: &str, hierarchy: &H) -> bool
where
    H: TypeHierarchy + ?Sized,
{
    tracker.factories.iter().any(|factory| match factory {
        ResourceFactory::Constructor { base, .. } | ResourceFactory::InstanceFieldLoad { base } => {
            Matcher::subtype_of(base.as_str()).matches_type(ty, hierarchy)
        }
        _ => false,
    })
}

/// Leak reports for the streams still open at the exit of `method`.
///
/// A wrapping class is silent when any member is uninteresting or wraps a
/// parameter, and when any member was closed: closing a wrapper closes
/// what it wraps.
pub fn inspect_streams(method: &MethodDef, name: &str, escapes: &StreamEscapes, outcomes: &[ResourceOutcome]) -> Vec<Diagnostic> {
    let classes = escapes.classes(outcomes.len());
    let silent: BTreeSet<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(index, outcome)| {
            !outcome.creation.is_interesting()
                || escapes.poisoned.contains(index)
                || outcome.status == Some(ResourceStatus::Closed)
        })
        .map(|(index, _)| classes[index])
        .collect();

    outcomes
        .iter()
        .enumerate()
        .filter(|(index, _)| !silent.contains(&classes[*index]))
        .filter_map(|(_, outcome)| {
            let (priority, exception_path) = match outcome.status? {
                ResourceStatus::Open => (Priority::Normal, false),
                ResourceStatus::OpenOnExceptionPath => (Priority::Low, true),
                _ => return None,
            };
            let creation = &outcome.creation;
            if method.is_main() && MAIN_STREAM_BASES.contains(&creation.base.as_str()) {
                return None;
            }
            let bug_type = creation.bug_type.as_deref()?;
            let bug_type = if exception_path { exception_path_variant(bug_type) } else { bug_type };
            let path = if exception_path { " on an exception path" } else { "" };
            Some(Diagnostic {
                kind: DiagnosticKind::Leak,
                bug_type: bug_type.to_string(),
                resource: creation.class.clone(),
                priority,
                exception_path,
                method: name.to_string(),
                creation_site: Some(creation.location),
                contributing: Vec::new(),
                message: format!("{} created at {} may not be closed{}", creation.class, creation.location, path),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::hierarchy::ClassHierarchy;
    use crate::analysis::core::instruction::Operand;
    use crate::analysis::core::model::builder::BodyBuilder;
    use crate::analysis::core::model::MethodBody;
    use crate::analysis::diagnostics::{OS_OPEN_STREAM, OS_OPEN_STREAM_EXCEPTION_PATH};

    const FR: &str = "java.io.FileReader";
    const BR: &str = "java.io.BufferedReader";
    const READER_CTOR: &str = "(Ljava/io/Reader;)V";

    fn outcome(creation: ResourceCreation, status: ResourceStatus) -> ResourceOutcome {
        ResourceOutcome { creation, status: Some(status) }
    }

    fn wrapped_reader() -> MethodBody {
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::new_object(FR, 1),
            Instruction::construct(FR, "(Ljava/lang/String;)V", 1, vec![Operand::new(9)]),
            Instruction::new_object(BR, 2),
            Instruction::construct(BR, READER_CTOR, 2, vec![Operand::new(1)]),
        ]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        b.build(entry, exit)
    }

    #[test]
    fn closing_the_wrapper_silences_the_class() {
        let hierarchy = ClassHierarchy::new();
        let tracker = ResourceTracker::streams();
        let body = wrapped_reader();
        let creations = tracker.find_creations(&body, &body, &hierarchy);
        assert_eq!(creations.len(), 2);
        let escapes = StreamEscapes::collect(&body, &body, &hierarchy, &tracker, &creations);
        let method = MethodDef::new("read", "()V");

        let closed = vec![
            outcome(creations[0].clone(), ResourceStatus::Escaped),
            outcome(creations[1].clone(), ResourceStatus::Closed),
        ];
        assert!(inspect_streams(&method, "C.read()V", &escapes, &closed).is_empty());

        let open = vec![
            outcome(creations[0].clone(), ResourceStatus::Escaped),
            outcome(creations[1].clone(), ResourceStatus::OpenOnExceptionPath),
        ];
        let diagnostics = inspect_streams(&method, "C.read()V", &escapes, &open);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].resource, BR);
        assert_eq!(diagnostics[0].bug_type, OS_OPEN_STREAM_EXCEPTION_PATH);
        assert_eq!(diagnostics[0].priority, Priority::Low);
    }

    #[test]
    fn wrapping_a_parameter_is_not_reported() {
        let hierarchy = ClassHierarchy::new();
        let tracker = ResourceTracker::streams();
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::new_object(BR, 2),
            Instruction::construct(BR, READER_CTOR, 2, vec![Operand::typed(1, "java.io.Reader")]),
        ]);
        let exit = b.block(vec![]);
        b.goto(entry, exit).parameters(vec![0, 1]);
        let body = b.build(entry, exit);
        let creations = tracker.find_creations(&body, &body, &hierarchy);
        let escapes = StreamEscapes::collect(&body, &body, &hierarchy, &tracker, &creations);
        let outcomes = vec![outcome(creations[0].clone(), ResourceStatus::Open)];
        let method = MethodDef::new("wrap", "(Ljava/io/Reader;)V");
        assert!(inspect_streams(&method, "C.wrap(Ljava/io/Reader;)V", &escapes, &outcomes).is_empty());
    }

    #[test]
    fn wrapping_an_uninteresting_stream_is_not_reported() {
        let hierarchy = ClassHierarchy::new();
        let tracker = ResourceTracker::streams();
        let mut b = BodyBuilder::new();
        let entry = b.block(vec![
            Instruction::new_object("java.io.StringReader", 1),
            Instruction::construct("java.io.StringReader", "(Ljava/lang/String;)V", 1, vec![Operand::new(9)]),
            Instruction::new_object(BR, 2),
            Instruction::construct(BR, READER_CTOR, 2, vec![Operand::new(1)]),
        ]);
        let exit = b.block(vec![]);
        b.goto(entry, exit);
        let body = b.build(entry, exit);
        let creations = tracker.find_creations(&body, &body, &hierarchy);
        let escapes = StreamEscapes::collect(&body, &body, &hierarchy, &tracker, &creations);
        let outcomes = vec![
            outcome(creations[0].clone(), ResourceStatus::Escaped),
            outcome(creations[1].clone(), ResourceStatus::Open),
        ];
        let method = MethodDef::new("parse", "()V");
        assert!(inspect_streams(&method, "C.parse()V", &escapes, &outcomes).is_empty());
    }

    #[test]
    fn main_method_input_is_not_reported() {
        let hierarchy = ClassHierarchy::new();
        let tracker = ResourceTracker::streams();
        let body = wrapped_reader();
        let creations = tracker.find_creations(&body, &body, &hierarchy);
        let escapes = StreamEscapes::collect(&body, &body, &hierarchy, &tracker, &creations);
        let outcomes = vec![
            outcome(creations[0].clone(), ResourceStatus::Escaped),
            outcome(creations[1].clone(), ResourceStatus::Open),
        ];

        let main = MethodDef::new("main", "([Ljava/lang/String;)V").static_method();
        assert!(inspect_streams(&main, "C.main([Ljava/lang/String;)V", &escapes, &outcomes).is_empty());

        let other = MethodDef::new("run", "()V");
        let diagnostics = inspect_streams(&other, "C.run()V", &escapes, &outcomes);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].bug_type, OS_OPEN_STREAM);
        assert_eq!(diagnostics[0].creation_site, Some(Location::new(0, 2)));
    }
}
