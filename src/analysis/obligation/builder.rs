use std::convert::TryFrom;

use snafu::ResultExt;

use super::factory::{ObligationFactory, ObligationKind};
use super::matcher::Matcher;
use super::policy::{
    Action, AmbiguousParameterSnafu, Confidence, InvalidPatternSnafu, PolicyDatabase, PolicyEntry, PolicyError,
    PolicyRule, UnresolvedObligationSnafu,
};
use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::analysis::core::model::{Annotation, ClassDef, MethodDef, Program};
use crate::analysis::core::signature::{split_camel_case, SignatureParser};
use crate::{roa_debug, roa_warn};

const FILE_STREAMS: &[&str] = &[
    "java.io.FileInputStream",
    "java.io.FileOutputStream",
    "java.io.FileReader",
    "java.io.FileWriter",
];

const NON_ABSORBING_SINKS: &[(&str, &str)] = &[
    ("java.util.Properties", "load"),
    ("java.util.Properties", "loadFromXML"),
    ("java.util.Properties", "store"),
    ("java.util.Properties", "storeToXML"),
    ("java.security.KeyStore", "load"),
    ("java.security.KeyStore", "store"),
];

const INPUT_STREAM: &str = "java.io.InputStream";
const OUTPUT_STREAM: &str = "java.io.OutputStream";
const CONNECTION: &str = "java.sql.Connection";
const STATEMENT: &str = "java.sql.Statement";
const RESULT_SET: &str = "java.sql.ResultSet";
const LOCK: &str = "java.util.concurrent.locks.Lock";

/// Single pre-pass that fills the rule table, then freezes it with [`Self::finish`].
#[derive(Debug, Clone)]
pub struct PolicyDatabaseBuilder {
    factory: ObligationFactory,
    entries: Vec<PolicyEntry>,
    non_absorbing: Vec<(String, String)>,
    heuristic_close_inference: bool,
    saw_annotations: bool,
}

impl PolicyDatabaseBuilder {
    pub fn new(heuristic_close_inference: bool) -> Self {
        Self {
            factory: ObligationFactory::new(),
            entries: Vec::new(),
            non_absorbing: NON_ABSORBING_SINKS
                .iter()
                .map(|(class, name)| (class.to_string(), name.to_string()))
                .collect(),
            heuristic_close_inference,
            saw_annotations: false,
        }
    }

    pub fn with_builtins(heuristic_close_inference: bool) -> Self {
        let mut builder = Self::new(heuristic_close_inference);
        builder.add_builtin_entries();
        builder
    }

    /// Builtins, user rules, then everything the program declares.
    pub fn build<H>(program: &Program, rules: &[PolicyRule], hierarchy: &H, heuristic_close_inference: bool) -> PolicyDatabase
    where
        H: TypeHierarchy + ?Sized,
    {
        let mut builder = Self::with_builtins(heuristic_close_inference);
        if let Err(err) = builder.add_policy_rules(rules) {
            roa_warn!("Ignoring the policy file: {}", err);
        }
        builder.scan_resource_types(program);
        builder.scan_program(program, hierarchy);
        builder.finish()
    }

    pub fn factory(&self) -> &ObligationFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut ObligationFactory {
        &mut self.factory
    }

    pub fn saw_annotations(&self) -> bool {
        self.saw_annotations
    }

    pub fn add_entry(&mut self, entry: PolicyEntry) {
        roa_debug!("Policy entry: {}", entry);
        self.entries.push(entry);
    }

    fn method_entry(class: &str, method: &MethodDef, action: Action, kind: ObligationKind, confidence: Confidence) -> PolicyEntry {
        PolicyEntry::new(
            Matcher::subtype_of(class),
            Matcher::exact(method.name.clone()),
            Matcher::exact(method.signature.clone()),
            method.is_static,
            action,
            kind,
            confidence,
        )
    }

    fn add_simple(&mut self, receiver: Matcher, name: &str, signature: Matcher, is_static: bool, action: Action, kind: ObligationKind) {
        self.add_entry(PolicyEntry::new(
            receiver,
            Matcher::exact(name),
            signature,
            is_static,
            action,
            kind,
            Confidence::Strong,
        ));
    }

    pub fn add_builtin_entries(&mut self) {
        for class in FILE_STREAMS {
            let kind = self.factory.add_obligation(class);
            self.add_simple(Matcher::subtype_of(*class), "<init>", Matcher::Any, false, Action::Add, kind);
            self.add_simple(Matcher::subtype_of(*class), "close", Matcher::exact("()V"), false, Action::Delete, kind);
        }

        let input = self.factory.add_obligation(INPUT_STREAM);
        let output = self.factory.add_obligation(OUTPUT_STREAM);
        self.add_simple(
            Matcher::exact("java.lang.Class"),
            "getResourceAsStream",
            Matcher::Any,
            false,
            Action::Add,
            input,
        );
        self.add_simple(
            Matcher::exact("java.util.logging.StreamHandler"),
            "setOutputStream",
            Matcher::Any,
            false,
            Action::Delete,
            output,
        );
        for class in &["java.io.FileInputStream", "java.io.FileOutputStream"] {
            if let Some(kind) = self.factory.get_obligation_by_name(class) {
                self.add_simple(
                    Matcher::subtype_of(*class),
                    "getChannel",
                    Matcher::exact("()Ljava/nio/channels/FileChannel;"),
                    false,
                    Action::Delete,
                    kind,
                );
            }
        }

        let connection = self.factory.add_obligation(CONNECTION);
        let statement = self.factory.add_obligation(STATEMENT);
        let result_set = self.factory.add_obligation(RESULT_SET);
        match Matcher::regex(r"^.*\)Ljava/sql/Connection;$") {
            Ok(signature) => self.add_simple(
                Matcher::exact("java.sql.DriverManager"),
                "getConnection",
                signature,
                true,
                Action::Add,
                connection,
            ),
            Err(err) => roa_warn!("Built-in getConnection pattern rejected: {}", err),
        }
        for name in &["createStatement", "prepareStatement", "prepareCall"] {
            self.add_simple(Matcher::subtype_of(CONNECTION), name, Matcher::Any, false, Action::Add, statement);
        }
        self.add_simple(Matcher::subtype_of(STATEMENT), "executeQuery", Matcher::Any, false, Action::Add, result_set);
        self.add_simple(Matcher::subtype_of(CONNECTION), "close", Matcher::exact("()V"), false, Action::Delete, connection);
        self.add_simple(Matcher::subtype_of(STATEMENT), "close", Matcher::exact("()V"), false, Action::Delete, statement);
        self.add_simple(Matcher::subtype_of(STATEMENT), "close", Matcher::exact("()V"), false, Action::Delete, result_set);
        self.add_simple(Matcher::subtype_of(RESULT_SET), "close", Matcher::exact("()V"), false, Action::Delete, result_set);

        let lock = self.factory.add_obligation(LOCK);
        self.add_simple(Matcher::subtype_of(LOCK), "lock", Matcher::exact("()V"), false, Action::Add, lock);
        self.add_simple(Matcher::subtype_of(LOCK), "unlock", Matcher::exact("()V"), false, Action::Delete, lock);
    }

    pub fn add_policy_rules(&mut self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        for rule in rules {
            let kind = self.factory.add_obligation(&rule.kind);
            let receiver = Matcher::try_from(&rule.receiver).context(InvalidPatternSnafu { kind: rule.kind.clone() })?;
            let name = Matcher::try_from(&rule.name).context(InvalidPatternSnafu { kind: rule.kind.clone() })?;
            let signature = Matcher::try_from(&rule.signature).context(InvalidPatternSnafu { kind: rule.kind.clone() })?;
            self.add_entry(PolicyEntry::new(
                receiver,
                name,
                signature,
                rule.is_static,
                rule.action,
                kind,
                rule.confidence,
            ));
        }
        Ok(())
    }

    /// Classes annotated as cleanup obligations become obligation kinds.
    pub fn scan_resource_types(&mut self, program: &Program) {
        for class in &program.classes {
            if class.has_annotation(Annotation::CleanupObligation) {
                let kind = self.factory.add_obligation(&class.name);
                roa_debug!("{} is an obligation type ({})", class.name, kind);
            }
        }
    }

    pub fn scan_program<H>(&mut self, program: &Program, hierarchy: &H)
    where
        H: TypeHierarchy + ?Sized,
    {
        for class in &program.classes {
            for method in &class.methods {
                if let Err(err) = self.visit_method(class, method, hierarchy) {
                    roa_warn!("Skipping policy inference for {}: {}", method.full_name(&class.name), err);
                }
            }
        }
    }

    fn observe(&mut self, class: &ClassDef) {
        if class.application {
            self.saw_annotations = true;
        }
    }

    pub fn visit_method<H>(&mut self, class: &ClassDef, method: &MethodDef, hierarchy: &H) -> Result<(), PolicyError>
    where
        H: TypeHierarchy + ?Sized,
    {
        let full_name = method.full_name(&class.name);
        let mut pending = Vec::new();

        for (annotation, action) in &[
            (Annotation::CreatesObligation, Action::Add),
            (Annotation::DischargesObligation, Action::Delete),
        ] {
            if !method.has_annotation(*annotation) {
                continue;
            }
            let kind = self
                .factory
                .kind_for_type(&class.name, hierarchy)
                .or_else(|| method.return_type().and_then(|ty| self.factory.kind_for_type(&ty, hierarchy)));
            match kind {
                Some(kind) => {
                    self.observe(class);
                    pending.push(Self::method_entry(&class.name, method, *action, kind, Confidence::Strong));
                }
                None => return UnresolvedObligationSnafu { method: full_name }.fail(),
            }
        }

        let kinds = self.factory.get_parameter_obligation_types(&method.parameter_types(), hierarchy);
        let resources: Vec<(usize, ObligationKind)> = kinds
            .iter()
            .enumerate()
            .filter_map(|(index, kind)| kind.map(|kind| (index, kind)))
            .collect();

        if method.has_annotation(Annotation::WillClose)
            && !resources.iter().any(|(index, _)| method.param_has_annotation(*index, Annotation::WillClose))
        {
            self.observe(class);
            match resources.as_slice() {
                [] => {}
                [(_, kind)] => pending.push(Self::method_entry(&class.name, method, Action::Delete, *kind, Confidence::Strong)),
                _ => {
                    return AmbiguousParameterSnafu { method: full_name, count: resources.len() }.fail();
                }
            }
        }

        let names_close = split_camel_case(&method.name).iter().any(|word| word == "close");
        let weak_candidate = method.is_constructor()
            || method.is_static
            || names_close
            || SignatureParser::new(&method.signature).mentions("java.io.Closeable");

        for (index, kind) in &resources {
            if method.param_has_annotation(*index, Annotation::WillCloseWhenClosed) {
                self.observe(class);
                let created = if method.is_constructor() {
                    self.factory.kind_for_type(&class.name, hierarchy)
                } else {
                    method.return_type().and_then(|ty| self.factory.kind_for_type(&ty, hierarchy))
                };
                let created = match created {
                    Some(created) => created,
                    None => return UnresolvedObligationSnafu { method: full_name }.fail(),
                };
                pending.push(Self::method_entry(&class.name, method, Action::Delete, *kind, Confidence::Strong));
                pending.push(Self::method_entry(&class.name, method, Action::Add, created, Confidence::Strong));
            } else if method.param_has_annotation(*index, Annotation::WillClose) {
                self.observe(class);
                pending.push(Self::method_entry(&class.name, method, Action::Delete, *kind, Confidence::Strong));
            } else if method.param_has_annotation(*index, Annotation::WillNotClose) {
                self.observe(class);
            } else if self.heuristic_close_inference && weak_candidate {
                pending.push(Self::method_entry(&class.name, method, Action::Delete, *kind, Confidence::Weak));
            }
        }

        if self.heuristic_close_inference && names_close && !method.has_annotation(Annotation::WillClose) {
            let unannotated: Vec<&(usize, ObligationKind)> = resources
                .iter()
                .filter(|(index, _)| !method.has_param_annotations(*index))
                .collect();
            match unannotated.as_slice() {
                [] => {}
                [(_, kind)] if resources.len() == 1 => {
                    pending.push(Self::method_entry(&class.name, method, Action::Delete, *kind, Confidence::Strong))
                }
                _ => {
                    return AmbiguousParameterSnafu { method: full_name, count: resources.len() }.fail();
                }
            }
        }

        for entry in pending {
            self.add_entry(entry);
        }
        Ok(())
    }

    /// Freezes the table. Strict checking holds iff first-party code carried ownership annotations.
    pub fn finish(self) -> PolicyDatabase {
        let strict = self.saw_annotations;
        roa_debug!(
            "Policy database frozen: {} obligations, {} entries, strict = {}",
            self.factory.len(),
            self.entries.len(),
            strict
        );
        PolicyDatabase::new(self.factory, self.entries, self.non_absorbing, strict)
    }
}
