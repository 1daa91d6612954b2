use std::fmt;

use colorful::{Color, Colorful};

use crate::analysis::core::cfg::Location;
use crate::Elapsed;

pub const OBL_UNSATISFIED_OBLIGATION: &str = "OBL_UNSATISFIED_OBLIGATION";
pub const OBL_UNSATISFIED_OBLIGATION_EXCEPTION_EDGE: &str = "OBL_UNSATISFIED_OBLIGATION_EXCEPTION_EDGE";
pub const OBL_DOUBLE_RELEASE: &str = "OBL_DOUBLE_RELEASE";
pub const OBL_UNANALYZABLE: &str = "OBL_UNANALYZABLE";
pub const OS_OPEN_STREAM: &str = "OS_OPEN_STREAM";
pub const OS_OPEN_STREAM_EXCEPTION_PATH: &str = "OS_OPEN_STREAM_EXCEPTION_PATH";
pub const ODR_OPEN_DATABASE_RESOURCE: &str = "ODR_OPEN_DATABASE_RESOURCE";
pub const ODR_OPEN_DATABASE_RESOURCE_EXCEPTION_PATH: &str = "ODR_OPEN_DATABASE_RESOURCE_EXCEPTION_PATH";
pub const UL_UNRELEASED_LOCK: &str = "UL_UNRELEASED_LOCK";
pub const UL_UNRELEASED_LOCK_EXCEPTION_PATH: &str = "UL_UNRELEASED_LOCK_EXCEPTION_PATH";

/// Bug type reported when the leak only happens along exception paths.
pub fn exception_path_variant(bug_type: &str) -> &str {
    match bug_type {
        OBL_UNSATISFIED_OBLIGATION => OBL_UNSATISFIED_OBLIGATION_EXCEPTION_EDGE,
        OS_OPEN_STREAM => OS_OPEN_STREAM_EXCEPTION_PATH,
        ODR_OPEN_DATABASE_RESOURCE => ODR_OPEN_DATABASE_RESOURCE_EXCEPTION_PATH,
        UL_UNRELEASED_LOCK => UL_UNRELEASED_LOCK_EXCEPTION_PATH,
        other => other,
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Leak,
    DoubleRelease,
    /// The procedure was given up on; informational only.
    UnreleasableAnalysis,
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn lower(self) -> Priority {
        match self {
            Priority::High => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub bug_type: String,
    /// Obligation kind or resource class name.
    pub resource: String,
    pub priority: Priority,
    pub exception_path: bool,
    pub method: String,
    pub creation_site: Option<Location>,
    pub contributing: Vec<Location>,
    pub message: String,
}

impl Diagnostic {
    pub fn is_bug(&self) -> bool {
        self.kind != DiagnosticKind::UnreleasableAnalysis
    }

    fn color(&self) -> Color {
        match (self.kind, self.priority) {
            (DiagnosticKind::UnreleasableAnalysis, _) => Color::LightGray,
            (_, Priority::High) => Color::LightRed,
            (_, Priority::Normal) => Color::Orange1,
            (_, Priority::Low) => Color::Yellow3a,
        }
    }

    pub fn colored(&self) -> String {
        format!("{}", self).color(self.color()).to_string()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {} in {}: {}", self.priority, self.bug_type, self.method, self.message)?;
        if let Some(site) = self.creation_site {
            write!(f, " (created at {})", site)?;
        }
        Ok(())
    }
}

/// Everything found in one procedure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcedureReport {
    pub method: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl ProcedureReport {
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into(), diagnostics: Vec::new() }
    }

    pub fn extend(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn is_bug_free(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_bug)
    }

    pub fn bugs(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|diagnostic| diagnostic.is_bug())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub procedures: Vec<ProcedureReport>,
    /// Annotations were seen in first-party code, so heuristic rules were disabled.
    pub strict: bool,
    /// Milliseconds spent building the policy database and solving procedures.
    pub elapsed: Elapsed,
}

impl AnalysisReport {
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.procedures.iter().flat_map(|report| report.diagnostics.iter())
    }

    pub fn bugs(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics().filter(|diagnostic| diagnostic.is_bug())
    }

    pub fn is_bug_free(&self) -> bool {
        self.procedures.iter().all(ProcedureReport::is_bug_free)
    }

    pub fn output(&self) {
        for report in &self.procedures {
            if report.diagnostics.is_empty() {
                continue;
            }
            println!("{}", report.method.clone().color(Color::LightCyan).bold());
            for diagnostic in &report.diagnostics {
                println!("    {}", diagnostic.colored());
            }
        }
        let bugs = self.bugs().count();
        let summary = format!(
            "{} warning(s) in {} procedure(s), build {}ms, solve {}ms",
            bugs,
            self.procedures.len(),
            self.elapsed.0,
            self.elapsed.1
        );
        if bugs == 0 {
            println!("{}", summary.color(Color::Green));
        } else {
            println!("{}", summary.color(Color::LightRed).bold());
        }
    }
}
