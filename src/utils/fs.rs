use std::fs;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use walkdir::WalkDir;

use crate::analysis::core::model::Program;
use crate::analysis::obligation::policy::PolicyRule;
use crate::roa_debug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LoadError {
    #[snafu(display("cannot read program file {}: {}", path.display(), source))]
    ReadProgram { path: PathBuf, source: std::io::Error },
    #[snafu(display("cannot parse program file {}: {}", path.display(), source))]
    ParseProgram { path: PathBuf, source: serde_json::Error },
    #[snafu(display("cannot read policy file {}: {}", path.display(), source))]
    ReadPolicy { path: PathBuf, source: std::io::Error },
    #[snafu(display("cannot parse policy file {}: {}", path.display(), source))]
    ParsePolicy { path: PathBuf, source: serde_json::Error },
    #[snafu(display("cannot walk {}: {}", path.display(), source))]
    WalkDirectory { path: PathBuf, source: walkdir::Error },
}

pub fn roa_read_program<P: AsRef<Path>>(path: P) -> Result<Program, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).context(ReadProgramSnafu { path })?;
    serde_json::from_str(&text).context(ParseProgramSnafu { path })
}

/// Program files named on the command line; directories contribute every `*.json` below them.
pub fn roa_collect_programs<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>, LoadError> {
    let root = root.as_ref();
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.context(WalkDirectorySnafu { path: root })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().map_or(false, |ext| ext == "json") {
            roa_debug!("Found program file {}", path.display());
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Loads and merges every program under `roots` into one.
pub fn roa_load_programs<P: AsRef<Path>>(roots: &[P]) -> Result<Program, LoadError> {
    let mut program = Program::default();
    for root in roots {
        for file in roa_collect_programs(root)? {
            program.merge(roa_read_program(&file)?);
        }
    }
    Ok(program)
}

pub fn roa_read_policy<P: AsRef<Path>>(path: P) -> Result<Vec<PolicyRule>, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).context(ReadPolicySnafu { path })?;
    serde_json::from_str(&text).context(ParsePolicySnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_read_error() {
        let err = roa_read_program("/nonexistent/roa/program.json").unwrap_err();
        assert!(matches!(err, LoadError::ReadProgram { .. }));
        assert!(err.to_string().contains("/nonexistent/roa/program.json"));
    }

    #[test]
    fn malformed_policy_is_a_parse_error() {
        let path = std::env::temp_dir().join(format!("roa-policy-{}.json", std::process::id()));
        fs::write(&path, "[{\"type\": 3}]").unwrap();
        let err = roa_read_policy(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(matches!(err, LoadError::ParsePolicy { .. }));
    }
}
