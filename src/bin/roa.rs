use std::env;
use std::fmt::{Display, Formatter};

use roa::analysis::obligation::policy::PolicyRule;
use roa::components::display::StateDisplay;
use roa::components::log::{roa_error_and_exit, Verbosity};
use roa::utils::fs::{roa_load_programs, roa_read_policy};
use roa::{roa_debug, roa_info, start_analyzer_with_policy, RoaConfig};

const USAGE: &str = "usage: roa [-v|-vv] [-json] [-sequential] [-no-heuristics] [-no-obligations] [-no-streams] \
                     [-no-locks] [-policy=<file>] <file-or-dir>...";

#[derive(Default)]
struct RoaArgs {
    config: RoaConfig,
    json: bool,
    policy: Option<String>,
    paths: Vec<String>,
}

impl Display for RoaArgs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} json: {} policy: {:?} paths: {:?}", self.config, self.json, self.policy, self.paths)
    }
}

impl RoaArgs {
    pub fn set_verbose(&mut self) { self.config.set_verbose(Verbosity::Debug); }

    pub fn set_very_verbose(&mut self) {
        self.config.set_verbose(Verbosity::Trace);
        self.config.set_state_display(StateDisplay::Verbose);
    }

    pub fn set_json(&mut self) { self.json = true; }

    pub fn set_policy(&mut self, path: &str) { self.policy = Some(path.to_string()); }

    pub fn push_path(&mut self, path: String) { self.paths.push(path); }
}

fn config_parse() -> RoaArgs {
    let mut roa_args = RoaArgs::default();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" => roa_args.set_verbose(),
            "-vv" => roa_args.set_very_verbose(),
            "-json" => roa_args.set_json(),
            "-sequential" => roa_args.config.set_parallel(false),
            "-no-heuristics" => roa_args.config.set_heuristic_close_inference(false),
            "-no-obligations" => roa_args.config.set_obligations(false),
            "-no-streams" => roa_args.config.set_streams(false),
            "-no-locks" => roa_args.config.set_locks(false),
            "-h" | "-help" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ if arg.starts_with("-policy=") => roa_args.set_policy(&arg["-policy=".len()..]),
            _ if arg.starts_with('-') => roa_error_and_exit(format!("unknown option {}\n{}", arg, USAGE)),
            _ => roa_args.push_path(arg),
        }
    }
    roa_args
}

fn main() {
    let roa_args = config_parse();
    if let Err(err) = roa_args.config.verbose().init_roa_log_system_with_verbosity() {
        eprintln!("Failed to set up ROA log system: {}", err);
        std::process::exit(1);
    }
    roa_debug!("ROA-Args: {}", &roa_args);

    if roa_args.paths.is_empty() {
        roa_error_and_exit(USAGE);
    }

    let program = roa_load_programs(&roa_args.paths).unwrap_or_else(|err| roa_error_and_exit(err.to_string()));
    let rules: Vec<PolicyRule> = match &roa_args.policy {
        Some(path) => roa_read_policy(path).unwrap_or_else(|err| roa_error_and_exit(err.to_string())),
        None => Vec::new(),
    };

    roa_info!("ROA Start");
    let report = start_analyzer_with_policy(&program, &rules, roa_args.config);
    roa_info!("ROA Stop");

    if roa_args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(err) => roa_error_and_exit(format!("cannot serialize the report: {}", err)),
        }
    } else {
        report.output();
    }

    std::process::exit(if report.is_bug_free() { 0 } else { 1 });
}
