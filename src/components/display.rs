use std::env;

use crate::analysis::core::model::MethodBody;
use crate::analysis::obligation::state::{ObligationSet, State, StateSet};
use crate::analysis::resource::frame::ResourceValueFrame;

const NEXT_LINE: &str = "\n";
const PADDING: &str = "    ";

// Debug dumps of the analysis facts. Enable them with -vv or by setting
// ROA_STATE_DISPLAY, then read them at debug level.

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum StateDisplay {
    Disabled,
    Verbose,
}

pub fn is_display() -> bool {
    env::var_os("ROA_STATE_DISPLAY").is_some()
}

// Wrapper over std::fmt::Display for multi-line dumps.
pub trait Display {
    fn display(&self) -> String;
}

impl Display for ObligationSet {
    fn display(&self) -> String {
        let items: Vec<String> = self.nonzero().map(|(kind, count)| format!("{}: {}", kind, count)).collect();
        format!("{{{}}}", items.join(", "))
    }
}

impl Display for State {
    fn display(&self) -> String {
        let mut s = format!("{} via {}", self.obligations.display(), self.path);
        if self.on_exception_path {
            s += " (exception path)";
        }
        s
    }
}

impl Display for StateSet {
    fn display(&self) -> String {
        let mut s = String::new();
        for state in self.states() {
            s += &format!("{}{}{}", NEXT_LINE, PADDING, state.display());
        }
        s
    }
}

impl Display for ResourceValueFrame {
    fn display(&self) -> String {
        format!("{}", self)
    }
}

impl Display for MethodBody {
    fn display(&self) -> String {
        let mut s = String::new();
        for block in &self.blocks {
            s += &format!("bb {} {{{}", block.id, NEXT_LINE);
            for ins in &block.instructions {
                s += &format!("{}{}{}", PADDING, ins, NEXT_LINE);
            }
            s += &format!("}}{}", NEXT_LINE);
        }
        for edge in &self.edges {
            s += &format!("{}{}", edge, NEXT_LINE);
        }
        s
    }
}
