pub mod core;
pub mod diagnostics;
pub mod obligation;
pub mod resource;
