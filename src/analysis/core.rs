pub mod cfg;
pub mod dataflow;
pub mod hierarchy;
pub mod instruction;
pub mod model;
pub mod signature;
pub mod value;
