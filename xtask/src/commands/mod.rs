pub mod completions;
pub mod man;
