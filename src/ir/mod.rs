//! Compiled output of the pipeline and its invariant checks.

pub mod types;
pub mod validate;

pub use types::*;
