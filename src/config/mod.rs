//! Option sets for the preconditioners in this crate.

pub mod options;
pub use options::{BddcConfig, BddcOptions};
