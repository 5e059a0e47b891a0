//! Small shared utilities: convergence bookkeeping and graph traversal.

pub mod convergence;
pub mod graph;

pub use convergence::{Convergence, SolveStats};
pub use graph::CsrGraph;
