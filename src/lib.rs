//! kryst-bddc: BDDC domain decomposition preconditioner with a PETSc-style
//! PC/KSP interface over Faer
//!
//! The operator is given subassembled (`IsMatrix`): one local block per
//! subdomain plus its local-to-global map. `Bddc` builds the interface
//! analysis, primal constraints, local solvers and the (possibly nested)
//! coarse problem from it and plugs into the Krylov drivers through the
//! `Preconditioner` trait. Subdomain-local work runs on a rayon pool when
//! the `rayon` feature is enabled.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use core::*;
pub use error::*;
pub use matrix::*;
pub use preconditioner::*;
pub use solver::*;
pub use utils::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
