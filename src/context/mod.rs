//! Context types tying an operator, a preconditioner and a Krylov method
//! together.
//!
//! - [`ksp_context`]: `KspContext`, the solve driver that brackets the
//!   iteration with the preconditioner's pre/post-solve hooks.
//!
//! # References
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

pub mod ksp_context;
pub use ksp_context::{KspContext, SolverKind};
